//! Preview rendering.
//! Draws the corner markers and quad outline over the reference snapshot of
//! the game window, and the click map of the session's captures.
//! Also sizes the tile board so it fits its share of the screen.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut, draw_line_segment_mut};

use crate::geometry::{Point, ScreenRect};
use crate::history::ClickHistory;

pub const CORNER_PREVIEW_SCALE: f64 = 0.25;

const MARKER_RADIUS: i32 = 4;
const OUTLINE: Rgba<u8> = Rgba([255, 0, 0, 255]);
// Corner order is shown by fill color: 1 yellow, 2 cyan, 3 magenta, 4 white.
const CORNER_FILLS: [Rgba<u8>; 4] = [
    Rgba([255, 255, 0, 255]),
    Rgba([0, 255, 255, 255]),
    Rgba([255, 0, 255, 255]),
    Rgba([255, 255, 255, 255]),
];
const CLICK_COLORS: [Rgba<u8>; 5] = [
    Rgba([0xff, 0x52, 0x52, 255]),
    Rgba([0xff, 0xa5, 0x02, 255]),
    Rgba([0x2e, 0xd5, 0x73, 255]),
    Rgba([0x1e, 0x90, 0xff, 255]),
    Rgba([0xa2, 0x9b, 0xfe, 255]),
];
const CLICK_MAP_SIDE: f64 = 260.0;

// Room left around the canvas for the window chrome.
const HORIZONTAL_PADDING: u32 = 20;
const VERTICAL_PADDING: u32 = 40;

/// Largest board canvas allowed on a screen of `area`, given the share `ratio` it may cover.
pub fn board_limits(area: ScreenRect, ratio: f64) -> (u32, u32) {
    let max_w = ((f64::from(area.width) * ratio).round() as u32).max(1);
    let max_h = ((f64::from(area.height) * ratio).round() as u32).max(1);
    (
        max_w.saturating_sub(HORIZONTAL_PADDING).max(1),
        max_h.saturating_sub(VERTICAL_PADDING).max(1),
    )
}

/// Display size of one tile: the capture size, shrunk until `nodes` tiles fit in `limits`.
pub fn fit_display_cell(cell_size: u32, nodes: (usize, usize), limits: (u32, u32)) -> u32 {
    let (rows, cols) = nodes;
    let by_width = limits.0 / (cols.max(1) as u32);
    let by_height = limits.1 / (rows.max(1) as u32);
    cell_size.min(by_width).min(by_height).max(1)
}

fn scaled(image: &RgbaImage, scale: f64) -> RgbaImage {
    let w = ((f64::from(image.width()) * scale) as u32).max(1);
    let h = ((f64::from(image.height()) * scale) as u32).max(1);
    imageops::resize(image, w, h, FilterType::Lanczos3)
}

/// Reference snapshot at 25% with one marker per corner set, outlined once all four exist.
pub fn render_corner_preview(
    reference: &RgbaImage,
    origin: ScreenRect,
    corners: &[Point],
) -> RgbaImage {
    let mut preview = scaled(reference, CORNER_PREVIEW_SCALE);
    let to_preview = |p: &Point| {
        (
            ((p.x - f64::from(origin.left)) * CORNER_PREVIEW_SCALE) as f32,
            ((p.y - f64::from(origin.top)) * CORNER_PREVIEW_SCALE) as f32,
        )
    };
    let points: Vec<(f32, f32)> = corners.iter().map(to_preview).collect();

    if points.len() == 4 {
        for (i, start) in points.iter().enumerate() {
            let end = points[(i + 1) % 4];
            draw_line_segment_mut(&mut preview, *start, end, OUTLINE);
        }
    }
    for (i, (x, y)) in points.iter().enumerate() {
        let center = (*x as i32, *y as i32);
        let fill = CORNER_FILLS[i % CORNER_FILLS.len()];
        draw_filled_circle_mut(&mut preview, center, MARKER_RADIUS, fill);
        draw_hollow_circle_mut(&mut preview, center, MARKER_RADIUS, OUTLINE);
    }
    preview
}

/// Reference snapshot with a colored ring per capture, scaled down to a thumbnail.
pub fn render_click_map(reference: &RgbaImage, history: &ClickHistory) -> RgbaImage {
    let mut base = reference.clone();
    let (w, h) = base.dimensions();
    let radius = (w / 80).max(6) as i32;
    for record in history.iter() {
        let color = CLICK_COLORS[(record.index - 1) % CLICK_COLORS.len()];
        let (rx, ry) = record.relative_point;
        // Three concentric rings make a 3px outline.
        for r in radius - 1..=radius + 1 {
            draw_hollow_circle_mut(&mut base, (rx, ry), r, color);
        }
    }
    let scale = (CLICK_MAP_SIDE / f64::from(w.max(h).max(1))).clamp(0.15, 0.4);
    scaled(&base, scale)
}
