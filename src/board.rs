//! Tile board.
//! The presentation surface the event loop draws into: one square slot per
//! grid node, each showing the current frame of that node's captured sequence
//! with a highlight border.
//! Rendered off-screen; when an output directory is set, `flush` writes
//! `board.png`, `click_map.png` and `corners.png` there whenever they changed
//! (point an image viewer with auto-reload at it).

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::geometry::{BoardCoordinate, Point, ScreenRect};
use crate::history::ClickHistory;
use crate::preview::{render_click_map, render_corner_preview};
use crate::scheduler::FrameSequence;

const BACKGROUND: Rgba<u8> = Rgba([0x11, 0x11, 0x11, 255]);
const BORDER: Rgba<u8> = Rgba([0xff, 0x33, 0x66, 255]);

/// Where the event loop pushes everything the user should see.
pub trait PresentationSink {
    /// Resizes the board to `nodes` (rows, cols) slots of `display_cell` pixels.
    /// Drops all tiles.
    fn layout(&mut self, nodes: (usize, usize), display_cell: u32);

    /// Shows `frame` in the slot of `coord`. Frames are expected at display size.
    fn show_frame(&mut self, coord: BoardCoordinate, frame: &RgbaImage);

    /// Removes every tile.
    fn clear(&mut self);

    fn status(&mut self, message: &str);

    fn corners_changed(&mut self, _corners: &[Point]) {}

    fn history_changed(&mut self, _history: &ClickHistory) {}

    /// Publishes pending changes.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Scales every frame to a `size` x `size` tile once, so animation ticks only copy pixels.
pub fn resize_for_display(frames: &FrameSequence, size: u32) -> FrameSequence {
    let size = size.max(1);
    FrameSequence::new(
        frames
            .frames()
            .iter()
            .map(|frame| {
                if frame.dimensions() == (size, size) {
                    frame.clone()
                } else {
                    imageops::resize(frame, size, size, FilterType::Lanczos3)
                }
            })
            .collect(),
    )
}

pub struct TileBoard {
    canvas: RgbaImage,
    nodes: (usize, usize),
    display_cell: u32,
    reference: RgbaImage,
    origin: ScreenRect,
    click_map: Option<RgbaImage>,
    corners: Option<RgbaImage>,
    out_dir: Option<PathBuf>,
    board_dirty: bool,
    map_dirty: bool,
    corners_dirty: bool,
}

impl TileBoard {
    /// `reference` is the snapshot of the target area whose top-left is `origin`.
    pub fn new(reference: RgbaImage, origin: ScreenRect, out_dir: Option<PathBuf>) -> Result<Self> {
        if let Some(dir) = &out_dir {
            fs::create_dir_all(dir).with_context(|| {
                format!("Failed to create output directory {}", dir.display())
            })?;
        }
        Ok(Self {
            canvas: RgbaImage::from_pixel(1, 1, BACKGROUND),
            nodes: (0, 0),
            display_cell: 1,
            reference,
            origin,
            click_map: None,
            corners: None,
            out_dir,
            board_dirty: false,
            map_dirty: false,
            corners_dirty: false,
        })
    }

    /// Top-left pixel of a node's slot, if the node is on the board.
    pub fn slot(&self, coord: BoardCoordinate) -> Option<(u32, u32)> {
        if coord.row >= self.nodes.0 || coord.col >= self.nodes.1 {
            return None;
        }
        Some((coord.col as u32 * self.display_cell, coord.row as u32 * self.display_cell))
    }

    fn save(&self, image: &RgbaImage, name: &str) -> Result<()> {
        let Some(dir) = &self.out_dir else {
            return Ok(());
        };
        let path = dir.join(name);
        image.save(&path).with_context(|| format!("Failed to save {}", path.display()))
    }
}

impl PresentationSink for TileBoard {
    fn layout(&mut self, nodes: (usize, usize), display_cell: u32) {
        self.nodes = nodes;
        self.display_cell = display_cell.max(1);
        let width = (nodes.1 as u32 * self.display_cell).max(1);
        let height = (nodes.0 as u32 * self.display_cell).max(1);
        self.canvas = RgbaImage::from_pixel(width, height, BACKGROUND);
        self.board_dirty = true;
    }

    fn show_frame(&mut self, coord: BoardCoordinate, frame: &RgbaImage) {
        let Some((x, y)) = self.slot(coord) else {
            return;
        };
        let cell = self.display_cell;
        let resized;
        let tile = if frame.dimensions() == (cell, cell) {
            frame
        } else {
            resized = imageops::resize(frame, cell, cell, FilterType::Triangle);
            &resized
        };
        imageops::replace(&mut self.canvas, tile, i64::from(x), i64::from(y));
        // 2px border
        let outer = Rect::at(x as i32, y as i32).of_size(cell, cell);
        draw_hollow_rect_mut(&mut self.canvas, outer, BORDER);
        if cell > 2 {
            let inner = Rect::at(x as i32 + 1, y as i32 + 1).of_size(cell - 2, cell - 2);
            draw_hollow_rect_mut(&mut self.canvas, inner, BORDER);
        }
        self.board_dirty = true;
    }

    fn clear(&mut self) {
        self.canvas.pixels_mut().for_each(|p| *p = BACKGROUND);
        self.board_dirty = true;
    }

    fn status(&mut self, message: &str) {
        info!("{}", message);
    }

    fn corners_changed(&mut self, corners: &[Point]) {
        self.corners = Some(render_corner_preview(&self.reference, self.origin, corners));
        self.corners_dirty = true;
    }

    fn history_changed(&mut self, history: &ClickHistory) {
        debug!("Click map now has {} ring(s)", history.len());
        self.click_map = (!history.is_empty()).then(|| render_click_map(&self.reference, history));
        self.map_dirty = true;
    }

    fn flush(&mut self) -> Result<()> {
        if self.board_dirty {
            self.save(&self.canvas, "board.png")?;
            self.board_dirty = false;
        }
        if self.map_dirty {
            // An empty history shows the bare reference.
            let map = self
                .click_map
                .clone()
                .unwrap_or_else(|| render_click_map(&self.reference, &ClickHistory::default()));
            self.save(&map, "click_map.png")?;
            self.map_dirty = false;
        }
        if self.corners_dirty {
            if let Some(corners) = &self.corners {
                self.save(corners, "corners.png")?;
            }
            self.corners_dirty = false;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Sink that remembers every call, for driving the event loop in tests.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub layouts: Vec<((usize, usize), u32)>,
        pub frames: Vec<(BoardCoordinate, RgbaImage)>,
        pub statuses: Vec<String>,
        pub clears: usize,
        pub corners: Vec<Vec<Point>>,
        pub history_lengths: Vec<usize>,
        pub flushes: usize,
    }

    impl PresentationSink for RecordingSink {
        fn layout(&mut self, nodes: (usize, usize), display_cell: u32) {
            self.layouts.push((nodes, display_cell));
        }

        fn show_frame(&mut self, coord: BoardCoordinate, frame: &RgbaImage) {
            self.frames.push((coord, frame.clone()));
        }

        fn clear(&mut self) {
            self.clears += 1;
        }

        fn status(&mut self, message: &str) {
            self.statuses.push(message.to_string());
        }

        fn corners_changed(&mut self, corners: &[Point]) {
            self.corners.push(corners.to_vec());
        }

        fn history_changed(&mut self, history: &ClickHistory) {
            self.history_lengths.push(history.len());
        }

        fn flush(&mut self) -> Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    fn board(out_dir: Option<PathBuf>) -> TileBoard {
        let reference = RgbaImage::from_pixel(400, 300, Rgba([10, 20, 30, 255]));
        TileBoard::new(reference, ScreenRect::new(0, 0, 400, 300), out_dir).unwrap()
    }

    #[test]
    fn test_layout_sizes_canvas() {
        let mut board = board(None);
        board.layout((4, 6), 50);
        assert_eq!(board.canvas.dimensions(), (300, 200));
        assert_eq!(board.slot(BoardCoordinate::new(3, 5)), Some((250, 150)));
        assert_eq!(board.slot(BoardCoordinate::new(4, 0)), None);
    }

    #[test]
    fn test_show_frame_places_tile_with_border() {
        let mut board = board(None);
        board.layout((2, 2), 20);
        let tile = RgbaImage::from_pixel(20, 20, Rgba([0, 200, 0, 255]));
        board.show_frame(BoardCoordinate::new(1, 0), &tile);
        let canvas = &board.canvas;
        assert_eq!(canvas.get_pixel(10, 30), &Rgba([0, 200, 0, 255]));
        assert_eq!(canvas.get_pixel(0, 20), &BORDER);
        assert_eq!(canvas.get_pixel(1, 21), &BORDER);
        assert_eq!(canvas.get_pixel(30, 30), &BACKGROUND);
    }

    #[test]
    fn test_show_frame_off_board_is_ignored() {
        let mut board = board(None);
        board.layout((2, 2), 20);
        let tile = RgbaImage::from_pixel(20, 20, Rgba([0, 200, 0, 255]));
        board.show_frame(BoardCoordinate::new(5, 5), &tile);
        assert!(board.canvas.pixels().all(|p| *p == BACKGROUND));
    }

    #[test]
    fn test_clear_restores_background() {
        let mut board = board(None);
        board.layout((2, 2), 20);
        let tile = RgbaImage::from_pixel(20, 20, Rgba([1, 2, 3, 255]));
        board.show_frame(BoardCoordinate::new(0, 0), &tile);
        board.clear();
        assert!(board.canvas.pixels().all(|p| *p == BACKGROUND));
    }

    #[test]
    fn test_resize_for_display() {
        let frames = FrameSequence::new(vec![RgbaImage::new(200, 200), RgbaImage::new(50, 50)]);
        let display = resize_for_display(&frames, 64);
        assert_eq!(display.len(), 2);
        assert!(display.frames().iter().all(|f| f.dimensions() == (64, 64)));
    }

    #[test]
    fn test_flush_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut board = board(Some(dir.path().to_path_buf()));
        board.layout((2, 2), 20);
        board.corners_changed(&[Point::new(10.0, 10.0)]);
        board.history_changed(&ClickHistory::default());
        board.flush().unwrap();
        assert!(dir.path().join("board.png").exists());
        assert!(dir.path().join("corners.png").exists());
        assert!(dir.path().join("click_map.png").exists());
        assert!(board.click_map.is_none());
    }
}
