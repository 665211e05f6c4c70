//! Window module.
//! Finds the game window the board lives in and anchors all coordinates to it.
//! Backed by `xcap::Window`; falls back to the whole virtual screen when the
//! window cannot be found or captured.
//! Also resolves the display pixel ratio once at startup.

use anyhow::{Context, Result};
use image::RgbaImage;
use tracing::{debug, warn};
use xcap::{Monitor, Window};

use crate::capture::monitor_bounds;
use crate::geometry::ScreenRect;

#[derive(Clone, Debug, PartialEq)]
pub struct WindowInfo {
    pub id: u32,
    pub title: String,
    pub app_name: String,
    pub rect: ScreenRect,
}

impl WindowInfo {
    /// Label shown in the selection prompt.
    pub fn label(&self) -> String {
        format!("{} - 0x{:08X}", self.title, self.id)
    }
}

/// Which windows count as game clients in the selection gate.
#[derive(Clone, Debug)]
pub struct WindowFilter {
    /// Case-insensitive substring of the owning application's name.
    pub process_name: String,
    /// Case-insensitive substring the title must contain.
    pub title_marker: String,
}

impl WindowFilter {
    fn matches(&self, window: &WindowInfo) -> bool {
        window.app_name.to_lowercase().contains(&self.process_name.to_lowercase())
            && window.title.to_lowercase().contains(&self.title_marker.to_lowercase())
    }
}

pub trait WindowLocator {
    /// Visible, non-minimized top-level windows.
    fn windows(&self) -> Result<Vec<WindowInfo>>;

    /// Snapshot of one window's content.
    fn capture(&self, id: u32) -> Result<RgbaImage>;

    fn find_by_title(&self, partial: &str) -> Option<WindowInfo> {
        let needle = partial.to_lowercase();
        self.windows()
            .ok()?
            .into_iter()
            .find(|w| w.title.to_lowercase().contains(&needle))
    }

    fn window_rect(&self, id: u32) -> Option<ScreenRect> {
        self.windows().ok()?.into_iter().find(|w| w.id == id).map(|w| w.rect)
    }
}

/// Game client windows matching `filter`, one entry per window, sorted by title.
/// Enumeration failures degrade to an empty list.
pub fn game_candidates(locator: &dyn WindowLocator, filter: &WindowFilter) -> Vec<WindowInfo> {
    let windows = match locator.windows() {
        Ok(windows) => windows,
        Err(e) => {
            warn!("Window enumeration unavailable: {:#}", e);
            return Vec::new();
        }
    };
    let mut seen = std::collections::HashSet::new();
    let mut entries: Vec<WindowInfo> = windows
        .into_iter()
        .filter(|w| filter.matches(w) && w.rect.width > 0 && w.rect.height > 0)
        .filter(|w| seen.insert(w.id))
        .collect();
    entries.sort_by_key(|w| w.title.to_lowercase());
    entries
}

/// Screen area the board corners are expressed in, plus a reference snapshot of it.
pub struct TargetArea {
    pub rect: ScreenRect,
    pub image: RgbaImage,
    /// `None` when we fell back to the full virtual screen.
    pub window: Option<WindowInfo>,
}

/// Anchors on `selected` (or the first window whose title contains `title`),
/// falling back to `fallback` when neither can be located and captured.
pub fn resolve_target(
    locator: &dyn WindowLocator,
    selected: Option<&WindowInfo>,
    title: &str,
    fallback: impl FnOnce() -> Result<(ScreenRect, RgbaImage)>,
) -> Result<TargetArea> {
    let window = match selected {
        Some(w) => Some(w.clone()),
        None => locator.find_by_title(title),
    };
    if let Some(window) = window {
        let rect = locator.window_rect(window.id).unwrap_or(window.rect);
        match locator.capture(window.id) {
            Ok(image) => {
                debug!("Anchored on window '{}' at {:?}", window.title, rect);
                return Ok(TargetArea { rect, image, window: Some(window) });
            }
            Err(e) => warn!("Could not capture window '{}': {:#}", window.title, e),
        }
    }
    let (rect, image) = fallback().context("Failed to capture the virtual screen")?;
    Ok(TargetArea { rect, image, window: None })
}

// *************** xcap implementation ***************

pub struct XcapLocator {
    pixel_ratio: f64,
}

impl XcapLocator {
    pub fn new(pixel_ratio: f64) -> Self {
        Self { pixel_ratio }
    }

    fn info(&self, window: &Window) -> Result<WindowInfo> {
        let scale = |v: f64| (v * self.pixel_ratio).round();
        Ok(WindowInfo {
            id: window.id()?,
            title: window.title()?.trim().to_string(),
            app_name: window.app_name().unwrap_or_default(),
            rect: ScreenRect::new(
                scale(f64::from(window.x()?)) as i32,
                scale(f64::from(window.y()?)) as i32,
                scale(f64::from(window.width()?)) as u32,
                scale(f64::from(window.height()?)) as u32,
            ),
        })
    }
}

impl WindowLocator for XcapLocator {
    fn windows(&self) -> Result<Vec<WindowInfo>> {
        let windows = Window::all().context("Failed to enumerate windows")?;
        Ok(windows
            .iter()
            .filter(|w| !w.is_minimized().unwrap_or(false))
            .filter_map(|w| self.info(w).ok())
            .filter(|w| !w.title.is_empty())
            .collect())
    }

    fn capture(&self, id: u32) -> Result<RgbaImage> {
        let window = Window::all()
            .context("Failed to enumerate windows")?
            .into_iter()
            .find(|w| w.id().ok() == Some(id))
            .with_context(|| format!("Window 0x{:08X} is gone", id))?;
        window.capture_image().context("Failed to capture window image")
    }
}

/// Physical-to-logical ratio of the display. Only high-density macOS screens
/// report logical coordinates; elsewhere the OS already speaks physical pixels.
pub fn detect_pixel_ratio() -> f64 {
    if !cfg!(target_os = "macos") {
        return 1.0;
    }
    let primary = Monitor::all()
        .ok()
        .and_then(|monitors| monitors.into_iter().find(|m| m.is_primary().unwrap_or(false)));
    match primary.and_then(|m| m.scale_factor().ok()) {
        Some(ratio) => f64::from(ratio).max(1.0),
        None => 1.0,
    }
}

/// Size of the primary monitor in physical pixels, used to bound the tile board.
pub fn work_area(pixel_ratio: f64) -> Option<ScreenRect> {
    let monitors = Monitor::all().ok()?;
    let primary = monitors
        .iter()
        .find(|m| m.is_primary().unwrap_or(false))
        .or_else(|| monitors.first())?;
    monitor_bounds(primary, pixel_ratio).ok()
}
