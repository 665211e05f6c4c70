//! Screen capture module
//! Uses `xcap` for cross-platform screenshots.
//! Each capture task opens its own `CaptureProvider` (monitor handles are not
//! shared across threads), grabs the monitor under the requested rect and crops
//! to it.
//! Rects are in physical pixels; monitor bounds reported by the OS are scaled by
//! the pixel ratio resolved at startup.
//! Permissions note: On macOS, grant "Screen & System Audio Recording" permission to
//! the terminal in System Settings > Privacy & Security.

use anyhow::{bail, Context, Result};
use image::{imageops, RgbaImage};
use std::time::Instant;
use thiserror::Error;
use tracing::debug;
use xcap::Monitor;

use crate::geometry::ScreenRect;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no monitor available for region {0:?}")]
    NoMonitor(ScreenRect),
    #[error("region {0:?} lies outside the captured monitor")]
    OutOfBounds(ScreenRect),
    #[error("captured an empty frame")]
    EmptyFrame,
    #[error("capture backend failed: {0}")]
    Backend(#[from] xcap::XCapError),
}

/// Grabs raw frames of a screen rectangle. One instance per capture task.
pub trait CaptureProvider {
    fn grab(&mut self, rect: ScreenRect) -> Result<RgbaImage, CaptureError>;
}

/// Opens fresh providers; shared by the scheduler across worker threads.
pub trait CaptureBackend: Send + Sync + 'static {
    fn open(&self) -> Result<Box<dyn CaptureProvider>, CaptureError>;
}

// *************** xcap implementation ***************

pub struct XcapBackend {
    pixel_ratio: f64,
}

impl XcapBackend {
    pub fn new(pixel_ratio: f64) -> Self {
        Self { pixel_ratio }
    }
}

impl CaptureBackend for XcapBackend {
    fn open(&self) -> Result<Box<dyn CaptureProvider>, CaptureError> {
        let monitors = Monitor::all()?
            .into_iter()
            .filter_map(|monitor| {
                let bounds = monitor_bounds(&monitor, self.pixel_ratio).ok()?;
                Some((monitor, bounds))
            })
            .collect::<Vec<_>>();
        Ok(Box::new(XcapProvider { monitors }))
    }
}

struct XcapProvider {
    monitors: Vec<(Monitor, ScreenRect)>,
}

impl CaptureProvider for XcapProvider {
    fn grab(&mut self, rect: ScreenRect) -> Result<RgbaImage, CaptureError> {
        let start = Instant::now();

        // Prefer the monitor holding the rect's center, else any monitor it touches.
        let cx = i64::from(rect.left) + i64::from(rect.width / 2);
        let cy = i64::from(rect.top) + i64::from(rect.height / 2);
        let (monitor, bounds) = self
            .monitors
            .iter()
            .find(|(_, b)| {
                cx >= i64::from(b.left)
                    && cx < b.right()
                    && cy >= i64::from(b.top)
                    && cy < b.bottom()
            })
            .or_else(|| self.monitors.iter().find(|(_, b)| b.intersect(&rect).is_some()))
            .ok_or(CaptureError::NoMonitor(rect))?;

        let screenshot = monitor.capture_image()?;
        let frame = crop_to_rect(&screenshot, *bounds, rect)?;

        debug!("Capture + crop latency: {:?}", start.elapsed());
        Ok(frame)
    }
}

/// Physical-pixel bounds of a monitor.
pub fn monitor_bounds(monitor: &Monitor, pixel_ratio: f64) -> Result<ScreenRect> {
    let scale = |v: f64| (v * pixel_ratio).round();
    Ok(ScreenRect::new(
        scale(f64::from(monitor.x()?)) as i32,
        scale(f64::from(monitor.y()?)) as i32,
        scale(f64::from(monitor.width()?)) as u32,
        scale(f64::from(monitor.height()?)) as u32,
    ))
}

/// Crops `rect` (screen space) out of a screenshot whose top-left sits at `bounds`.
/// Parts of `rect` outside the screenshot are dropped.
pub fn crop_to_rect(
    screenshot: &RgbaImage,
    bounds: ScreenRect,
    rect: ScreenRect,
) -> Result<RgbaImage, CaptureError> {
    // Trust the pixels we got over the reported monitor size.
    let actual = ScreenRect::new(bounds.left, bounds.top, screenshot.width(), screenshot.height());
    let visible = actual.intersect(&rect).ok_or(CaptureError::OutOfBounds(rect))?;
    let x = (visible.left - actual.left) as u32;
    let y = (visible.top - actual.top) as u32;
    let frame = imageops::crop_imm(screenshot, x, y, visible.width, visible.height).to_image();
    if frame.width() == 0 || frame.height() == 0 {
        return Err(CaptureError::EmptyFrame);
    }
    Ok(frame)
}

/// Screenshot of the whole virtual desktop (all monitors stitched), with its bounds.
/// Used as the reference image when no game window is found.
pub fn capture_virtual_screen(pixel_ratio: f64) -> Result<(ScreenRect, RgbaImage)> {
    let start = Instant::now();

    let monitors = Monitor::all().context("Failed to enumerate monitors")?;
    if monitors.is_empty() {
        bail!("No monitors found");
    }

    let mut shots = Vec::with_capacity(monitors.len());
    for monitor in &monitors {
        let bounds = monitor_bounds(monitor, pixel_ratio)?;
        let image = monitor.capture_image().context(
            "Failed to capture image. \
             On macOS, ensure the terminal has Screen Recording permission",
        )?;
        shots.push((bounds, image));
    }

    let area = shots
        .iter()
        .map(|(bounds, _)| *bounds)
        .reduce(|acc, b| acc.union(&b))
        .context("No monitors found")?;
    let mut canvas = RgbaImage::new(area.width, area.height);
    for (bounds, image) in &shots {
        let x = i64::from(bounds.left - area.left);
        let y = i64::from(bounds.top - area.top);
        imageops::overlay(&mut canvas, image, x, y);
    }
    if canvas.dimensions() == (0, 0) {
        bail!("Captured empty screenshot - possible permission issue or no display");
    }

    debug!("Virtual screen capture latency: {:?}", start.elapsed());
    Ok((area, canvas))
}
