//! Click router.
//! Turns raw global clicks into capture requests: only left presses count,
//! each is re-delivered to the event loop after a short settle delay (so the
//! game's tile flip finishes before the screenshot), then scaled to physical
//! pixels and snapped to the nearest grid node.

use std::time::Duration;
use tokio::sync::mpsc;

use crate::geometry::{logical_to_physical, Grid, Point};
use crate::scheduler::CaptureRequest;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Other,
}

/// A global mouse button event in logical screen coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClickEvent {
    pub position: Point,
    pub button: MouseButton,
    pub pressed: bool,
}

pub struct ClickRouter {
    settle_delay: Duration,
    pixel_ratio: f64,
    settled: mpsc::UnboundedSender<Point>,
}

impl ClickRouter {
    pub fn new(
        settle_delay: Duration,
        pixel_ratio: f64,
        settled: mpsc::UnboundedSender<Point>,
    ) -> Self {
        Self { settle_delay, pixel_ratio, settled }
    }

    pub fn pixel_ratio(&self) -> f64 {
        self.pixel_ratio
    }

    pub fn accepts(event: &ClickEvent) -> bool {
        event.pressed && event.button == MouseButton::Left
    }

    /// Schedules a qualifying click for resolution after the settle delay.
    /// Ignored (returns `false`) for other buttons, releases, or before a grid exists.
    /// Must be called from inside the Tokio runtime.
    pub fn route(&self, event: ClickEvent, grid_ready: bool) -> bool {
        if !grid_ready || !Self::accepts(&event) {
            return false;
        }
        let settled = self.settled.clone();
        let delay = self.settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Loop gone means we are shutting down.
            let _ = settled.send(event.position);
        });
        true
    }

    /// Maps a settled logical click to the capture of its nearest node.
    pub fn resolve(
        &self,
        grid: Option<&Grid>,
        position: Point,
        cell_size: u32,
    ) -> Option<CaptureRequest> {
        let grid = grid?;
        let physical = logical_to_physical(position, self.pixel_ratio);
        let (center, coord) = grid.nearest(physical);
        Some(CaptureRequest { coord, center, cell_size })
    }
}
