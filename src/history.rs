//! Session log of applied captures, newest last. Cleared on reset.

use chrono::{DateTime, Local};
use std::sync::Arc;

use crate::geometry::{BoardCoordinate, Point, ScreenRect};
use crate::scheduler::FrameSequence;

#[derive(Clone, Debug)]
pub struct ClickRecord {
    /// 1-based position in the session.
    pub index: usize,
    pub coord: BoardCoordinate,
    /// Node position relative to the target window's top-left corner.
    pub relative_point: (i32, i32),
    pub timestamp: DateTime<Local>,
    pub frames: Arc<FrameSequence>,
}

impl ClickRecord {
    /// Local `HH:MM:SS` of the capture.
    pub fn clock_time(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }
}

#[derive(Debug, Default)]
pub struct ClickHistory {
    entries: Vec<ClickRecord>,
}

impl ClickHistory {
    pub fn push(
        &mut self,
        coord: BoardCoordinate,
        center: Point,
        origin: ScreenRect,
        frames: Arc<FrameSequence>,
    ) -> &ClickRecord {
        let record = ClickRecord {
            index: self.entries.len() + 1,
            coord,
            relative_point: ((center.x as i32) - origin.left, (center.y as i32) - origin.top),
            timestamp: Local::now(),
            frames,
        };
        self.entries.push(record);
        &self.entries[self.entries.len() - 1]
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClickRecord> {
        self.entries.iter()
    }
}
