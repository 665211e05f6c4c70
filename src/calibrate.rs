//! Calibration module.
//! Manual setup of the board corners: the user hovers each corner of the
//! isometric board and presses Space (see `input`), in order top, right,
//! bottom, left. Enter accepts once all four are set; D brings back the
//! default corners computed from the window ratios.

use thiserror::Error;

use crate::geometry::{Point, Quad};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModeError {
    #[error("4 corners are required, only {found} set")]
    MissingCorners { found: usize },
    #[error("cannot {action} while in {from} mode")]
    InvalidTransition { from: &'static str, action: &'static str },
}

/// Corners being placed in config mode.
#[derive(Clone, Debug)]
pub struct CornerEditor {
    corners: [Option<Point>; 4],
    /// Slot the next Space press fills.
    next: usize,
    defaults: Quad,
}

impl CornerEditor {
    /// Starts with no corner set.
    pub fn new(defaults: Quad) -> Self {
        Self { corners: [None; 4], next: 0, defaults }
    }

    /// Sets the next corner. Returns its 0-based slot, or `None` when all four are set.
    pub fn mark(&mut self, point: Point) -> Option<usize> {
        if self.next >= 4 {
            return None;
        }
        let slot = self.next;
        self.corners[slot] = Some(point);
        self.next += 1;
        Some(slot)
    }

    /// Fills all four corners with the defaults. The next Space press overwrites corner 1.
    pub fn reload_defaults(&mut self) {
        self.corners = self.defaults.corners.map(Some);
        self.next = 0;
    }

    pub fn marked(&self) -> usize {
        self.corners.iter().flatten().count()
    }

    /// Corners set so far, in order.
    pub fn corners(&self) -> Vec<Point> {
        self.corners.iter().flatten().copied().collect()
    }

    pub fn finish(&self) -> Result<Quad, ModeError> {
        match self.corners {
            [Some(c1), Some(c2), Some(c3), Some(c4)] => Ok(Quad::new(c1, c2, c3, c4)),
            _ => Err(ModeError::MissingCorners { found: self.marked() }),
        }
    }

    pub fn prompt(&self) -> String {
        let marked = self.marked();
        if marked == 4 {
            "4/4 corners set: Enter to start, Space to redo from corner 1, D for defaults"
                .to_string()
        } else {
            let next = self.next.min(3) + 1;
            format!("{}/4 corners set: hover corner {} and press Space", marked, next)
        }
    }
}
