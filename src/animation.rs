//! Animation driver.
//! Cycles each node's captured frames on a single shared timer. The driver
//! only owns the schedule (one deadline) and the per-node cursors; the event
//! loop sleeps until `deadline()` and calls `tick`.
//! The timer is armed only while some node has frames, so an idle board causes
//! no wake-ups.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::board::PresentationSink;
use crate::geometry::BoardCoordinate;
use crate::scheduler::FrameSequence;

struct Track {
    frames: Arc<FrameSequence>,
    /// Frame shown on the next tick.
    index: usize,
}

pub struct AnimationDriver {
    tracks: BTreeMap<BoardCoordinate, Track>,
    interval: Duration,
    deadline: Option<Instant>,
}

impl AnimationDriver {
    pub fn new(interval: Duration) -> Self {
        Self { tracks: BTreeMap::new(), interval, deadline: None }
    }

    /// Swaps in a node's sequence and rewinds it to frame 0. An empty sequence clears the node.
    pub fn replace(&mut self, coord: BoardCoordinate, frames: Arc<FrameSequence>) {
        if frames.is_empty() {
            self.tracks.remove(&coord);
            return;
        }
        self.tracks.insert(coord, Track { frames, index: 0 });
    }

    /// Arms the timer if there is something to animate and it is not already armed.
    /// Returns whether a new deadline was set.
    pub fn ensure_armed(&mut self, now: Instant) -> bool {
        if self.deadline.is_some() || self.tracks.is_empty() {
            return false;
        }
        self.deadline = Some(now + self.interval);
        true
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Pushes every node's current frame to `sink` and advances its cursor.
    /// Re-arms only if something was shown; returns the number of frames pushed.
    pub fn tick(&mut self, now: Instant, sink: &mut dyn PresentationSink) -> usize {
        self.deadline = None;
        let mut shown = 0;
        for (coord, track) in self.tracks.iter_mut() {
            let len = track.frames.len();
            if len == 0 {
                continue;
            }
            let idx = track.index % len;
            if let Some(frame) = track.frames.get(idx) {
                sink.show_frame(*coord, frame);
                shown += 1;
            }
            track.index = (idx + 1) % len;
        }
        if shown > 0 {
            self.deadline = Some(now + self.interval);
        }
        shown
    }

    /// Drops all sequences and cancels the pending tick.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.deadline = None;
    }
}
