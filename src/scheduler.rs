//! Capture scheduler.
//! Runs one capture task per click on a bounded pool of blocking workers and
//! hands each finished `FrameSequence` back to the event loop over a channel.
//! Tasks beyond `max_workers` queue in submission order; nothing is dropped
//! until shutdown, which abandons queued tasks and silences in-flight ones.
//! Two tasks for the same node may overlap; whichever finishes last wins.

use anyhow::{Context, Result};
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::capture::{CaptureBackend, CaptureProvider};
use crate::geometry::{BoardCoordinate, Point, ScreenRect};

/// Ordered frames captured for one node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameSequence {
    frames: Vec<RgbaImage>,
}

impl FrameSequence {
    pub fn new(frames: Vec<RgbaImage>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RgbaImage> {
        self.frames.get(index)
    }

    pub fn frames(&self) -> &[RgbaImage] {
        &self.frames
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CaptureRequest {
    pub coord: BoardCoordinate,
    /// Physical-pixel node position the capture square is centered on.
    pub center: Point,
    pub cell_size: u32,
}

impl CaptureRequest {
    pub fn rect(&self) -> ScreenRect {
        ScreenRect::centered_square(self.center, self.cell_size)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CaptureSettings {
    pub frame_count: usize,
    pub interval: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self { frame_count: 10, interval: Duration::from_millis(200) }
    }
}

/// A finished task. `frames` is empty when every grab failed.
#[derive(Debug)]
pub struct CaptureOutcome {
    pub request: CaptureRequest,
    pub frames: FrameSequence,
    pub failures: usize,
}

/// Grabs `frame_count` frames of `rect`, sleeping between grabs but not after the last.
/// Failed grabs are skipped; returns the frames and the failure count.
pub fn capture_sequence(
    provider: &mut dyn CaptureProvider,
    rect: ScreenRect,
    settings: CaptureSettings,
) -> (FrameSequence, usize) {
    let mut frames = Vec::with_capacity(settings.frame_count);
    let mut failures = 0;
    for idx in 0..settings.frame_count {
        match provider.grab(rect) {
            Ok(frame) => frames.push(frame),
            Err(e) => {
                debug!("Frame {}/{} of {:?} failed: {}", idx + 1, settings.frame_count, rect, e);
                failures += 1;
            }
        }
        if idx + 1 < settings.frame_count {
            thread::sleep(settings.interval);
        }
    }
    (FrameSequence::new(frames), failures)
}

fn run_task(
    backend: &dyn CaptureBackend,
    request: CaptureRequest,
    settings: CaptureSettings,
) -> CaptureOutcome {
    let start = Instant::now();
    let (frames, failures) = match backend.open() {
        Ok(mut provider) => capture_sequence(provider.as_mut(), request.rect(), settings),
        Err(e) => {
            warn!("Could not open capture provider for {}: {}", request.coord, e);
            (FrameSequence::default(), settings.frame_count)
        }
    };
    debug!(
        "Captured {} frame(s) for {} in {:?} ({} failed)",
        frames.len(),
        request.coord,
        start.elapsed(),
        failures
    );
    CaptureOutcome { request, frames, failures }
}

pub struct CaptureScheduler {
    backend: Arc<dyn CaptureBackend>,
    settings: CaptureSettings,
    permits: Arc<Semaphore>,
    completed: mpsc::UnboundedSender<CaptureOutcome>,
    shutting_down: Arc<AtomicBool>,
    runtime: Handle,
}

impl CaptureScheduler {
    /// Must be called from inside a Tokio runtime; tasks are spawned onto it.
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        settings: CaptureSettings,
        max_workers: usize,
        completed: mpsc::UnboundedSender<CaptureOutcome>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().context("Capture scheduler needs a Tokio runtime")?;
        Ok(Self {
            backend,
            settings,
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            completed,
            shutting_down: Arc::new(AtomicBool::new(false)),
            runtime,
        })
    }

    /// Queues a capture task. Returns `false` (and does nothing) once shutdown has begun.
    pub fn submit(&self, request: CaptureRequest) -> bool {
        if self.is_shut_down() {
            debug!("Ignoring capture for {} during shutdown", request.coord);
            return false;
        }
        let permits = Arc::clone(&self.permits);
        let backend = Arc::clone(&self.backend);
        let shutting_down = Arc::clone(&self.shutting_down);
        let completed = self.completed.clone();
        let settings = self.settings;

        self.runtime.spawn(async move {
            // Closed on shutdown, which abandons everything still waiting here.
            let Ok(_permit) = permits.acquire_owned().await else {
                debug!("Abandoned queued capture for {}", request.coord);
                return;
            };
            let task =
                tokio::task::spawn_blocking(move || run_task(backend.as_ref(), request, settings));
            match task.await {
                Ok(outcome) => {
                    if shutting_down.load(Ordering::SeqCst) {
                        debug!("Dropping capture for {} finished after shutdown", request.coord);
                        return;
                    }
                    // Receiver gone means the event loop already exited.
                    let _ = completed.send(outcome);
                }
                Err(e) => warn!("Capture task for {} panicked: {}", request.coord, e),
            }
        });
        true
    }

    /// Stops accepting work, abandons queued tasks, and mutes tasks still running.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.permits.close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}
