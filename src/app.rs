//! Application state and event loop.
//! All mutable state lives in `App` and is only touched from the loop task:
//! input events, settled clicks, finished captures and animation ticks are
//! multiplexed with `tokio::select!` and handled one at a time.
//!
//! Modes: Gate (picking the game window) -> Start (defaults or manual corners)
//! -> Config (placing corners) -> Capture (clicking tiles). Esc quits from any
//! mode.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::animation::AnimationDriver;
use crate::board::{resize_for_display, PresentationSink};
use crate::calibrate::{CornerEditor, ModeError};
use crate::capture::CaptureBackend;
use crate::config::{Config, GridParams};
use crate::geometry::{build_grid, logical_to_physical, Grid, Point, Quad, ScreenRect};
use crate::history::ClickHistory;
use crate::input::{ControlKey, InputEvent};
use crate::preview::fit_display_cell;
use crate::router::ClickRouter;
use crate::scheduler::{CaptureOutcome, CaptureScheduler, CaptureSettings};

/// A confirmed board: the grid built from the corners and the parameters used.
#[derive(Debug)]
pub struct Session {
    pub grid: Grid,
    pub params: GridParams,
}

#[derive(Debug)]
pub enum Mode {
    Gate,
    Start,
    Config(CornerEditor),
    Capture(Session),
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Gate => "window selection",
            Mode::Start => "start",
            Mode::Config(_) => "config",
            Mode::Capture(_) => "capture",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Receiving ends of the loop's channels.
pub struct Inbox {
    input_tx: mpsc::UnboundedSender<InputEvent>,
    input_rx: mpsc::UnboundedReceiver<InputEvent>,
    settled_rx: mpsc::UnboundedReceiver<Point>,
    completed_rx: mpsc::UnboundedReceiver<CaptureOutcome>,
}

impl Inbox {
    /// Sender for the input hook (and anything else that wants to inject keys).
    pub fn input_sender(&self) -> mpsc::UnboundedSender<InputEvent> {
        self.input_tx.clone()
    }
}

pub struct App<S: PresentationSink> {
    mode: Mode,
    config: Config,
    /// Target window (or virtual screen) in physical pixels.
    target: ScreenRect,
    defaults: Quad,
    router: ClickRouter,
    scheduler: CaptureScheduler,
    animation: AnimationDriver,
    history: ClickHistory,
    sink: S,
    board_limits: (u32, u32),
    display_cell: u32,
    quitting: bool,
}

impl<S: PresentationSink> App<S> {
    /// Must be called inside the Tokio runtime the loop will run on.
    pub fn new(
        config: Config,
        target: ScreenRect,
        pixel_ratio: f64,
        backend: Arc<dyn CaptureBackend>,
        sink: S,
        board_limits: (u32, u32),
    ) -> Result<(Self, Inbox)> {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (settled_tx, settled_rx) = mpsc::unbounded_channel();
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();

        let settings = CaptureSettings {
            frame_count: config.capture_frames,
            interval: config.capture_interval(),
        };
        let scheduler =
            CaptureScheduler::new(backend, settings, config.max_capture_workers, completed_tx)?;
        let router = ClickRouter::new(config.click_settle_delay(), pixel_ratio, settled_tx);
        let animation = AnimationDriver::new(config.animation_interval());
        let defaults = Quad::from_ratios(target, &config.default_ratios);

        let app = Self {
            mode: Mode::Gate,
            config,
            target,
            defaults,
            router,
            scheduler,
            animation,
            history: ClickHistory::default(),
            sink,
            board_limits,
            display_cell: 1,
            quitting: false,
        };
        Ok((app, Inbox { input_tx, input_rx, settled_rx, completed_rx }))
    }

    fn invalid(&self, action: &'static str) -> ModeError {
        ModeError::InvalidTransition { from: self.mode.name(), action }
    }

    /// Gate -> Start, once the target area is settled.
    pub fn window_selected(&mut self) -> Result<(), ModeError> {
        if !matches!(self.mode, Mode::Gate) {
            return Err(self.invalid("select a window"));
        }
        self.mode = Mode::Start;
        let message = format!(
            "Target area {}x{} at ({}, {})",
            self.target.width, self.target.height, self.target.left, self.target.top
        );
        self.sink.status(&message);
        Ok(())
    }

    /// Start -> Capture with the corners derived from the configured ratios.
    pub fn use_defaults(&mut self) -> Result<(), ModeError> {
        if !matches!(self.mode, Mode::Start) {
            return Err(self.invalid("use default corners"));
        }
        self.apply_quad(self.defaults);
        Ok(())
    }

    /// Gate or Start -> Config, with no corner set.
    pub fn enter_config(&mut self) -> Result<(), ModeError> {
        if !matches!(self.mode, Mode::Gate | Mode::Start) {
            return Err(self.invalid("configure corners"));
        }
        let editor = CornerEditor::new(self.defaults);
        self.sink.corners_changed(&[]);
        self.sink.status(&editor.prompt());
        self.mode = Mode::Config(editor);
        Ok(())
    }

    /// Sets the next corner at the logical pointer position.
    pub fn mark_corner(&mut self, pointer: Point) -> Result<Option<usize>, ModeError> {
        let physical = logical_to_physical(pointer, self.router.pixel_ratio());
        let Mode::Config(editor) = &mut self.mode else {
            return Err(self.invalid("mark a corner"));
        };
        let slot = editor.mark(physical);
        let corners = editor.corners();
        let prompt = editor.prompt();
        if slot.is_some() {
            self.sink.corners_changed(&corners);
        }
        self.sink.status(&prompt);
        Ok(slot)
    }

    pub fn reload_defaults(&mut self) -> Result<(), ModeError> {
        let Mode::Config(editor) = &mut self.mode else {
            return Err(self.invalid("reload default corners"));
        };
        editor.reload_defaults();
        let corners = editor.corners();
        let prompt = editor.prompt();
        self.sink.corners_changed(&corners);
        self.sink.status(&prompt);
        Ok(())
    }

    /// Config -> Capture. With fewer than four corners nothing changes.
    pub fn confirm_corners(&mut self) -> Result<(), ModeError> {
        let Mode::Config(editor) = &self.mode else {
            return Err(self.invalid("confirm corners"));
        };
        match editor.finish() {
            Ok(quad) => {
                self.apply_quad(quad);
                Ok(())
            }
            Err(e) => {
                warn!("{}", e);
                self.sink.status(&format!("Cannot start: {}", e));
                Err(e)
            }
        }
    }

    fn apply_quad(&mut self, quad: Quad) {
        let params = self.config.grid_params();
        let grid = build_grid(&quad, params.rows, params.cols);
        let nodes = grid.dimensions();
        self.display_cell = fit_display_cell(params.cell_size, nodes, self.board_limits);
        self.animation.reset();
        self.history.clear();

        self.sink.corners_changed(&quad.corners);
        self.sink.layout(nodes, self.display_cell);
        self.sink.history_changed(&self.history);
        let (rows, cols) = grid.cells();
        self.sink.status(&format!(
            "Grid {}x{} ready ({} nodes, {}px captures): \
             click tiles in the game, R to reset, Esc to quit",
            rows,
            cols,
            nodes.0 * nodes.1,
            params.cell_size
        ));
        info!("Board corners {:?}", quad.corners);
        debug!("Grid nodes {:?}", grid.rows());
        self.mode = Mode::Capture(Session { grid, params });
    }

    /// Drops every captured sequence and the click history. Capture mode only.
    pub fn reset(&mut self) -> Result<(), ModeError> {
        if !matches!(self.mode, Mode::Capture(_)) {
            return Err(self.invalid("reset"));
        }
        self.animation.reset();
        self.history.clear();
        self.sink.clear();
        self.sink.history_changed(&self.history);
        self.sink.status("Board reset");
        Ok(())
    }

    /// Starts shutting down. Everything arriving afterwards is ignored.
    pub fn quit(&mut self) {
        if self.quitting {
            return;
        }
        self.quitting = true;
        self.sink.status("Quitting");
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.scheduler.shutdown();
        self.animation.reset();
    }

    pub fn on_input(&mut self, event: InputEvent) -> Flow {
        if self.quitting {
            return Flow::Quit;
        }
        let result = match event {
            InputEvent::Click(click) => {
                let grid_ready = matches!(self.mode, Mode::Capture(_));
                if self.router.route(click, grid_ready) {
                    debug!("Click at ({:.0}, {:.0}) scheduled", click.position.x, click.position.y);
                }
                Ok(())
            }
            InputEvent::Key { key: ControlKey::Quit, .. } => {
                self.quit();
                return Flow::Quit;
            }
            InputEvent::Key { key: ControlKey::MarkCorner, pointer } => {
                self.mark_corner(pointer).map(|_| ())
            }
            InputEvent::Key { key: ControlKey::Confirm, .. } => self.confirm_corners(),
            InputEvent::Key { key: ControlKey::ReloadDefaults, .. } => self.reload_defaults(),
            InputEvent::Key { key: ControlKey::Reset, .. } => self.reset(),
        };
        // Keys are global, so most of them land in the wrong mode.
        if let Err(e @ ModeError::InvalidTransition { .. }) = result {
            debug!("Ignoring key: {}", e);
        }
        Flow::Continue
    }

    /// Resolves a click whose settle delay elapsed and queues its capture.
    pub fn on_click_settled(&mut self, position: Point) {
        if self.quitting {
            return;
        }
        let Mode::Capture(session) = &self.mode else {
            return;
        };
        let cell_size = session.params.cell_size;
        let Some(request) = self.router.resolve(Some(&session.grid), position, cell_size) else {
            return;
        };
        if self.scheduler.submit(request) {
            self.sink.status(&format!("Capturing {}", request.coord));
        }
    }

    /// Applies a finished capture: the node's tile restarts at frame 0 and the click is logged.
    pub fn on_capture(&mut self, outcome: CaptureOutcome, now: Instant) {
        if self.quitting || !matches!(self.mode, Mode::Capture(_)) {
            return;
        }
        let CaptureOutcome { request, frames, failures } = outcome;
        if frames.is_empty() {
            warn!(
                "All {} frame(s) failed for {}, keeping the current tile",
                failures, request.coord
            );
            self.sink.status(&format!("Capture failed for {}", request.coord));
            return;
        }
        let display = Arc::new(resize_for_display(&frames, self.display_cell));
        if let Some(first) = display.get(0) {
            self.sink.show_frame(request.coord, first);
        }
        self.animation.replace(request.coord, display);

        let record =
            self.history.push(request.coord, request.center, self.target, Arc::new(frames));
        let message = format!(
            "#{} {} at {:?} [{}]: {} frame(s)",
            record.index,
            record.coord,
            record.relative_point,
            record.clock_time(),
            record.frames.len()
        );
        self.sink.history_changed(&self.history);
        self.sink.status(&message);
        self.animation.ensure_armed(now);
    }

    pub fn on_tick(&mut self, now: Instant) {
        self.animation.tick(now, &mut self.sink);
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Runs the loop until a Quit key (Esc, or Ctrl-C forwarded by `main`) arrives.
pub async fn run<S: PresentationSink>(app: &mut App<S>, inbox: &mut Inbox) -> Result<()> {
    loop {
        let flow = tokio::select! {
            event = inbox.input_rx.recv() => match event {
                Some(event) => app.on_input(event),
                None => Flow::Quit,
            },
            Some(position) = inbox.settled_rx.recv() => {
                app.on_click_settled(position);
                Flow::Continue
            }
            Some(outcome) = inbox.completed_rx.recv() => {
                app.on_capture(outcome, Instant::now());
                Flow::Continue
            }
            _ = wait_for(app.animation.deadline()) => {
                app.on_tick(Instant::now());
                Flow::Continue
            }
        };
        if let Err(e) = app.sink.flush() {
            warn!("Failed to publish board: {:#}", e);
        }
        if flow == Flow::Quit {
            break;
        }
    }
    app.quit();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::tests::RecordingSink;
    use crate::capture::{CaptureError, CaptureProvider};
    use crate::geometry::BoardCoordinate;
    use crate::router::{ClickEvent, MouseButton};
    use crate::scheduler::FrameSequence;
    use image::{Rgba, RgbaImage};
    use std::time::Duration;

    /// Solid frames whose red channel counts grabs; every grab fails when `broken`.
    struct FakeBackend {
        broken: bool,
    }

    struct FakeProvider {
        grabs: u8,
        broken: bool,
    }

    impl CaptureBackend for FakeBackend {
        fn open(&self) -> Result<Box<dyn CaptureProvider>, CaptureError> {
            Ok(Box::new(FakeProvider { grabs: 0, broken: self.broken }))
        }
    }

    impl CaptureProvider for FakeProvider {
        fn grab(&mut self, rect: ScreenRect) -> Result<RgbaImage, CaptureError> {
            if self.broken {
                return Err(CaptureError::EmptyFrame);
            }
            self.grabs += 1;
            Ok(RgbaImage::from_pixel(rect.width, rect.height, Rgba([self.grabs, 0, 0, 255])))
        }
    }

    fn config() -> Config {
        Config {
            grid_rows: 1,
            grid_cols: 1,
            cell_size: 10,
            capture_frames: 3,
            capture_interval_secs: 0.0,
            ..Config::default()
        }
    }

    fn app_with(broken: bool) -> (App<RecordingSink>, Inbox) {
        App::new(
            config(),
            ScreenRect::new(0, 0, 100, 100),
            1.0,
            Arc::new(FakeBackend { broken }),
            RecordingSink::default(),
            (400, 400),
        )
        .unwrap()
    }

    fn key(key: ControlKey, x: f64, y: f64) -> InputEvent {
        InputEvent::Key { key, pointer: Point::new(x, y) }
    }

    fn click(button: MouseButton, x: f64, y: f64) -> InputEvent {
        InputEvent::Click(ClickEvent { position: Point::new(x, y), button, pressed: true })
    }

    /// Config mode with the unit square (0,0)-(100,100) confirmed.
    fn square_session(app: &mut App<RecordingSink>) {
        app.enter_config().unwrap();
        for (x, y) in [(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)] {
            app.on_input(key(ControlKey::MarkCorner, x, y));
        }
        app.on_input(key(ControlKey::Confirm, 0.0, 0.0));
        assert!(matches!(app.mode, Mode::Capture(_)));
    }

    fn outcome(coord: BoardCoordinate, frames: usize) -> CaptureOutcome {
        let frames = (0..frames)
            .map(|i| RgbaImage::from_pixel(10, 10, Rgba([i as u8 + 1, 0, 0, 255])))
            .collect();
        CaptureOutcome {
            request: crate::scheduler::CaptureRequest {
                coord,
                center: Point::new(100.0, 0.0),
                cell_size: 10,
            },
            frames: FrameSequence::new(frames),
            failures: 0,
        }
    }

    #[tokio::test]
    async fn test_gate_start_defaults_reach_capture() {
        let (mut app, _inbox) = app_with(false);
        assert!(matches!(app.use_defaults(), Err(ModeError::InvalidTransition { .. })));
        app.window_selected().unwrap();
        assert!(matches!(app.mode, Mode::Start));
        app.use_defaults().unwrap();

        assert!(matches!(app.mode, Mode::Capture(_)));
        let ratios = Config::default().default_ratios;
        let defaults = Quad::from_ratios(ScreenRect::new(0, 0, 100, 100), &ratios);
        assert_eq!(app.sink.corners.last().unwrap(), &defaults.corners.to_vec());
        assert_eq!(app.sink.layouts, vec![((2, 2), 10)]);
        assert!(app.window_selected().is_err());
    }

    #[tokio::test]
    async fn test_confirm_with_three_corners_stays_in_config() {
        let (mut app, _inbox) = app_with(false);
        app.enter_config().unwrap();
        for x in [1.0, 2.0, 3.0] {
            app.on_input(key(ControlKey::MarkCorner, x, 0.0));
        }
        assert_eq!(app.confirm_corners(), Err(ModeError::MissingCorners { found: 3 }));
        assert!(matches!(app.mode, Mode::Config(_)));
        assert!(app.sink.layouts.is_empty());
        assert!(app.sink.statuses.last().unwrap().contains("4 corners are required"));
    }

    #[tokio::test]
    async fn test_config_starts_empty_and_reloads_defaults() {
        let (mut app, _inbox) = app_with(false);
        app.window_selected().unwrap();
        app.enter_config().unwrap();
        assert_eq!(app.sink.corners, vec![Vec::<Point>::new()]);
        app.on_input(key(ControlKey::ReloadDefaults, 0.0, 0.0));
        assert_eq!(app.sink.corners.last().unwrap().len(), 4);
        app.on_input(key(ControlKey::Confirm, 0.0, 0.0));
        assert!(matches!(app.mode, Mode::Capture(_)));
    }

    #[tokio::test]
    async fn test_capture_applies_and_arms_animation() {
        let (mut app, _inbox) = app_with(false);
        square_session(&mut app);
        let coord = BoardCoordinate::new(0, 1);
        app.on_capture(outcome(coord, 3), Instant::now());

        assert_eq!(app.sink.frames.len(), 1);
        assert_eq!(app.sink.frames[0].0, coord);
        assert_eq!(app.sink.frames[0].1.get_pixel(0, 0)[0], 1);
        assert_eq!(app.history.iter().last().unwrap().frames.len(), 3);
        assert_eq!(app.history.len(), 1);
        assert_eq!(app.history.iter().last().unwrap().relative_point, (100, 0));
        assert!(app.animation.deadline().is_some());
    }

    #[tokio::test]
    async fn test_empty_capture_leaves_board_untouched() {
        let (mut app, _inbox) = app_with(false);
        square_session(&mut app);
        let coord = BoardCoordinate::new(1, 1);
        app.on_capture(outcome(coord, 0), Instant::now());
        assert!(app.sink.frames.is_empty());
        assert!(app.history.is_empty());
        assert!(!app.animation.deadline().is_some());
    }

    #[tokio::test]
    async fn test_reset_clears_and_disarms() {
        let (mut app, _inbox) = app_with(false);
        square_session(&mut app);
        app.on_capture(outcome(BoardCoordinate::new(0, 0), 2), Instant::now());
        app.on_input(key(ControlKey::Reset, 0.0, 0.0));

        assert!(matches!(app.mode, Mode::Capture(_)));
        assert!(!app.animation.deadline().is_some());
        assert!(app.history.is_empty());
        assert_eq!(app.sink.clears, 1);
    }

    #[tokio::test]
    async fn test_keys_in_wrong_mode_are_ignored() {
        let (mut app, _inbox) = app_with(false);
        app.window_selected().unwrap();
        assert_eq!(app.on_input(key(ControlKey::Reset, 0.0, 0.0)), Flow::Continue);
        assert_eq!(app.on_input(key(ControlKey::MarkCorner, 0.0, 0.0)), Flow::Continue);
        assert!(matches!(app.mode, Mode::Start));
        assert!(app.sink.corners.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_to_tile_end_to_end() {
        let (mut app, mut inbox) = app_with(false);
        square_session(&mut app);

        assert_eq!(app.on_input(click(MouseButton::Left, 95.0, 5.0)), Flow::Continue);
        let position = inbox.settled_rx.recv().await.unwrap();
        app.on_click_settled(position);

        let outcome = inbox.completed_rx.recv().await.unwrap();
        assert_eq!(outcome.request.coord, BoardCoordinate::new(0, 1));
        assert_eq!(outcome.request.rect(), ScreenRect::new(95, -5, 10, 10));
        assert_eq!(outcome.frames.len(), 3);

        let now = Instant::now();
        app.on_capture(outcome, now);
        assert_eq!(app.sink.frames.len(), 1);

        // Next tick replays frame 0, then the cursor moves on.
        app.on_tick(now + Duration::from_millis(200));
        app.on_tick(now + Duration::from_millis(400));
        let reds: Vec<u8> = app.sink.frames.iter().map(|(_, f)| f.get_pixel(0, 0)[0]).collect();
        assert_eq!(reds, vec![1, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_right_click_and_clicks_before_grid_are_ignored() {
        let (mut app, mut inbox) = app_with(false);
        app.on_input(click(MouseButton::Left, 10.0, 10.0));
        square_session(&mut app);
        app.on_input(click(MouseButton::Right, 10.0, 10.0));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(inbox.settled_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_capture_through_scheduler_is_discarded() {
        let (mut app, mut inbox) = app_with(true);
        square_session(&mut app);
        app.on_click_settled(Point::new(1.0, 1.0));
        let outcome = inbox.completed_rx.recv().await.unwrap();
        assert_eq!(outcome.failures, 3);
        app.on_capture(outcome, Instant::now());
        assert!(app.history.is_empty());
    }

    #[tokio::test]
    async fn test_events_after_quit_are_ignored() {
        let (mut app, _inbox) = app_with(false);
        square_session(&mut app);
        assert_eq!(app.on_input(key(ControlKey::Quit, 0.0, 0.0)), Flow::Quit);
        assert!(app.scheduler.is_shut_down());

        assert_eq!(app.on_input(key(ControlKey::Reset, 0.0, 0.0)), Flow::Quit);
        app.on_capture(outcome(BoardCoordinate::new(0, 0), 2), Instant::now());
        assert!(app.sink.frames.is_empty());
        assert_eq!(app.sink.clears, 0);
    }

    #[tokio::test]
    async fn test_run_processes_keys_until_quit() {
        let (mut app, mut inbox) = app_with(false);
        app.window_selected().unwrap();
        app.enter_config().unwrap();
        let tx = inbox.input_sender();
        for (x, y) in [(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)] {
            tx.send(key(ControlKey::MarkCorner, x, y)).unwrap();
        }
        tx.send(key(ControlKey::Confirm, 0.0, 0.0)).unwrap();
        tx.send(key(ControlKey::Quit, 0.0, 0.0)).unwrap();

        tokio::time::timeout(Duration::from_secs(5), run(&mut app, &mut inbox))
            .await
            .expect("loop did not stop")
            .unwrap();

        assert!(matches!(app.mode, Mode::Capture(_)));
        assert!(app.scheduler.is_shut_down());
        assert_eq!(app.sink.flushes, 6);
    }
}
