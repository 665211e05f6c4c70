//! Global input module.
//! Uses `rdev` for global mouse/keyboard events (cross-platform), so clicks on
//! the game window are seen without focus.
//! The hook runs on its own thread and only forwards translated events.
//! Challenge: permissions (macOS accessibility, Wayland has no global hooks);
//! when the hook cannot start we log it and run without input.

use rdev::{Button, EventType, Key};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::geometry::Point;
use crate::router::{ClickEvent, MouseButton};

/// Keys the helper reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlKey {
    /// Space: set the next board corner at the pointer.
    MarkCorner,
    /// Enter: accept the four corners.
    Confirm,
    /// D: put the default corners back.
    ReloadDefaults,
    /// R: clear captured tiles.
    Reset,
    /// Esc
    Quit,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputEvent {
    Click(ClickEvent),
    /// `pointer` is the last known logical pointer position.
    Key { key: ControlKey, pointer: Point },
}

/// Tracks the pointer (button events carry no position) and maps raw events.
#[derive(Default)]
pub struct InputTranslator {
    pointer: Point,
}

impl InputTranslator {
    pub fn translate(&mut self, event: &EventType) -> Option<InputEvent> {
        let click = |button: &Button, pressed: bool, position: Point| {
            let button = match button {
                Button::Left => MouseButton::Left,
                Button::Right => MouseButton::Right,
                Button::Middle => MouseButton::Middle,
                Button::Unknown(_) => MouseButton::Other,
            };
            Some(InputEvent::Click(ClickEvent { position, button, pressed }))
        };
        match event {
            EventType::MouseMove { x, y } => {
                self.pointer = Point::new(*x, *y);
                None
            }
            EventType::ButtonPress(button) => click(button, true, self.pointer),
            EventType::ButtonRelease(button) => click(button, false, self.pointer),
            EventType::KeyPress(key) => {
                let key = match key {
                    Key::Space => ControlKey::MarkCorner,
                    Key::Return | Key::KpReturn => ControlKey::Confirm,
                    Key::KeyD => ControlKey::ReloadDefaults,
                    Key::KeyR => ControlKey::Reset,
                    Key::Escape => ControlKey::Quit,
                    _ => return None,
                };
                Some(InputEvent::Key { key, pointer: self.pointer })
            }
            _ => None,
        }
    }
}

/// Handle on the hook thread. rdev cannot unhook, so stopping just mutes it.
pub struct InputListener {
    active: Arc<AtomicBool>,
}

impl InputListener {
    pub fn spawn(events: mpsc::UnboundedSender<InputEvent>) -> Self {
        let active = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&active);
        let spawned = thread::Builder::new().name("input-hook".into()).spawn(move || {
            let mut translator = InputTranslator::default();
            let result = rdev::listen(move |event| {
                if !flag.load(Ordering::Relaxed) {
                    return;
                }
                if let Some(input) = translator.translate(&event.event_type) {
                    let _ = events.send(input);
                }
            });
            if let Err(e) = result {
                error!("Global input hook unavailable: {:?}", e);
            }
        });
        if let Err(e) = spawned {
            warn!("Could not start input thread: {}", e);
        }
        Self { active }
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::Relaxed);
    }
}
