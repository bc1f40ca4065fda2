pub mod buttons;
pub mod dispatcher;
pub mod lifecycle;

pub use buttons::{ButtonSource, KeyboardButtons};
pub use dispatcher::Dispatcher;
pub use lifecycle::{AudioIo, Lifecycle, ShutdownCause, ShutdownReport};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// The four logical pedal buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Record,
    Mute,
    PlayStop,
    Exit,
}

impl Button {
    pub const ALL: [Button; 4] = [Button::Record, Button::Mute, Button::PlayStop, Button::Exit];

    fn index(self) -> usize {
        match self {
            Button::Record => 0,
            Button::Mute => 1,
            Button::PlayStop => 2,
            Button::Exit => 3,
        }
    }
}

/// Raw (not yet debounced) level of each button at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonLevels([bool; 4]);

impl ButtonLevels {
    pub fn released() -> Self {
        Self::default()
    }

    pub fn with(mut self, button: Button, pressed: bool) -> Self {
        self.set(button, pressed);
        self
    }

    pub fn set(&mut self, button: Button, pressed: bool) {
        self.0[button.index()] = pressed;
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.0[button.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEventKind {
    Record,
    PlayStop,
    MuteToggle,
    LongPressExit,
}

/// A debounced, semantic button event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub kind: ButtonEventKind,
    /// When the event's condition was satisfied.
    pub at: Instant,
}

impl ButtonEvent {
    pub fn new(kind: ButtonEventKind, at: Instant) -> Self {
        Self { kind, at }
    }
}

/// Messages consumed by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Button(ButtonEvent),
    /// External termination (signal, terminal interrupt).
    Terminate,
}

/// Process-wide shutdown request flag. Setting it more than once has the
/// same effect as once.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true only for the call that actually flipped the flag.
    pub fn request(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
