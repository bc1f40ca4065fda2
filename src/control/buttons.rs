use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::time::{Duration, Instant};

use super::{Button, ButtonLevels};
use crate::config::KeyMap;
use crate::error::{LooperError, Result};

/// Source of raw button levels, polled by the dispatcher thread.
///
/// Pin or key mapping is the implementation's business; the core only sees
/// the four logical buttons.
pub trait ButtonSource: Send {
    fn levels(&mut self, now: Instant) -> Result<ButtonLevels>;

    /// True once if the source saw an interrupt request (e.g. Ctrl-C typed
    /// into a raw-mode terminal).
    fn take_terminate_request(&mut self) -> bool {
        false
    }
}

/// Keyboard stand-in for the foot pedal.
///
/// Terminals that report key releases give exact levels. Otherwise a key
/// counts as held until `hold_grace` passes without a press or auto-repeat.
pub struct KeyboardButtons {
    keys: KeyMap,
    hold_grace: Duration,
    last_seen: [Option<Instant>; 4],
    releases_reported: bool,
    terminate_requested: bool,
}

impl KeyboardButtons {
    pub fn new(keys: KeyMap, hold_grace: Duration) -> Self {
        Self {
            keys,
            hold_grace,
            last_seen: [None; 4],
            releases_reported: false,
            terminate_requested: false,
        }
    }

    fn button_for(&self, code: KeyCode) -> Option<Button> {
        let KeyCode::Char(c) = code else {
            return None;
        };
        let c = c.to_ascii_lowercase();
        let keys = &self.keys;
        Button::ALL.into_iter().find(|button| {
            let key = match button {
                Button::Record => keys.record,
                Button::Mute => keys.mute,
                Button::PlayStop => keys.play_stop,
                Button::Exit => keys.exit,
            };
            key.to_ascii_lowercase() == c
        })
    }

    pub fn handle_key(&mut self, key: KeyEvent, now: Instant) {
        let interrupt = key.modifiers.contains(KeyModifiers::CONTROL)
            && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('C'));
        if interrupt {
            self.terminate_requested = true;
            return;
        }

        // Mapped keys win over the quit key.
        let Some(button) = self.button_for(key.code) else {
            if key.code == KeyCode::Char('q') && key.kind == KeyEventKind::Press {
                self.terminate_requested = true;
            }
            return;
        };
        let slot = button.index();

        match key.kind {
            KeyEventKind::Press | KeyEventKind::Repeat => self.last_seen[slot] = Some(now),
            KeyEventKind::Release => {
                self.releases_reported = true;
                self.last_seen[slot] = None;
            }
        }
    }

    pub fn levels_at(&self, now: Instant) -> ButtonLevels {
        let mut levels = ButtonLevels::released();
        for button in Button::ALL {
            let held = self.last_seen[button.index()].is_some_and(|last| {
                self.releases_reported || now.duration_since(last) < self.hold_grace
            });
            levels.set(button, held);
        }
        levels
    }
}

impl ButtonSource for KeyboardButtons {
    fn levels(&mut self, now: Instant) -> Result<ButtonLevels> {
        while event::poll(Duration::ZERO).map_err(|e| LooperError::Button(e.to_string()))? {
            let read = event::read().map_err(|e| LooperError::Button(e.to_string()))?;
            if let Event::Key(key) = read {
                self.handle_key(key, now);
            }
        }
        Ok(self.levels_at(now))
    }

    fn take_terminate_request(&mut self) -> bool {
        std::mem::take(&mut self.terminate_requested)
    }
}
