// Event dispatcher: turns raw button levels into debounced ButtonEvents.
//
// A level change is accepted once the raw level has stayed put for the
// debounce window. The exit button only reports a long press. All timing
// lives here, on the dispatcher thread, never in the audio callbacks.

use crossbeam::channel::Sender;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{
    Button, ButtonEvent, ButtonEventKind, ButtonLevels, ButtonSource, ControlMessage,
    ShutdownSignal,
};
use crate::config::ButtonSection;

#[derive(Debug, Clone, Copy)]
struct Debouncer {
    stable: bool,
    raw: bool,
    raw_since: Instant,
}

impl Debouncer {
    fn new(now: Instant) -> Self {
        Self {
            stable: false,
            raw: false,
            raw_since: now,
        }
    }

    /// Feed the raw level; returns the new stable level and the instant it
    /// became stable when a change is accepted.
    fn update(&mut self, raw: bool, now: Instant, window: Duration) -> Option<(bool, Instant)> {
        if raw != self.raw {
            self.raw = raw;
            self.raw_since = now;
        }
        if self.raw != self.stable && now.duration_since(self.raw_since) >= window {
            self.stable = self.raw;
            return Some((self.stable, self.raw_since + window));
        }
        None
    }
}

#[derive(Debug, Clone, Copy)]
struct ButtonTracker {
    button: Button,
    debouncer: Debouncer,
    long_press_fired: bool,
}

pub struct Dispatcher {
    debounce: Duration,
    long_press: Duration,
    trackers: [ButtonTracker; 4],
}

impl Dispatcher {
    pub fn new(debounce: Duration, long_press: Duration, now: Instant) -> Self {
        let trackers = Button::ALL.map(|button| ButtonTracker {
            button,
            debouncer: Debouncer::new(now),
            long_press_fired: false,
        });
        Self {
            debounce,
            long_press,
            trackers,
        }
    }

    pub fn from_config(config: &ButtonSection, now: Instant) -> Self {
        Self::new(config.debounce(), config.long_press(), now)
    }

    /// Sample all buttons at `now`. Events come back ordered by the instant
    /// their condition was met.
    pub fn poll(&mut self, levels: ButtonLevels, now: Instant) -> Vec<ButtonEvent> {
        let mut events = Vec::new();

        for tracker in self.trackers.iter_mut() {
            let raw = levels.is_pressed(tracker.button);
            let accepted = tracker.debouncer.update(raw, now, self.debounce);

            let kind = match tracker.button {
                Button::Record => ButtonEventKind::Record,
                Button::Mute => ButtonEventKind::MuteToggle,
                Button::PlayStop => ButtonEventKind::PlayStop,
                Button::Exit => {
                    if !raw {
                        tracker.long_press_fired = false;
                        continue;
                    }
                    let held_since = tracker.debouncer.raw_since;
                    if !tracker.long_press_fired
                        && now.duration_since(held_since) >= self.long_press
                    {
                        tracker.long_press_fired = true;
                        events.push(ButtonEvent::new(
                            ButtonEventKind::LongPressExit,
                            held_since + self.long_press,
                        ));
                    }
                    continue;
                }
            };

            if let Some((true, at)) = accepted {
                events.push(ButtonEvent::new(kind, at));
            }
        }

        events.sort_by_key(|event| event.at);
        events
    }

    /// Poll `source` every `interval` and forward events until `stop` is
    /// requested or the control loop hangs up.
    pub fn run<S: ButtonSource>(
        mut self,
        mut source: S,
        sender: Sender<ControlMessage>,
        stop: ShutdownSignal,
        interval: Duration,
    ) {
        debug!("button dispatcher started");

        while !stop.is_requested() {
            let now = Instant::now();
            let levels = match source.levels(now) {
                Ok(levels) => levels,
                Err(e) => {
                    warn!("button read failed: {}", e);
                    ButtonLevels::released()
                }
            };

            for event in self.poll(levels, now) {
                debug!(kind = ?event.kind, "button event");
                if sender.send(ControlMessage::Button(event)).is_err() {
                    return;
                }
            }

            if source.take_terminate_request() && sender.send(ControlMessage::Terminate).is_err() {
                return;
            }

            std::thread::sleep(interval);
        }

        debug!("button dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBOUNCE: Duration = Duration::from_millis(150);
    const HOLD: Duration = Duration::from_secs(3);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn pressed(button: Button) -> ButtonLevels {
        ButtonLevels::released().with(button, true)
    }

    fn kinds(events: &[ButtonEvent]) -> Vec<ButtonEventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_bounce_shorter_than_window_is_ignored() {
        let t0 = Instant::now();
        let mut dispatcher = Dispatcher::new(DEBOUNCE, HOLD, t0);
        let mut events = Vec::new();

        for (i, offset) in [0, 40, 80, 120, 140].iter().enumerate() {
            let levels = if i % 2 == 0 {
                pressed(Button::Record)
            } else {
                ButtonLevels::released()
            };
            events.extend(dispatcher.poll(levels, t0 + ms(*offset)));
        }
        events.extend(dispatcher.poll(ButtonLevels::released(), t0 + ms(1000)));

        assert!(events.is_empty());
    }

    #[test]
    fn test_press_held_exactly_window_fires_once() {
        let t0 = Instant::now();
        let mut dispatcher = Dispatcher::new(DEBOUNCE, HOLD, t0);

        assert!(dispatcher.poll(pressed(Button::PlayStop), t0).is_empty());
        let events = dispatcher.poll(pressed(Button::PlayStop), t0 + DEBOUNCE);
        assert_eq!(kinds(&events), vec![ButtonEventKind::PlayStop]);
        assert_eq!(events[0].at, t0 + DEBOUNCE);

        assert!(dispatcher.poll(pressed(Button::PlayStop), t0 + ms(900)).is_empty());
    }

    #[test]
    fn test_new_event_needs_debounced_release() {
        let t0 = Instant::now();
        let mut dispatcher = Dispatcher::new(DEBOUNCE, HOLD, t0);

        dispatcher.poll(pressed(Button::Mute), t0);
        assert_eq!(dispatcher.poll(pressed(Button::Mute), t0 + ms(200)).len(), 1);

        // Release bounce
        dispatcher.poll(ButtonLevels::released(), t0 + ms(300));
        dispatcher.poll(pressed(Button::Mute), t0 + ms(320));
        assert!(dispatcher.poll(pressed(Button::Mute), t0 + ms(600)).is_empty());

        dispatcher.poll(ButtonLevels::released(), t0 + ms(700));
        assert!(dispatcher.poll(ButtonLevels::released(), t0 + ms(900)).is_empty());
        dispatcher.poll(pressed(Button::Mute), t0 + ms(1000));
        let events = dispatcher.poll(pressed(Button::Mute), t0 + ms(1150));
        assert_eq!(kinds(&events), vec![ButtonEventKind::MuteToggle]);
    }

    #[test]
    fn test_long_press_fires_once_after_hold() {
        let t0 = Instant::now();
        let mut dispatcher = Dispatcher::new(DEBOUNCE, HOLD, t0);
        let mut events = Vec::new();

        let mut t = ms(0);
        while t <= ms(5000) {
            events.extend(dispatcher.poll(pressed(Button::Exit), t0 + t));
            t += ms(10);
        }

        assert_eq!(kinds(&events), vec![ButtonEventKind::LongPressExit]);
        assert_eq!(events[0].at, t0 + HOLD);
    }

    #[test]
    fn test_exit_released_early_fires_nothing() {
        let t0 = Instant::now();
        let mut dispatcher = Dispatcher::new(DEBOUNCE, HOLD, t0);
        let mut events = Vec::new();

        let mut t = ms(0);
        while t <= ms(2900) {
            events.extend(dispatcher.poll(pressed(Button::Exit), t0 + t));
            t += ms(10);
        }
        events.extend(dispatcher.poll(ButtonLevels::released(), t0 + ms(2910)));
        events.extend(dispatcher.poll(ButtonLevels::released(), t0 + ms(6000)));

        assert!(events.is_empty());
    }

    #[test]
    fn test_simultaneous_presses_ordered_by_satisfaction() {
        let t0 = Instant::now();
        let mut dispatcher = Dispatcher::new(DEBOUNCE, HOLD, t0);

        dispatcher.poll(pressed(Button::PlayStop), t0);
        let both = pressed(Button::PlayStop).with(Button::Record, true);
        dispatcher.poll(both, t0 + ms(50));

        // Both windows elapse before this poll; PlayStop was pressed first.
        let events = dispatcher.poll(both, t0 + ms(400));
        assert_eq!(
            kinds(&events),
            vec![ButtonEventKind::PlayStop, ButtonEventKind::Record]
        );
        assert!(events[0].at < events[1].at);
    }
}
