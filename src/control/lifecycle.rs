use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{ButtonEventKind, ControlMessage, ShutdownSignal};
use crate::audio::Looper;
use crate::error::{LooperError, Result};

/// Stream handles the coordinator stops during teardown.
pub trait AudioIo {
    fn stop_input(&mut self) -> Result<()>;
    fn stop_output(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    LongPress,
    /// `Terminate` message from a signal handler or the button source.
    Terminate,
    /// Shutdown flag seen without a message.
    Signal,
    /// Every sender hung up.
    Disconnected,
}

#[derive(Debug)]
pub struct ShutdownReport {
    pub cause: ShutdownCause,
    pub events_handled: usize,
    /// Teardown steps that failed. None of them stopped the teardown.
    pub failures: Vec<LooperError>,
}

/// Owns the control loop and tears everything down in order.
pub struct Lifecycle {
    looper: Looper,
    receiver: Receiver<ControlMessage>,
    shutdown: ShutdownSignal,
    tick: Duration,
    streams: Option<Box<dyn AudioIo>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Lifecycle {
    pub fn new(
        looper: Looper,
        receiver: Receiver<ControlMessage>,
        shutdown: ShutdownSignal,
        tick: Duration,
    ) -> Self {
        Self {
            looper,
            receiver,
            shutdown,
            tick,
            streams: None,
            dispatcher: None,
        }
    }

    pub fn with_streams(mut self, streams: Box<dyn AudioIo>) -> Self {
        self.streams = Some(streams);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: JoinHandle<()>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Run until a long press, a termination request or a hang-up, then
    /// tear down. Consumes the coordinator; the looper and its display are
    /// released last.
    pub fn run(mut self) -> ShutdownReport {
        info!("Control loop started");

        let mut events_handled = 0;
        let mut last_tick = Instant::now();

        let cause = loop {
            if self.shutdown.is_requested() {
                break ShutdownCause::Signal;
            }

            let timeout = self.tick.saturating_sub(last_tick.elapsed());
            match self.receiver.recv_timeout(timeout) {
                Ok(ControlMessage::Button(event)) => {
                    if event.kind == ButtonEventKind::LongPressExit {
                        break ShutdownCause::LongPress;
                    }
                    self.looper.handle(&event);
                    events_handled += 1;
                }
                Ok(ControlMessage::Terminate) => break ShutdownCause::Terminate,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break ShutdownCause::Disconnected,
            }

            if last_tick.elapsed() >= self.tick {
                self.looper.tick();
                last_tick = Instant::now();
            }
        };

        info!(?cause, "Shutdown requested");
        let failures = self.teardown();

        ShutdownReport {
            cause,
            events_handled,
            failures,
        }
    }

    fn teardown(&mut self) -> Vec<LooperError> {
        // Stops the dispatcher and makes later signals no-ops.
        self.shutdown.request();

        let mut failures = self.looper.shutdown();

        let discarded = self.receiver.try_iter().count();
        if discarded > 0 {
            debug!(discarded, "Events discarded after shutdown");
        }

        if let Some(mut streams) = self.streams.take() {
            if let Err(e) = streams.stop_input() {
                failures.push(e);
            }
            if let Err(e) = streams.stop_output() {
                failures.push(e);
            }
        }

        if let Some(dispatcher) = self.dispatcher.take()
            && dispatcher.join().is_err()
        {
            failures.push(LooperError::Shutdown("button dispatcher panicked".into()));
        }

        for failure in &failures {
            warn!("{}", failure);
        }
        info!("Teardown complete");
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{LoopBuffer, TakeId, TakeStore};
    use crate::config::LooperConfig;
    use crate::control::ButtonEvent;
    use crate::ui::{StatusDisplay, StatusReport};
    use crossbeam::channel;
    use std::sync::{Arc, Mutex};

    struct NullDisplay;

    impl StatusDisplay for NullDisplay {
        fn render(&mut self, _report: &StatusReport) {}
    }

    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<String>>>);

    impl Journal {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().unwrap().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct FakeStreams {
        journal: Journal,
        fail_input: bool,
    }

    impl AudioIo for FakeStreams {
        fn stop_input(&mut self) -> Result<()> {
            self.journal.push("stop input");
            if self.fail_input {
                return Err(LooperError::Shutdown("pause input: gone".into()));
            }
            Ok(())
        }

        fn stop_output(&mut self) -> Result<()> {
            self.journal.push("stop output");
            Ok(())
        }
    }

    struct JournalStore(Journal);

    impl TakeStore for JournalStore {
        fn store(&mut self, buffer: &LoopBuffer) -> Result<TakeId> {
            self.0.push(format!("store {}", buffer.len()));
            Ok(TakeId("memory".into()))
        }
    }

    fn looper(journal: &Journal) -> Looper {
        Looper::new(
            &LooperConfig::default(),
            1,
            Box::new(NullDisplay),
            Some(Box::new(JournalStore(journal.clone()))),
        )
    }

    fn lifecycle(
        looper: Looper,
        rx: Receiver<ControlMessage>,
        signal: ShutdownSignal,
        journal: &Journal,
        fail_input: bool,
    ) -> Lifecycle {
        Lifecycle::new(looper, rx, signal, Duration::from_millis(5)).with_streams(Box::new(
            FakeStreams {
                journal: journal.clone(),
                fail_input,
            },
        ))
    }

    #[test]
    fn test_terminate_stops_input_before_output() {
        let journal = Journal::default();
        let (tx, rx) = channel::unbounded();
        tx.send(ControlMessage::Terminate).unwrap();

        let report = lifecycle(looper(&journal), rx, ShutdownSignal::new(), &journal, false).run();

        assert_eq!(report.cause, ShutdownCause::Terminate);
        assert!(report.failures.is_empty());
        assert_eq!(journal.entries(), vec!["stop input", "stop output"]);
    }

    #[test]
    fn test_long_press_commits_take_in_progress() {
        let journal = Journal::default();
        let mut looper = looper(&journal);
        let sink = looper.capture_sink();
        let now = Instant::now();

        looper.handle(&ButtonEvent::new(ButtonEventKind::Record, now));
        sink.process(&[0.25; 64]);

        let (tx, rx) = channel::unbounded();
        let exit = ButtonEvent::new(ButtonEventKind::LongPressExit, now);
        tx.send(ControlMessage::Button(exit)).unwrap();
        // Anything after the long press is never applied.
        let record = ButtonEvent::new(ButtonEventKind::Record, now);
        tx.send(ControlMessage::Button(record)).unwrap();

        let report = lifecycle(looper, rx, ShutdownSignal::new(), &journal, false).run();

        assert_eq!(report.cause, ShutdownCause::LongPress);
        assert_eq!(report.events_handled, 0);
        assert_eq!(journal.entries(), vec!["store 64", "stop input", "stop output"]);
    }

    #[test]
    fn test_repeated_termination_tears_down_once() {
        let journal = Journal::default();
        let signal = ShutdownSignal::new();
        let (tx, rx) = channel::unbounded();
        assert!(signal.request());
        assert!(!signal.request());
        tx.send(ControlMessage::Terminate).unwrap();
        tx.send(ControlMessage::Terminate).unwrap();

        let report = lifecycle(looper(&journal), rx, signal.clone(), &journal, false).run();

        assert_eq!(report.cause, ShutdownCause::Signal);
        assert_eq!(journal.entries(), vec!["stop input", "stop output"]);
        assert!(signal.is_requested());
    }

    #[test]
    fn test_failed_step_does_not_stop_teardown() {
        let journal = Journal::default();
        let (tx, rx) = channel::unbounded::<ControlMessage>();
        drop(tx);

        let report = lifecycle(looper(&journal), rx, ShutdownSignal::new(), &journal, true).run();

        assert_eq!(report.cause, ShutdownCause::Disconnected);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(journal.entries(), vec!["stop input", "stop output"]);
    }

    #[test]
    fn test_dispatcher_thread_is_joined() {
        let journal = Journal::default();
        let signal = ShutdownSignal::new();
        let (tx, rx) = channel::unbounded();

        let stop = signal.clone();
        let worker_journal = journal.clone();
        let dispatcher = std::thread::spawn(move || {
            while !stop.is_requested() {
                std::thread::sleep(Duration::from_millis(1));
            }
            worker_journal.push("dispatcher stopped");
        });

        tx.send(ControlMessage::Terminate).unwrap();
        let report = lifecycle(looper(&journal), rx, signal, &journal, false)
            .with_dispatcher(dispatcher)
            .run();

        assert!(report.failures.is_empty());
        assert!(journal.entries().iter().any(|e| e == "dispatcher stopped"));
    }
}
