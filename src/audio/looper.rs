use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{
    AudioStats, CaptureSink, LoopBuffer, LoopHandle, LooperState, PlaybackSource, SharedState,
    StateSnapshot, TakeBuffer, TakeId, TakeSlot, TakeStore,
};
use crate::config::LooperConfig;
use crate::control::{ButtonEvent, ButtonEventKind};
use crate::error::{LooperError, Result};
use crate::ui::{StatusDisplay, StatusReport};

const RECORDING_REFRESH: Duration = Duration::from_millis(500);

/// Result of a successful commit. The loop is live even if saving it failed.
struct Committed {
    buffer: Arc<LoopBuffer>,
    persist_error: Option<LooperError>,
}

/// The looper state machine.
///
/// Single authority over the looper state, the mute flag and the current loop.
/// Lives on the control thread; the audio callbacks only get read access
/// through [`CaptureSink`] and [`PlaybackSource`].
pub struct Looper {
    state: Arc<SharedState>,
    slot: Arc<TakeSlot>,
    handle: Arc<LoopHandle>,
    stats: Arc<AudioStats>,
    store: Option<Box<dyn TakeStore>>,
    display: Box<dyn StatusDisplay>,
    /// Replaced loops, dropped once the output callback no longer holds them.
    retired: Vec<Arc<LoopBuffer>>,
    next_generation: u64,
    input_channels: u16,
    sample_rate: u32,
    chunk_frames: usize,
    spare_chunks: usize,
    max_chunks: usize,
    last_take: Option<TakeId>,
    message: Option<String>,
    last_render: Instant,
}

impl Looper {
    pub fn new(
        config: &LooperConfig,
        input_channels: u16,
        display: Box<dyn StatusDisplay>,
        store: Option<Box<dyn TakeStore>>,
    ) -> Self {
        let mut looper = Self {
            state: Arc::new(SharedState::new()),
            slot: Arc::new(TakeSlot::new(config.takes.spare_chunks)),
            handle: Arc::new(LoopHandle::new()),
            stats: Arc::new(AudioStats::new()),
            store,
            display,
            retired: Vec::new(),
            next_generation: 1,
            input_channels,
            sample_rate: config.audio.sample_rate,
            chunk_frames: config.takes.chunk_frames,
            spare_chunks: config.takes.spare_chunks,
            max_chunks: config.takes.max_chunks(config.audio.sample_rate),
            last_take: None,
            message: None,
            last_render: Instant::now(),
        };
        looper.render();
        looper
    }

    pub fn capture_sink(&self) -> CaptureSink {
        CaptureSink::new(
            Arc::clone(&self.state),
            Arc::clone(&self.slot),
            Arc::clone(&self.stats),
        )
    }

    pub fn playback_source(&self, out_channels: u16) -> PlaybackSource {
        PlaybackSource::new(Arc::clone(&self.state), Arc::clone(&self.handle), out_channels)
    }

    pub fn stats(&self) -> Arc<AudioStats> {
        Arc::clone(&self.stats)
    }

    pub fn state(&self) -> LooperState {
        self.state.state()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    pub fn is_muted(&self) -> bool {
        self.state.is_muted()
    }

    pub fn current_loop(&self) -> Option<Arc<LoopBuffer>> {
        self.handle.current()
    }

    pub fn last_take(&self) -> Option<&TakeId> {
        self.last_take.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn retired_loops(&self) -> usize {
        self.retired.len()
    }

    /// Apply one button event. Events that have no meaning in the current
    /// state are ignored. Returns the state after the transition.
    pub fn handle(&mut self, event: &ButtonEvent) -> LooperState {
        let before = self.state();
        debug!(?before, kind = ?event.kind, "handling button event");

        match (before, event.kind) {
            (LooperState::ShuttingDown, _) => return before,
            (_, ButtonEventKind::LongPressExit) => {
                for failure in self.shutdown() {
                    warn!("{}", failure);
                }
                return self.state();
            }
            (_, ButtonEventKind::MuteToggle) => {
                let mute = !self.state.is_muted();
                self.state.set_mute(mute);
                info!("Mute {}", if mute { "on" } else { "off" });
            }
            (LooperState::Idle, ButtonEventKind::Record) => self.begin_take(),
            (LooperState::Idle, ButtonEventKind::PlayStop) => {
                if self.handle.is_set() {
                    self.state.start_playback();
                    self.state.set_state(LooperState::Playing);
                    info!("Playback started");
                } else {
                    self.message = Some("No take to play".to_string());
                    debug!("PlayStop ignored, no loop committed");
                }
            }
            (LooperState::Recording, ButtonEventKind::Record) => {
                self.state.set_state(LooperState::Idle);
                self.state.stop_playback();
                match self.commit_take() {
                    Ok(committed) => debug!(
                        generation = committed.buffer.generation(),
                        "Recording stopped"
                    ),
                    Err(LooperError::EmptyTake) => {}
                    Err(e) => warn!("{}", e),
                }
            }
            (LooperState::Recording, ButtonEventKind::PlayStop) => {
                self.state.set_state(LooperState::Idle);
                match self.commit_take() {
                    Ok(committed) => {
                        self.state.start_playback();
                        self.state.set_state(LooperState::Playing);
                        info!(generation = committed.buffer.generation(), "Looping new take");
                    }
                    Err(_) => self.state.stop_playback(),
                }
            }
            (LooperState::Playing, ButtonEventKind::Record) => self.begin_take(),
            (LooperState::Playing, ButtonEventKind::PlayStop) => {
                self.state.stop_playback();
                self.state.set_state(LooperState::Idle);
                info!("Playback stopped");
            }
        }

        self.render();
        self.state()
    }

    fn begin_take(&mut self) {
        let take = TakeBuffer::new(
            self.input_channels,
            self.sample_rate,
            self.chunk_frames,
            self.spare_chunks,
        )
        .with_max_chunks(self.max_chunks);
        if let Some(stale) = self.slot.begin(take) {
            warn!("Discarding stale take of {} frames", stale.frames());
        }
        self.message = None;
        self.state.set_state(LooperState::Recording);
        info!(
            overdub = self.state.snapshot().playback_active,
            "Recording started"
        );
    }

    /// Move the take out of the slot into a new loop and publish it. The caller
    /// must already have moved the state off `Recording`.
    ///
    /// Persistence runs here, on the control path, after the swap. A failed
    /// write keeps the loop playable and is only surfaced.
    fn commit_take(&mut self) -> Result<Committed> {
        let take = match self.slot.finish() {
            Some(take) if !take.is_empty() => take,
            _ => {
                info!("Empty take discarded");
                self.message = Some("Empty take discarded".to_string());
                return Err(LooperError::EmptyTake);
            }
        };

        let generation = self.next_generation;
        self.next_generation += 1;
        let buffer = Arc::new(LoopBuffer::from_take(take, generation)?);
        self.publish(Arc::clone(&buffer));

        info!(
            frames = buffer.len(),
            secs = buffer.duration_secs(),
            generation,
            "Take committed"
        );

        let mut persist_error = None;
        if let Some(store) = self.store.as_mut() {
            match store.store(&buffer) {
                Ok(id) => {
                    info!("Take saved: {}", id);
                    self.last_take = Some(id);
                }
                Err(e) => {
                    warn!("{}", e);
                    self.message = Some(e.to_string());
                    persist_error = Some(e);
                }
            }
        }

        Ok(Committed {
            buffer,
            persist_error,
        })
    }

    fn publish(&mut self, buffer: Arc<LoopBuffer>) {
        if let Some(previous) = self.handle.publish(buffer) {
            self.retired.push(previous);
        }
    }

    /// Install a loop loaded from storage, e.g. the last saved take.
    pub fn preload(&mut self, buffer: LoopBuffer) {
        let buffer = buffer.with_generation(self.next_generation);
        self.next_generation += 1;
        info!(frames = buffer.len(), "Loop preloaded");
        self.publish(Arc::new(buffer));
        self.render();
    }

    /// Force `ShuttingDown`. A take in progress is committed first, playback
    /// is stopped. Idempotent. Returns failures to log; none of them stop the
    /// shutdown.
    pub fn shutdown(&mut self) -> Vec<LooperError> {
        let before = self.state();
        if before == LooperState::ShuttingDown {
            return Vec::new();
        }

        let mut failures = Vec::new();
        self.state.set_state(LooperState::ShuttingDown);
        self.state.stop_playback();

        if before == LooperState::Recording {
            match self.commit_take() {
                Ok(committed) => failures.extend(committed.persist_error),
                Err(LooperError::EmptyTake) => {}
                Err(e) => failures.push(e),
            }
        }

        info!(?before, "Shutting down");
        self.render();
        failures
    }

    /// Periodic control-path housekeeping.
    pub fn tick(&mut self) {
        let state = self.state();

        if state == LooperState::Recording {
            let chunk_len = self.chunk_frames * self.input_channels as usize;
            self.slot.replenish(self.spare_chunks, chunk_len);
        }

        // Only our reference left: the output callback is done with it.
        self.retired.retain(|buffer| Arc::strong_count(buffer) > 1);

        if self.stats.take_device_lost() && state != LooperState::ShuttingDown {
            warn!("Audio device lost");
            self.state.stop_playback();
            if state == LooperState::Recording {
                self.state.set_state(LooperState::Idle);
                match self.commit_take() {
                    Ok(committed) => info!(
                        generation = committed.buffer.generation(),
                        "Take committed after device loss"
                    ),
                    Err(LooperError::EmptyTake) => {}
                    Err(e) => warn!("{}", e),
                }
            }
            self.state.set_state(LooperState::Idle);
            self.message = Some(LooperError::Device("device lost".into()).to_string());
            self.render();
            return;
        }

        if state == LooperState::Recording && self.last_render.elapsed() >= RECORDING_REFRESH {
            self.render();
        }
    }

    pub fn report(&self) -> StatusReport {
        let snapshot = self.state.snapshot();
        let recording_secs = (snapshot.state == LooperState::Recording)
            .then(|| self.slot.recorded_frames() as f64 / self.sample_rate as f64);

        StatusReport {
            state: snapshot.state,
            mute: snapshot.mute,
            playback_active: snapshot.playback_active,
            loop_secs: self.handle.current().map(|b| b.duration_secs()),
            recording_secs,
            last_take: self.last_take.as_ref().map(|id| id.to_string()),
            message: self.message.clone(),
            stats: self.stats.snapshot(),
        }
    }

    fn render(&mut self) {
        let report = self.report();
        self.display.render(&report);
        self.last_render = Instant::now();
    }
}
