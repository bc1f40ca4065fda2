use std::sync::Arc;

use super::take::AppendOutcome;
use super::{AudioStats, LooperState, SharedState, TakeSlot};

/// Body of the input stream callback: feeds the take in progress.
///
/// Real-time safe: atomic state reads, `try_lock` on the take slot, no
/// allocation, no I/O.
#[derive(Clone)]
pub struct CaptureSink {
    state: Arc<SharedState>,
    slot: Arc<TakeSlot>,
    stats: Arc<AudioStats>,
}

impl CaptureSink {
    pub fn new(state: Arc<SharedState>, slot: Arc<TakeSlot>, stats: Arc<AudioStats>) -> Self {
        Self { state, slot, stats }
    }

    /// Handle one interleaved input block.
    pub fn process(&self, data: &[f32]) {
        let snapshot = self.state.snapshot();
        if snapshot.state != LooperState::Recording {
            // Not recording: frames are discarded, nothing is buffered.
            return;
        }

        match self.slot.try_append(data, snapshot.mute) {
            AppendOutcome::Appended { dropped, .. } if dropped > 0 => {
                self.stats.record_take_overflow(dropped);
            }
            AppendOutcome::Contended => self.stats.record_take_contention(),
            _ => {}
        }
    }

    /// Called from the stream error callback when the backend dropped input.
    pub fn report_overrun(&self) {
        self.stats.record_input_overrun();
    }
}
