use std::sync::Arc;

use super::{LoopHandle, SharedState};

/// Body of the output stream callback: plays the current loop gaplessly.
///
/// Owns the playback cursor. The cursor restarts at frame 0 when a new loop
/// is published or when playback is restarted after a stop.
pub struct PlaybackSource {
    state: Arc<SharedState>,
    handle: Arc<LoopHandle>,
    out_channels: usize,
    cursor: usize,
    generation: Option<u64>,
    playback_run: u64,
}

impl PlaybackSource {
    pub fn new(state: Arc<SharedState>, handle: Arc<LoopHandle>, out_channels: u16) -> Self {
        Self {
            state,
            handle,
            out_channels: out_channels.max(1) as usize,
            cursor: 0,
            generation: None,
            playback_run: 0,
        }
    }

    /// Fill one interleaved output block. Never blocks or allocates; silence
    /// when playback is inactive or no loop has been committed.
    pub fn process(&mut self, out: &mut [f32]) {
        let snapshot = self.state.snapshot();
        if !snapshot.playback_active {
            out.fill(0.0);
            return;
        }

        let guard = self.handle.load();
        let Some(buffer) = guard.as_ref() else {
            out.fill(0.0);
            return;
        };

        if self.generation != Some(buffer.generation()) || self.playback_run != snapshot.playback_run
        {
            self.generation = Some(buffer.generation());
            self.playback_run = snapshot.playback_run;
            self.cursor = 0;
        }

        self.cursor = buffer.read_wrapping(self.cursor, out, self.out_channels, snapshot.mute);
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}
