pub mod capture;
pub mod io;
pub mod loop_buffer;
pub mod looper;
pub mod playback;
pub mod stream;
pub mod take;

pub use capture::CaptureSink;
pub use io::{TakeId, TakeStore, WavTakeStore};
pub use loop_buffer::{LoopBuffer, LoopHandle};
pub use looper::Looper;
pub use playback::PlaybackSource;
pub use stream::{AudioStreams, DeviceSelection};
pub use take::{TakeBuffer, TakeSlot};

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

/// Mono or stereo.
pub const MAX_CHANNELS: usize = 2;

/// One sample period of channel-interleaved samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFrame {
    samples: [f32; MAX_CHANNELS],
    channels: u16,
}

impl AudioFrame {
    /// Build a frame from up to `MAX_CHANNELS` samples; extra samples are ignored.
    pub fn new(samples: &[f32]) -> Self {
        let channels = samples.len().min(MAX_CHANNELS);
        let mut frame = [0.0; MAX_CHANNELS];
        frame[..channels].copy_from_slice(&samples[..channels]);
        Self {
            samples: frame,
            channels: channels as u16,
        }
    }

    pub fn silent(channels: u16) -> Self {
        Self {
            samples: [0.0; MAX_CHANNELS],
            channels: channels.min(MAX_CHANNELS as u16),
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples[..self.channels as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LooperState {
    Idle = 0,
    Recording = 1,
    Playing = 2,
    ShuttingDown = 3,
}

impl LooperState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Recording,
            2 => Self::Playing,
            3 => Self::ShuttingDown,
            _ => Self::Idle,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Recording => "Recording",
            Self::Playing => "Playing",
            Self::ShuttingDown => "Shutting down",
        }
    }
}

/// Point-in-time copy of the looper state as seen by the audio callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub state: LooperState,
    pub mute: bool,
    /// Loop is audible. True in Playing, and while recording a take that was
    /// started from Playing.
    pub playback_active: bool,
    /// Incremented every time playback starts from a stopped loop.
    pub playback_run: u64,
}

/// Looper state shared with the audio callbacks. Only the state machine
/// writes; callbacks read lock-free snapshots.
#[derive(Debug)]
pub struct SharedState {
    state: AtomicU8,
    mute: AtomicBool,
    playback_active: AtomicBool,
    playback_run: AtomicU64,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LooperState::Idle as u8),
            mute: AtomicBool::new(false),
            playback_active: AtomicBool::new(false),
            playback_run: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state: self.state(),
            mute: self.mute.load(Ordering::Acquire),
            playback_active: self.playback_active.load(Ordering::Acquire),
            playback_run: self.playback_run.load(Ordering::Acquire),
        }
    }

    pub fn state(&self) -> LooperState {
        LooperState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_muted(&self) -> bool {
        self.mute.load(Ordering::Acquire)
    }

    pub(crate) fn set_state(&self, state: LooperState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn set_mute(&self, mute: bool) {
        self.mute.store(mute, Ordering::Release);
    }

    /// Start playback from the top of the loop.
    pub(crate) fn start_playback(&self) {
        self.playback_run.fetch_add(1, Ordering::AcqRel);
        self.playback_active.store(true, Ordering::Release);
    }

    pub(crate) fn stop_playback(&self) {
        self.playback_active.store(false, Ordering::Release);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters bumped from the real-time path. Observability only.
#[derive(Debug, Default)]
pub struct AudioStats {
    input_overruns: AtomicU64,
    output_underruns: AtomicU64,
    take_overflows: AtomicU64,
    take_contention: AtomicU64,
    device_lost: AtomicBool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub input_overruns: u64,
    pub output_underruns: u64,
    /// Frames dropped because the take ran out of preallocated chunks.
    pub take_overflows: u64,
    /// Blocks dropped because the take slot was briefly held by the control path.
    pub take_contention: u64,
}

impl AudioStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_input_overrun(&self) {
        self.input_overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_output_underrun(&self) {
        self.output_underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_take_overflow(&self, frames: usize) {
        self.take_overflows.fetch_add(frames as u64, Ordering::Relaxed);
    }

    pub fn record_take_contention(&self) {
        self.take_contention.fetch_add(1, Ordering::Relaxed);
    }

    /// Flag set from a stream error callback, consumed by the control path.
    pub fn flag_device_lost(&self) {
        self.device_lost.store(true, Ordering::Release);
    }

    pub fn take_device_lost(&self) -> bool {
        self.device_lost.swap(false, Ordering::AcqRel)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            input_overruns: self.input_overruns.load(Ordering::Relaxed),
            output_underruns: self.output_underruns.load(Ordering::Relaxed),
            take_overflows: self.take_overflows.load(Ordering::Relaxed),
            take_contention: self.take_contention.load(Ordering::Relaxed),
        }
    }
}
