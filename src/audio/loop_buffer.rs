use arc_swap::{ArcSwapOption, Guard};
use chrono::{DateTime, Local};
use std::sync::Arc;

use super::{AudioFrame, TakeBuffer};
use crate::error::{LooperError, Result};

/// Immutable committed take, played back in a loop.
///
/// Frames live in the chunks moved out of the take; the last chunk may be
/// partially used. Never empty.
pub struct LoopBuffer {
    chunks: Vec<Box<[f32]>>,
    chunk_frames: usize,
    frames: usize,
    channels: u16,
    sample_rate: u32,
    generation: u64,
    recorded_at: DateTime<Local>,
}

impl LoopBuffer {
    /// Commit a take. The take's chunks are moved, not copied.
    pub fn from_take(take: TakeBuffer, generation: u64) -> Result<Self> {
        if take.is_empty() {
            return Err(LooperError::EmptyTake);
        }
        let channels = take.channels();
        let sample_rate = take.sample_rate();
        let chunk_frames = take.chunk_frames();
        let recorded_at = take.started_at();
        let (chunks, frames) = take.into_chunks();

        Ok(Self {
            chunks,
            chunk_frames,
            frames,
            channels,
            sample_rate,
            generation,
            recorded_at,
        })
    }

    /// Build a loop from interleaved samples held in memory.
    pub fn from_samples(
        samples: Vec<f32>,
        channels: u16,
        sample_rate: u32,
        generation: u64,
    ) -> Result<Self> {
        let ch = channels.max(1) as usize;
        let frames = samples.len() / ch;
        if frames == 0 {
            return Err(LooperError::EmptyTake);
        }
        let mut samples = samples;
        samples.truncate(frames * ch);

        Ok(Self {
            chunks: vec![samples.into_boxed_slice()],
            chunk_frames: frames,
            frames,
            channels: ch as u16,
            sample_rate,
            generation,
            recorded_at: Local::now(),
        })
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Length in frames.
    pub fn len(&self) -> usize {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn recorded_at(&self) -> DateTime<Local> {
        self.recorded_at
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    pub fn frame(&self, index: usize) -> Option<AudioFrame> {
        if index >= self.frames {
            return None;
        }
        let ch = self.channels as usize;
        let chunk = &self.chunks[index / self.chunk_frames];
        let offset = (index % self.chunk_frames) * ch;
        Some(AudioFrame::new(&chunk[offset..offset + ch]))
    }

    /// Interleaved samples in order, for persistence.
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        let total = self.frames * self.channels as usize;
        self.chunks.iter().flat_map(|chunk| chunk.iter().copied()).take(total)
    }

    /// Fill `out` (interleaved, `out_channels` wide) starting at frame
    /// `cursor`, wrapping to frame 0 inside the block. Loop channels map to
    /// output channels as `out_ch % loop_channels`. With `muted` the frames are
    /// zeroed but still consumed. Returns the advanced cursor, always `< len`.
    ///
    /// No allocation; safe for the output callback.
    pub fn read_wrapping(
        &self,
        cursor: usize,
        out: &mut [f32],
        out_channels: usize,
        muted: bool,
    ) -> usize {
        let oc = out_channels.max(1);
        let lc = self.channels as usize;
        let frames_out = out.len() / oc;
        out[frames_out * oc..].fill(0.0);

        let mut pos = cursor % self.frames;
        let mut done = 0;

        while done < frames_out {
            let chunk_index = pos / self.chunk_frames;
            let offset = pos % self.chunk_frames;
            let chunk_end = self.chunk_frames.min(self.frames - chunk_index * self.chunk_frames);
            let n = (chunk_end - offset).min(frames_out - done);
            let dst = &mut out[done * oc..(done + n) * oc];

            if muted {
                dst.fill(0.0);
            } else {
                let src = &self.chunks[chunk_index][offset * lc..(offset + n) * lc];
                if oc == lc {
                    dst.copy_from_slice(src);
                } else {
                    for (dst_frame, src_frame) in dst.chunks_exact_mut(oc).zip(src.chunks_exact(lc)) {
                        for (c, sample) in dst_frame.iter_mut().enumerate() {
                            *sample = src_frame[c % lc];
                        }
                    }
                }
            }

            done += n;
            pos += n;
            if pos == self.frames {
                pos = 0;
            }
        }

        pos
    }
}

impl std::fmt::Debug for LoopBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopBuffer")
            .field("frames", &self.frames)
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Publication point for the current loop. Readers load lock-free and see
/// either the old or the new buffer, never a mix.
#[derive(Debug, Default)]
pub struct LoopHandle {
    current: ArcSwapOption<LoopBuffer>,
}

impl LoopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output callback access. The guard must be dropped inside the callback;
    /// the state machine retains replaced buffers so this never frees one.
    pub fn load(&self) -> Guard<Option<Arc<LoopBuffer>>> {
        self.current.load()
    }

    pub fn current(&self) -> Option<Arc<LoopBuffer>> {
        self.current.load_full()
    }

    pub fn is_set(&self) -> bool {
        self.current.load().is_some()
    }

    /// Swap in a new loop and return the one it replaced.
    pub(crate) fn publish(&self, buffer: Arc<LoopBuffer>) -> Option<Arc<LoopBuffer>> {
        self.current.swap(Some(buffer))
    }
}
