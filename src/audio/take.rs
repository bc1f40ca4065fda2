// Take buffer: frames captured during one recording session.
//
// The capture callback must never allocate, so the take grows by moving
// preallocated chunks into the filled list: first from its own spare pool,
// then from a lock-free refill queue the control path keeps topped up through
// `TakeSlot::replenish`. The filled list is sized up front for the longest
// allowed take.

use chrono::{DateTime, Local};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};

type Chunk = Box<[f32]>;

pub struct TakeBuffer {
    channels: u16,
    sample_rate: u32,
    chunk_frames: usize,
    filled: Vec<Chunk>,
    spare: Vec<Chunk>,
    /// Upper bound on `filled`; room for it is reserved up front.
    max_chunks: usize,
    /// Frames written into the last filled chunk.
    current_frames: usize,
    total_frames: usize,
    started_at: DateTime<Local>,
}

/// What happened to a block handed to the take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended { frames: usize, dropped: usize },
    /// The control path held the slot; the block was discarded.
    Contended,
    /// No take in progress.
    NoTake,
}

impl TakeBuffer {
    pub fn new(channels: u16, sample_rate: u32, chunk_frames: usize, spare_chunks: usize) -> Self {
        let mut take = Self {
            channels,
            sample_rate,
            chunk_frames,
            filled: Vec::with_capacity(spare_chunks),
            spare: Vec::new(),
            max_chunks: spare_chunks,
            current_frames: 0,
            total_frames: 0,
            started_at: Local::now(),
        };
        take.spare = allocate_chunks(spare_chunks, chunk_frames * channels as usize);
        take
    }

    /// Reserve room for up to `max_chunks` chunks so a long take never grows
    /// the filled list from the capture callback.
    pub fn with_max_chunks(mut self, max_chunks: usize) -> Self {
        self.filled
            .reserve_exact(max_chunks.saturating_sub(self.filled.len()));
        self.max_chunks = max_chunks;
        self
    }

    /// Append interleaved samples. Real-time safe: no allocation, only moves
    /// preallocated chunks. Returns `(frames_written, frames_dropped)`.
    pub fn append(&mut self, data: &[f32], muted: bool) -> (usize, usize) {
        self.append_from(data, muted, None)
    }

    fn append_from(
        &mut self,
        data: &[f32],
        muted: bool,
        refill: Option<&ArrayQueue<Chunk>>,
    ) -> (usize, usize) {
        let ch = self.channels as usize;
        let frames = data.len() / ch;
        let mut written = 0;

        while written < frames {
            if self.filled.is_empty() || self.current_frames == self.chunk_frames {
                // Pushing past capacity would allocate.
                if self.filled.len() >= self.max_chunks.min(self.filled.capacity()) {
                    break;
                }
                match self.spare.pop().or_else(|| refill.and_then(ArrayQueue::pop)) {
                    Some(chunk) => {
                        self.filled.push(chunk);
                        self.current_frames = 0;
                    }
                    None => break,
                }
            }

            let Some(chunk) = self.filled.last_mut() else {
                break;
            };
            let n = (self.chunk_frames - self.current_frames).min(frames - written);
            let dst = &mut chunk[self.current_frames * ch..(self.current_frames + n) * ch];
            if muted {
                dst.fill(0.0);
            } else {
                dst.copy_from_slice(&data[written * ch..(written + n) * ch]);
            }

            self.current_frames += n;
            self.total_frames += n;
            written += n;
        }

        (written, frames - written)
    }

    pub fn frames(&self) -> usize {
        self.total_frames
    }

    pub fn is_empty(&self) -> bool {
        self.total_frames == 0
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn spare_chunks(&self) -> usize {
        self.spare.len()
    }

    /// Hand the filled chunks over for a loop buffer. Spare chunks are dropped
    /// here, on the caller's thread.
    pub(crate) fn into_chunks(mut self) -> (Vec<Chunk>, usize) {
        self.spare.clear();
        let filled = std::mem::take(&mut self.filled);
        (filled, self.total_frames)
    }
}

fn allocate_chunks(count: usize, len: usize) -> Vec<Chunk> {
    (0..count)
        .map(|_| vec![0.0f32; len].into_boxed_slice())
        .collect()
}

impl std::fmt::Debug for TakeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TakeBuffer")
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.total_frames)
            .field("chunks", &self.filled.len())
            .field("spare", &self.spare.len())
            .finish()
    }
}

/// Slot holding the take in progress.
///
/// The capture callback only ever uses `try_lock`. The control path locks
/// only to install or remove a take; progress and pool top-ups go through
/// atomics and the refill queue so housekeeping never contends with capture.
#[derive(Debug)]
pub struct TakeSlot {
    take: Mutex<Option<TakeBuffer>>,
    refill: ArrayQueue<Chunk>,
    recorded: AtomicUsize,
}

impl TakeSlot {
    /// `refill_capacity` bounds the chunks waiting in the refill queue.
    pub fn new(refill_capacity: usize) -> Self {
        Self {
            take: Mutex::new(None),
            refill: ArrayQueue::new(refill_capacity.max(1)),
            recorded: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<TakeBuffer>> {
        match self.take.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Install a fresh take, returning any take that was still in the slot.
    pub(crate) fn begin(&self, take: TakeBuffer) -> Option<TakeBuffer> {
        let stale = self.lock().replace(take);
        self.recorded.store(0, Ordering::Release);
        stale
    }

    pub(crate) fn finish(&self) -> Option<TakeBuffer> {
        let take = self.lock().take();
        self.recorded.store(0, Ordering::Release);
        take
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    /// Frames captured into the current take. Lock-free.
    pub fn recorded_frames(&self) -> usize {
        self.recorded.load(Ordering::Acquire)
    }

    /// Chunks waiting in the refill queue.
    pub fn queued_chunks(&self) -> usize {
        self.refill.len()
    }

    /// Real-time path. Never blocks.
    pub fn try_append(&self, data: &[f32], muted: bool) -> AppendOutcome {
        let mut guard = match self.take.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return AppendOutcome::Contended,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        match guard.as_mut() {
            Some(take) => {
                let (frames, dropped) = take.append_from(data, muted, Some(&self.refill));
                self.recorded.store(take.frames(), Ordering::Release);
                AppendOutcome::Appended { frames, dropped }
            }
            None => AppendOutcome::NoTake,
        }
    }

    /// Top the refill queue up to `target` chunks of `chunk_len` samples.
    /// Allocates on the caller's thread and never touches the take lock.
    pub(crate) fn replenish(&self, target: usize, chunk_len: usize) {
        let missing = target
            .min(self.refill.capacity())
            .saturating_sub(self.refill.len());
        for chunk in allocate_chunks(missing, chunk_len) {
            if self.refill.push(chunk).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_spans_chunks() {
        let mut take = TakeBuffer::new(2, 48000, 4, 3);
        let data: Vec<f32> = (0..20).map(|i| i as f32).collect();

        let (written, dropped) = take.append(&data, false);
        assert_eq!((written, dropped), (10, 0));
        assert_eq!(take.frames(), 10);
        assert_eq!(take.spare_chunks(), 0);

        let (chunks, frames) = take.into_chunks();
        assert_eq!(frames, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(&chunks[0][..], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(&chunks[2][..4], &[16.0, 17.0, 18.0, 19.0]);
    }

    #[test]
    fn test_muted_append_records_silence() {
        let mut take = TakeBuffer::new(1, 48000, 8, 1);
        take.append(&[0.5; 4], false);
        take.append(&[0.9; 4], true);

        let (chunks, frames) = take.into_chunks();
        assert_eq!(frames, 8);
        assert_eq!(&chunks[0][..], &[0.5, 0.5, 0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_exhausted_pool_drops_frames() {
        let mut take = TakeBuffer::new(1, 48000, 4, 1);
        let (written, dropped) = take.append(&[1.0; 6], false);
        assert_eq!((written, dropped), (4, 2));
        assert_eq!(take.frames(), 4);
    }

    #[test]
    fn test_partial_frame_ignored() {
        let mut take = TakeBuffer::new(2, 48000, 4, 1);
        let (written, dropped) = take.append(&[1.0, 1.0, 1.0], false);
        assert_eq!((written, dropped), (1, 0));
    }

    #[test]
    fn test_slot_replenish_restores_pool() {
        let slot = TakeSlot::new(2);
        assert_eq!(slot.try_append(&[1.0; 4], false), AppendOutcome::NoTake);

        slot.begin(TakeBuffer::new(1, 48000, 4, 2).with_max_chunks(8));
        assert_eq!(
            slot.try_append(&[1.0; 8], false),
            AppendOutcome::Appended { frames: 8, dropped: 0 }
        );
        slot.replenish(2, 4);
        assert_eq!(slot.queued_chunks(), 2);
        assert_eq!(
            slot.try_append(&[1.0; 8], false),
            AppendOutcome::Appended { frames: 8, dropped: 0 }
        );
        assert_eq!(slot.recorded_frames(), 16);

        assert_eq!(slot.queued_chunks(), 0);

        let take = slot.finish().unwrap();
        assert_eq!(take.frames(), 16);
        assert!(!slot.is_active());
        assert_eq!(slot.recorded_frames(), 0);
    }

    #[test]
    fn test_replenish_never_exceeds_queue_capacity() {
        let slot = TakeSlot::new(3);
        slot.replenish(10, 4);
        assert_eq!(slot.queued_chunks(), 3);
        slot.replenish(10, 4);
        assert_eq!(slot.queued_chunks(), 3);
    }

    #[test]
    fn test_filled_list_is_bounded_by_max_chunks() {
        let slot = TakeSlot::new(4);
        slot.begin(TakeBuffer::new(1, 48000, 4, 1).with_max_chunks(2));
        slot.replenish(4, 4);

        assert_eq!(
            slot.try_append(&[1.0; 12], false),
            AppendOutcome::Appended { frames: 8, dropped: 4 }
        );
        assert_eq!(slot.recorded_frames(), 8);
    }

    #[test]
    fn test_housekeeping_does_not_contend_with_capture() {
        let slot = std::sync::Arc::new(TakeSlot::new(512));
        slot.begin(TakeBuffer::new(1, 48000, 64, 4).with_max_chunks(4096));
        slot.replenish(512, 64);
        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

        let fed = std::thread::scope(|scope| {
            let feeder = {
                let slot = std::sync::Arc::clone(&slot);
                let done = std::sync::Arc::clone(&done);
                scope.spawn(move || {
                    let mut contended = 0;
                    for _ in 0..2000 {
                        if slot.try_append(&[0.5; 64], false) == AppendOutcome::Contended {
                            contended += 1;
                        }
                        std::thread::sleep(std::time::Duration::from_micros(20));
                    }
                    done.store(true, Ordering::Release);
                    contended
                })
            };

            while !done.load(Ordering::Acquire) {
                slot.replenish(512, 64);
                let _ = slot.recorded_frames();
            }
            feeder.join().unwrap()
        });

        assert_eq!(fed, 0);
        assert_eq!(slot.finish().unwrap().frames(), 2000 * 64);
    }

    #[test]
    fn test_contended_slot_does_not_block() {
        let slot = TakeSlot::new(2);
        slot.begin(TakeBuffer::new(1, 48000, 4, 2));
        let _held = slot.take.lock().unwrap();
        assert_eq!(slot.try_append(&[1.0; 4], false), AppendOutcome::Contended);
    }
}
