//! Lock-free sample ring for PCM audio
//!
//! Bridges cpal's real-time callbacks and the blocking network loops. One
//! side pushes, the other pops; neither ever takes a lock.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Bounded single-producer single-consumer queue of s16 samples
pub struct SampleRing {
    queue: ArrayQueue<i16>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl SampleRing {
    /// Create a new ring holding up to `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push as many samples as fit. Returns the number accepted; any shortfall
    /// counts as one overflow event and the rest is dropped.
    pub fn push_slice(&self, samples: &[i16]) -> usize {
        for (pushed, &sample) in samples.iter().enumerate() {
            if self.queue.push(sample).is_err() {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                return pushed;
            }
        }
        samples.len()
    }

    /// Pop up to `out.len()` samples. Returns the number written.
    pub fn pop_into(&self, out: &mut [i16]) -> usize {
        let mut popped = 0;
        for slot in out.iter_mut() {
            match self.queue.pop() {
                Some(sample) => {
                    *slot = sample;
                    popped += 1;
                }
                None => break,
            }
        }
        popped
    }

    /// Pop one sample, counting an underrun if the ring is empty
    pub fn pop_or_silence(&self) -> i16 {
        match self.queue.pop() {
            Some(sample) => sample,
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

/// Thread-safe handle to a sample ring
pub type SharedSampleRing = Arc<SampleRing>;

pub fn create_shared_ring(capacity: usize) -> SharedSampleRing {
    Arc::new(SampleRing::new(capacity))
}

/// Reassembles little-endian s16 samples from arbitrarily split byte reads.
///
/// TCP reads can end on an odd byte; it is held back and joined with the
/// first byte of the next read.
#[derive(Debug, Default)]
pub struct SampleAssembler {
    carry: Option<u8>,
}

impl SampleAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, appending complete samples to `out`.
    pub fn feed(&mut self, mut bytes: &[u8], out: &mut Vec<i16>) {
        if bytes.is_empty() {
            return;
        }
        if let Some(lo) = self.carry.take() {
            out.push(i16::from_le_bytes([lo, bytes[0]]));
            bytes = &bytes[1..];
        }
        let mut pairs = bytes.chunks_exact(2);
        out.extend(pairs.by_ref().map(|p| i16::from_le_bytes([p[0], p[1]])));
        self.carry = pairs.remainder().first().copied();
    }

    /// True if half a sample is pending
    pub fn has_carry(&self) -> bool {
        self.carry.is_some()
    }
}

pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}
