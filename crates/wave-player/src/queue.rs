//! Bounded queue of interleaved samples behind the device callback.
//!
//! The sink's enqueue path pushes decoded samples in (blocking when full);
//! the real-time output callback drains non-blocking. A `done` flag lives
//! under the same mutex as the data to keep shutdown race-free, and
//! `flush` supports the engine's stop semantics (discard everything queued
//! without closing the queue).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Thread-safe bounded queue for interleaved `f32` samples.
///
/// Samples are stored interleaved:
/// `frame0[ch0], frame0[ch1], ..., frame1[ch0], ...`; the channel count is
/// fixed for the lifetime of the queue.
pub struct SharedSamples {
    channels: usize,
    inner: Mutex<Inner>,
    cv: Condvar,
    max_samples: usize,
}

struct Inner {
    queue: VecDeque<f32>,
    done: bool,
}

impl SharedSamples {
    /// Create a queue capped at `max_samples` (samples, not frames).
    pub fn new(channels: usize, max_samples: usize) -> Self {
        Self {
            channels,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                done: false,
            }),
            cv: Condvar::new(),
            max_samples,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Current buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        let g = self.inner.lock().unwrap();
        g.queue.len() / self.channels
    }

    /// Whether the queue has been closed; closed queues may still hold
    /// samples until drained.
    pub fn is_done(&self) -> bool {
        let g = self.inner.lock().unwrap();
        g.done
    }

    /// Mark the queue as finished and wake all waiters. Idempotent.
    pub fn close(&self) {
        let mut g = self.inner.lock().unwrap();
        g.done = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Discard all buffered samples without closing the queue.
    pub fn flush(&self) {
        let mut g = self.inner.lock().unwrap();
        g.queue.clear();
        drop(g);
        self.cv.notify_all();
    }

    /// Push interleaved samples, blocking while the queue is full.
    ///
    /// If the queue is closed while waiting, remaining samples are dropped
    /// and the call returns early.
    pub fn push_blocking(&self, samples: &[f32]) {
        let mut offset = 0;

        while offset < samples.len() {
            let mut g = self.inner.lock().unwrap();

            while g.queue.len() >= self.max_samples && !g.done {
                g = self.cv.wait(g).unwrap();
            }
            if g.done {
                return;
            }

            while offset < samples.len() && g.queue.len() < self.max_samples {
                g.queue.push_back(samples[offset]);
                offset += 1;
            }

            drop(g);
            self.cv.notify_all();
        }
    }

    /// Pop up to `max_frames` whole frames without blocking.
    ///
    /// Returns `None` when no whole frame is buffered.
    pub fn pop_chunk(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.inner.lock().unwrap();

        let available_frames = g.queue.len() / self.channels;
        let take_samples = available_frames.min(max_frames) * self.channels;
        if take_samples == 0 {
            return None;
        }

        let mut out = Vec::with_capacity(take_samples);
        for _ in 0..take_samples {
            out.push(g.queue.pop_front().unwrap_or(0.0));
        }

        drop(g);
        self.cv.notify_all();
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn pop_chunk_empty_returns_none() {
        let q = SharedSamples::new(2, 16);
        assert!(q.pop_chunk(4).is_none());
    }

    #[test]
    fn pop_chunk_returns_whole_frames_only() {
        let q = SharedSamples::new(2, 64);
        q.push_blocking(&[1.0, 2.0, 3.0, 4.0, 5.0]);

        let out = q.pop_chunk(8).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
        // The dangling half frame stays buffered.
        assert_eq!(q.len_frames(), 0);
    }

    #[test]
    fn pop_chunk_respects_max_frames() {
        let q = SharedSamples::new(2, 64);
        q.push_blocking(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let out = q.pop_chunk(2).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(q.len_frames(), 1);
    }

    #[test]
    fn push_blocking_unblocks_when_drained() {
        let q = Arc::new(SharedSamples::new(2, 4));
        q.push_blocking(&[1.0, 2.0, 3.0, 4.0]);

        let q_push = q.clone();
        let handle = thread::spawn(move || {
            q_push.push_blocking(&[5.0, 6.0]);
        });

        // Drain until the pusher can finish.
        loop {
            if q.pop_chunk(4).is_some() && q.len_frames() == 0 {
                break;
            }
        }
        handle.join().unwrap();
        let out = q.pop_chunk(4).unwrap();
        assert_eq!(out, vec![5.0, 6.0]);
    }

    #[test]
    fn close_drops_waiting_push() {
        let q = Arc::new(SharedSamples::new(2, 2));
        q.push_blocking(&[1.0, 2.0]);

        let q_push = q.clone();
        let handle = thread::spawn(move || {
            // Queue is full; this blocks until close.
            q_push.push_blocking(&[3.0, 4.0]);
        });

        q.close();
        handle.join().unwrap();
        assert!(q.is_done());
        assert_eq!(q.len_frames(), 1);
    }

    #[test]
    fn flush_discards_buffered_samples() {
        let q = SharedSamples::new(2, 64);
        q.push_blocking(&[1.0, 2.0, 3.0, 4.0]);
        q.flush();
        assert_eq!(q.len_frames(), 0);
        assert!(!q.is_done());
    }
}
