use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::rolling_buffer::RollingBuffer;

struct QueueState {
    samples: RollingBuffer<f32>,
    failure: Option<String>,
    dropped: u64,
}

/// Bridges device callbacks to blocking `AudioSource::read` calls.
///
/// Device threads `push` arbitrarily sized interleaved chunks; the capture
/// loop pulls fixed-size blocks with [`SampleQueue::pop_block`]. When readers
/// fall behind, the oldest samples are dropped.
pub struct SampleQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl SampleQueue {
    /// `capacity` is in interleaved samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                samples: RollingBuffer::new(capacity),
                failure: None,
                dropped: 0,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn push(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        let free = state.samples.capacity() - state.samples.len();
        if samples.len() > free {
            let dropped = (samples.len() - free) as u64;
            state.dropped += dropped;
            log::debug!("sample queue overflow, dropping {} oldest samples", dropped);
        }
        state.samples.extend_from_slice(samples);
        drop(state);
        self.ready.notify_all();
    }

    /// Record a device failure; every following read reports it.
    pub fn fail(&self, message: impl Into<String>) {
        self.state.lock().failure = Some(message.into());
        self.ready.notify_all();
    }

    /// Wait up to `timeout` for `len` samples and return exactly `len`,
    /// padding with silence if the device under-delivered.
    pub fn pop_block(&self, len: usize, timeout: Duration) -> Result<Vec<f32>, String> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(ref failure) = state.failure {
                return Err(failure.clone());
            }
            if state.samples.len() >= len {
                break;
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                if let Some(ref failure) = state.failure {
                    return Err(failure.clone());
                }
                break;
            }
        }

        let mut block = state.samples.drain_oldest(len);
        block.resize(len, 0.0);
        Ok(block)
    }

    /// Forget queued samples and any latched failure.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.samples.clear();
        state.failure = None;
        state.dropped = 0;
    }

    pub fn queued(&self) -> usize {
        self.state.lock().samples.len()
    }

    /// Samples lost to overflow since the last reset.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn pop_returns_full_block_when_available() {
        let queue = SampleQueue::new(16);
        queue.push(&[0.1, 0.2, 0.3, 0.4, 0.5]);

        let block = queue.pop_block(4, Duration::from_millis(10)).unwrap();
        assert_eq!(block, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(queue.queued(), 1);
    }

    #[test]
    fn pop_pads_with_silence_after_timeout() {
        let queue = SampleQueue::new(16);
        queue.push(&[0.5, 0.5]);

        let block = queue.pop_block(6, Duration::from_millis(5)).unwrap();
        assert_eq!(block, vec![0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn pop_wakes_when_producer_delivers() {
        let queue = Arc::new(SampleQueue::new(64));
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(&[1.0; 8]);
        });

        let block = queue.pop_block(8, Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(block, vec![1.0; 8]);
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let queue = SampleQueue::new(4);
        queue.push(&[1.0, 2.0, 3.0]);
        queue.push(&[4.0, 5.0, 6.0]);

        assert_eq!(queue.dropped(), 2);
        let block = queue.pop_block(4, Duration::ZERO).unwrap();
        assert_eq!(block, vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn failure_is_latched_until_reset() {
        let queue = SampleQueue::new(8);
        queue.push(&[1.0; 8]);
        queue.fail("device unplugged");

        assert_eq!(queue.pop_block(2, Duration::ZERO).unwrap_err(), "device unplugged");
        assert!(queue.pop_block(2, Duration::ZERO).is_err());

        queue.reset();
        assert_eq!(queue.queued(), 0);
        assert_eq!(queue.pop_block(2, Duration::ZERO).unwrap(), vec![0.0, 0.0]);
    }
}
