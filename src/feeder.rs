use std::thread;
use std::time::{Duration, Instant};

use crate::drain::{DimensionTracker, FrameDrain};
use crate::{DecodeError, InputSlot, PlatformDecoder, TimestampUs};

/// Backpressure policy for a busy input queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Input-slot polls before the access unit is dropped.
    pub max_attempts: u32,
    pub poll_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            poll_timeout: Duration::from_millis(10),
            retry_delay: Duration::from_millis(5),
        }
    }
}

impl RetryPolicy {
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            poll_timeout: Duration::ZERO,
            retry_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    Submitted { attempts: u32 },
    Dropped { attempts: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct FrameFeeder {
    policy: RetryPolicy,
}

impl FrameFeeder {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Enqueues one access unit. A busy queue is drained and retried until the
    /// attempt budget runs out, at which point the unit is dropped. Platform
    /// errors abort this call only.
    pub fn feed(
        &self,
        decoder: &mut dyn PlatformDecoder,
        data: &[u8],
        pts: TimestampUs,
        drain: &mut FrameDrain,
        dims: &mut DimensionTracker,
    ) -> Result<FeedOutcome, DecodeError> {
        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match decoder.dequeue_input_slot(self.policy.poll_timeout)? {
                InputSlot::Ready(slot) => {
                    drain.latency_mut().record(pts, Instant::now());
                    if let Err(err) = decoder.submit_input(slot, data, pts) {
                        drain.latency_mut().forget(pts);
                        return Err(err);
                    }
                    if attempt > 1 {
                        tracing::debug!(%pts, attempt, "input slot freed after retry");
                    }
                    return Ok(FeedOutcome::Submitted { attempts: attempt });
                }
                InputSlot::Busy => {
                    let report = drain.drain(decoder, dims);
                    tracing::trace!(%pts, attempt, freed = report.frames, "input busy, drained outputs");
                    if attempt < max_attempts && !self.policy.retry_delay.is_zero() {
                        thread::sleep(self.policy.retry_delay);
                    }
                }
            }
        }

        let timeout = DecodeError::InputTimeout {
            attempts: max_attempts,
        };
        tracing::warn!(%pts, bytes = data.len(), error = %timeout, "dropping access unit");
        dims.notify_drop(pts);
        Ok(FeedOutcome::Dropped {
            attempts: max_attempts,
        })
    }
}
