// ── Chatbridge Engine: Reconnect Backoff ───────────────────────────────────
//
// Delay helpers for the two recovery policies:
//   • Disconnect: linear escalation min(base * attempt, cap), bounded attempts
//   • Auth failure: fixed delay (see AuthRetryPolicy)
//
// No jitter.

use crate::engine::config::ReconnectPolicy;
use std::time::Duration;

/// Outcome of asking the policy for the next reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Schedule re-initialization; `attempt` is 1-based.
    Retry { attempt: u32, delay: Duration },
    /// Attempts exhausted.
    GiveUp { attempts: u32 },
}

impl ReconnectPolicy {
    /// Compute the delay for a 1-based attempt number.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = self
            .base_delay_ms
            .saturating_mul(u64::from(attempt))
            .min(self.cap_delay_ms);
        Duration::from_millis(ms)
    }

    /// Decide what to do given the attempts already made since the last
    /// successful `Ready`.
    pub fn next(&self, attempts_so_far: u32) -> ReconnectDecision {
        if attempts_so_far >= self.max_attempts {
            return ReconnectDecision::GiveUp { attempts: attempts_so_far };
        }
        let attempt = attempts_so_far + 1;
        ReconnectDecision::Retry {
            attempt,
            delay: self.delay_for(attempt),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
