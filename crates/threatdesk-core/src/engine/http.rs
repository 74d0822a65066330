// Threatdesk Engine — Outbound HTTP: retry policy and circuit breaker
//
// Used by chat backends only. The dispatcher never retries; a backend call
// is a single logical round trip whose internal retries are the backend's
// own business.
//
//   • Exponential backoff with ±25% jitter (base 1s, cap 30s, 3 retries)
//   • Retry on 429, 500, 502, 503, 504, 529; honour integer `Retry-After`
//   • Circuit breaker: N consecutive failures → fail fast for a cooldown

use log::{info, warn};
use parking_lot::Mutex;
use reqwest::Client;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

// ── Retry Policy ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_retries: 3, initial_delay_ms: 1_000, max_delay_ms: 30_000 }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        RetryPolicy { max_retries: 0, ..Self::default() }
    }

    /// Un-jittered delay before retry number `attempt` (0-based). A server
    /// `Retry-After` (capped at 60s) is honoured when it is longer.
    pub fn base_delay_ms(&self, attempt: u32, retry_after_secs: Option<u64>) -> u64 {
        let backoff = self
            .initial_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.max_delay_ms);
        match retry_after_secs {
            Some(secs) => (secs.min(60) * 1000).max(backoff),
            None => backoff,
        }
    }

    /// Sleep before retry `attempt`. Returns the delay used, for logging.
    pub async fn wait(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        let delay = Duration::from_millis(apply_jitter(self.base_delay_ms(attempt, retry_after_secs)));
        tokio::time::sleep(delay).await;
        delay
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

/// Integer seconds only; HTTP-date values fall back to computed backoff.
pub fn parse_retry_after(header_value: &str) -> Option<u64> {
    header_value.trim().parse::<u64>().ok()
}

fn apply_jitter(base_ms: u64) -> u64 {
    let spread = (base_ms / 4) as i64;
    if spread == 0 {
        return base_ms.max(100);
    }
    // Clock nanos are plenty for de-synchronising retries.
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().subsec_nanos() as i64;
    let offset = nanos % (2 * spread + 1) - spread;
    (base_ms as i64 + offset).max(100) as u64
}

// ── Circuit Breaker ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum BreakerState {
    Closed { failures: u32 },
    Open { until: Instant },
}

/// Fails fast for `cooldown` once the upstream has been unreachable
/// `threshold` times in a row. Only availability failures count; callers
/// report an upstream that answered (even with 4xx) as a success.
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        CircuitBreaker {
            state: Mutex::new(BreakerState::Closed { failures: 0 }),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    /// `Err` with a readable reason while the circuit is open.
    pub fn check(&self) -> Result<(), String> {
        self.check_at(Instant::now())
    }

    fn check_at(&self, now: Instant) -> Result<(), String> {
        let mut state = self.state.lock();
        match *state {
            BreakerState::Closed { .. } => Ok(()),
            BreakerState::Open { until } if now < until => Err(format!(
                "Backend unavailable after {} consecutive failures; retry in {}s",
                self.threshold,
                (until - now).as_secs().max(1)
            )),
            BreakerState::Open { .. } => {
                // Cooldown over: let one call through; a single failure re-opens.
                *state = BreakerState::Closed { failures: self.threshold - 1 };
                info!("[circuit-breaker] Cooldown elapsed, allowing a trial call");
                Ok(())
            }
        }
    }

    pub fn record_success(&self) {
        *self.state.lock() = BreakerState::Closed { failures: 0 };
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    fn record_failure_at(&self, now: Instant) {
        let mut state = self.state.lock();
        let failures = match *state {
            BreakerState::Closed { failures } => failures + 1,
            BreakerState::Open { .. } => return,
        };
        if failures >= self.threshold {
            *state = BreakerState::Open { until: now + self.cooldown };
            warn!(
                "[circuit-breaker] Open after {} consecutive failures, cooling down {}s",
                failures,
                self.cooldown.as_secs()
            );
        } else {
            *state = BreakerState::Closed { failures };
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), BreakerState::Open { until } if Instant::now() < until)
    }
}

// ── Client ─────────────────────────────────────────────────────────────

pub fn build_client(connect_timeout: Duration, timeout: Duration) -> Client {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for s in [429, 500, 502, 503, 504, 529] {
            assert!(is_retryable_status(s), "{} should retry", s);
        }
        for s in [200, 400, 401, 403, 404] {
            assert!(!is_retryable_status(s), "{} should not retry", s);
        }
    }

    #[test]
    fn parse_retry_after_values() {
        assert_eq!(parse_retry_after("5"), Some(5));
        assert_eq!(parse_retry_after(" 30 "), Some(30));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.base_delay_ms(0, None), 1_000);
        assert_eq!(p.base_delay_ms(1, None), 2_000);
        assert_eq!(p.base_delay_ms(2, None), 4_000);
        assert_eq!(p.base_delay_ms(10, None), 30_000);
    }

    #[test]
    fn retry_after_wins_when_longer() {
        let p = RetryPolicy::default();
        assert_eq!(p.base_delay_ms(0, Some(10)), 10_000);
        assert_eq!(p.base_delay_ms(2, Some(1)), 4_000);
        assert_eq!(p.base_delay_ms(0, Some(600)), 60_000);
    }

    #[test]
    fn jitter_within_quarter() {
        for base in [1_000u64, 5_000, 30_000] {
            let j = apply_jitter(base);
            assert!(j >= base - base / 4 && j <= base + base / 4, "jitter({}) = {}", base, j);
        }
        assert_eq!(apply_jitter(0), 100);
    }

    #[test]
    fn circuit_breaker_trips_and_resets() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert!(cb.check().is_ok());
        cb.record_failure();
        assert!(cb.is_open());
        let err = cb.check().unwrap_err();
        assert!(err.contains("3 consecutive failures"));
        cb.record_success();
        assert!(cb.check().is_ok());
        assert!(!cb.is_open());
    }

    #[test]
    fn circuit_breaker_success_breaks_the_streak() {
        let cb = CircuitBreaker::new(2, Duration::from_secs(60));
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert!(cb.check().is_ok());
    }

    #[test]
    fn circuit_breaker_trial_after_cooldown() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            cb.record_failure_at(start);
        }
        assert!(cb.check_at(start + Duration::from_secs(30)).is_err());

        let later = start + Duration::from_secs(61);
        assert!(cb.check_at(later).is_ok());
        // The trial failed: open again straight away.
        cb.record_failure_at(later);
        assert!(cb.check_at(later + Duration::from_secs(1)).is_err());
    }
}
