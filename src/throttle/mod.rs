//! Request pacing shared by every downloader instance.
//!
//! Portals fingerprint burst traffic, so all outbound requests funnel through
//! one throttle: a small semaphore bounds how many callers may be computing
//! or serving a delay at once, and a mutex guards the counters. This is a
//! pacing policy, not a correctness mechanism — a portal may still block us.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

/// Tuning knobs, loaded from configuration with these observed defaults.
#[derive(Debug, Clone)]
pub struct ThrottleSettings {
    /// Normal inter-request delay range.
    pub base_delay_min: Duration,
    pub base_delay_max: Duration,
    /// Escalated range applied after a bot-challenge response.
    pub challenge_delay_min: Duration,
    pub challenge_delay_max: Duration,
    /// Hard floor after all multipliers and jitter.
    pub min_delay: Duration,
    /// Requests spaced closer than this double the delay.
    pub rapid_threshold: Duration,
    /// Every Nth request triples the delay (periodic cooldown).
    pub cooldown_every: u64,
    /// Max concurrent callers inside the throttle.
    pub gate_permits: usize,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            base_delay_min: Duration::from_millis(500),
            base_delay_max: Duration::from_millis(1500),
            challenge_delay_min: Duration::from_secs(5),
            challenge_delay_max: Duration::from_secs(12),
            min_delay: Duration::from_millis(250),
            rapid_threshold: Duration::from_secs(2),
            cooldown_every: 10,
            gate_permits: 2,
        }
    }
}

/// Process-wide pacing counters. Only ever touched under the mutex.
#[derive(Debug, Default)]
struct ThrottleState {
    requests: u64,
    last_request: Option<Instant>,
}

/// Shared pacing gate. One instance is constructed at startup and injected
/// into every downloader; tests build their own.
#[derive(Debug)]
pub struct RequestThrottle {
    settings: ThrottleSettings,
    gate: Semaphore,
    state: Mutex<ThrottleState>,
    halted: AtomicBool,
}

impl RequestThrottle {
    pub fn new(settings: ThrottleSettings) -> Self {
        let permits = settings.gate_permits.max(1);
        Self {
            settings,
            gate: Semaphore::new(permits),
            state: Mutex::new(ThrottleState::default()),
            halted: AtomicBool::new(false),
        }
    }

    /// Stop admitting new requests; sessions refuse to send while halted.
    /// In-flight calls are untouched — they finish or time out naturally.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.halted.store(false, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Block the caller until it is safe to issue the next request.
    pub async fn before_request(&self) {
        self.pace(self.settings.base_delay_min, self.settings.base_delay_max)
            .await;
    }

    /// Escalated variant invoked after a bot-challenge response.
    pub async fn after_challenge(&self) {
        self.pace(
            self.settings.challenge_delay_min,
            self.settings.challenge_delay_max,
        )
        .await;
    }

    /// Number of requests paced so far.
    pub async fn request_count(&self) -> u64 {
        self.state.lock().await.requests
    }

    async fn pace(&self, range_min: Duration, range_max: Duration) {
        // Closed only if the throttle is being torn down; proceed unpaced then.
        let Ok(_permit) = self.gate.acquire().await else {
            return;
        };

        let delay = {
            let mut state = self.state.lock().await;
            state.requests += 1;

            let elapsed = state.last_request.map(|at| at.elapsed());
            let jitter: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
            let delay = compute_delay(
                &self.settings,
                state.requests,
                elapsed,
                range_min,
                range_max,
                jitter,
            );

            state.last_request = Some(Instant::now());
            delay
        };

        debug!(delay_ms = delay.as_millis() as u64, "Throttling request");
        tokio::time::sleep(delay).await;
    }
}

/// Pure delay computation; `jitter` is a symmetric factor in [-1, 1].
fn compute_delay(
    settings: &ThrottleSettings,
    request_number: u64,
    elapsed_since_last: Option<Duration>,
    range_min: Duration,
    range_max: Duration,
    jitter: f64,
) -> Duration {
    let midpoint = (range_min + range_max) / 2;
    let mut delay = midpoint;

    if let Some(elapsed) = elapsed_since_last {
        if elapsed < settings.rapid_threshold {
            delay *= 2;
        }
    }

    if settings.cooldown_every > 0 && request_number % settings.cooldown_every == 0 {
        delay *= 3;
    }

    let half_spread = range_max.saturating_sub(range_min).as_secs_f64() / 2.0;
    let jittered = delay.as_secs_f64() + half_spread * jitter;
    let jittered = Duration::from_secs_f64(jittered.max(0.0));

    jittered.max(settings.min_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ThrottleSettings {
        ThrottleSettings::default()
    }

    fn delay_at(n: u64, elapsed: Option<Duration>) -> Duration {
        let s = settings();
        compute_delay(&s, n, elapsed, s.base_delay_min, s.base_delay_max, 0.0)
    }

    #[test]
    fn test_cooldown_escalates_every_tenth_request() {
        // 20 back-to-back requests (always under the rapid threshold):
        // requests #10 and #20 must be strictly above every request in #1-#9.
        let rapid = Some(Duration::from_millis(100));
        let plateau: Vec<Duration> = (1..=9).map(|n| delay_at(n, rapid)).collect();
        let tenth = delay_at(10, rapid);
        let twentieth = delay_at(20, rapid);

        for d in &plateau {
            assert!(tenth > *d, "request #10 must escalate over #1-#9");
            assert!(twentieth > *d, "request #20 must escalate over #1-#9");
        }
        assert_eq!(tenth, twentieth);
    }

    #[test]
    fn test_rapid_requests_double_delay() {
        let relaxed = delay_at(3, Some(Duration::from_secs(30)));
        let rapid = delay_at(3, Some(Duration::from_millis(500)));
        assert_eq!(rapid, relaxed * 2);
    }

    #[test]
    fn test_first_request_uses_base_range() {
        let s = settings();
        let d = delay_at(1, None);
        assert_eq!(d, (s.base_delay_min + s.base_delay_max) / 2);
    }

    #[test]
    fn test_jitter_is_floored_at_min_delay() {
        let mut s = settings();
        s.base_delay_min = Duration::from_millis(100);
        s.base_delay_max = Duration::from_millis(3000);
        s.min_delay = Duration::from_millis(250);

        // Strong negative jitter would push below the floor.
        let d = compute_delay(&s, 1, None, s.base_delay_min, s.base_delay_max, -1.0);
        assert!(d >= s.min_delay);
    }

    #[test]
    fn test_challenge_range_is_larger() {
        let s = settings();
        let normal = compute_delay(&s, 1, None, s.base_delay_min, s.base_delay_max, 0.0);
        let escalated =
            compute_delay(&s, 1, None, s.challenge_delay_min, s.challenge_delay_max, 0.0);
        assert!(escalated > normal);
    }

    #[tokio::test]
    async fn test_before_request_counts() {
        let mut s = settings();
        // Keep the test fast.
        s.base_delay_min = Duration::from_millis(1);
        s.base_delay_max = Duration::from_millis(2);
        s.min_delay = Duration::from_millis(1);

        let throttle = RequestThrottle::new(s);
        throttle.before_request().await;
        throttle.before_request().await;
        assert_eq!(throttle.request_count().await, 2);
    }
}
