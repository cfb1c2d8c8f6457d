//! Timing policy for outbound API calls: the fair-use gate requested by
//! the server, and exponential backoff for transient failures.

use std::time::{Duration, SystemTime};

use rand::Rng;
use tracing::warn;

/// Delay before retrying after a connection-level failure.
///
/// Socket errors get a short fixed delay and do not escalate the backoff
/// schedule.
pub(crate) const SOCKET_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Base delay for the first HTTP 5xx backoff step (15 minutes).
const BACKOFF_BASE: Duration = Duration::from_secs(15 * 60);

/// Longest delay the backoff schedule will ever produce (24 hours).
const BACKOFF_CEILING: Duration = Duration::from_secs(24 * 60 * 60);

/// Gate enforcing the server's `minimumWaitDuration` between requests.
///
/// The duration arrives on update and full-hash responses; once recorded,
/// *no* outbound call of any kind may be made before it elapses.  A
/// client may opt out of enforcement for testing, in which case the
/// violation is still recorded and logged.
#[derive(Debug)]
pub(crate) struct FairUseGate {
    /// Earliest instant the next request may be sent, if the server
    /// asked us to wait.
    ready_at: Option<SystemTime>,
    /// Whether we actually sleep, or merely log that we should have.
    enforce: bool,
}

impl FairUseGate {
    /// Create a gate.  `enforce` is true in production; false only for
    /// the throttle-circumventing debug switch.
    pub(crate) fn new(enforce: bool) -> Self {
        FairUseGate {
            ready_at: None,
            enforce,
        }
    }

    /// Record the wait a response asked for, measured from `now`.
    ///
    /// A response without a wait clears the gate.
    pub(crate) fn note_minimum_wait(&mut self, wait: Option<Duration>, now: SystemTime) {
        self.ready_at = wait.map(|d| now + d);
    }

    /// Return how long the caller must sleep before its next request, or
    /// `None` if it may proceed at once.
    ///
    /// With enforcement off, always returns `None`, logging the wait that
    /// was skipped.
    pub(crate) fn required_wait(&self, now: SystemTime) -> Option<Duration> {
        let wait = self.ready_at?.duration_since(now).ok()?;
        if wait.is_zero() {
            return None;
        }
        if !self.enforce {
            warn!(
                "Ignoring server-requested wait of {:.1}s (fair-use throttle disabled)",
                wait.as_secs_f64()
            );
            return None;
        }
        Some(wait)
    }
}

/// Exponential backoff with jitter for consecutive HTTP 5xx failures.
///
/// The N-th consecutive failure (N starting at 1) waits
/// `min(2^(N-1) · 15 min · (1 + rand[0,1)), 24 h)`.  The caller supplies
/// the random generator, so tests can seed it.
#[derive(Debug, Clone)]
pub(crate) struct BackoffSchedule {
    /// How many consecutive failures we have seen.
    failures: u32,
}

impl BackoffSchedule {
    /// Create a schedule with no failures recorded.
    pub(crate) fn new() -> Self {
        BackoffSchedule { failures: 0 }
    }

    /// Record a success, resetting the failure count.
    pub(crate) fn note_success(&mut self) {
        self.failures = 0;
    }

    /// Record one more consecutive failure and return the delay to sleep
    /// before the next attempt.
    pub(crate) fn next_delay<R: Rng>(&mut self, rng: &mut R) -> Duration {
        self.failures = self.failures.saturating_add(1);
        // Cap the exponent well before f64 overflow; the ceiling is hit
        // long before that anyway.
        let exponent = (self.failures - 1).min(32);
        let base = BACKOFF_BASE.as_secs_f64() * f64::from(2_u32.saturating_pow(exponent));
        let jittered = base * (1.0 + rng.random::<f64>());
        Duration::from_secs_f64(jittered.min(BACKOFF_CEILING.as_secs_f64()))
    }

    /// How many consecutive failures have been recorded.
    #[cfg(test)]
    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn backoff_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut sched = BackoffSchedule::new();

        // First failure: 15..30 minutes.
        let d1 = sched.next_delay(&mut rng);
        assert!(d1 >= Duration::from_secs(900));
        assert!(d1 < Duration::from_secs(1800));

        // Second failure: 30..60 minutes.
        let d2 = sched.next_delay(&mut rng);
        assert!(d2 >= Duration::from_secs(1800));
        assert!(d2 < Duration::from_secs(3600));

        // Far enough out, the 24h ceiling applies.
        for _ in 0..10 {
            let _ = sched.next_delay(&mut rng);
        }
        let late = sched.next_delay(&mut rng);
        assert_eq!(late, Duration::from_secs(86400));
    }

    #[test]
    fn backoff_is_deterministic_for_a_seed() {
        let mut rng_a = StdRng::seed_from_u64(99);
        let mut rng_b = StdRng::seed_from_u64(99);
        let mut sched_a = BackoffSchedule::new();
        let mut sched_b = BackoffSchedule::new();
        for _ in 0..5 {
            assert_eq!(sched_a.next_delay(&mut rng_a), sched_b.next_delay(&mut rng_b));
        }
    }

    #[test]
    fn backoff_resets_on_success() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut sched = BackoffSchedule::new();
        let _ = sched.next_delay(&mut rng);
        let _ = sched.next_delay(&mut rng);
        assert_eq!(sched.failures(), 2);
        sched.note_success();
        assert_eq!(sched.failures(), 0);
        let again = sched.next_delay(&mut rng);
        assert!(again < Duration::from_secs(1800));
    }

    #[test]
    fn gate_enforces_wait() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let mut gate = FairUseGate::new(true);
        assert_eq!(gate.required_wait(now), None);

        gate.note_minimum_wait(Some(Duration::from_secs(600)), now);
        assert_eq!(
            gate.required_wait(now + Duration::from_secs(1)),
            Some(Duration::from_secs(599))
        );
        // After the deadline the gate is open again.
        assert_eq!(gate.required_wait(now + Duration::from_secs(600)), None);

        // A response without a wait clears any pending deadline.
        gate.note_minimum_wait(Some(Duration::from_secs(600)), now);
        gate.note_minimum_wait(None, now);
        assert_eq!(gate.required_wait(now), None);
    }

    #[test]
    fn gate_opt_out_skips_wait() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let mut gate = FairUseGate::new(false);
        gate.note_minimum_wait(Some(Duration::from_secs(600)), now);
        assert_eq!(gate.required_wait(now), None);
    }
}
