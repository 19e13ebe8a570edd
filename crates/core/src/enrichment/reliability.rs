//! Reliability middleware wrapped around every remote backend: a per-host
//! circuit breaker, a token-bucket rate limiter, and a daily cost tracker.
//! Plain synchronous state behind a `Mutex` — no actor-style concurrency
//! needed for bookkeeping this small.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct HostCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    hosts: Mutex<HashMap<String, HostCircuit>>,
    disabled_hosts: Mutex<HashSet<String>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        CircuitBreaker { failure_threshold, cooldown, hosts: Mutex::new(HashMap::new()), disabled_hosts: Mutex::new(HashSet::new()) }
    }

    /// Permanently disables `host` for the life of this breaker: unlike
    /// the normal open/half-open cycle, a disabled host never reopens on
    /// its own cooldown. For `auth_error`, which means the backend's
    /// credentials are bad, not that it's momentarily overloaded.
    pub fn disable_permanently(&self, host: &str) {
        self.disabled_hosts.lock().unwrap().insert(host.to_string());
    }

    pub fn is_permanently_disabled(&self, host: &str) -> bool {
        self.disabled_hosts.lock().unwrap().contains(host)
    }

    /// Whether a request to `host` is currently allowed. A permanently
    /// disabled host is never allowed again. Otherwise, an open circuit
    /// past its cooldown transitions to half-open and allows exactly one
    /// probe through.
    pub fn allow(&self, host: &str) -> bool {
        if self.is_permanently_disabled(host) {
            return false;
        }
        let mut hosts = self.hosts.lock().unwrap();
        let circuit = hosts.entry(host.to_string()).or_insert_with(|| HostCircuit {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        });
        match circuit.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if circuit.opened_at.map(|t| t.elapsed() >= self.cooldown).unwrap_or(true) {
                    circuit.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, host: &str) {
        let mut hosts = self.hosts.lock().unwrap();
        if let Some(circuit) = hosts.get_mut(host) {
            circuit.state = CircuitState::Closed;
            circuit.consecutive_failures = 0;
            circuit.opened_at = None;
        }
    }

    pub fn record_failure(&self, host: &str) {
        let mut hosts = self.hosts.lock().unwrap();
        let circuit = hosts.entry(host.to_string()).or_insert_with(|| HostCircuit {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        });
        circuit.consecutive_failures += 1;
        if circuit.state == CircuitState::HalfOpen || circuit.consecutive_failures >= self.failure_threshold {
            circuit.state = CircuitState::Open;
            circuit.opened_at = Some(Instant::now());
        }
    }
}

/// Token-bucket rate limiter sized from provider-documented limits.
pub struct TokenBucket {
    capacity: f64,
    refill_per_second: f64,
    state: Mutex<(f64, Instant)>,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_second: f64) -> Self {
        TokenBucket { capacity, refill_per_second, state: Mutex::new((capacity, Instant::now())) }
    }

    /// Attempts to withdraw one token; refills based on elapsed wall time.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let (tokens, last) = &mut *state;
        let elapsed = last.elapsed().as_secs_f64();
        *tokens = (*tokens + elapsed * self.refill_per_second).min(self.capacity);
        *last = Instant::now();
        if *tokens >= 1.0 {
            *tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Rejects further attempts once a daily USD budget is exceeded. The
/// tracker only resets the counter explicitly (via `roll_day`) — callers
/// drive the daily boundary, keeping this struct free of wall-clock
/// assumptions that would complicate testing.
pub struct CostTracker {
    daily_budget_usd: f64,
    spent_usd: Mutex<f64>,
}

impl CostTracker {
    pub fn new(daily_budget_usd: f64) -> Self {
        CostTracker { daily_budget_usd, spent_usd: Mutex::new(0.0) }
    }

    pub fn record_spend(&self, usd: f64) {
        let mut spent = self.spent_usd.lock().unwrap();
        *spent += usd;
    }

    pub fn over_budget(&self) -> bool {
        *self.spent_usd.lock().unwrap() >= self.daily_budget_usd
    }

    pub fn roll_day(&self) {
        *self.spent_usd.lock().unwrap() = 0.0;
    }

    pub fn spent(&self) -> f64 {
        *self.spent_usd.lock().unwrap()
    }
}

/// Approximates USD cost from token counts at a per-million-token rate —
/// the standard billing unit across OpenAI-compatible providers.
pub fn estimate_cost_usd(tokens_in: u32, tokens_out: u32, price_per_million_in: f64, price_per_million_out: f64) -> f64 {
    (tokens_in as f64 / 1_000_000.0) * price_per_million_in + (tokens_out as f64 / 1_000_000.0) * price_per_million_out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_opens_after_threshold_and_blocks() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.allow("host-a"));
        breaker.record_failure("host-a");
        breaker.record_failure("host-a");
        assert!(breaker.allow("host-a"));
        breaker.record_failure("host-a");
        assert!(!breaker.allow("host-a"));
    }

    #[test]
    fn permanently_disabled_host_never_reopens() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(1));
        assert!(breaker.allow("host-a"));
        breaker.disable_permanently("host-a");
        assert!(!breaker.allow("host-a"));
        // A plain open circuit would half-open after its cooldown elapses;
        // a permanent disable must not, no matter how long we wait.
        std::thread::sleep(Duration::from_millis(5));
        assert!(!breaker.allow("host-a"));
        breaker.record_success("host-a");
        assert!(!breaker.allow("host-a"), "a success report must not lift a permanent disable");
    }

    #[test]
    fn circuit_closes_on_success() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure("host-a");
        breaker.record_success("host-a");
        breaker.record_failure("host-a");
        assert!(breaker.allow("host-a"));
    }

    #[test]
    fn token_bucket_depletes_and_blocks() {
        let bucket = TokenBucket::new(2.0, 0.0);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn cost_tracker_blocks_past_budget() {
        let tracker = CostTracker::new(1.0);
        tracker.record_spend(0.5);
        assert!(!tracker.over_budget());
        tracker.record_spend(0.6);
        assert!(tracker.over_budget());
        tracker.roll_day();
        assert!(!tracker.over_budget());
    }
}
