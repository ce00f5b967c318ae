//! Per-user admission control for proxied operations.
//!
//! Each `(user, resource)` key owns a window that opens with its first request and lasts
//! [`RateLimitConfig::window`]. Requests are admitted until the window holds
//! [`RateLimitConfig::max_requests`]; once it expires the next request opens a fresh one.
//! The limiter knows nothing about OAuth or search; any resource label works.

// self
use crate::{_prelude::*, auth::UserId};

/// Budget applied to one resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
	/// Requests admitted per window.
	pub max_requests: u32,
	/// Window length.
	pub window: Duration,
	/// Minimum spacing between automatic sweeps of expired windows.
	pub sweep_interval: Duration,
}
impl RateLimitConfig {
	/// Budget of `max_requests` per `window`, sweeping every five minutes.
	pub fn new(max_requests: u32, window: Duration) -> Self {
		Self { max_requests, window, sweep_interval: Duration::minutes(5) }
	}
}
impl Default for RateLimitConfig {
	fn default() -> Self {
		Self::new(30, Duration::minutes(1))
	}
}

/// Identifies one counter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimitKey {
	/// Caller.
	pub user: UserId,
	/// Operation class, such as `search`.
	pub resource: String,
}
impl RateLimitKey {
	/// Creates a key for `user` and `resource`.
	pub fn new(user: UserId, resource: impl Into<String>) -> Self {
		Self { user, resource: resource.into() }
	}
}

/// Remaining quota for a key, suitable for `X-RateLimit-*` headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
	/// Requests admitted per window.
	pub limit: u32,
	/// Requests left in the current window.
	pub remaining: u32,
	/// Instant the current window closes.
	pub reset_at: OffsetDateTime,
}

/// Result of [`RateLimiter::check`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
	/// The request was counted and may proceed.
	Allow(RateLimitStatus),
	/// The budget is spent until the window closes.
	Deny(RetryDirective),
}
impl RateLimitDecision {
	/// Returns `true` for [`RateLimitDecision::Allow`].
	pub fn is_allowed(&self) -> bool {
		matches!(self, Self::Allow(_))
	}
}

/// Advises callers when to retry after a [`RateLimitDecision::Deny`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryDirective {
	/// Instant when it is safe to retry.
	pub earliest_retry_at: OffsetDateTime,
	/// Time left until `earliest_retry_at`.
	pub retry_after: Duration,
	/// Quota snapshot at the time of the denial.
	pub status: RateLimitStatus,
}

#[derive(Clone, Copy, Debug)]
struct Window {
	started_at: OffsetDateTime,
	count: u32,
}

#[derive(Debug)]
struct LimiterState {
	windows: HashMap<RateLimitKey, Window>,
	last_sweep: OffsetDateTime,
}

/// Sliding-window counter keyed by `(user, resource)`.
#[derive(Debug)]
pub struct RateLimiter {
	default: RateLimitConfig,
	overrides: HashMap<String, RateLimitConfig>,
	state: Mutex<LimiterState>,
}
impl RateLimiter {
	/// Creates a limiter applying `default` to every resource.
	pub fn new(default: RateLimitConfig) -> Self {
		Self {
			default,
			overrides: HashMap::new(),
			state: Mutex::new(LimiterState {
				windows: HashMap::new(),
				last_sweep: OffsetDateTime::now_utc(),
			}),
		}
	}

	/// Applies a dedicated budget to `resource`.
	pub fn with_resource_limit(
		mut self,
		resource: impl Into<String>,
		config: RateLimitConfig,
	) -> Self {
		self.overrides.insert(resource.into(), config);

		self
	}

	/// Budget in force for `resource`.
	pub fn config_for(&self, resource: &str) -> RateLimitConfig {
		self.overrides.get(resource).copied().unwrap_or(self.default)
	}

	/// Counts one request for `key` at the current time.
	pub fn check(&self, key: &RateLimitKey) -> RateLimitDecision {
		self.check_at(key, OffsetDateTime::now_utc())
	}

	/// Counts one request for `key` at `now`.
	pub fn check_at(&self, key: &RateLimitKey, now: OffsetDateTime) -> RateLimitDecision {
		let config = self.config_for(&key.resource);
		let mut state = self.state.lock();

		if now - state.last_sweep >= self.default.sweep_interval {
			self.sweep_locked(&mut state, now);
		}

		let window = state
			.windows
			.entry(key.clone())
			.or_insert(Window { started_at: now, count: 0 });

		if now - window.started_at >= config.window {
			*window = Window { started_at: now, count: 0 };
		}

		let reset_at = window.started_at + config.window;

		if window.count >= config.max_requests {
			let status = RateLimitStatus { limit: config.max_requests, remaining: 0, reset_at };

			return RateLimitDecision::Deny(RetryDirective {
				earliest_retry_at: reset_at,
				retry_after: reset_at - now,
				status,
			});
		}

		window.count += 1;

		RateLimitDecision::Allow(RateLimitStatus {
			limit: config.max_requests,
			remaining: config.max_requests - window.count,
			reset_at,
		})
	}

	/// Counts one request and converts a denial into [`Error::RateLimited`].
	pub fn admit(&self, key: &RateLimitKey) -> Result<RateLimitStatus> {
		match self.check(key) {
			RateLimitDecision::Allow(status) => Ok(status),
			RateLimitDecision::Deny(directive) => {
				obs_event!(
					info,
					resource = %key.resource,
					retry_after_s = directive.retry_after.whole_seconds(),
					"Rate limit exceeded."
				);

				Err(Error::RateLimited {
					resource: key.resource.clone(),
					retry_after: directive.retry_after,
				})
			},
		}
	}

	/// Clears the counter for `key`.
	pub fn reset(&self, key: &RateLimitKey) {
		self.state.lock().windows.remove(key);
	}

	/// Quota for `key` at the current time without counting a request.
	pub fn status(&self, key: &RateLimitKey) -> RateLimitStatus {
		self.status_at(key, OffsetDateTime::now_utc())
	}

	/// Quota for `key` at `now` without counting a request.
	pub fn status_at(&self, key: &RateLimitKey, now: OffsetDateTime) -> RateLimitStatus {
		let config = self.config_for(&key.resource);
		let state = self.state.lock();

		match state.windows.get(key) {
			Some(window) if now - window.started_at < config.window => RateLimitStatus {
				limit: config.max_requests,
				remaining: config.max_requests.saturating_sub(window.count),
				reset_at: window.started_at + config.window,
			},
			_ => RateLimitStatus {
				limit: config.max_requests,
				remaining: config.max_requests,
				reset_at: now + config.window,
			},
		}
	}

	/// Drops expired windows and returns how many were removed.
	pub fn sweep_at(&self, now: OffsetDateTime) -> usize {
		let mut state = self.state.lock();

		self.sweep_locked(&mut state, now)
	}

	/// Number of live counters.
	pub fn tracked_keys(&self) -> usize {
		self.state.lock().windows.len()
	}

	fn sweep_locked(&self, state: &mut LimiterState, now: OffsetDateTime) -> usize {
		let before = state.windows.len();

		state.windows.retain(|key, window| {
			now - window.started_at < self.config_for(&key.resource).window
		});
		state.last_sweep = now;

		before - state.windows.len()
	}
}
impl Default for RateLimiter {
	fn default() -> Self {
		Self::new(RateLimitConfig::default())
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::thread;
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn key(user: &str, resource: &str) -> RateLimitKey {
		RateLimitKey::new(UserId::new(user).expect("User fixture should be valid."), resource)
	}

	#[test]
	fn fifth_request_is_the_last_admitted_in_a_window() {
		let limiter = RateLimiter::new(RateLimitConfig::new(5, Duration::seconds(60)));
		let key = key("u-1", "search");
		let start = macros::datetime!(2025-05-01 09:00 UTC);

		for i in 0..5 {
			let decision = limiter.check_at(&key, start + Duration::seconds(i));

			assert!(decision.is_allowed(), "Request {i} should be admitted.");
		}

		let denied = limiter.check_at(&key, start + Duration::seconds(30));

		assert_eq!(
			denied,
			RateLimitDecision::Deny(RetryDirective {
				earliest_retry_at: start + Duration::seconds(60),
				retry_after: Duration::seconds(30),
				status: RateLimitStatus {
					limit: 5,
					remaining: 0,
					reset_at: start + Duration::seconds(60),
				},
			})
		);
		assert!(limiter.check_at(&key, start + Duration::seconds(60)).is_allowed());
	}

	#[test]
	fn keys_are_isolated_and_resettable() {
		let limiter = RateLimiter::new(RateLimitConfig::new(1, Duration::seconds(60)));
		let now = macros::datetime!(2025-05-01 09:00 UTC);

		assert!(limiter.check_at(&key("u-1", "search"), now).is_allowed());
		assert!(!limiter.check_at(&key("u-1", "search"), now).is_allowed());
		assert!(limiter.check_at(&key("u-2", "search"), now).is_allowed());
		assert!(limiter.check_at(&key("u-1", "issue"), now).is_allowed());

		limiter.reset(&key("u-1", "search"));

		assert!(limiter.check_at(&key("u-1", "search"), now).is_allowed());
	}

	#[test]
	fn status_reports_remaining_quota_without_counting() {
		let limiter = RateLimiter::new(RateLimitConfig::new(3, Duration::seconds(60)));
		let key = key("u-1", "projects");
		let now = macros::datetime!(2025-05-01 09:00 UTC);

		assert_eq!(limiter.status_at(&key, now).remaining, 3);

		limiter.check_at(&key, now);

		let status = limiter.status_at(&key, now + Duration::seconds(10));

		assert_eq!(status.remaining, 2);
		assert_eq!(status.reset_at, now + Duration::seconds(60));
		assert_eq!(limiter.status_at(&key, now + Duration::seconds(10)).remaining, 2);
	}

	#[test]
	fn sweep_drops_only_expired_windows() {
		let limiter = RateLimiter::new(RateLimitConfig::new(3, Duration::seconds(60)))
			.with_resource_limit("auth", RateLimitConfig::new(3, Duration::minutes(10)));
		let now = macros::datetime!(2025-05-01 09:00 UTC);

		limiter.check_at(&key("u-1", "search"), now);
		limiter.check_at(&key("u-1", "auth"), now);

		assert_eq!(limiter.sweep_at(now + Duration::minutes(2)), 1);
		assert_eq!(limiter.tracked_keys(), 1);
	}

	#[test]
	fn concurrent_checks_never_exceed_the_budget() {
		let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(50, Duration::hours(1))));
		let handles = (0..8)
			.map(|_| {
				let limiter = limiter.clone();

				thread::spawn(move || {
					(0..20).filter(|_| limiter.check(&key("u-1", "search")).is_allowed()).count()
				})
			})
			.collect::<Vec<_>>();
		let admitted = handles
			.into_iter()
			.map(|handle| handle.join().expect("Worker thread should not panic."))
			.sum::<usize>();

		assert_eq!(admitted, 50);
	}
}
