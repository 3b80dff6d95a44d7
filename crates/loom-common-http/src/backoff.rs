// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Exponential backoff with jitter for reconnect loops.

use std::time::Duration;

/// Exponent cap so `2^attempt` never overflows before the delay cap applies.
const MAX_EXPONENT: u32 = 20;

/// Exponential backoff state for one reconnecting connection.
///
/// Each call to [`Backoff::next_delay`] doubles the delay from `base` up to
/// `max`. With jitter enabled the returned delay is uniformly drawn from the
/// upper half of the computed window, so reconnecting clients spread out.
#[derive(Debug, Clone)]
pub struct Backoff {
	base: Duration,
	max: Duration,
	attempt: u32,
	jitter: bool,
}

impl Backoff {
	/// Creates a jittered backoff starting at `base` and capped at `max`.
	pub fn new(base: Duration, max: Duration) -> Self {
		Self {
			base,
			max: max.max(base),
			attempt: 0,
			jitter: true,
		}
	}

	/// Disables jitter, making delays deterministic.
	pub fn without_jitter(mut self) -> Self {
		self.jitter = false;
		self
	}

	/// Returns the delay to wait before the next attempt and advances the state.
	pub fn next_delay(&mut self) -> Duration {
		let factor = 2u64.saturating_pow(self.attempt.min(MAX_EXPONENT));
		let base_ms = self.base.as_millis() as u64;
		let max_ms = self.max.as_millis() as u64;
		let window_ms = base_ms.saturating_mul(factor).min(max_ms);

		self.attempt = self.attempt.saturating_add(1);

		if self.jitter {
			let half = window_ms / 2;
			Duration::from_millis(half + fastrand::u64(0..=window_ms - half))
		} else {
			Duration::from_millis(window_ms)
		}
	}

	/// Resets the backoff so the next delay starts from `base` again.
	pub fn reset(&mut self) {
		self.attempt = 0;
	}

	/// Number of delays handed out since the last reset.
	pub fn attempts(&self) -> u32 {
		self.attempt
	}

	pub fn base(&self) -> Duration {
		self.base
	}
}
