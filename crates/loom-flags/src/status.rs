// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Connection status tracking shared by the coordinator and its sources.

use std::sync::Arc;

use chrono::Utc;
use loom_flags_core::{ConnectionInfo, ConnectionState, FailureInfo};
use tokio::sync::watch;
use tracing::info;

/// Publishes [`ConnectionInfo`] updates to any number of observers.
#[derive(Clone, Debug)]
pub struct StatusTracker {
	tx: Arc<watch::Sender<ConnectionInfo>>,
}

impl StatusTracker {
	pub fn new(initial: ConnectionState) -> Self {
		let (tx, _) = watch::channel(ConnectionInfo::new(initial));
		Self { tx: Arc::new(tx) }
	}

	/// Returns the current status.
	pub fn current(&self) -> ConnectionInfo {
		self.tx.borrow().clone()
	}

	pub fn state(&self) -> ConnectionState {
		self.tx.borrow().state
	}

	/// Subscribes to status changes.
	pub fn subscribe(&self) -> watch::Receiver<ConnectionInfo> {
		self.tx.subscribe()
	}

	/// Moves to `state` without touching failure history.
	pub fn set_state(&self, state: ConnectionState) {
		self.tx.send_if_modified(|info| {
			if info.state == state {
				return false;
			}
			info!(from = %info.state, to = %state, "Connection state changed");
			info.state = state;
			info.state_since = Utc::now();
			true
		});
	}

	/// Records that the source delivered data.
	pub fn record_success(&self) {
		self.tx.send_modify(|info| {
			let now = Utc::now();
			info.last_successful_connection = Some(now);
			if info.state != ConnectionState::Valid {
				info!(from = %info.state, to = %ConnectionState::Valid, "Connection state changed");
				info.state = ConnectionState::Valid;
				info.state_since = now;
			}
		});
	}

	/// Records a recoverable failure.
	///
	/// A source that has not initialized yet stays in `Initializing`; a
	/// previously valid source becomes `Interrupted`.
	pub fn record_failure(&self, failure: FailureInfo) {
		self.tx.send_modify(|info| {
			if info.state == ConnectionState::Valid {
				info.state = ConnectionState::Interrupted;
				info.state_since = Utc::now();
			}
			info.last_failure = Some(failure);
		});
	}

	/// Records a fatal failure; the state becomes `Shutdown`.
	pub fn record_shutdown(&self, failure: FailureInfo) {
		self.tx.send_modify(|info| {
			info.state = ConnectionState::Shutdown;
			info.state_since = Utc::now();
			info.last_failure = Some(failure);
		});
	}
}

impl Default for StatusTracker {
	fn default() -> Self {
		Self::new(ConnectionState::Initializing)
	}
}
