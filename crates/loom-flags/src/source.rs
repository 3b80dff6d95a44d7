// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pieces shared by the streaming and polling data sources.

use std::sync::Arc;
use std::time::Duration;

use loom_flags_core::{ContextKey, EvaluationContext, FailureInfo, Flag, FlagSet};
use tokio::sync::watch;

use crate::cache::FlagCache;
use crate::error::{FlagsError, Result};
use crate::notifier::ChangeNotifier;
use crate::status::StatusTracker;
use crate::transport::FlagsTransport;

/// Which kind of data source is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
	Streaming,
	Polling,
}

/// Initialization progress of one data source.
#[derive(Debug, Clone, PartialEq)]
pub enum InitState {
	Pending,
	Initialized,
	/// The source stopped on a non-retryable error before initializing.
	Failed(FailureInfo),
}

/// Write side of a source's initialization state. Owned by the source task.
#[derive(Debug)]
pub(crate) struct InitSignal {
	tx: watch::Sender<InitState>,
}

impl InitSignal {
	pub(crate) fn new() -> (Self, InitHandle) {
		let (tx, rx) = watch::channel(InitState::Pending);
		(Self { tx }, InitHandle { rx })
	}

	pub(crate) fn is_initialized(&self) -> bool {
		*self.tx.borrow() == InitState::Initialized
	}

	/// Marks the source initialized. Later calls are no-ops.
	pub(crate) fn mark_initialized(&self) {
		self.tx.send_if_modified(|state| {
			if *state == InitState::Pending {
				*state = InitState::Initialized;
				true
			} else {
				false
			}
		});
	}

	/// Fails a pending initialization. Has no effect once initialized.
	pub(crate) fn mark_failed(&self, failure: FailureInfo) {
		self.tx.send_if_modified(|state| {
			if *state == InitState::Pending {
				*state = InitState::Failed(failure);
				true
			} else {
				false
			}
		});
	}
}

/// Awaitable view of a source's initialization.
#[derive(Debug, Clone)]
pub struct InitHandle {
	rx: watch::Receiver<InitState>,
}

impl InitHandle {
	pub fn state(&self) -> InitState {
		self.rx.borrow().clone()
	}

	pub fn is_initialized(&self) -> bool {
		*self.rx.borrow() == InitState::Initialized
	}

	/// Waits until the source initializes or fails.
	///
	/// Fails with [`FlagsError::Unauthorized`] if the SDK key was rejected and
	/// with [`FlagsError::Cancelled`] if the source shut down first.
	pub async fn wait(&mut self) -> Result<()> {
		let state = self
			.rx
			.wait_for(|state| *state != InitState::Pending)
			.await
			.map_err(|_| FlagsError::Cancelled)?
			.clone();

		match state {
			InitState::Failed(failure) => Err(FlagsError::from_failure(failure)),
			_ => Ok(()),
		}
	}

	/// Waits up to `timeout`.
	///
	/// Returns `Ok(false)` when the timeout elapses or the source shut down
	/// before initializing; the source keeps running after a timeout and may
	/// still initialize later.
	pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<bool> {
		match tokio::time::timeout(timeout, self.wait()).await {
			Ok(Ok(())) => Ok(true),
			Ok(Err(FlagsError::Cancelled)) | Err(_) => Ok(false),
			Ok(Err(e)) => Err(e),
		}
	}
}

/// The only path by which data sources mutate the cache.
///
/// Each mutation goes through [`FlagCache`]'s version-gated contract and the
/// resulting change records are dispatched after the cache lock is released.
#[derive(Clone, Debug)]
pub struct FlagSink {
	cache: FlagCache,
	notifier: ChangeNotifier,
	context: ContextKey,
}

impl FlagSink {
	pub fn new(cache: FlagCache, notifier: ChangeNotifier, context: ContextKey) -> Self {
		Self {
			cache,
			notifier,
			context,
		}
	}

	pub fn context(&self) -> &ContextKey {
		&self.context
	}

	/// Replaces the context's flags.
	pub fn put(&self, flags: FlagSet) {
		let changes = self.cache.put(&self.context, flags);
		self.notifier.dispatch(changes);
	}

	/// Applies a single flag update; stale versions are dropped silently.
	pub fn upsert(&self, key: &str, flag: Flag) {
		if let Some(change) = self.cache.upsert(&self.context, key, flag) {
			self.notifier.dispatch(vec![change]);
		}
	}

	/// Applies a single flag deletion; stale versions are dropped silently.
	pub fn remove(&self, key: &str, version: i64) {
		if let Some(change) = self.cache.remove(&self.context, key, version) {
			self.notifier.dispatch(vec![change]);
		}
	}
}

/// Everything a data source needs to run for one context.
#[derive(Clone)]
pub struct SourceParams {
	pub transport: Arc<dyn FlagsTransport>,
	pub context: EvaluationContext,
	pub sink: FlagSink,
	pub status: StatusTracker,
	pub request_timeout: Duration,
}
