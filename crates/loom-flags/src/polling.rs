// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Interval polling data source.

use std::sync::Arc;
use std::time::Duration;

use loom_common_http::RetryableError;
use loom_flags_core::EvaluationContext;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{FlagsError, Result};
use crate::source::{FlagSink, InitHandle, InitSignal, SourceParams};
use crate::status::StatusTracker;
use crate::transport::{FlagsTransport, PollResponse};

/// Outcome of a single fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
	NotModified,
	Updated,
}

/// Fetches a context's flags and writes them into the cache.
pub(crate) struct Poller {
	transport: Arc<dyn FlagsTransport>,
	context: EvaluationContext,
	sink: FlagSink,
	request_timeout: Duration,
	etag: Option<String>,
	use_etag: bool,
}

impl Poller {
	pub(crate) fn new(params: &SourceParams, use_etag: bool) -> Self {
		Self {
			transport: Arc::clone(&params.transport),
			context: params.context.clone(),
			sink: params.sink.clone(),
			request_timeout: params.request_timeout,
			etag: None,
			use_etag,
		}
	}

	/// Performs one request, bounded by the request timeout.
	pub(crate) async fn fetch_once(&mut self) -> Result<FetchOutcome> {
		let etag = if self.use_etag { self.etag.as_deref() } else { None };
		let response = tokio::time::timeout(
			self.request_timeout,
			self.transport.poll(&self.context, etag),
		)
		.await
		.map_err(|_| FlagsError::Timeout)??;

		match response {
			PollResponse::NotModified => Ok(FetchOutcome::NotModified),
			PollResponse::Updated { flags, etag } => {
				debug!(flag_count = flags.len(), "Fetched flags");
				self.sink.put(flags);
				if self.use_etag {
					self.etag = etag;
				}
				Ok(FetchOutcome::Updated)
			}
		}
	}
}

type PollNowReply = oneshot::Sender<Result<()>>;

/// Polls the flag endpoint on a fixed interval.
///
/// The first request is made immediately. A 401 stops the source for good;
/// every other failure is recorded and retried at the next tick.
pub struct PollingSource {
	interval: Duration,
	commands: mpsc::Sender<PollNowReply>,
	init: InitHandle,
	cancel: CancellationToken,
	task: Option<JoinHandle<()>>,
}

impl PollingSource {
	/// Spawns the polling task on the current runtime.
	pub fn start(params: SourceParams, interval: Duration) -> Self {
		let (signal, init) = InitSignal::new();
		let (commands, rx) = mpsc::channel(8);
		let cancel = CancellationToken::new();

		let worker = PollWorker {
			poller: Poller::new(&params, true),
			status: params.status.clone(),
			init: signal,
			interval,
			commands: rx,
			cancel: cancel.clone(),
		};
		let task = tokio::spawn(worker.run());

		Self {
			interval,
			commands,
			init,
			cancel,
			task: Some(task),
		}
	}

	pub fn interval(&self) -> Duration {
		self.interval
	}

	pub fn init_handle(&self) -> InitHandle {
		self.init.clone()
	}

	pub fn is_initialized(&self) -> bool {
		self.init.is_initialized()
	}

	/// Requests an immediate poll and waits for its result.
	///
	/// The regular schedule restarts from the moment the forced poll finishes.
	pub async fn poll_now(&self) -> Result<()> {
		let (tx, rx) = oneshot::channel();
		self.commands
			.send(tx)
			.await
			.map_err(|_| FlagsError::Cancelled)?;
		rx.await.map_err(|_| FlagsError::Cancelled)?
	}

	/// Stops the task and waits for it to exit.
	pub async fn shutdown(mut self) {
		self.cancel.cancel();
		if let Some(task) = self.task.take() {
			let _ = task.await;
		}
	}
}

impl Drop for PollingSource {
	fn drop(&mut self) {
		self.cancel.cancel();
		if let Some(task) = self.task.take() {
			task.abort();
		}
	}
}

impl std::fmt::Debug for PollingSource {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PollingSource")
			.field("interval", &self.interval)
			.field("initialized", &self.init.is_initialized())
			.finish()
	}
}

struct PollWorker {
	poller: Poller,
	status: StatusTracker,
	init: InitSignal,
	interval: Duration,
	commands: mpsc::Receiver<PollNowReply>,
	cancel: CancellationToken,
}

impl PollWorker {
	#[instrument(skip(self), fields(interval_secs = self.interval.as_secs()))]
	async fn run(mut self) {
		let mut ticker = tokio::time::interval(self.interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		let cancel = self.cancel.clone();

		loop {
			if cancel.is_cancelled() {
				break;
			}

			let reply = tokio::select! {
				_ = cancel.cancelled() => break,
				_ = ticker.tick() => None,
				cmd = self.commands.recv() => cmd,
			};
			let forced = reply.is_some();

			let result = tokio::select! {
				_ = cancel.cancelled() => {
					if let Some(reply) = reply {
						let _ = reply.send(Err(FlagsError::Cancelled));
					}
					break;
				}
				result = self.poller.fetch_once() => result,
			};

			let fatal = self.handle_result(&result);
			if let Some(reply) = reply {
				let _ = reply.send(result.map(|_| ()));
			}
			if fatal {
				break;
			}
			if forced {
				ticker.reset();
			}
		}

		debug!("Polling loop stopped");
	}

	/// Applies a fetch result to status and init state. Returns true if fatal.
	fn handle_result(&self, result: &Result<FetchOutcome>) -> bool {
		match result {
			Ok(FetchOutcome::Updated) => {
				self.init.mark_initialized();
				self.status.record_success();
				false
			}
			Ok(FetchOutcome::NotModified) => {
				if self.init.is_initialized() {
					self.status.record_success();
				}
				false
			}
			Err(e) if !e.is_retryable() => {
				warn!(error = %e, "Non-retryable poll failure, polling stopped");
				let failure = e.to_failure_info();
				self.status.record_shutdown(failure.clone());
				self.init.mark_failed(failure);
				true
			}
			Err(e) => {
				info!(error = %e, "Poll failed, retrying at next interval");
				self.status.record_failure(e.to_failure_info());
				false
			}
		}
	}
}
