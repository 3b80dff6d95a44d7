// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Server-sent events data source.
//!
//! The stream delivers four event types:
//!
//! - `put`: the full flag set for the context; replaces the cache
//! - `patch`: one flag, applied only if its version is newer
//! - `delete`: one tombstone, applied only if its version is newer
//! - `ping`: a liveness signal that carries no data
//!
//! Either `put` or `ping` marks the source initialized. Any stream error or
//! end of stream is followed by a reconnect after an exponential backoff
//! delay. A non-retryable error such as a 401 stops the source permanently.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use loom_common_http::{Backoff, RetryableError};
use loom_flags_core::{FailureInfo, FailureKind, StreamFrame};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{FlagsError, Result};
use crate::polling::Poller;
use crate::source::{FlagSink, InitHandle, InitSignal, SourceParams};
use crate::status::StatusTracker;
use crate::transport::{EventStream, FlagsTransport, RawEvent};

/// Reconnect and ping settings for a [`StreamingSource`].
#[derive(Debug, Clone)]
pub struct StreamingConfig {
	pub reconnect_base_delay: Duration,
	pub reconnect_max_delay: Duration,
	/// Fetch the flags with a one-shot poll whenever a `ping` arrives.
	pub poll_on_ping: bool,
}

impl Default for StreamingConfig {
	fn default() -> Self {
		Self {
			reconnect_base_delay: Duration::from_secs(1),
			reconnect_max_delay: Duration::from_secs(30),
			poll_on_ping: false,
		}
	}
}

/// Lifecycle of the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
	Connecting,
	Connected,
	/// Waiting out a backoff delay before the next attempt.
	Reconnecting,
	Stopped,
}

#[derive(Debug, Default)]
struct StreamCounters {
	reconnect_attempts: AtomicU32,
	events_received: AtomicU64,
}

/// Keeps the cache current from the streaming endpoint.
pub struct StreamingSource {
	state: watch::Receiver<StreamState>,
	init: InitHandle,
	counters: Arc<StreamCounters>,
	cancel: CancellationToken,
	task: Option<JoinHandle<()>>,
}

impl StreamingSource {
	/// Spawns the streaming task on the current runtime.
	pub fn start(params: SourceParams, config: StreamingConfig) -> Self {
		let (signal, init) = InitSignal::new();
		let (state_tx, state) = watch::channel(StreamState::Connecting);
		let counters = Arc::new(StreamCounters::default());
		let cancel = CancellationToken::new();

		let ping_poller = config.poll_on_ping.then(|| Poller::new(&params, false));
		let worker = StreamWorker {
			transport: params.transport,
			context: params.context,
			sink: params.sink,
			status: params.status,
			request_timeout: params.request_timeout,
			backoff: Backoff::new(config.reconnect_base_delay, config.reconnect_max_delay),
			ping_poller,
			init: signal,
			state: state_tx,
			counters: Arc::clone(&counters),
			cancel: cancel.clone(),
		};
		let task = tokio::spawn(worker.run());

		Self {
			state,
			init,
			counters,
			cancel,
			task: Some(task),
		}
	}

	pub fn state(&self) -> StreamState {
		*self.state.borrow()
	}

	pub fn init_handle(&self) -> InitHandle {
		self.init.clone()
	}

	pub fn is_initialized(&self) -> bool {
		self.init.is_initialized()
	}

	/// Number of reconnects scheduled since the source started.
	pub fn reconnect_attempts(&self) -> u32 {
		self.counters.reconnect_attempts.load(Ordering::Relaxed)
	}

	pub fn events_received(&self) -> u64 {
		self.counters.events_received.load(Ordering::Relaxed)
	}

	/// Stops the task and waits for it to exit.
	pub async fn shutdown(mut self) {
		self.cancel.cancel();
		if let Some(task) = self.task.take() {
			let _ = task.await;
		}
	}
}

impl Drop for StreamingSource {
	fn drop(&mut self) {
		self.cancel.cancel();
		if let Some(task) = self.task.take() {
			task.abort();
		}
	}
}

impl std::fmt::Debug for StreamingSource {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StreamingSource")
			.field("state", &self.state())
			.field("initialized", &self.init.is_initialized())
			.field("reconnect_attempts", &self.reconnect_attempts())
			.finish()
	}
}

/// Why a connection ended.
enum StreamEnd {
	Cancelled,
	Closed,
	Failed(FlagsError),
}

struct StreamWorker {
	transport: Arc<dyn FlagsTransport>,
	context: loom_flags_core::EvaluationContext,
	sink: FlagSink,
	status: StatusTracker,
	request_timeout: Duration,
	backoff: Backoff,
	ping_poller: Option<Poller>,
	init: InitSignal,
	state: watch::Sender<StreamState>,
	counters: Arc<StreamCounters>,
	cancel: CancellationToken,
}

impl StreamWorker {
	#[instrument(skip(self), fields(context = %self.sink.context()))]
	async fn run(mut self) {
		let cancel = self.cancel.clone();

		loop {
			if cancel.is_cancelled() {
				break;
			}
			self.state.send_replace(StreamState::Connecting);

			let connect = tokio::select! {
				_ = cancel.cancelled() => break,
				result = tokio::time::timeout(self.request_timeout, self.transport.stream(&self.context)) => result,
			};

			let failure = match connect {
				Ok(Ok(stream)) => {
					debug!("Stream connected");
					self.state.send_replace(StreamState::Connected);
					match self.consume(stream, &cancel).await {
						StreamEnd::Cancelled => break,
						StreamEnd::Closed => {
							FailureInfo::new(FailureKind::NetworkFailure, "stream closed by server", None)
						}
						StreamEnd::Failed(e) if !e.is_retryable() => {
							self.stop_fatal(&e);
							break;
						}
						StreamEnd::Failed(e) => e.to_failure_info(),
					}
				}
				Ok(Err(e)) if !e.is_retryable() => {
					self.stop_fatal(&e);
					break;
				}
				Ok(Err(e)) => e.to_failure_info(),
				Err(_) => FlagsError::Timeout.to_failure_info(),
			};

			self.status.record_failure(failure.clone());
			let delay = self.backoff.next_delay();
			self.counters.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
			self.state.send_replace(StreamState::Reconnecting);
			info!(
				reason = %failure.message,
				delay_ms = delay.as_millis() as u64,
				"Stream interrupted, reconnecting"
			);

			tokio::select! {
				_ = cancel.cancelled() => break,
				_ = tokio::time::sleep(delay) => {}
			}
		}

		self.state.send_replace(StreamState::Stopped);
		debug!("Stream loop stopped");
	}

	async fn consume(&mut self, mut stream: EventStream, cancel: &CancellationToken) -> StreamEnd {
		loop {
			let next = tokio::select! {
				_ = cancel.cancelled() => return StreamEnd::Cancelled,
				next = stream.next() => next,
			};

			match next {
				None => return StreamEnd::Closed,
				Some(Err(e)) => return StreamEnd::Failed(e),
				Some(Ok(event)) => {
					let result = self.handle_event(event).await;
					self.counters.events_received.fetch_add(1, Ordering::Relaxed);
					if let Err(e) = result {
						return StreamEnd::Failed(e);
					}
				}
			}
		}
	}

	/// Applies one event. An error ends the current connection.
	async fn handle_event(&mut self, event: RawEvent) -> Result<()> {
		let frame = match StreamFrame::parse(&event.event, &event.data) {
			Ok(Some(frame)) => frame,
			Ok(None) => {
				debug!(event = %event.event, "Ignoring unknown stream event");
				return Ok(());
			}
			// Without a valid put the cache cannot be trusted, so reconnect.
			Err(e) if event.event == "put" => return Err(e.into()),
			Err(e) => {
				warn!(event = %event.event, error = %e, "Dropping malformed stream event");
				return Ok(());
			}
		};

		match frame {
			StreamFrame::Put(flags) => {
				debug!(flag_count = flags.len(), "Received put");
				self.sink.put(flags);
				self.mark_healthy();
			}
			StreamFrame::Patch(patch) => {
				self.sink.upsert(&patch.key, patch.flag);
			}
			StreamFrame::Delete(delete) => {
				self.sink.remove(&delete.key, delete.version);
			}
			StreamFrame::Ping => {
				self.mark_healthy();
				if let Some(poller) = self.ping_poller.as_mut() {
					match poller.fetch_once().await {
						Ok(_) => {}
						Err(e) if !e.is_retryable() => return Err(e),
						Err(e) => warn!(error = %e, "Poll after ping failed"),
					}
				}
			}
		}
		Ok(())
	}

	fn mark_healthy(&mut self) {
		self.init.mark_initialized();
		self.status.record_success();
		self.backoff.reset();
	}

	fn stop_fatal(&self, e: &FlagsError) {
		warn!(error = %e, "Non-retryable stream failure, streaming stopped");
		let failure = e.to_failure_info();
		self.status.record_shutdown(failure.clone());
		self.init.mark_failed(failure);
	}
}
