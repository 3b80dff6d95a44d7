// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process transport for driving data sources from tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as stream_channel;
use futures::StreamExt;
use loom_flags_core::{EvaluationContext, FlagSet};
use tokio::sync::mpsc;

use crate::error::{FlagsError, Result};
use crate::transport::{EventStream, FlagsTransport, PollResponse, RawEvent};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Polls `condition` until it holds, panicking after a few seconds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
	tokio::time::timeout(WAIT_LIMIT, async {
		while !condition() {
			tokio::time::sleep(Duration::from_millis(2)).await;
		}
	})
	.await
	.expect("condition not reached in time");
}

/// Write end of one scripted event stream. Dropping it ends the stream.
pub(crate) struct ScriptedStream {
	tx: stream_channel::UnboundedSender<Result<RawEvent>>,
	pub(crate) context_key: String,
}

impl ScriptedStream {
	pub(crate) fn send(&self, event: &str, data: &str) {
		let _ = self.tx.unbounded_send(Ok(RawEvent::new(event, data)));
	}

	pub(crate) fn fail(&self, message: &str) {
		let _ = self
			.tx
			.unbounded_send(Err(FlagsError::SseStreamError(message.to_string())));
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}

	pub(crate) fn close(self) {}
}

#[derive(Default)]
struct Script {
	flags: FlagSet,
	etag: Option<String>,
	unauthorized: bool,
	failing_polls: u32,
	failing_status: u16,
	poll_delay: Option<Duration>,
	auto_put: bool,
	poll_count: usize,
	not_modified_count: usize,
	stream_count: usize,
	last_etag: Option<String>,
}

/// A [`FlagsTransport`] whose responses are controlled by the test.
///
/// Polls answer with the configured server flags, honoring `If-None-Match`.
/// Each stream request hands a [`ScriptedStream`] to the test through
/// [`ScriptedTransport::next_stream`], unless auto-put is enabled, in which
/// case the stream opens with a `put` of the server flags and stays open.
pub(crate) struct ScriptedTransport {
	script: Mutex<Script>,
	opened_tx: mpsc::UnboundedSender<ScriptedStream>,
	opened_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ScriptedStream>>,
	held: Mutex<Vec<ScriptedStream>>,
}

impl ScriptedTransport {
	pub(crate) fn new() -> Self {
		let (opened_tx, opened_rx) = mpsc::unbounded_channel();
		Self {
			script: Mutex::new(Script::default()),
			opened_tx,
			opened_rx: tokio::sync::Mutex::new(opened_rx),
			held: Mutex::new(Vec::new()),
		}
	}

	fn script(&self) -> std::sync::MutexGuard<'_, Script> {
		self.script.lock().unwrap()
	}

	pub(crate) fn set_server_flags(&self, flags: FlagSet, etag: Option<&str>) {
		let mut script = self.script();
		script.flags = flags;
		script.etag = etag.map(str::to_string);
	}

	pub(crate) fn set_unauthorized(&self, unauthorized: bool) {
		self.script().unauthorized = unauthorized;
	}

	/// The next `count` polls fail with a server error of `status`.
	pub(crate) fn fail_next_polls(&self, count: u32, status: u16) {
		let mut script = self.script();
		script.failing_polls = count;
		script.failing_status = status;
	}

	pub(crate) fn set_poll_delay(&self, delay: Duration) {
		self.script().poll_delay = Some(delay);
	}

	/// Streams open with a `put` of the server flags and are kept open.
	pub(crate) fn set_auto_put(&self, auto_put: bool) {
		self.script().auto_put = auto_put;
	}

	pub(crate) fn poll_count(&self) -> usize {
		self.script().poll_count
	}

	pub(crate) fn not_modified_count(&self) -> usize {
		self.script().not_modified_count
	}

	pub(crate) fn stream_count(&self) -> usize {
		self.script().stream_count
	}

	pub(crate) fn last_etag(&self) -> Option<String> {
		self.script().last_etag.clone()
	}

	/// Number of auto-put streams whose reader is still connected.
	pub(crate) fn open_stream_count(&self) -> usize {
		self.held
			.lock()
			.unwrap()
			.iter()
			.filter(|stream| !stream.is_closed())
			.count()
	}

	/// Waits for the next stream request.
	pub(crate) async fn next_stream(&self) -> ScriptedStream {
		let mut rx = self.opened_rx.lock().await;
		tokio::time::timeout(WAIT_LIMIT, rx.recv())
			.await
			.expect("no stream opened in time")
			.expect("transport dropped")
	}
}

#[async_trait]
impl FlagsTransport for ScriptedTransport {
	async fn poll(&self, _context: &EvaluationContext, etag: Option<&str>) -> Result<PollResponse> {
		let delay = {
			let mut script = self.script();
			script.poll_count += 1;
			script.last_etag = etag.map(str::to_string);
			script.poll_delay
		};
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}

		let mut script = self.script();
		if script.unauthorized {
			return Err(FlagsError::Unauthorized { status: 401 });
		}
		if script.failing_polls > 0 {
			script.failing_polls -= 1;
			return Err(FlagsError::ServerError {
				status: script.failing_status,
				message: "unavailable".to_string(),
			});
		}
		if etag.is_some() && etag == script.etag.as_deref() {
			script.not_modified_count += 1;
			return Ok(PollResponse::NotModified);
		}
		Ok(PollResponse::Updated {
			flags: script.flags.clone(),
			etag: script.etag.clone(),
		})
	}

	async fn stream(&self, context: &EvaluationContext) -> Result<EventStream> {
		let (auto_put, flags) = {
			let mut script = self.script();
			script.stream_count += 1;
			if script.unauthorized {
				return Err(FlagsError::Unauthorized { status: 401 });
			}
			(script.auto_put, script.flags.clone())
		};

		let (tx, rx) = stream_channel::unbounded();
		let stream = ScriptedStream {
			tx,
			context_key: context.cache_key().to_string(),
		};
		if auto_put {
			let body = serde_json::to_string(&flags)?;
			stream.send("put", &body);
			self.held.lock().unwrap().push(stream);
		} else {
			let _ = self.opened_tx.send(stream);
		}
		Ok(rx.boxed())
	}
}
