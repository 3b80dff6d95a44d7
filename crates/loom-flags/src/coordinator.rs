// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Lifecycle orchestration for the active data source.
//!
//! [`SyncCoordinator`] owns the current context and at most one running data
//! source. Every orchestration operation (start, context switch,
//! online/offline, network, background/foreground, forced poll, close) runs
//! under a single async gate, so transitions never interleave and a new source
//! is only started after the previous one has fully stopped.
//!
//! Waiting for initialization happens outside the gate. A caller blocked in
//! [`SyncCoordinator::start`] does not hold up a concurrent context switch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use loom_flags_core::{ConnectionInfo, ConnectionState, EvaluationContext, Flag};
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, info, instrument};

use crate::cache::FlagCache;
use crate::config::{DataSourceMode, SyncConfig};
use crate::error::{FlagsError, Result};
use crate::notifier::ChangeNotifier;
use crate::polling::{Poller, PollingSource};
use crate::source::{FlagSink, InitHandle, SourceKind, SourceParams};
use crate::status::StatusTracker;
use crate::streaming::{StreamingConfig, StreamingSource};
use crate::transport::FlagsTransport;

/// The running data source.
enum ActiveSource {
	Streaming(StreamingSource),
	Polling(PollingSource),
}

impl ActiveSource {
	fn info(&self) -> ActiveSourceInfo {
		match self {
			ActiveSource::Streaming(source) => ActiveSourceInfo {
				kind: SourceKind::Streaming,
				polling_interval: None,
				initialized: source.is_initialized(),
			},
			ActiveSource::Polling(source) => ActiveSourceInfo {
				kind: SourceKind::Polling,
				polling_interval: Some(source.interval()),
				initialized: source.is_initialized(),
			},
		}
	}

	fn init_handle(&self) -> InitHandle {
		match self {
			ActiveSource::Streaming(source) => source.init_handle(),
			ActiveSource::Polling(source) => source.init_handle(),
		}
	}

	async fn shutdown(self) {
		match self {
			ActiveSource::Streaming(source) => source.shutdown().await,
			ActiveSource::Polling(source) => source.shutdown().await,
		}
	}
}

/// Description of the running data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSourceInfo {
	pub kind: SourceKind,
	/// Set for polling sources.
	pub polling_interval: Option<Duration>,
	pub initialized: bool,
}

struct CoordinatorState {
	source: Option<ActiveSource>,
	online: bool,
	network_available: bool,
	in_background: bool,
	closed: bool,
}

struct CoordinatorInner {
	gate: Mutex<CoordinatorState>,
	context: ArcSwap<EvaluationContext>,
	cache: FlagCache,
	notifier: ChangeNotifier,
	transport: Arc<dyn FlagsTransport>,
	config: SyncConfig,
	status: StatusTracker,
}

/// Owns the current context and its data source.
#[derive(Clone)]
pub struct SyncCoordinator {
	inner: Arc<CoordinatorInner>,
}

impl SyncCoordinator {
	/// Creates a coordinator. No source runs until [`start`](Self::start).
	pub fn new(
		config: SyncConfig,
		transport: Arc<dyn FlagsTransport>,
		cache: FlagCache,
		notifier: ChangeNotifier,
		context: EvaluationContext,
	) -> Self {
		let initial = if config.offline {
			ConnectionState::SetOffline
		} else {
			ConnectionState::Initializing
		};
		let state = CoordinatorState {
			source: None,
			online: !config.offline,
			network_available: true,
			in_background: false,
			closed: false,
		};

		Self {
			inner: Arc::new(CoordinatorInner {
				gate: Mutex::new(state),
				context: ArcSwap::from_pointee(context),
				cache,
				notifier,
				transport,
				config,
				status: StatusTracker::new(initial),
			}),
		}
	}

	pub fn context(&self) -> Arc<EvaluationContext> {
		self.inner.context.load_full()
	}

	pub fn config(&self) -> &SyncConfig {
		&self.inner.config
	}

	pub fn cache(&self) -> &FlagCache {
		&self.inner.cache
	}

	pub fn notifier(&self) -> &ChangeNotifier {
		&self.inner.notifier
	}

	/// Returns a flag for the current context.
	pub fn flag(&self, key: &str) -> Option<Flag> {
		let context = self.inner.context.load();
		self.inner.cache.flag(&context.cache_key(), key)
	}

	/// Returns all flags for the current context.
	pub fn all_flags(&self) -> HashMap<String, Flag> {
		let context = self.inner.context.load();
		self.inner.cache.all_flags(&context.cache_key())
	}

	pub fn connection_info(&self) -> ConnectionInfo {
		self.inner.status.current()
	}

	pub fn status_receiver(&self) -> watch::Receiver<ConnectionInfo> {
		self.inner.status.subscribe()
	}

	/// Describes the running source, if any.
	pub async fn active_source(&self) -> Option<ActiveSourceInfo> {
		let state = self.inner.gate.lock().await;
		state.source.as_ref().map(ActiveSource::info)
	}

	/// Starts syncing the current context and waits up to `timeout` for the
	/// first flag set.
	///
	/// Returns `Ok(false)` if the timeout elapsed or no source could be
	/// started (offline, no network, background updates disabled); the source
	/// keeps running in the first case. Fails if the SDK key is rejected
	/// before initialization.
	pub async fn start(&self, timeout: Duration) -> Result<bool> {
		let init = self.start_pending().await?;
		wait_for(init, timeout).await
	}

	/// Starts syncing without waiting. Returns the new source's
	/// initialization handle, or `None` when no source was started.
	#[instrument(skip(self))]
	pub async fn start_pending(&self) -> Result<Option<InitHandle>> {
		let mut state = self.lock_open().await?;
		self.activate_current();
		Ok(self.rebuild(&mut state).await)
	}

	/// Stops the current source, makes `context` current, and starts a source
	/// for it. Waits up to `timeout` for the new source to initialize.
	#[instrument(skip(self, context), fields(context_key = %context.cache_key()))]
	pub async fn switch_context(&self, context: EvaluationContext, timeout: Duration) -> Result<bool> {
		let init = {
			let mut state = self.lock_open().await?;
			teardown(&mut state).await;
			self.inner.context.store(Arc::new(context));
			self.activate_current();
			self.rebuild(&mut state).await
		};
		wait_for(init, timeout).await
	}

	/// Takes the client offline or back online. Cached flags stay readable.
	pub async fn set_online(&self, online: bool) -> Result<()> {
		let mut state = self.lock_open().await?;
		if state.online == online {
			return Ok(());
		}
		info!(online, "Changing online mode");
		state.online = online;
		self.rebuild(&mut state).await;
		Ok(())
	}

	/// Reports a change in network connectivity.
	pub async fn set_network_available(&self, available: bool) -> Result<()> {
		let mut state = self.lock_open().await?;
		if state.network_available == available {
			return Ok(());
		}
		info!(available, "Network availability changed");
		state.network_available = available;
		self.rebuild(&mut state).await;
		Ok(())
	}

	/// Reports a background/foreground transition.
	///
	/// In the background the source is replaced by a poller at the background
	/// interval, or stopped if background updating is disabled. Returning to
	/// the foreground restores the configured mode.
	pub async fn set_background(&self, in_background: bool) -> Result<()> {
		let mut state = self.lock_open().await?;
		if state.in_background == in_background {
			return Ok(());
		}
		info!(in_background, "Application lifecycle changed");
		state.in_background = in_background;
		self.rebuild(&mut state).await;
		Ok(())
	}

	/// Fetches the current context's flags right away.
	///
	/// A polling source polls immediately and restarts its schedule. Otherwise
	/// a one-shot fetch is applied as a full replace.
	pub async fn poll_now(&self) -> Result<()> {
		let state = self.lock_open().await?;
		if !state.online || !state.network_available {
			return Err(FlagsError::Offline);
		}
		match &state.source {
			Some(ActiveSource::Polling(source)) => source.poll_now().await,
			_ => {
				let mut poller = Poller::new(&self.source_params(), false);
				poller.fetch_once().await.map(|_| ())
			}
		}
	}

	/// Waits up to `timeout` for the running source to initialize.
	///
	/// Returns `Ok(false)` on timeout or when no source is running.
	pub async fn wait_for_initialization(&self, timeout: Duration) -> Result<bool> {
		let init = {
			let state = self.lock_open().await?;
			state.source.as_ref().map(ActiveSource::init_handle)
		};
		wait_for(init, timeout).await
	}

	/// Stops the source for good. Later orchestration calls fail with
	/// [`FlagsError::ClientShutdown`].
	pub async fn close(&self) {
		let mut state = self.inner.gate.lock().await;
		if state.closed {
			return;
		}
		teardown(&mut state).await;
		state.closed = true;
		self.inner.status.set_state(ConnectionState::Shutdown);
		debug!("Coordinator closed");
	}

	pub async fn is_closed(&self) -> bool {
		self.inner.gate.lock().await.closed
	}

	async fn lock_open(&self) -> Result<MutexGuard<'_, CoordinatorState>> {
		let state = self.inner.gate.lock().await;
		if state.closed {
			return Err(FlagsError::ClientShutdown);
		}
		Ok(state)
	}

	/// Loads the current context's flags into memory and announces what
	/// differs from the previously active context.
	fn activate_current(&self) {
		let context = self.inner.context.load();
		let changes = self.inner.cache.activate(&context.cache_key());
		self.inner.notifier.dispatch(changes);
	}

	fn source_params(&self) -> SourceParams {
		let context = self.inner.context.load_full();
		let sink = FlagSink::new(
			self.inner.cache.clone(),
			self.inner.notifier.clone(),
			context.cache_key(),
		);
		SourceParams {
			transport: Arc::clone(&self.inner.transport),
			context: EvaluationContext::clone(&context),
			sink,
			status: self.inner.status.clone(),
			request_timeout: self.inner.config.request_timeout,
		}
	}

	/// Replaces the running source with whatever the current state calls for.
	async fn rebuild(&self, state: &mut CoordinatorState) -> Option<InitHandle> {
		teardown(state).await;

		let status = &self.inner.status;
		let config = &self.inner.config;
		if !state.online {
			status.set_state(ConnectionState::SetOffline);
			return None;
		}
		if !state.network_available {
			status.set_state(ConnectionState::NetworkUnavailable);
			return None;
		}
		if state.in_background && !config.enable_background_updating {
			status.set_state(ConnectionState::BackgroundDisabled);
			return None;
		}

		status.set_state(ConnectionState::Initializing);
		let params = self.source_params();
		let source = if state.in_background {
			ActiveSource::Polling(PollingSource::start(params, config.background_polling_interval))
		} else {
			match config.mode {
				DataSourceMode::Streaming => {
					let streaming = StreamingConfig {
						reconnect_base_delay: config.reconnect_base_delay,
						reconnect_max_delay: config.reconnect_max_delay,
						poll_on_ping: config.poll_on_ping,
					};
					ActiveSource::Streaming(StreamingSource::start(params, streaming))
				}
				DataSourceMode::Polling => {
					ActiveSource::Polling(PollingSource::start(params, config.polling_interval))
				}
			}
		};

		debug!(source = ?source.info().kind, "Started data source");
		let init = source.init_handle();
		state.source = Some(source);
		Some(init)
	}
}

impl std::fmt::Debug for SyncCoordinator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SyncCoordinator")
			.field("context", &self.inner.context.load().cache_key())
			.field("state", &self.inner.status.state())
			.finish()
	}
}

async fn teardown(state: &mut CoordinatorState) {
	if let Some(source) = state.source.take() {
		source.shutdown().await;
	}
}

async fn wait_for(init: Option<InitHandle>, timeout: Duration) -> Result<bool> {
	match init {
		Some(mut init) => init.wait_timeout(timeout).await,
		None => Ok(false),
	}
}
