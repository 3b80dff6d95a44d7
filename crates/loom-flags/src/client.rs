// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature flags client facade.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use loom_flags_core::{ChangeRecord, ConnectionInfo, EvaluationContext, Flag};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::FlagCache;
use crate::config::{
	DataSourceMode, RequestMethod, SyncConfig, MIN_BACKGROUND_POLLING_INTERVAL, MIN_POLLING_INTERVAL,
};
use crate::coordinator::{ActiveSourceInfo, SyncCoordinator};
use crate::error::{FlagsError, Result};
use crate::notifier::{ChangeNotifier, ListenerHandle};
use crate::source::InitHandle;
use crate::storage::PersistentStore;
use crate::transport::{FlagsTransport, HttpTransport};

/// SDK version for identification.
const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
/// SDK name for identification.
const SDK_NAME: &str = "loom-flags-rust";

/// Lifecycle events reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformSignal {
	/// The application moved to (`true`) or from (`false`) the background.
	Background(bool),
	/// Network connectivity was gained (`true`) or lost (`false`).
	NetworkAvailable(bool),
}

/// Builder for constructing a FlagsClient.
pub struct FlagsClientBuilder {
	sdk_key: Option<String>,
	base_url: Option<String>,
	stream_url: Option<String>,
	context: Option<EvaluationContext>,
	config: SyncConfig,
	transport: Option<Arc<dyn FlagsTransport>>,
	store: Option<Arc<dyn PersistentStore>>,
}

impl FlagsClientBuilder {
	/// Creates a new builder with default settings.
	pub fn new() -> Self {
		Self {
			sdk_key: None,
			base_url: None,
			stream_url: None,
			context: None,
			config: SyncConfig::default(),
			transport: None,
			store: None,
		}
	}

	/// Sets the client-side SDK key.
	pub fn sdk_key(mut self, key: impl Into<String>) -> Self {
		self.sdk_key = Some(key.into());
		self
	}

	/// Sets the base URL for polling requests.
	///
	/// Example: `https://clientsdk.loom.dev`
	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.base_url = Some(url.into());
		self
	}

	/// Sets the base URL for the streaming connection.
	pub fn stream_url(mut self, url: impl Into<String>) -> Self {
		self.stream_url = Some(url.into());
		self
	}

	/// Sets the initial evaluation context.
	pub fn context(mut self, context: EvaluationContext) -> Self {
		self.context = Some(context);
		self
	}

	pub fn mode(mut self, mode: DataSourceMode) -> Self {
		self.config.mode = mode;
		self
	}

	/// Sets the foreground polling interval. Values below five minutes are
	/// raised to five minutes.
	pub fn polling_interval(mut self, interval: Duration) -> Self {
		self.config.polling_interval = interval;
		self
	}

	/// Sets the background polling interval. Values below fifteen minutes are
	/// raised to fifteen minutes.
	pub fn background_polling_interval(mut self, interval: Duration) -> Self {
		self.config.background_polling_interval = interval;
		self
	}

	/// Keep polling while in the background (default) or stop syncing.
	pub fn background_updating(mut self, enabled: bool) -> Self {
		self.config.enable_background_updating = enabled;
		self
	}

	/// Sends the context as a REPORT body instead of in the URL.
	pub fn request_method(mut self, method: RequestMethod) -> Self {
		self.config.request_method = method;
		self
	}

	pub fn evaluation_reasons(mut self, enabled: bool) -> Self {
		self.config.evaluation_reasons = enabled;
		self
	}

	/// Sets the streaming reconnect backoff range.
	pub fn reconnect_delay(mut self, base: Duration, max: Duration) -> Self {
		self.config.reconnect_base_delay = base;
		self.config.reconnect_max_delay = max;
		self
	}

	/// Sets the HTTP request timeout.
	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.config.request_timeout = timeout;
		self
	}

	pub fn persist_flag_values(mut self, enabled: bool) -> Self {
		self.config.persist_flag_values = enabled;
		self
	}

	/// Starts the client without connecting.
	pub fn offline(mut self, offline: bool) -> Self {
		self.config.offline = offline;
		self
	}

	/// Also polls whenever the stream sends a `ping`.
	pub fn poll_on_ping(mut self, enabled: bool) -> Self {
		self.config.poll_on_ping = enabled;
		self
	}

	/// Replaces the HTTP transport.
	pub fn transport(mut self, transport: Arc<dyn FlagsTransport>) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Sets the durable store for flag values.
	pub fn persistent_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
		self.store = Some(store);
		self
	}

	/// Builds the FlagsClient. No connection is made until
	/// [`FlagsClient::start`].
	pub fn build(self) -> Result<FlagsClient> {
		let sdk_key = self.sdk_key.ok_or(FlagsError::InvalidSdkKey)?;
		if sdk_key.trim().is_empty() {
			return Err(FlagsError::InvalidSdkKey);
		}
		let context = self
			.context
			.ok_or_else(|| FlagsError::InvalidConfig("an evaluation context is required".to_string()))?;
		if context.key.is_empty() {
			return Err(FlagsError::InvalidConfig("context key must not be empty".to_string()));
		}

		let mut config = self.config;
		if let Some(url) = self.base_url {
			config.base_uri = url;
		}
		if let Some(url) = self.stream_url {
			config.stream_uri = url;
		}
		config.base_uri = normalize_url(&config.base_uri)?;
		config.stream_uri = normalize_url(&config.stream_uri)?;

		if config.polling_interval < MIN_POLLING_INTERVAL {
			warn!(
				requested_secs = config.polling_interval.as_secs(),
				minimum_secs = MIN_POLLING_INTERVAL.as_secs(),
				"Polling interval below minimum, using minimum"
			);
			config.polling_interval = MIN_POLLING_INTERVAL;
		}
		if config.background_polling_interval < MIN_BACKGROUND_POLLING_INTERVAL {
			warn!(
				requested_secs = config.background_polling_interval.as_secs(),
				minimum_secs = MIN_BACKGROUND_POLLING_INTERVAL.as_secs(),
				"Background polling interval below minimum, using minimum"
			);
			config.background_polling_interval = MIN_BACKGROUND_POLLING_INTERVAL;
		}
		if config.reconnect_base_delay.is_zero() || config.reconnect_base_delay > config.reconnect_max_delay {
			return Err(FlagsError::InvalidConfig(
				"reconnect base delay must be non-zero and at most the maximum delay".to_string(),
			));
		}

		let transport = match self.transport {
			Some(transport) => transport,
			None => Arc::new(HttpTransport::new(sdk_key, &config)?),
		};
		let cache = match self.store {
			Some(store) if config.persist_flag_values => FlagCache::with_persistence(store),
			_ => FlagCache::new(),
		};

		info!(
			base_url = %config.base_uri,
			mode = ?config.mode,
			sdk_name = SDK_NAME,
			sdk_version = SDK_VERSION,
			"Flags client initialized"
		);

		let coordinator = SyncCoordinator::new(config, transport, cache, ChangeNotifier::new(), context);
		Ok(FlagsClient { coordinator })
	}
}

impl Default for FlagsClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

fn normalize_url(url: &str) -> Result<String> {
	let url = url.trim().trim_end_matches('/');
	if !(url.starts_with("http://") || url.starts_with("https://")) {
		return Err(FlagsError::InvalidBaseUrl);
	}
	Ok(url.to_string())
}

/// Client that keeps a context's feature flags in sync with the server.
///
/// # Example
///
/// ```ignore
/// use loom_flags::{EvaluationContext, FlagsClient};
///
/// let client = FlagsClient::builder()
///     .sdk_key("loom_sdk_client_xxx")
///     .context(EvaluationContext::new("user123"))
///     .build()?;
///
/// client.start(Duration::from_secs(5)).await?;
///
/// let enabled = client.bool_value("new-checkout", false);
///
/// let _handle = client.subscribe("new-checkout", |change| {
///     println!("{} changed to {:?}", change.key, change.new_value);
/// });
/// ```
#[derive(Debug, Clone)]
pub struct FlagsClient {
	coordinator: SyncCoordinator,
}

impl FlagsClient {
	/// Creates a new builder for constructing a client.
	pub fn builder() -> FlagsClientBuilder {
		FlagsClientBuilder::new()
	}

	pub fn coordinator(&self) -> &SyncCoordinator {
		&self.coordinator
	}

	/// Starts syncing and waits up to `timeout` for the first flag set.
	///
	/// Returns whether the client initialized in time.
	pub async fn start(&self, timeout: Duration) -> Result<bool> {
		self.coordinator.start(timeout).await
	}

	/// Starts syncing without waiting.
	pub async fn start_pending(&self) -> Result<Option<InitHandle>> {
		self.coordinator.start_pending().await
	}

	/// Switches to a new evaluation context.
	pub async fn identify(&self, context: EvaluationContext, timeout: Duration) -> Result<bool> {
		self.coordinator.switch_context(context, timeout).await
	}

	pub async fn set_online(&self, online: bool) -> Result<()> {
		self.coordinator.set_online(online).await
	}

	pub async fn set_network_available(&self, available: bool) -> Result<()> {
		self.coordinator.set_network_available(available).await
	}

	pub async fn set_background(&self, in_background: bool) -> Result<()> {
		self.coordinator.set_background(in_background).await
	}

	/// Fetches flags immediately.
	pub async fn poll_now(&self) -> Result<()> {
		self.coordinator.poll_now().await
	}

	pub async fn wait_for_initialization(&self, timeout: Duration) -> Result<bool> {
		self.coordinator.wait_for_initialization(timeout).await
	}

	pub fn context(&self) -> Arc<EvaluationContext> {
		self.coordinator.context()
	}

	pub fn flag(&self, key: &str) -> Option<Flag> {
		self.coordinator.flag(key)
	}

	pub fn value(&self, key: &str) -> Option<serde_json::Value> {
		self.flag(key).map(|flag| flag.value)
	}

	/// Returns a boolean flag, or `default` if missing or not a boolean.
	pub fn bool_value(&self, key: &str, default: bool) -> bool {
		self.value(key).and_then(|v| v.as_bool()).unwrap_or(default)
	}

	pub fn all_flags(&self) -> HashMap<String, Flag> {
		self.coordinator.all_flags()
	}

	/// Calls `listener` whenever the flag `key` changes.
	pub fn subscribe<F>(&self, key: impl Into<String>, listener: F) -> ListenerHandle
	where
		F: Fn(ChangeRecord) + Send + Sync + 'static,
	{
		self.coordinator.notifier().subscribe(key, listener)
	}

	/// Calls `listener` for every flag change.
	pub fn subscribe_all<F>(&self, listener: F) -> ListenerHandle
	where
		F: Fn(ChangeRecord) + Send + Sync + 'static,
	{
		self.coordinator.notifier().subscribe_all(listener)
	}

	/// Returns a receiver of changes to the flag `key`.
	pub fn changes(&self, key: impl Into<String>) -> (ListenerHandle, mpsc::UnboundedReceiver<ChangeRecord>) {
		self.coordinator.notifier().changes(key)
	}

	pub fn unsubscribe(&self, handle: &ListenerHandle) -> bool {
		self.coordinator.notifier().unsubscribe(handle)
	}

	pub fn connection_info(&self) -> ConnectionInfo {
		self.coordinator.connection_info()
	}

	pub fn status_receiver(&self) -> watch::Receiver<ConnectionInfo> {
		self.coordinator.status_receiver()
	}

	pub async fn active_source(&self) -> Option<ActiveSourceInfo> {
		self.coordinator.active_source().await
	}

	/// Forwards platform lifecycle signals to the client until the sender is
	/// dropped or the client is closed.
	pub fn attach_signals(&self, mut signals: mpsc::Receiver<PlatformSignal>) -> JoinHandle<()> {
		let coordinator = self.coordinator.clone();
		tokio::spawn(async move {
			while let Some(signal) = signals.recv().await {
				debug!(?signal, "Platform signal received");
				let result = match signal {
					PlatformSignal::Background(in_background) => coordinator.set_background(in_background).await,
					PlatformSignal::NetworkAvailable(available) => {
						coordinator.set_network_available(available).await
					}
				};
				if let Err(e) = result {
					debug!(error = %e, "Stopped forwarding platform signals");
					break;
				}
			}
		})
	}

	/// Stops syncing. Cached flags stay readable.
	pub async fn close(&self) {
		self.coordinator.close().await;
		info!("Flags client shut down");
	}

	pub async fn is_closed(&self) -> bool {
		self.coordinator.is_closed().await
	}
}
