// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Synchronization settings.

use std::time::Duration;

/// Default base URL for polling requests.
pub const DEFAULT_BASE_URI: &str = "https://clientsdk.loom.dev";
/// Default base URL for the event stream.
pub const DEFAULT_STREAM_URI: &str = "https://clientstream.loom.dev";

pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const MIN_POLLING_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_BACKGROUND_POLLING_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const MIN_BACKGROUND_POLLING_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// How the client keeps flags current while in the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceMode {
	/// Long-lived SSE connection pushing updates.
	Streaming,
	/// Periodic fetch of the full flag set.
	Polling,
}

/// How the context is sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
	/// Context base64url-encoded into the request path.
	Get,
	/// Context sent as the JSON body of a `REPORT` request.
	Report,
}

/// Settings for the synchronization engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
	pub mode: DataSourceMode,
	pub base_uri: String,
	pub stream_uri: String,
	pub polling_interval: Duration,
	pub background_polling_interval: Duration,
	/// Poll at `background_polling_interval` while backgrounded; when false
	/// the source is stopped instead.
	pub enable_background_updating: bool,
	pub request_method: RequestMethod,
	/// Ask the server to include evaluation reasons.
	pub evaluation_reasons: bool,
	pub reconnect_base_delay: Duration,
	pub reconnect_max_delay: Duration,
	pub request_timeout: Duration,
	/// Write flag sets to the durable tier.
	pub persist_flag_values: bool,
	/// Start without connecting.
	pub offline: bool,
	/// Legacy behavior: a streaming `ping` also triggers a one-shot poll.
	pub poll_on_ping: bool,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			mode: DataSourceMode::Streaming,
			base_uri: DEFAULT_BASE_URI.to_string(),
			stream_uri: DEFAULT_STREAM_URI.to_string(),
			polling_interval: DEFAULT_POLLING_INTERVAL,
			background_polling_interval: DEFAULT_BACKGROUND_POLLING_INTERVAL,
			enable_background_updating: true,
			request_method: RequestMethod::Get,
			evaluation_reasons: false,
			reconnect_base_delay: Duration::from_secs(1),
			reconnect_max_delay: Duration::from_secs(30),
			request_timeout: Duration::from_secs(10),
			persist_flag_values: true,
			offline: false,
			poll_on_ping: false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_sync_config_defaults() {
		let config = SyncConfig::default();
		assert_eq!(config.mode, DataSourceMode::Streaming);
		assert_eq!(config.polling_interval, DEFAULT_POLLING_INTERVAL);
		assert_eq!(config.background_polling_interval, Duration::from_secs(3600));
		assert_eq!(config.reconnect_base_delay, Duration::from_secs(1));
		assert_eq!(config.reconnect_max_delay, Duration::from_secs(30));
		assert_eq!(config.request_method, RequestMethod::Get);
		assert!(config.enable_background_updating);
		assert!(config.persist_flag_values);
		assert!(!config.poll_on_ping);
	}

	#[test]
	fn test_default_intervals_respect_minimums() {
		let config = SyncConfig::default();
		assert!(config.polling_interval >= MIN_POLLING_INTERVAL);
		assert!(config.background_polling_interval >= MIN_BACKGROUND_POLLING_INTERVAL);
	}
}
