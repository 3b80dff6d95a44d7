// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Connection status reported by the active data source.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of the connection that keeps the flag cache current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
	/// A source is starting and has not delivered flags yet.
	Initializing,
	/// The source has delivered flags and is healthy.
	Valid,
	/// The source hit an error and is retrying.
	Interrupted,
	/// The source stopped permanently (e.g. the SDK key was rejected).
	Shutdown,
	/// The device reported no network connectivity.
	NetworkUnavailable,
	/// The application took the client offline.
	SetOffline,
	/// The application is in the background and background updates are off.
	BackgroundDisabled,
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ConnectionState::Initializing => "initializing",
			ConnectionState::Valid => "valid",
			ConnectionState::Interrupted => "interrupted",
			ConnectionState::Shutdown => "shutdown",
			ConnectionState::NetworkUnavailable => "network_unavailable",
			ConnectionState::SetOffline => "set_offline",
			ConnectionState::BackgroundDisabled => "background_disabled",
		};
		f.write_str(s)
	}
}

/// Category of the most recent connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
	NetworkFailure,
	InvalidHttpResponse,
	InvalidData,
	Unauthorized,
	Timeout,
	Unknown,
}

/// Details of a connection failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
	pub kind: FailureKind,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status_code: Option<u16>,
	pub at: DateTime<Utc>,
}

impl FailureInfo {
	pub fn new(kind: FailureKind, message: impl Into<String>, status_code: Option<u16>) -> Self {
		Self {
			kind,
			message: message.into(),
			status_code,
			at: Utc::now(),
		}
	}
}

/// Snapshot of the connection status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
	pub state: ConnectionState,
	/// When `state` was entered.
	pub state_since: DateTime<Utc>,
	pub last_successful_connection: Option<DateTime<Utc>>,
	pub last_failure: Option<FailureInfo>,
}

impl ConnectionInfo {
	pub fn new(state: ConnectionState) -> Self {
		Self {
			state,
			state_since: Utc::now(),
			last_successful_connection: None,
			last_failure: None,
		}
	}
}
