// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the flags SDK.

use loom_common_http::RetryableError;
use loom_flags_core::{FailureInfo, FailureKind, FlagsCoreError};
use thiserror::Error;

/// Result type alias for flags operations.
pub type Result<T> = std::result::Result<T, FlagsError>;

/// Errors that can occur in the flags SDK.
#[derive(Debug, Error)]
pub enum FlagsError {
	/// SDK key is missing or empty.
	#[error("invalid SDK key")]
	InvalidSdkKey,

	/// Base URL is missing or invalid.
	#[error("invalid base URL")]
	InvalidBaseUrl,

	/// A configuration value was rejected.
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	/// HTTP request could not be sent or completed.
	#[error("connection failed: {0}")]
	ConnectionFailed(#[source] reqwest::Error),

	/// Server returned a non-success status.
	#[error("server error ({status}): {message}")]
	ServerError { status: u16, message: String },

	/// Server rejected the SDK key. Fatal for the source that received it.
	#[error("SDK key rejected by server (status {status})")]
	Unauthorized { status: u16 },

	/// The request did not complete within the configured timeout.
	#[error("request timed out")]
	Timeout,

	/// The operation was abandoned because its source was shut down.
	#[error("operation cancelled")]
	Cancelled,

	/// The event stream broke mid-read.
	#[error("SSE stream error: {0}")]
	SseStreamError(String),

	/// A response body or frame could not be decoded.
	#[error("failed to parse flag data: {0}")]
	ParseFailed(String),

	/// The client is offline, so no request was made.
	#[error("client is offline")]
	Offline,

	/// The client has been shut down.
	#[error("flags client has been shut down")]
	ClientShutdown,
}

impl FlagsError {
	/// Returns true if the server rejected the SDK key.
	pub fn is_unauthorized(&self) -> bool {
		matches!(self, FlagsError::Unauthorized { .. })
	}

	/// Describes this error for connection status reporting.
	pub fn to_failure_info(&self) -> FailureInfo {
		let (kind, status) = match self {
			FlagsError::ConnectionFailed(e) if e.is_timeout() => (FailureKind::Timeout, None),
			FlagsError::ConnectionFailed(_) | FlagsError::SseStreamError(_) => {
				(FailureKind::NetworkFailure, None)
			}
			FlagsError::ServerError { status, .. } => (FailureKind::InvalidHttpResponse, Some(*status)),
			FlagsError::Unauthorized { status } => (FailureKind::Unauthorized, Some(*status)),
			FlagsError::Timeout => (FailureKind::Timeout, None),
			FlagsError::ParseFailed(_) => (FailureKind::InvalidData, None),
			_ => (FailureKind::Unknown, None),
		};
		FailureInfo::new(kind, self.to_string(), status)
	}

	/// Rebuilds the error that stopped a source from its recorded failure.
	pub(crate) fn from_failure(failure: FailureInfo) -> Self {
		match failure.kind {
			FailureKind::Unauthorized => FlagsError::Unauthorized {
				status: failure.status_code.unwrap_or(401),
			},
			_ => FlagsError::InvalidConfig(failure.message),
		}
	}

	/// Maps a transport error, keeping timeouts distinct from other failures.
	pub(crate) fn from_request(e: reqwest::Error) -> Self {
		if e.is_timeout() {
			FlagsError::Timeout
		} else {
			FlagsError::ConnectionFailed(e)
		}
	}
}

impl From<FlagsCoreError> for FlagsError {
	fn from(e: FlagsCoreError) -> Self {
		FlagsError::ParseFailed(e.to_string())
	}
}

impl From<serde_json::Error> for FlagsError {
	fn from(e: serde_json::Error) -> Self {
		FlagsError::ParseFailed(e.to_string())
	}
}

/// A data source keeps retrying every error except these. Any HTTP status
/// other than 401 is treated as a transient server condition.
impl RetryableError for FlagsError {
	fn is_retryable(&self) -> bool {
		match self {
			FlagsError::ConnectionFailed(_)
			| FlagsError::ServerError { .. }
			| FlagsError::Timeout
			| FlagsError::SseStreamError(_)
			| FlagsError::ParseFailed(_) => true,
			FlagsError::Unauthorized { .. }
			| FlagsError::InvalidSdkKey
			| FlagsError::InvalidBaseUrl
			| FlagsError::InvalidConfig(_)
			| FlagsError::Cancelled
			| FlagsError::Offline
			| FlagsError::ClientShutdown => false,
		}
	}
}
