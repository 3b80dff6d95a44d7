// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for flag data decoding.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, FlagsCoreError>;

/// Errors raised while decoding or encoding flag data.
#[derive(Debug, Error)]
pub enum FlagsCoreError {
	/// A stream frame carried a payload that could not be decoded.
	#[error("invalid {event} payload: {source}")]
	InvalidFrame {
		event: String,
		#[source]
		source: serde_json::Error,
	},

	/// JSON encoding or decoding failed.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}
