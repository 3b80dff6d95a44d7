// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SSE (Server-Sent Events) frames of the flag streaming protocol.
//!
//! # Events
//!
//! - `put` - Full flag set for the context
//! - `patch` - One flag changed (`{key, version, ...flag fields}`)
//! - `delete` - One flag removed (`{key, version}`)
//! - `ping` - Liveness signal with no payload
//!
//! # Example
//!
//! ```
//! use loom_flags_core::sse::StreamFrame;
//!
//! let frame = StreamFrame::parse("patch", r#"{"key":"ui.theme","version":4,"value":"dark"}"#)
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(frame.event_type(), "patch");
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{FlagsCoreError, Result};
use crate::flag::{Flag, FlagSet};

/// A decoded frame from the flag stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
	/// Complete replacement of the context's flags.
	Put(FlagSet),
	/// A single flag update.
	Patch(PatchData),
	/// A single flag deletion.
	Delete(DeleteData),
	/// Keep-alive; also signals the stream is initialized.
	Ping,
}

impl StreamFrame {
	/// Decodes a frame from its SSE event name and data.
	///
	/// Returns `Ok(None)` for event names outside the protocol so callers
	/// can skip them without treating them as errors.
	pub fn parse(event: &str, data: &str) -> Result<Option<Self>> {
		let frame = match event {
			"put" => StreamFrame::Put(decode(event, data)?),
			"patch" => StreamFrame::Patch(decode(event, data)?),
			"delete" => StreamFrame::Delete(decode(event, data)?),
			"ping" => StreamFrame::Ping,
			_ => return Ok(None),
		};
		Ok(Some(frame))
	}

	/// Returns the event type name as a string.
	pub fn event_type(&self) -> &'static str {
		match self {
			StreamFrame::Put(_) => "put",
			StreamFrame::Patch(_) => "patch",
			StreamFrame::Delete(_) => "delete",
			StreamFrame::Ping => "ping",
		}
	}
}

fn decode<T: serde::de::DeserializeOwned>(event: &str, data: &str) -> Result<T> {
	serde_json::from_str(data).map_err(|source| FlagsCoreError::InvalidFrame {
		event: event.to_string(),
		source,
	})
}

/// Payload of a `patch` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchData {
	/// The flag key being updated.
	pub key: String,
	/// The new flag state, including its version.
	#[serde(flatten)]
	pub flag: Flag,
}

/// Payload of a `delete` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteData {
	/// The flag key being removed.
	pub key: String,
	/// Version of the deletion.
	pub version: i64,
}
