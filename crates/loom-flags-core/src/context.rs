// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation context and its cache identity.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Kind assigned to contexts built without an explicit kind.
pub const DEFAULT_CONTEXT_KIND: &str = "user";

/// The identity (with attributes) flags are evaluated against.
///
/// # Example
///
/// ```
/// use loom_flags_core::EvaluationContext;
///
/// let ctx = EvaluationContext::new("user123")
///     .with_name("Sandy")
///     .with_attribute("plan", serde_json::json!("enterprise"));
///
/// assert_eq!(ctx.cache_key().as_str(), "user123");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
	pub kind: String,
	pub key: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub anonymous: bool,
	#[serde(flatten)]
	pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl EvaluationContext {
	/// Creates a context of the default kind.
	pub fn new(key: impl Into<String>) -> Self {
		Self {
			kind: DEFAULT_CONTEXT_KIND.to_string(),
			key: key.into(),
			name: None,
			anonymous: false,
			attributes: serde_json::Map::new(),
		}
	}

	pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
		self.kind = kind.into();
		self
	}

	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	pub fn anonymous(mut self) -> Self {
		self.anonymous = true;
		self
	}

	pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
		self.attributes.insert(name.into(), value);
		self
	}

	/// Identity used to partition both cache tiers.
	///
	/// Contexts of the default kind use their key; other kinds are written
	/// as `kind:key`. `%` and `:` are percent-escaped in both parts, so a
	/// default-kind key never contains a bare `:` and the mapping is
	/// injective.
	pub fn cache_key(&self) -> ContextKey {
		if self.kind == DEFAULT_CONTEXT_KIND {
			ContextKey(escape_key_part(&self.key))
		} else {
			ContextKey(format!(
				"{}:{}",
				escape_key_part(&self.kind),
				escape_key_part(&self.key)
			))
		}
	}

	/// JSON body sent with REPORT requests.
	pub fn to_json(&self) -> Result<String> {
		Ok(serde_json::to_string(self)?)
	}

	/// URL-safe base64 of the context JSON, for GET request paths.
	pub fn to_base64_url(&self) -> Result<String> {
		Ok(URL_SAFE.encode(self.to_json()?))
	}
}

fn escape_key_part(part: &str) -> String {
	part.replace('%', "%25").replace(':', "%3A")
}

/// Opaque identity string that partitions the flag cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextKey(String);

impl ContextKey {
	pub fn new(key: impl Into<String>) -> Self {
		Self(key.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Hex SHA-256 of the key, used to name durable storage entries so raw
	/// identities never appear in storage keys.
	pub fn hashed(&self) -> String {
		hex::encode(Sha256::digest(self.0.as_bytes()))
	}
}

impl fmt::Display for ContextKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ContextKey {
	fn from(key: &str) -> Self {
		Self(key.to_string())
	}
}
