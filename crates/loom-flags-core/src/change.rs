// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Change records emitted by cache mutations.

use serde::{Deserialize, Serialize};

/// A single flag value change produced by a successful cache mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
	/// The flag key that changed.
	pub key: String,
	/// Value before the change, if the flag existed.
	pub old_value: Option<serde_json::Value>,
	/// Value after the change; `None` when the flag was deleted.
	pub new_value: Option<serde_json::Value>,
	/// Whether the change removed the flag.
	pub deleted: bool,
}

impl ChangeRecord {
	/// Creates a record for a flag whose value was set.
	pub fn updated(
		key: impl Into<String>,
		old_value: Option<serde_json::Value>,
		new_value: serde_json::Value,
	) -> Self {
		Self {
			key: key.into(),
			old_value,
			new_value: Some(new_value),
			deleted: false,
		}
	}

	/// Creates a record for a flag that was removed.
	pub fn deleted(key: impl Into<String>, old_value: serde_json::Value) -> Self {
		Self {
			key: key.into(),
			old_value: Some(old_value),
			new_value: None,
			deleted: true,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn updated_record_carries_both_values() {
		let record = ChangeRecord::updated("ui.theme", Some(json!("light")), json!("dark"));
		assert_eq!(record.key, "ui.theme");
		assert_eq!(record.old_value, Some(json!("light")));
		assert_eq!(record.new_value, Some(json!("dark")));
		assert!(!record.deleted);
	}

	#[test]
	fn deleted_record_has_no_new_value() {
		let record = ChangeRecord::deleted("ui.theme", json!("dark"));
		assert!(record.deleted);
		assert!(record.new_value.is_none());
	}
}
