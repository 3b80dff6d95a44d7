// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Server-evaluated flag values and the per-context flag set.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change::ChangeRecord;

/// A flag value as evaluated by the server for one context.
///
/// `version` orders updates for the same key: the cache never replaces a
/// stored flag with one whose version is not strictly greater.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
	#[serde(default)]
	pub value: serde_json::Value,
	pub version: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub flag_version: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub variation: Option<i64>,
	#[serde(default)]
	pub track_events: bool,
	#[serde(default)]
	pub track_reason: bool,
	#[serde(
		default,
		with = "chrono::serde::ts_milliseconds_option",
		skip_serializing_if = "Option::is_none"
	)]
	pub debug_events_until_date: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<EvaluationReason>,
	/// Marks a deletion placeholder that only carries a version.
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub deleted: bool,
}

impl Flag {
	/// Creates a flag with the given value and version and no metadata.
	pub fn new(value: serde_json::Value, version: i64) -> Self {
		Self {
			value,
			version,
			flag_version: None,
			variation: None,
			track_events: false,
			track_reason: false,
			debug_events_until_date: None,
			reason: None,
			deleted: false,
		}
	}

	/// Creates a deletion placeholder at `version`.
	pub fn tombstone(version: i64) -> Self {
		Self {
			deleted: true,
			..Self::new(serde_json::Value::Null, version)
		}
	}

	pub fn with_variation(mut self, variation: i64) -> Self {
		self.variation = Some(variation);
		self
	}

	pub fn with_flag_version(mut self, flag_version: i64) -> Self {
		self.flag_version = Some(flag_version);
		self
	}

	pub fn with_reason(mut self, reason: EvaluationReason) -> Self {
		self.reason = Some(reason);
		self
	}

	/// Returns true if this flag is a deletion placeholder.
	pub fn is_deleted(&self) -> bool {
		self.deleted
	}
}

/// Why the server produced a flag's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationReason {
	Off,
	#[serde(rename_all = "camelCase")]
	Fallthrough {
		#[serde(default, skip_serializing_if = "std::ops::Not::not")]
		in_experiment: bool,
	},
	TargetMatch,
	#[serde(rename_all = "camelCase")]
	RuleMatch {
		rule_index: u32,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		rule_id: Option<String>,
		#[serde(default, skip_serializing_if = "std::ops::Not::not")]
		in_experiment: bool,
	},
	#[serde(rename_all = "camelCase")]
	PrerequisiteFailed { prerequisite_key: String },
	#[serde(rename_all = "camelCase")]
	Error { error_kind: String },
	/// A reason kind this SDK does not know about.
	#[serde(other)]
	Unknown,
}

/// Every flag for one context, keyed by flag key.
///
/// Deleted flags are kept as tombstones so stale updates stay rejected; the
/// read accessors skip them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagSet {
	flags: HashMap<String, Flag>,
}

impl FlagSet {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the live flag for `key`, skipping tombstones.
	pub fn get(&self, key: &str) -> Option<&Flag> {
		self.flags.get(key).filter(|flag| !flag.deleted)
	}

	/// Returns the stored entry for `key`, tombstones included.
	pub fn entry(&self, key: &str) -> Option<&Flag> {
		self.flags.get(key)
	}

	pub fn insert(&mut self, key: impl Into<String>, flag: Flag) -> Option<Flag> {
		self.flags.insert(key.into(), flag)
	}

	/// Iterates over live flags.
	pub fn iter(&self) -> impl Iterator<Item = (&String, &Flag)> {
		self.flags.iter().filter(|(_, flag)| !flag.deleted)
	}

	/// Number of live flags.
	pub fn len(&self) -> usize {
		self.iter().count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Copies the live flags into a plain map.
	pub fn to_map(&self) -> HashMap<String, Flag> {
		self
			.iter()
			.map(|(key, flag)| (key.clone(), flag.clone()))
			.collect()
	}

	/// Computes the change records that replacing `self` with `next` produces.
	///
	/// One record per key whose live value differs, plus a deletion record
	/// for each live key missing from `next`.
	pub fn diff(&self, next: &FlagSet) -> Vec<ChangeRecord> {
		let mut changes = Vec::new();

		for (key, new_flag) in next.iter() {
			let old_value = self.get(key).map(|flag| &flag.value);
			if old_value != Some(&new_flag.value) {
				changes.push(ChangeRecord::updated(
					key.clone(),
					old_value.cloned(),
					new_flag.value.clone(),
				));
			}
		}

		for (key, old_flag) in self.iter() {
			if next.get(key).is_none() {
				changes.push(ChangeRecord::deleted(key.clone(), old_flag.value.clone()));
			}
		}

		changes
	}
}

impl FromIterator<(String, Flag)> for FlagSet {
	fn from_iter<I: IntoIterator<Item = (String, Flag)>>(iter: I) -> Self {
		Self {
			flags: iter.into_iter().collect(),
		}
	}
}

impl From<HashMap<String, Flag>> for FlagSet {
	fn from(flags: HashMap<String, Flag>) -> Self {
		Self { flags }
	}
}
