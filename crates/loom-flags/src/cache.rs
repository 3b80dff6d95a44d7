// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Two-tier flag cache with version-gated updates.
//!
//! The memory tier holds one immutable [`FlagSet`] snapshot for the active
//! context. Readers load the snapshot without locking; writers serialize on a
//! mutex, build a new snapshot, diff it against the old one and swap it in.
//! The durable tier ([`PersistentStore`]) mirrors every write and seeds the
//! memory tier when a context becomes active.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwapOption;
use loom_flags_core::{ChangeRecord, ContextKey, Flag, FlagSet};
use tracing::{debug, warn};

use crate::storage::PersistentStore;

const STORAGE_KEY_PREFIX: &str = "loom_flags_";

#[derive(Debug)]
struct Snapshot {
	context: ContextKey,
	flags: Arc<FlagSet>,
}

/// Flag cache shared by the data sources and the client read path.
#[derive(Clone)]
pub struct FlagCache {
	inner: Arc<FlagCacheInner>,
}

struct FlagCacheInner {
	active: ArcSwapOption<Snapshot>,
	writer: Mutex<()>,
	persistence: Option<Arc<dyn PersistentStore>>,
}

impl FlagCache {
	/// Creates a memory-only cache.
	pub fn new() -> Self {
		Self::build(None)
	}

	/// Creates a cache that mirrors writes into `store`.
	pub fn with_persistence(store: Arc<dyn PersistentStore>) -> Self {
		Self::build(Some(store))
	}

	fn build(persistence: Option<Arc<dyn PersistentStore>>) -> Self {
		Self {
			inner: Arc::new(FlagCacheInner {
				active: ArcSwapOption::empty(),
				writer: Mutex::new(()),
				persistence,
			}),
		}
	}

	/// Returns the flag set for `context`.
	///
	/// Served from memory when `context` is active. An empty memory tier is
	/// hydrated from durable storage on first access. A context other than
	/// the active one is read from durable storage without replacing the
	/// active snapshot.
	pub fn get(&self, context: &ContextKey) -> Arc<FlagSet> {
		if let Some(flags) = self.load_active(context) {
			return flags;
		}

		let _guard = self.lock_writer();
		if let Some(flags) = self.load_active(context) {
			return flags;
		}

		let flags = Arc::new(self.load_persisted(context));
		if self.inner.active.load_full().is_none() {
			self.store_snapshot(context, Arc::clone(&flags));
		}
		flags
	}

	/// Returns the live flag `key` for `context`.
	pub fn flag(&self, context: &ContextKey, key: &str) -> Option<Flag> {
		self.get(context).get(key).cloned()
	}

	/// Returns every live flag for `context`.
	pub fn all_flags(&self, context: &ContextKey) -> HashMap<String, Flag> {
		self.get(context).to_map()
	}

	/// Returns the context whose flags are in memory, if any.
	pub fn active_context(&self) -> Option<ContextKey> {
		self
			.inner
			.active
			.load_full()
			.map(|snapshot| snapshot.context.clone())
	}

	/// Makes `context` the active context, seeding it from durable storage.
	///
	/// Returns the value changes between the previously active flags and the
	/// newly active ones. Activating the already active context is a no-op.
	pub fn activate(&self, context: &ContextKey) -> Vec<ChangeRecord> {
		let _guard = self.lock_writer();

		let previous = match self.inner.active.load_full() {
			Some(snapshot) if snapshot.context == *context => return Vec::new(),
			Some(snapshot) => Arc::clone(&snapshot.flags),
			None => Arc::new(FlagSet::new()),
		};

		let next = Arc::new(self.load_persisted(context));
		let changes = previous.diff(&next);
		debug!(
			context = %context,
			flags = next.len(),
			changes = changes.len(),
			"Activated context"
		);
		self.store_snapshot(context, next);
		changes
	}

	/// Replaces every flag for `context` in both tiers.
	///
	/// A put always wins regardless of stored versions.
	pub fn put(&self, context: &ContextKey, flags: FlagSet) -> Vec<ChangeRecord> {
		let _guard = self.lock_writer();

		let previous = self.current_for(context);
		let changes = previous.diff(&flags);
		let flags = Arc::new(flags);
		self.store_snapshot(context, Arc::clone(&flags));
		self.persist(context, &flags);

		debug!(
			context = %context,
			flags = flags.len(),
			changes = changes.len(),
			"Replaced flag set"
		);
		changes
	}

	/// Stores `flag` under `key` if its version is newer than the stored one.
	///
	/// Returns a change record when the stored value changed. Stale updates
	/// are dropped and return `None`.
	pub fn upsert(&self, context: &ContextKey, key: &str, flag: Flag) -> Option<ChangeRecord> {
		self.apply_versioned(context, key, flag)
	}

	/// Replaces `key` with a tombstone at `version` if that version is newer.
	pub fn remove(&self, context: &ContextKey, key: &str, version: i64) -> Option<ChangeRecord> {
		self.apply_versioned(context, key, Flag::tombstone(version))
	}

	/// Deletes the durable copy of `context`'s flags.
	pub fn clear_persisted(&self, context: &ContextKey) {
		if let Some(store) = &self.inner.persistence {
			if let Err(e) = store.remove(&storage_key(context)) {
				warn!(context = %context, error = %e, "Failed to clear persisted flags");
			}
		}
	}

	fn apply_versioned(&self, context: &ContextKey, key: &str, flag: Flag) -> Option<ChangeRecord> {
		let _guard = self.lock_writer();

		let current = self.current_for(context);
		if let Some(existing) = current.entry(key) {
			if existing.version >= flag.version {
				debug!(
					flag_key = %key,
					stored_version = existing.version,
					incoming_version = flag.version,
					"Rejected stale flag update"
				);
				return None;
			}
		}

		let old_value = current.get(key).map(|f| f.value.clone());
		let new_value = (!flag.is_deleted()).then(|| flag.value.clone());
		let change = change_for(key, old_value, new_value);

		let mut next = (*current).clone();
		next.insert(key, flag);
		let next = Arc::new(next);
		self.store_snapshot(context, Arc::clone(&next));
		self.persist(context, &next);

		change
	}

	fn load_active(&self, context: &ContextKey) -> Option<Arc<FlagSet>> {
		let active = self.inner.active.load();
		match &*active {
			Some(snapshot) if snapshot.context == *context => Some(Arc::clone(&snapshot.flags)),
			_ => None,
		}
	}

	/// Must be called with the writer lock held.
	fn current_for(&self, context: &ContextKey) -> Arc<FlagSet> {
		self
			.load_active(context)
			.unwrap_or_else(|| Arc::new(self.load_persisted(context)))
	}

	fn store_snapshot(&self, context: &ContextKey, flags: Arc<FlagSet>) {
		self.inner.active.store(Some(Arc::new(Snapshot {
			context: context.clone(),
			flags,
		})));
	}

	fn lock_writer(&self) -> MutexGuard<'_, ()> {
		self
			.inner
			.writer
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn load_persisted(&self, context: &ContextKey) -> FlagSet {
		let Some(store) = &self.inner.persistence else {
			return FlagSet::new();
		};

		match store.get(&storage_key(context)) {
			Ok(Some(json)) => match serde_json::from_str(&json) {
				Ok(flags) => flags,
				Err(e) => {
					warn!(context = %context, error = %e, "Discarding unreadable persisted flags");
					FlagSet::new()
				}
			},
			Ok(None) => FlagSet::new(),
			Err(e) => {
				warn!(context = %context, error = %e, "Failed to read persisted flags");
				FlagSet::new()
			}
		}
	}

	fn persist(&self, context: &ContextKey, flags: &FlagSet) {
		let Some(store) = &self.inner.persistence else {
			return;
		};

		let json = match serde_json::to_string(flags) {
			Ok(json) => json,
			Err(e) => {
				warn!(context = %context, error = %e, "Failed to encode flags for persistence");
				return;
			}
		};

		if let Err(e) = store.set(&storage_key(context), &json) {
			warn!(context = %context, error = %e, "Failed to persist flags");
		}
	}
}

impl Default for FlagCache {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for FlagCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FlagCache")
			.field("active_context", &self.active_context())
			.field("persistent", &self.inner.persistence.is_some())
			.finish()
	}
}

fn storage_key(context: &ContextKey) -> String {
	format!("{STORAGE_KEY_PREFIX}{}", context.hashed())
}

fn change_for(
	key: &str,
	old_value: Option<serde_json::Value>,
	new_value: Option<serde_json::Value>,
) -> Option<ChangeRecord> {
	match (old_value, new_value) {
		(old, Some(new)) if old.as_ref() != Some(&new) => Some(ChangeRecord::updated(key, old, new)),
		(Some(old), None) => Some(ChangeRecord::deleted(key, old)),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::{InMemoryPersistentStore, MockPersistentStore, StorageError};
	use proptest::prelude::*;
	use serde_json::json;

	fn ctx(key: &str) -> ContextKey {
		ContextKey::new(key)
	}

	fn flag_set(entries: &[(&str, serde_json::Value, i64)]) -> FlagSet {
		entries
			.iter()
			.map(|(key, value, version)| (key.to_string(), Flag::new(value.clone(), *version)))
			.collect()
	}

	#[test]
	fn stale_patch_is_rejected() {
		let cache = FlagCache::new();
		let user = ctx("u1");
		cache.put(&user, flag_set(&[("A", json!("x"), 2)]));

		let change = cache.upsert(&user, "A", Flag::new(json!("y"), 1));

		assert!(change.is_none());
		assert_eq!(cache.flag(&user, "A").unwrap().value, json!("x"));
	}

	#[test]
	fn equal_version_is_rejected() {
		let cache = FlagCache::new();
		let user = ctx("u1");
		cache.put(&user, flag_set(&[("A", json!("x"), 2)]));

		assert!(cache.upsert(&user, "A", Flag::new(json!("y"), 2)).is_none());
		assert_eq!(cache.flag(&user, "A").unwrap().value, json!("x"));
	}

	#[test]
	fn newer_patch_replaces_and_reports_change() {
		let cache = FlagCache::new();
		let user = ctx("u1");
		cache.put(&user, flag_set(&[("A", json!("x"), 2)]));

		let change = cache.upsert(&user, "A", Flag::new(json!("y"), 3)).unwrap();

		assert_eq!(change.old_value, Some(json!("x")));
		assert_eq!(change.new_value, Some(json!("y")));
		assert_eq!(cache.flag(&user, "A").unwrap().version, 3);
	}

	#[test]
	fn newer_patch_with_same_value_is_silent() {
		let cache = FlagCache::new();
		let user = ctx("u1");
		cache.put(&user, flag_set(&[("A", json!("x"), 2)]));

		assert!(cache.upsert(&user, "A", Flag::new(json!("x"), 5)).is_none());
		assert_eq!(cache.flag(&user, "A").unwrap().version, 5);
	}

	#[test]
	fn put_replaces_all_keys() {
		let cache = FlagCache::new();
		let user = ctx("u1");
		cache.put(&user, flag_set(&[("old", json!(1), 10), ("kept", json!(1), 10)]));

		let changes = cache.put(&user, flag_set(&[("kept", json!(2), 1), ("new", json!(3), 1)]));

		let flags = cache.all_flags(&user);
		assert_eq!(flags.len(), 2);
		assert!(flags.contains_key("kept"));
		assert!(flags.contains_key("new"));
		assert!(!flags.contains_key("old"));
		assert_eq!(flags["kept"].version, 1);
		assert_eq!(changes.len(), 3);
	}

	#[test]
	fn delete_leaves_tombstone_that_blocks_stale_patch() {
		let cache = FlagCache::new();
		let user = ctx("u1");
		cache.put(&user, flag_set(&[("A", json!(true), 1)]));

		let change = cache.remove(&user, "A", 5).unwrap();
		assert!(change.deleted);
		assert!(cache.flag(&user, "A").is_none());

		assert!(cache.upsert(&user, "A", Flag::new(json!(false), 4)).is_none());
		assert!(cache.flag(&user, "A").is_none());

		let revived = cache.upsert(&user, "A", Flag::new(json!(false), 6)).unwrap();
		assert_eq!(revived.old_value, None);
		assert_eq!(cache.flag(&user, "A").unwrap().value, json!(false));
	}

	#[test]
	fn delete_of_unknown_key_records_tombstone_silently() {
		let cache = FlagCache::new();
		let user = ctx("u1");

		assert!(cache.remove(&user, "ghost", 3).is_none());
		assert!(cache.upsert(&user, "ghost", Flag::new(json!(1), 2)).is_none());
	}

	#[test]
	fn stale_delete_is_rejected() {
		let cache = FlagCache::new();
		let user = ctx("u1");
		cache.put(&user, flag_set(&[("A", json!(true), 4)]));

		assert!(cache.remove(&user, "A", 4).is_none());
		assert!(cache.flag(&user, "A").is_some());
	}

	#[test]
	fn get_hydrates_empty_memory_from_persistence() {
		let store = Arc::new(InMemoryPersistentStore::new());
		let user = ctx("u1");
		FlagCache::with_persistence(store.clone()).put(&user, flag_set(&[("A", json!(1), 1)]));

		let fresh = FlagCache::with_persistence(store);
		assert!(fresh.active_context().is_none());
		assert_eq!(fresh.get(&user).len(), 1);
		assert_eq!(fresh.active_context(), Some(user));
	}

	#[test]
	fn reading_inactive_context_does_not_replace_active() {
		let store = Arc::new(InMemoryPersistentStore::new());
		let cache = FlagCache::with_persistence(store);
		let (a, b) = (ctx("a"), ctx("b"));
		cache.put(&b, flag_set(&[("B", json!(1), 1)]));
		cache.put(&a, flag_set(&[("A", json!(1), 1)]));

		assert_eq!(cache.get(&b).len(), 1);
		assert_eq!(cache.active_context(), Some(a));
	}

	#[test]
	fn activate_diffs_against_previous_context() {
		let store = Arc::new(InMemoryPersistentStore::new());
		let cache = FlagCache::with_persistence(store);
		let (a, b) = (ctx("a"), ctx("b"));
		cache.put(&b, flag_set(&[("shared", json!("b"), 1)]));
		cache.put(&a, flag_set(&[("shared", json!("a"), 1), ("only_a", json!(1), 1)]));

		let mut changes = cache.activate(&b);
		changes.sort_by(|x, y| x.key.cmp(&y.key));

		assert_eq!(cache.active_context(), Some(b.clone()));
		assert_eq!(changes.len(), 2);
		assert_eq!(changes[0].key, "only_a");
		assert!(changes[0].deleted);
		assert_eq!(changes[1].new_value, Some(json!("b")));
		assert!(cache.activate(&b).is_empty());
	}

	#[test]
	fn persistence_failures_are_swallowed() {
		let mut store = MockPersistentStore::new();
		store
			.expect_get()
			.returning(|_| Err(StorageError::Unavailable("disk gone".to_string())));
		store
			.expect_set()
			.returning(|_, _| Err(StorageError::Unavailable("disk gone".to_string())));

		let cache = FlagCache::with_persistence(Arc::new(store));
		let user = ctx("u1");

		assert!(cache.get(&user).is_empty());
		cache.put(&user, flag_set(&[("A", json!(1), 1)]));
		assert!(cache.upsert(&user, "A", Flag::new(json!(2), 2)).is_some());
		assert_eq!(cache.flag(&user, "A").unwrap().value, json!(2));
	}

	#[test]
	fn corrupt_persisted_blob_is_ignored() {
		let store = Arc::new(InMemoryPersistentStore::new());
		let user = ctx("u1");
		store.set(&storage_key(&user), "{not json").unwrap();

		let cache = FlagCache::with_persistence(store);
		assert!(cache.get(&user).is_empty());
	}

	#[test]
	fn clear_persisted_removes_durable_copy() {
		let store = Arc::new(InMemoryPersistentStore::new());
		let cache = FlagCache::with_persistence(store.clone());
		let user = ctx("u1");
		cache.put(&user, flag_set(&[("A", json!(1), 1)]));
		assert_eq!(store.len(), 1);

		cache.clear_persisted(&user);
		assert!(store.is_empty());
	}

	#[test]
	fn storage_key_does_not_expose_identity() {
		let key = storage_key(&ctx("alice@example.com"));
		assert!(key.starts_with(STORAGE_KEY_PREFIX));
		assert!(!key.contains("alice"));
	}

	#[derive(Debug, Clone)]
	enum Op {
		Patch(i64, i64),
		Delete(i64),
	}

	fn op_strategy() -> impl Strategy<Value = Op> {
		prop_oneof![
			(0i64..50, 0i64..5).prop_map(|(version, value)| Op::Patch(version, value)),
			(0i64..50).prop_map(Op::Delete),
		]
	}

	proptest! {
		#[test]
		fn stored_version_is_max_accepted(ops in prop::collection::vec(op_strategy(), 1..40)) {
			let cache = FlagCache::new();
			let user = ctx("u1");
			let mut max_version: Option<i64> = None;

			for op in ops {
				let version = match op {
					Op::Patch(v, _) | Op::Delete(v) => v,
				};
				let accepted = max_version.map_or(true, |max| version > max);
				let before = cache.get(&user);

				match op {
					Op::Patch(v, value) => {
						cache.upsert(&user, "k", Flag::new(json!(value), v));
					}
					Op::Delete(v) => {
						cache.remove(&user, "k", v);
					}
				}

				if accepted {
					max_version = Some(version);
				} else {
					prop_assert_eq!(&*cache.get(&user), &*before);
				}
				prop_assert_eq!(cache.get(&user).entry("k").map(|f| f.version), max_version);
			}
		}

		#[test]
		fn change_reported_iff_value_differs(first in 0i64..3, second in 0i64..3) {
			let cache = FlagCache::new();
			let user = ctx("u1");
			cache.upsert(&user, "k", Flag::new(json!(first), 1));

			let change = cache.upsert(&user, "k", Flag::new(json!(second), 2));
			prop_assert_eq!(change.is_some(), first != second);
		}
	}
}
