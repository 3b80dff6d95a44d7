// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable key-value storage for cached flag sets.
//!
//! The host application supplies the storage medium through
//! [`PersistentStore`]. Failures here never fail a flag operation: the cache
//! logs them and keeps serving from memory.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

/// Errors raised by a persistent store.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("storage I/O error: {0}")]
	Io(#[from] io::Error),

	#[error("storage unavailable: {0}")]
	Unavailable(String),
}

/// Get/set of string blobs by key.
#[cfg_attr(test, mockall::automock)]
pub trait PersistentStore: Send + Sync {
	/// Reads the blob stored under `key`.
	fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

	/// Writes `value` under `key`, replacing any previous blob.
	fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

	/// Removes the blob under `key`; removing a missing key is not an error.
	fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Process-local store, useful for tests and hosts without durable storage.
#[derive(Debug, Default)]
pub struct InMemoryPersistentStore {
	entries: Mutex<HashMap<String, String>>,
}

impl InMemoryPersistentStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl PersistentStore for InMemoryPersistentStore {
	fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
		let entries = self
			.entries
			.lock()
			.map_err(|_| StorageError::Unavailable("lock poisoned".to_string()))?;
		Ok(entries.get(key).cloned())
	}

	fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
		let mut entries = self
			.entries
			.lock()
			.map_err(|_| StorageError::Unavailable("lock poisoned".to_string()))?;
		entries.insert(key.to_string(), value.to_string());
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<(), StorageError> {
		let mut entries = self
			.entries
			.lock()
			.map_err(|_| StorageError::Unavailable("lock poisoned".to_string()))?;
		entries.remove(key);
		Ok(())
	}
}

/// Stores one file per key inside a directory.
///
/// Keys are used as file names, so callers pass filesystem-safe keys (the
/// flag cache uses hex digests).
#[derive(Debug, Clone)]
pub struct FilePersistentStore {
	dir: PathBuf,
}

impl FilePersistentStore {
	/// Creates the store, creating `dir` if needed.
	pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
		let dir = dir.into();
		fs::create_dir_all(&dir)?;
		Ok(Self { dir })
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path_for(&self, key: &str) -> PathBuf {
		self.dir.join(format!("{key}.json"))
	}
}

impl PersistentStore for FilePersistentStore {
	fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
		match fs::read_to_string(self.path_for(key)) {
			Ok(contents) => Ok(Some(contents)),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
		let path = self.path_for(key);
		// Write then rename so readers never see a half-written file.
		let tmp = path.with_extension("json.tmp");
		fs::write(&tmp, value)?;
		fs::rename(&tmp, &path)?;
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<(), StorageError> {
		match fs::remove_file(self.path_for(key)) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}
