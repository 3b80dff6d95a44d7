// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature Flags client sync engine for Loom.
//!
//! This crate keeps a local replica of the flag values assigned to one
//! evaluation context and notifies listeners when they change.
//!
//! # Features
//!
//! - **Streaming Updates**: SSE `put`/`patch`/`delete`/`ping` with backoff reconnects
//! - **Polling Fallback**: interval polling with ETag conditional requests
//! - **Version-gated Cache**: stale patches and deletes never regress a flag
//! - **Persistence**: flag sets survive restarts through a pluggable store
//! - **Lifecycle Control**: context switches, offline mode, and background polling
//!   are serialized so only one data source ever runs
//! - **Change Listeners**: callbacks run off the mutating task and are isolated
//!   from each other's panics
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use loom_flags::{EvaluationContext, FlagsClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FlagsClient::builder()
//!         .sdk_key("loom_sdk_client_prod_xxx")
//!         .context(EvaluationContext::new("user123"))
//!         .build()?;
//!
//!     client.start(Duration::from_secs(5)).await?;
//!
//!     let enabled = client.bool_value("feature.new_flow", false);
//!
//!     client
//!         .identify(EvaluationContext::new("user456"), Duration::from_secs(5))
//!         .await?;
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod notifier;
pub mod polling;
pub mod source;
pub mod status;
pub mod storage;
pub mod streaming;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use cache::FlagCache;
pub use client::{FlagsClient, FlagsClientBuilder, PlatformSignal};
pub use config::{DataSourceMode, RequestMethod, SyncConfig};
pub use coordinator::{ActiveSourceInfo, SyncCoordinator};
pub use error::{FlagsError, Result};
pub use notifier::{ChangeNotifier, FlagListener, ListenerHandle};
pub use polling::{FetchOutcome, PollingSource};
pub use source::{FlagSink, InitHandle, InitState, SourceKind, SourceParams};
pub use status::StatusTracker;
pub use storage::{FilePersistentStore, InMemoryPersistentStore, PersistentStore, StorageError};
pub use streaming::{StreamState, StreamingConfig, StreamingSource};
pub use transport::{EventStream, FlagsTransport, HttpTransport, PollResponse, RawEvent};

// Re-export core types
pub use loom_flags_core::{
	ChangeRecord, ConnectionInfo, ConnectionState, ContextKey, EvaluationContext, EvaluationReason,
	FailureInfo, FailureKind, Flag, FlagSet,
};
