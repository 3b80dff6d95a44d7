// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Loom feature flags client.
//!
//! This crate provides the data model shared by the synchronization engine
//! (`loom-flags`): server-evaluated flags, the per-context flag set, the
//! evaluation context, change records, connection status, and the frames of
//! the streaming protocol. It performs no I/O.
//!
//! # Example
//!
//! ```
//! use loom_flags_core::{EvaluationContext, Flag, FlagSet};
//!
//! let ctx = EvaluationContext::new("user123")
//!     .with_attribute("plan", serde_json::json!("enterprise"));
//!
//! let mut flags = FlagSet::new();
//! flags.insert("feature.new_flow", Flag::new(serde_json::json!(true), 3));
//! assert_eq!(flags.get("feature.new_flow").map(|f| f.version), Some(3));
//! ```

pub mod change;
pub mod connection;
pub mod context;
pub mod error;
pub mod flag;
pub mod sse;

pub use change::ChangeRecord;
pub use connection::{ConnectionInfo, ConnectionState, FailureInfo, FailureKind};
pub use context::{ContextKey, EvaluationContext, DEFAULT_CONTEXT_KIND};
pub use error::{FlagsCoreError, Result};
pub use flag::{EvaluationReason, Flag, FlagSet};
pub use sse::{DeleteData, PatchData, StreamFrame};
