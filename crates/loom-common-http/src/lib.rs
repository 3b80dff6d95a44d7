// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for Loom.
//!
//! This crate provides:
//! - A pre-configured HTTP client with consistent User-Agent header
//! - Exponential backoff with jitter for reconnect loops
//! - Classification of transient vs. fatal failures

mod backoff;
mod client;
mod retry;

pub use backoff::Backoff;
pub use client::{builder, builder_with_user_agent, user_agent};
pub use retry::RetryableError;
