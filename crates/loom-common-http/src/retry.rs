// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Classification of transient vs. permanent failures.

/// Errors that know whether retrying the same operation could succeed.
///
/// Reconnect and poll loops keep going while this returns true and stop for
/// good on the first error for which it returns false.
pub trait RetryableError {
	fn is_retryable(&self) -> bool;
}
