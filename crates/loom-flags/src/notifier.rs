// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Asynchronous delivery of flag change notifications.
//!
//! Listeners are registered per flag key (or for every key) and are always
//! invoked off the thread that mutated the cache. Each invocation is scheduled
//! on its own blocking task, so a slow or panicking listener cannot delay or
//! abort delivery to the others. Callback invocations are therefore unordered
//! with respect to each other.
//!
//! Channel subscriptions from [`ChangeNotifier::changes`] run no user code and
//! are fed during dispatch, so their receivers see changes in dispatch order.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use loom_flags_core::ChangeRecord;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Callback invoked with each change to a subscribed flag.
pub type FlagListener = Arc<dyn Fn(ChangeRecord) + Send + Sync>;

/// Identifies a registration so it can be removed later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
	id: u64,
	key: Option<String>,
}

impl ListenerHandle {
	/// The flag key this listener is bound to, or `None` for all keys.
	pub fn key(&self) -> Option<&str> {
		self.key.as_deref()
	}
}

#[derive(Clone)]
enum Subscriber {
	Callback(FlagListener),
	Channel(mpsc::UnboundedSender<ChangeRecord>),
}

#[derive(Default)]
struct Registry {
	by_key: HashMap<String, Vec<(u64, Subscriber)>>,
	all: Vec<(u64, Subscriber)>,
}

/// Subscription table and dispatcher for flag changes.
#[derive(Clone, Default)]
pub struct ChangeNotifier {
	inner: Arc<NotifierInner>,
}

#[derive(Default)]
struct NotifierInner {
	registry: Mutex<Registry>,
	next_id: AtomicU64,
}

impl ChangeNotifier {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `listener` for changes to `key`.
	pub fn subscribe<F>(&self, key: impl Into<String>, listener: F) -> ListenerHandle
	where
		F: Fn(ChangeRecord) + Send + Sync + 'static,
	{
		self.register_key(key.into(), Subscriber::Callback(Arc::new(listener)))
	}

	/// Registers `listener` for changes to any flag.
	pub fn subscribe_all<F>(&self, listener: F) -> ListenerHandle
	where
		F: Fn(ChangeRecord) + Send + Sync + 'static,
	{
		let id = self.next_id();
		self
			.lock_registry()
			.all
			.push((id, Subscriber::Callback(Arc::new(listener))));
		ListenerHandle { id, key: None }
	}

	/// Returns a receiver that yields every change to `key`.
	///
	/// Changes arrive in the order they were dispatched. The subscription ends
	/// when the handle is unsubscribed; dropping the receiver alone leaves an
	/// inert registration behind.
	pub fn changes(&self, key: impl Into<String>) -> (ListenerHandle, mpsc::UnboundedReceiver<ChangeRecord>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let handle = self.register_key(key.into(), Subscriber::Channel(tx));
		(handle, rx)
	}

	fn register_key(&self, key: String, subscriber: Subscriber) -> ListenerHandle {
		let id = self.next_id();
		self
			.lock_registry()
			.by_key
			.entry(key.clone())
			.or_default()
			.push((id, subscriber));
		ListenerHandle { id, key: Some(key) }
	}

	/// Removes a registration. Returns false if it was already gone.
	pub fn unsubscribe(&self, handle: &ListenerHandle) -> bool {
		let mut registry = self.lock_registry();
		let list = match &handle.key {
			Some(key) => match registry.by_key.get_mut(key) {
				Some(list) => list,
				None => return false,
			},
			None => &mut registry.all,
		};

		let before = list.len();
		list.retain(|(id, _)| *id != handle.id);
		let removed = list.len() != before;

		if let Some(key) = &handle.key {
			if registry.by_key.get(key).is_some_and(|list| list.is_empty()) {
				registry.by_key.remove(key);
			}
		}
		removed
	}

	/// Number of registered listeners across all keys.
	pub fn listener_count(&self) -> usize {
		let registry = self.lock_registry();
		registry.all.len() + registry.by_key.values().map(Vec::len).sum::<usize>()
	}

	/// Schedules one callback per listener per change and feeds channel
	/// subscriptions in order.
	///
	/// Never runs a listener inline: the caller returns before any listener
	/// starts.
	pub fn dispatch(&self, changes: Vec<ChangeRecord>) {
		if changes.is_empty() {
			return;
		}

		let deliveries: Vec<(Subscriber, ChangeRecord)> = {
			let registry = self.lock_registry();
			changes
				.into_iter()
				.flat_map(|change| {
					registry
						.by_key
						.get(&change.key)
						.into_iter()
						.flatten()
						.chain(registry.all.iter())
						.map(|(_, subscriber)| (subscriber.clone(), change.clone()))
						.collect::<Vec<_>>()
				})
				.collect()
		};

		debug!(deliveries = deliveries.len(), "Dispatching flag changes");

		let runtime = Handle::try_current().ok();
		for (subscriber, change) in deliveries {
			let listener = match subscriber {
				Subscriber::Channel(tx) => {
					let _ = tx.send(change);
					continue;
				}
				Subscriber::Callback(listener) => listener,
			};
			let task = move || invoke(listener, change);
			match &runtime {
				Some(handle) => {
					handle.spawn_blocking(task);
				}
				None => {
					std::thread::spawn(task);
				}
			}
		}
	}

	fn next_id(&self) -> u64 {
		self.inner.next_id.fetch_add(1, Ordering::Relaxed)
	}

	fn lock_registry(&self) -> MutexGuard<'_, Registry> {
		self
			.inner
			.registry
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}

impl std::fmt::Debug for ChangeNotifier {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ChangeNotifier")
			.field("listeners", &self.listener_count())
			.finish()
	}
}

fn invoke(listener: FlagListener, change: ChangeRecord) {
	let key = change.key.clone();
	if panic::catch_unwind(AssertUnwindSafe(|| listener(change))).is_err() {
		error!(flag_key = %key, "Flag change listener panicked");
	}
}
