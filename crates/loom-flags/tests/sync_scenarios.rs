// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end flows through the public API with an in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use loom_flags::{
	ChangeRecord, ConnectionState, EvaluationContext, EventStream, FlagCache, FlagsTransport, PollResponse,
	RawEvent, Result, SyncConfig, SyncCoordinator,
};
use loom_flags::{ChangeNotifier, FlagSet};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(5);

/// Hands each opened stream's sender to the test and counts live streams.
#[derive(Default)]
struct ChannelTransport {
	senders: Mutex<Vec<mpsc::UnboundedSender<Result<RawEvent>>>>,
	server_flags: Mutex<FlagSet>,
	opened: AtomicUsize,
}

impl ChannelTransport {
	fn send(&self, event: &str, data: serde_json::Value) {
		let senders = self.senders.lock().unwrap();
		let tx = senders.last().expect("no stream open");
		tx.unbounded_send(Ok(RawEvent::new(event, data.to_string()))).unwrap();
	}

	fn live_streams(&self) -> usize {
		self.senders
			.lock()
			.unwrap()
			.iter()
			.filter(|tx| !tx.is_closed())
			.count()
	}

	async fn wait_for_streams(&self, count: usize) {
		tokio::time::timeout(WAIT, async {
			while self.opened.load(Ordering::SeqCst) < count {
				tokio::time::sleep(Duration::from_millis(2)).await;
			}
		})
		.await
		.expect("stream not opened in time");
	}
}

#[async_trait]
impl FlagsTransport for ChannelTransport {
	async fn poll(&self, _context: &EvaluationContext, _etag: Option<&str>) -> Result<PollResponse> {
		Ok(PollResponse::Updated {
			flags: self.server_flags.lock().unwrap().clone(),
			etag: None,
		})
	}

	async fn stream(&self, _context: &EvaluationContext) -> Result<EventStream> {
		let (tx, rx) = mpsc::unbounded();
		self.senders.lock().unwrap().push(tx);
		self.opened.fetch_add(1, Ordering::SeqCst);
		Ok(rx.boxed())
	}
}

fn coordinator(transport: &Arc<ChannelTransport>) -> SyncCoordinator {
	SyncCoordinator::new(
		SyncConfig::default(),
		transport.clone(),
		FlagCache::new(),
		ChangeNotifier::new(),
		EvaluationContext::new("user-1"),
	)
}

async fn next_change(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ChangeRecord>) -> ChangeRecord {
	tokio::time::timeout(WAIT, rx.recv())
		.await
		.expect("no change delivered")
		.expect("listener dropped")
}

#[tokio::test]
async fn stale_patch_is_rejected() {
	let transport = Arc::new(ChannelTransport::default());
	let coordinator = coordinator(&transport);
	let (_handle, mut changes) = coordinator.notifier().changes("A");

	let init = coordinator.start_pending().await.unwrap().unwrap();
	transport.wait_for_streams(1).await;
	transport.send("put", json!({ "A": { "value": "x", "version": 2 } }));
	assert!(init.clone().wait_timeout(WAIT).await.unwrap());
	assert_eq!(next_change(&mut changes).await.new_value, Some(json!("x")));

	transport.send("patch", json!({ "key": "A", "value": "y", "version": 1 }));
	transport.send("patch", json!({ "key": "A", "value": "z", "version": 3 }));

	let change = next_change(&mut changes).await;
	assert_eq!(change.old_value, Some(json!("x")));
	assert_eq!(change.new_value, Some(json!("z")));
	assert_eq!(coordinator.flag("A").unwrap().version, 3);
}

#[tokio::test]
async fn put_replaces_every_key() {
	let transport = Arc::new(ChannelTransport::default());
	let coordinator = coordinator(&transport);
	let (_handle, mut changes) = coordinator.notifier().changes("old");

	coordinator.start_pending().await.unwrap();
	transport.wait_for_streams(1).await;
	transport.send("put", json!({ "old": { "value": 1, "version": 1 } }));
	next_change(&mut changes).await;

	transport.send("put", json!({ "new": { "value": 2, "version": 1 } }));
	let removed = next_change(&mut changes).await;
	assert!(removed.deleted);

	let flags = coordinator.all_flags();
	assert_eq!(flags.len(), 1);
	assert!(flags.contains_key("new"));
}

#[tokio::test]
async fn only_one_stream_is_ever_live() {
	let transport = Arc::new(ChannelTransport::default());
	let coordinator = coordinator(&transport);
	coordinator.start_pending().await.unwrap();
	transport.wait_for_streams(1).await;

	for (i, user) in ["user-2", "user-3", "user-4"].into_iter().enumerate() {
		coordinator
			.switch_context(EvaluationContext::new(user), Duration::ZERO)
			.await
			.unwrap();
		transport.wait_for_streams(i + 2).await;
		assert_eq!(transport.live_streams(), 1);
	}

	coordinator.set_online(false).await.unwrap();
	assert_eq!(transport.live_streams(), 0);
	assert_eq!(coordinator.connection_info().state, ConnectionState::SetOffline);
}

#[tokio::test]
async fn online_again_reflects_latest_server_state() {
	let transport = Arc::new(ChannelTransport::default());
	let coordinator = coordinator(&transport);
	coordinator.start_pending().await.unwrap();
	transport.wait_for_streams(1).await;
	transport.send("put", json!({ "A": { "value": "x", "version": 1 } }));
	assert!(coordinator.wait_for_initialization(WAIT).await.unwrap());

	coordinator.set_online(false).await.unwrap();
	assert_eq!(coordinator.flag("A").unwrap().value, json!("x"));

	coordinator.set_online(true).await.unwrap();
	transport.wait_for_streams(2).await;
	transport.send("put", json!({ "A": { "value": "y", "version": 2 } }));
	assert!(coordinator.wait_for_initialization(WAIT).await.unwrap());
	assert_eq!(coordinator.flag("A").unwrap().value, json!("y"));
}

#[tokio::test]
async fn background_poll_uses_server_flags() {
	let transport = Arc::new(ChannelTransport::default());
	*transport.server_flags.lock().unwrap() = serde_json::from_value(json!({
		"A": { "value": "polled", "version": 5 }
	}))
	.unwrap();
	let coordinator = coordinator(&transport);
	coordinator.start_pending().await.unwrap();
	transport.wait_for_streams(1).await;

	coordinator.set_background(true).await.unwrap();
	assert_eq!(transport.live_streams(), 0);
	assert!(coordinator.wait_for_initialization(WAIT).await.unwrap());
	assert_eq!(coordinator.flag("A").unwrap().value, json!("polled"));

	coordinator.set_background(false).await.unwrap();
	transport.wait_for_streams(2).await;
	assert_eq!(transport.live_streams(), 1);
}
