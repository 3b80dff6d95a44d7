// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP transport for flag polling and streaming.
//!
//! [`FlagsTransport`] is the seam between the data sources and the network.
//! [`HttpTransport`] implements it with `reqwest` and `eventsource-stream`;
//! hosts and tests can substitute their own.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::BoxStream;
use futures::StreamExt;
use loom_flags_core::{EvaluationContext, FlagSet};
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::debug;

use crate::config::{RequestMethod, SyncConfig};
use crate::error::{FlagsError, Result};

const POLL_GET_PATH: &str = "/msdk/evalx/contexts";
const POLL_REPORT_PATH: &str = "/msdk/evalx/context";
const STREAM_PATH: &str = "/meval";

/// Result of a conditional flag fetch.
#[derive(Debug)]
pub enum PollResponse {
	/// The server's flags match the cache validator that was sent.
	NotModified,
	/// A full flag set, with the validator to send next time.
	Updated {
		flags: FlagSet,
		etag: Option<String>,
	},
}

/// One raw server-sent event, before protocol decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
	pub event: String,
	pub data: String,
}

impl RawEvent {
	pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
		Self {
			event: event.into(),
			data: data.into(),
		}
	}
}

/// Stream of raw events; ends when the server closes the connection.
pub type EventStream = BoxStream<'static, Result<RawEvent>>;

/// Network access used by the data sources.
#[async_trait]
pub trait FlagsTransport: Send + Sync + 'static {
	/// Fetches the flags for `context`, sending `etag` as a cache validator.
	async fn poll(&self, context: &EvaluationContext, etag: Option<&str>) -> Result<PollResponse>;

	/// Opens the event stream for `context`.
	async fn stream(&self, context: &EvaluationContext) -> Result<EventStream>;
}

/// [`FlagsTransport`] over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTransport {
	poll_client: Client,
	stream_client: Client,
	sdk_key: String,
	base_uri: String,
	stream_uri: String,
	request_method: RequestMethod,
	evaluation_reasons: bool,
}

impl HttpTransport {
	/// Builds a transport for `sdk_key` using the URIs and timeouts in `config`.
	pub fn new(sdk_key: impl Into<String>, config: &SyncConfig) -> Result<Self> {
		let poll_client = loom_common_http::builder()
			.timeout(config.request_timeout)
			.build()
			.map_err(FlagsError::ConnectionFailed)?;
		// The stream is long-lived, so only the connect phase is bounded.
		let stream_client = loom_common_http::builder()
			.connect_timeout(config.request_timeout)
			.build()
			.map_err(FlagsError::ConnectionFailed)?;

		Ok(Self {
			poll_client,
			stream_client,
			sdk_key: sdk_key.into(),
			base_uri: config.base_uri.trim_end_matches('/').to_string(),
			stream_uri: config.stream_uri.trim_end_matches('/').to_string(),
			request_method: config.request_method,
			evaluation_reasons: config.evaluation_reasons,
		})
	}

	fn build_request(
		&self,
		client: &Client,
		base: &str,
		get_path: &str,
		report_path: &str,
		context: &EvaluationContext,
	) -> Result<RequestBuilder> {
		let request = match self.request_method {
			RequestMethod::Get => {
				let url = self.with_query(format!("{base}{get_path}/{}", context.to_base64_url()?));
				client.get(url)
			}
			RequestMethod::Report => {
				let method = Method::from_bytes(b"REPORT")
					.map_err(|e| FlagsError::InvalidConfig(e.to_string()))?;
				let url = self.with_query(format!("{base}{report_path}"));
				client
					.request(method, url)
					.header(CONTENT_TYPE, "application/json")
					.body(context.to_json()?)
			}
		};
		Ok(request.header(AUTHORIZATION, format!("Bearer {}", self.sdk_key)))
	}

	fn with_query(&self, url: String) -> String {
		if self.evaluation_reasons {
			format!("{url}?withReasons=true")
		} else {
			url
		}
	}
}

#[async_trait]
impl FlagsTransport for HttpTransport {
	async fn poll(&self, context: &EvaluationContext, etag: Option<&str>) -> Result<PollResponse> {
		let mut request = self.build_request(
			&self.poll_client,
			&self.base_uri,
			POLL_GET_PATH,
			POLL_REPORT_PATH,
			context,
		)?;
		if let Some(etag) = etag {
			request = request.header(IF_NONE_MATCH, etag);
		}

		let response = request.send().await.map_err(FlagsError::from_request)?;
		if response.status() == StatusCode::NOT_MODIFIED {
			debug!("Flags not modified since last poll");
			return Ok(PollResponse::NotModified);
		}

		let response = check_status(response).await?;
		let etag = response
			.headers()
			.get(ETAG)
			.and_then(|v| v.to_str().ok())
			.map(str::to_string);
		let body = response.text().await.map_err(FlagsError::from_request)?;
		let flags: FlagSet = serde_json::from_str(&body)?;

		Ok(PollResponse::Updated { flags, etag })
	}

	async fn stream(&self, context: &EvaluationContext) -> Result<EventStream> {
		let response = self
			.build_request(
				&self.stream_client,
				&self.stream_uri,
				STREAM_PATH,
				STREAM_PATH,
				context,
			)?
			.header(ACCEPT, "text/event-stream")
			.header(CACHE_CONTROL, "no-cache")
			.send()
			.await
			.map_err(FlagsError::from_request)?;
		let response = check_status(response).await?;

		let events = response.bytes_stream().eventsource().map(|result| {
			result
				.map(|event| RawEvent {
					event: event.event,
					data: event.data,
				})
				.map_err(|e| FlagsError::SseStreamError(e.to_string()))
		});
		Ok(events.boxed())
	}
}

async fn check_status(response: Response) -> Result<Response> {
	let status = response.status();
	if status == StatusCode::UNAUTHORIZED {
		return Err(FlagsError::Unauthorized {
			status: status.as_u16(),
		});
	}
	if !status.is_success() {
		return Err(FlagsError::ServerError {
			status: status.as_u16(),
			message: response.text().await.unwrap_or_default(),
		});
	}
	Ok(response)
}
