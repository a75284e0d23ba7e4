// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Network delivery of encoded packets.

use crate::config::ClientOptions;
use crate::encode::{encode, EncodeError};
use crate::http::get_client;
use crate::packet::Packet;
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
pub const AUTH_HEADER: &str = "X-Sentry-Auth";
/// Response header carrying the server's explanation of a rejected event.
pub const ERROR_HEADER: &str = "X-Sentry-Error";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("error serializing packet: {0}")]
    Encode(#[from] EncodeError),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("got http status {status} - x-sentry-error: {detail}")]
    Status { status: StatusCode, detail: String },
}

/// Delivers one packet to one destination.
///
/// Implementations make exactly one attempt; the pipeline never retries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, url: &str, auth_header: &str, packet: &Packet)
        -> Result<(), TransportError>;
}

/// Default transport: one HTTP POST per packet.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    #[must_use]
    pub fn new(options: &ClientOptions) -> Self {
        HttpTransport {
            client: get_client(options.http_timeout, options.https_proxy.as_deref()),
        }
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        HttpTransport { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(&ClientOptions::default())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        url: &str,
        auth_header: &str,
        packet: &Packet,
    ) -> Result<(), TransportError> {
        // no destination configured
        if url.is_empty() {
            return Ok(());
        }

        let encoded = encode(packet)?;
        debug!(
            "Sending {} byte {} payload to {}",
            encoded.body.len(),
            encoded.content_type,
            url
        );

        let resp = self
            .client
            .post(url)
            .header(AUTH_HEADER, auth_header)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::CONTENT_TYPE, encoded.content_type.as_str())
            .body(encoded.body)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = resp
            .headers()
            .get(ERROR_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Err(TransportError::Status { status, detail })
    }
}
