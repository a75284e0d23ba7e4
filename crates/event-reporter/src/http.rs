// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client construction for the default transport.

use core::time::Duration;
use std::error::Error;
use tracing::error;

/// Creates a reqwest client with the given request timeout and optional
/// HTTPS proxy.
///
/// An unusable proxy is logged and the client falls back to a direct
/// connection, so a bad proxy setting never disables reporting outright.
#[must_use]
pub fn get_client(timeout: Duration, https_proxy: Option<&str>) -> reqwest::Client {
    match build_client(timeout, https_proxy) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(timeout, None) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(
    timeout: Duration,
    https_proxy: Option<&str>,
) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if let Some(https_uri) = https_proxy {
        client = client.proxy(reqwest::Proxy::https(https_uri)?);
    }

    Ok(client.build()?)
}
