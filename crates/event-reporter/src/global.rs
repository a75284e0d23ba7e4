// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide default client.
//!
//! Every free function here forwards to the client installed by [`init`].
//! Before `init` they do nothing: captures resolve to `Ok(())` without an
//! event id, setters are ignored and waits return at once.

use crate::client::{capture_panic_on, CaptureHandle, CapturedPanic, Client, PanicReport};
use crate::config::ClientOptions;
use crate::error::{ConfigError, Error};
use crate::fact::{Fact, Http, User};
use crate::packet::{Packet, Tags};
use std::panic::UnwindSafe;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

static DEFAULT_CLIENT: OnceLock<Client> = OnceLock::new();

/// Installs the default client. Once installed it lives for the rest of the
/// process; later calls return the existing client and ignore `options`.
pub fn init(options: ClientOptions) -> Result<&'static Client, ConfigError> {
    if let Some(client) = DEFAULT_CLIENT.get() {
        debug!("Default client already initialized");
        return Ok(client);
    }
    let client = Client::new(options)?;
    Ok(DEFAULT_CLIENT.get_or_init(|| client))
}

#[must_use]
pub fn default_client() -> Option<&'static Client> {
    DEFAULT_CLIENT.get()
}

pub fn capture(packet: impl Into<Option<Packet>>, tags: impl Into<Tags>) -> CaptureHandle {
    match default_client() {
        Some(client) => client.capture(packet, tags),
        None => CaptureHandle::resolved(),
    }
}

pub fn capture_message(message: &str, tags: impl Into<Tags>, facts: Vec<Fact>) -> CaptureHandle {
    match default_client() {
        Some(client) => client.capture_message(message, tags, facts),
        None => CaptureHandle::resolved(),
    }
}

pub fn capture_message_and_wait(
    message: &str,
    tags: impl Into<Tags>,
    facts: Vec<Fact>,
) -> (Option<String>, Result<(), Error>) {
    match default_client() {
        Some(client) => client.capture_message_and_wait(message, tags, facts),
        None => (None, Ok(())),
    }
}

pub fn capture_error<E>(err: &E, tags: impl Into<Tags>, facts: Vec<Fact>) -> CaptureHandle
where
    E: std::error::Error + ?Sized,
{
    match default_client() {
        Some(client) => client.capture_error(err, tags, facts),
        None => CaptureHandle::resolved(),
    }
}

pub fn capture_error_and_wait<E>(
    err: &E,
    tags: impl Into<Tags>,
    facts: Vec<Fact>,
) -> (Option<String>, Result<(), Error>)
where
    E: std::error::Error + ?Sized,
{
    match default_client() {
        Some(client) => client.capture_error_and_wait(err, tags, facts),
        None => (None, Ok(())),
    }
}

/// Runs `f` and reports a panic through the default client. Without one the
/// panic is still caught and returned.
pub fn capture_panic<F, R>(f: F, tags: impl Into<Tags>, facts: Vec<Fact>) -> Result<R, CapturedPanic>
where
    F: FnOnce() -> R + UnwindSafe,
{
    capture_panic_on(default_client(), f, tags, facts)
}

pub fn capture_panic_and_wait<F, R>(
    f: F,
    tags: impl Into<Tags>,
    facts: Vec<Fact>,
) -> Result<R, PanicReport>
where
    F: FnOnce() -> R + UnwindSafe,
{
    capture_panic(f, tags, facts).map_err(PanicReport::from)
}

pub fn close() {
    if let Some(client) = default_client() {
        client.close();
    }
}

pub fn wait() {
    if let Some(client) = default_client() {
        client.wait();
    }
}

/// Returns `true` when there is no default client.
pub fn wait_timeout(timeout: Duration) -> bool {
    default_client().map_or(true, |client| client.wait_timeout(timeout))
}

pub fn set_dsn(dsn: &str) -> Result<(), ConfigError> {
    default_client().map_or(Ok(()), |client| client.set_dsn(dsn))
}

pub fn set_release(release: impl Into<String>) {
    if let Some(client) = default_client() {
        client.set_release(release);
    }
}

pub fn set_environment(environment: impl Into<String>) {
    if let Some(client) = default_client() {
        client.set_environment(environment);
    }
}

pub fn set_default_logger_name(name: impl Into<String>) {
    if let Some(client) = default_client() {
        client.set_default_logger_name(name);
    }
}

pub fn set_sample_rate(rate: f32) -> Result<(), ConfigError> {
    default_client().map_or(Ok(()), |client| client.set_sample_rate(rate))
}

pub fn set_ignore_errors<S: AsRef<str>>(patterns: &[S]) -> Result<(), ConfigError> {
    default_client().map_or(Ok(()), |client| client.set_ignore_errors(patterns))
}

pub fn set_include_paths(paths: Vec<String>) {
    if let Some(client) = default_client() {
        client.set_include_paths(paths);
    }
}

pub fn set_tags(tags: impl Into<Tags>) {
    if let Some(client) = default_client() {
        client.set_tags(tags);
    }
}

pub fn set_drop_handler(handler: impl Fn(&Packet) + Send + Sync + 'static) {
    if let Some(client) = default_client() {
        client.set_drop_handler(handler);
    }
}

pub fn set_user_context(user: User) {
    if let Some(client) = default_client() {
        client.set_user_context(user);
    }
}

pub fn set_http_context(http: Http) {
    if let Some(client) = default_client() {
        client.set_http_context(http);
    }
}

pub fn set_tags_context(tags: impl Into<Tags>) {
    if let Some(client) = default_client() {
        client.set_tags_context(tags);
    }
}

pub fn clear_context() {
    if let Some(client) = default_client() {
        client.clear_context();
    }
}

#[must_use]
pub fn url() -> String {
    default_client().map(Client::url).unwrap_or_default()
}

#[must_use]
pub fn project_id() -> String {
    default_client().map(Client::project_id).unwrap_or_default()
}

#[must_use]
pub fn release() -> Option<String> {
    default_client().and_then(Client::release)
}

#[must_use]
pub fn environment() -> Option<String> {
    default_client().and_then(Client::environment)
}

#[must_use]
pub fn sample_rate() -> f32 {
    default_client().map_or(1.0, Client::sample_rate)
}

#[must_use]
pub fn include_paths() -> Vec<String> {
    default_client().map(Client::include_paths).unwrap_or_default()
}
