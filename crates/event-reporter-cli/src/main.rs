// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use event_reporter::{Client, ClientOptions, Tags};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Splits `key=value` arguments into tags; everything else is the message.
fn parse_args(args: impl Iterator<Item = String>) -> (String, Tags) {
    let mut words = Vec::new();
    let mut tags = Tags::new();
    for arg in args {
        match arg.split_once('=') {
            Some((key, value)) if !key.is_empty() && !key.contains(' ') => tags.push(key, value),
            _ => words.push(arg),
        }
    }
    (words.join(" "), tags)
}

pub fn main() -> ExitCode {
    let log_level = env::var("REPORTER_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(true)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let (message, tags) = parse_args(env::args().skip(1));
    if message.is_empty() {
        error!("Usage: report-event <message> [key=value ...]");
        return ExitCode::from(2);
    }

    let client = match ClientOptions::from_env().and_then(Client::new) {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating client from environment: {e}");
            return ExitCode::from(2);
        }
    };
    if client.url().is_empty() {
        info!("SENTRY_DSN is not set, the event will not leave this process");
    }

    let (event_id, result) = client.capture_message_and_wait(&message, tags, vec![]);
    client.close();
    if !client.wait_timeout(SHUTDOWN_TIMEOUT) {
        error!("Timed out waiting for outstanding events");
    }

    match result {
        Ok(()) => {
            info!("Reported event {}", event_id.unwrap_or_default());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to report event: {e}");
            ExitCode::FAILURE
        }
    }
}
