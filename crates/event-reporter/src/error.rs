// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the capture pipeline.
//!
//! Failures fall in two groups. [`ConfigError`] is returned synchronously by
//! constructors and setters. [`Error`] is never returned by a capture call
//! itself: it only travels through the per-event result handle.

use crate::transport::TransportError;

/// Terminal failure of a single captured event.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The delivery queue was full when the event was submitted.
    #[error("event dropped: delivery queue is full")]
    Dropped,

    /// `capture` was called without an event.
    #[error("no event to capture")]
    MissingEvent,

    /// The operating system could not provide entropy for the event id.
    #[error("failed to generate event id: {0}")]
    EventId(#[source] rand::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The event was submitted after `Client::close`.
    #[error("delivery queue is closed")]
    QueueClosed,

    /// The worker went away without reporting a result for the event.
    #[error("delivery worker stopped before reporting a result")]
    WorkerGone,
}

impl Error {
    /// Whether this is a backpressure drop.
    #[must_use]
    pub fn is_dropped(&self) -> bool {
        matches!(self, Error::Dropped)
    }
}

/// Invalid client configuration, reported at configuration time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid DSN: {0}")]
    InvalidDsn(String),

    #[error("DSN is missing the public key and/or secret")]
    MissingUser,

    #[error("DSN is missing the project id")]
    MissingProjectId,

    #[error("sample rate should be between 0 and 1, got {0}")]
    InvalidSampleRate(f32),

    #[error("sample rate is not a number: {0:?}")]
    UnparsableSampleRate(String),

    #[error("failed to compile ignore pattern {pattern:?}: {source}")]
    InvalidIgnorePattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("queue capacity must be greater than 0")]
    InvalidQueueCapacity,
}
