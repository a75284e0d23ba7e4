// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous capture and delivery of error events.
//!
//! Events are captured without blocking, queued on a bounded queue and
//! delivered one at a time by a background worker to a Sentry-compatible
//! store endpoint. Each capture returns a [`CaptureHandle`] that reports the
//! event id and, later, the delivery outcome.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod client;
pub mod config;
pub mod dsn;
pub mod encode;
pub mod error;
pub mod fact;
pub mod global;
pub mod http;
pub mod packet;
mod panic_trace;
pub mod pending;
pub mod stacktrace;
pub mod transport;
mod worker;

pub use client::{CaptureHandle, CapturedPanic, Client, DropHandler, PanicReport};
pub use config::ClientOptions;
pub use error::{ConfigError, Error};
pub use fact::{Exception, Fact, Http, Message, User};
pub use global::{default_client, init};
pub use packet::{Level, Packet, Tag, Tags};
pub use stacktrace::{Frame, Stacktrace};
pub use transport::{HttpTransport, Transport, TransportError};
