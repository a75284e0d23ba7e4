// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The single delivery worker.
//!
//! One worker per client drains the bounded queue in FIFO order and makes
//! exactly one transport attempt per event. It runs on its own OS thread
//! driving a current-thread runtime, so it makes progress whether or not
//! the capturing code runs inside an async runtime, and blocking waits in
//! callers can never starve it.

use crate::client::Shared;
use crate::error::Error;
use crate::packet::Packet;
use crate::pending::InFlight;
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

pub(crate) const WORKER_THREAD_NAME: &str = "event-reporter-worker";

/// One finalized event and the channel its outcome is reported on.
#[derive(Debug)]
pub(crate) struct OutgoingEvent {
    pub(crate) packet: Packet,
    result_tx: oneshot::Sender<Result<(), Error>>,
    in_flight: InFlight,
}

impl OutgoingEvent {
    pub(crate) fn new(
        packet: Packet,
        result_tx: oneshot::Sender<Result<(), Error>>,
        in_flight: InFlight,
    ) -> Self {
        OutgoingEvent {
            packet,
            result_tx,
            in_flight,
        }
    }

    pub(crate) fn event_id(&self) -> &str {
        self.packet.event_id.as_deref().unwrap_or_default()
    }

    /// Publishes the outcome, then retires the outstanding-work registration.
    pub(crate) fn complete(self, result: Result<(), Error>) {
        let OutgoingEvent {
            packet,
            result_tx,
            in_flight,
        } = self;
        // the caller may not be listening
        let _ = result_tx.send(result);
        drop(in_flight);
        drop(packet);
    }
}

pub(crate) struct Worker {
    shared: Arc<Shared>,
    rx: mpsc::Receiver<OutgoingEvent>,
}

impl Worker {
    pub(crate) fn new(shared: Arc<Shared>, rx: mpsc::Receiver<OutgoingEvent>) -> Self {
        Worker { shared, rx }
    }

    /// Starts the worker on a dedicated thread.
    ///
    /// The runtime is built on that thread. If it cannot be built the
    /// receiver is dropped and queued events resolve `WorkerGone`.
    pub(crate) fn spawn(self) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(self.run()),
                    Err(e) => error!("Failed to build delivery worker runtime: {}", e),
                }
            })
    }

    /// Delivers events until the queue is closed and drained.
    pub(crate) async fn run(mut self) {
        debug!("Delivery worker started");

        while let Some(outgoing) = self.rx.recv().await {
            // destination is read per event so reconfiguration applies to
            // events already queued
            let (url, auth_header) = self.shared.destination();
            let result = self
                .shared
                .transport
                .send(&url, &auth_header, &outgoing.packet)
                .await
                .map_err(Error::from);

            match &result {
                Ok(()) => debug!("Delivered event {}", outgoing.event_id()),
                Err(e) => debug!("Failed to deliver event {}: {}", outgoing.event_id(), e),
            }
            outgoing.complete(result);
        }

        debug!("Delivery worker stopped");
    }
}
