// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The capture gate and the client state it reads.
//!
//! ```text
//!   capture() ── sample ── exclude ── register ── merge tags ── init
//!                  │          │                                   │
//!                skip       skip                        bounded queue (try_send)
//!                                                          │         │
//!                                                        worker    full: drop
//! ```
//!
//! `capture` never blocks and never fails: every outcome, including drops
//! and transport errors, is reported through the returned [`CaptureHandle`].

use crate::config::{validate_sample_rate, ClientOptions};
use crate::dsn::Dsn;
use crate::error::{ConfigError, Error};
use crate::fact::{Exception, Fact, Http, Message, Stacktrace, User};
use crate::packet::{Extra, Packet, Tags};
use crate::panic_trace::catch_with_trace;
use crate::pending::Pending;
use crate::transport::{HttpTransport, Transport};
use crate::worker::{OutgoingEvent, Worker};
use regex::Regex;
use serde_json::Value;
use std::any::Any;
use std::panic::{self, UnwindSafe};
use std::sync::{
    Arc, Mutex, Once, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, error, warn};

/// Called synchronously with every event dropped because the queue was full.
pub type DropHandler = Arc<dyn Fn(&Packet) + Send + Sync>;

/// Function path prefixes of the capture machinery, trimmed from the top of
/// recorded stack traces.
const CAPTURE_FRAMES: [&str; 3] = [
    "event_reporter::client::",
    "event_reporter::global::",
    "event_reporter::stacktrace::",
];

/// Context attached to every event built by the capture helpers.
#[derive(Debug, Clone, Default)]
struct Context {
    user: Option<User>,
    http: Option<Http>,
    tags: Tags,
}

impl Context {
    fn facts(&self) -> Vec<Fact> {
        let mut facts = Vec::with_capacity(2);
        if let Some(user) = &self.user {
            facts.push(Fact::User(user.clone()));
        }
        if let Some(http) = &self.http {
            facts.push(Fact::Http(http.clone()));
        }
        facts
    }
}

/// Mutable configuration, guarded by one reader/writer lock.
#[derive(Default)]
pub(crate) struct ClientState {
    url: String,
    project_id: String,
    auth_header: String,
    release: Option<String>,
    environment: Option<String>,
    default_logger_name: Option<String>,
    sample_rate: f32,
    ignore_errors: Option<Regex>,
    include_paths: Vec<String>,
    tags: Tags,
    context: Context,
    drop_handler: Option<DropHandler>,
}

impl ClientState {
    fn excludes(&self, text: &str) -> bool {
        self.ignore_errors
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(text))
    }

    fn settings(&self) -> CaptureSettings {
        CaptureSettings {
            sample_rate: self.sample_rate,
            ignore_errors: self.ignore_errors.clone(),
            tags: self.tags.clone(),
            context_tags: self.context.tags.clone(),
            default_logger_name: self.default_logger_name.clone(),
            project_id: self.project_id.clone(),
            release: self.release.clone(),
            environment: self.environment.clone(),
            drop_handler: self.drop_handler.clone(),
        }
    }
}

/// Configuration snapshot taken once per capture.
struct CaptureSettings {
    sample_rate: f32,
    ignore_errors: Option<Regex>,
    tags: Tags,
    context_tags: Tags,
    default_logger_name: Option<String>,
    project_id: String,
    release: Option<String>,
    environment: Option<String>,
    drop_handler: Option<DropHandler>,
}

/// State shared between the client and its delivery worker.
pub(crate) struct Shared {
    state: RwLock<ClientState>,
    pub(crate) transport: Arc<dyn Transport>,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, ClientState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ClientState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Coherent `(url, auth_header)` pair.
    pub(crate) fn destination(&self) -> (String, String) {
        let state = self.read();
        (state.url.clone(), state.auth_header.clone())
    }
}

/// Outcome of one capture.
///
/// Captures that were skipped by sampling or filtering, or made without a
/// client, resolve to `Ok(())` and carry no event id.
#[derive(Debug)]
pub struct CaptureHandle {
    event_id: Option<String>,
    rx: Option<oneshot::Receiver<Result<(), Error>>>,
}

impl CaptureHandle {
    pub(crate) fn resolved() -> Self {
        CaptureHandle {
            event_id: None,
            rx: None,
        }
    }

    fn failed(event_id: Option<String>, err: Error) -> Self {
        let (tx, rx) = oneshot::channel();
        // receiver is alive
        let _ = tx.send(Err(err));
        CaptureHandle {
            event_id,
            rx: Some(rx),
        }
    }

    #[must_use]
    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    /// Blocks the calling thread until the event reaches a terminal state.
    ///
    /// Safe to call from inside an async runtime: delivery happens on the
    /// worker's own thread. Async callers that must not block should use
    /// [`CaptureHandle::result`].
    pub fn wait(self) -> Result<(), Error> {
        match self.rx {
            None => Ok(()),
            Some(rx) => futures::executor::block_on(rx).unwrap_or(Err(Error::WorkerGone)),
        }
    }

    /// Waits asynchronously for the event to reach a terminal state.
    pub async fn result(self) -> Result<(), Error> {
        match self.rx {
            None => Ok(()),
            Some(rx) => rx.await.unwrap_or(Err(Error::WorkerGone)),
        }
    }

    /// The outcome if it is already known. Once this returns `Some`, the
    /// outcome has been taken and later calls report `WorkerGone`.
    pub fn try_result(&mut self) -> Option<Result<(), Error>> {
        match &mut self.rx {
            None => Some(Ok(())),
            Some(rx) => match rx.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Closed) => Some(Err(Error::WorkerGone)),
            },
        }
    }
}

/// A panic caught by [`Client::capture_panic`].
#[derive(Debug)]
pub struct CapturedPanic {
    pub payload: Box<dyn Any + Send>,
    pub handle: CaptureHandle,
}

/// A panic caught by [`Client::capture_panic_and_wait`], after delivery.
#[derive(Debug)]
pub struct PanicReport {
    pub payload: Box<dyn Any + Send>,
    pub event_id: Option<String>,
    pub delivery: Result<(), Error>,
}

/// Connection to one event collection endpoint.
pub struct Client {
    shared: Arc<Shared>,
    pending: Arc<Pending>,
    queue: RwLock<Option<mpsc::Sender<OutgoingEvent>>>,
    worker: Mutex<Option<Worker>>,
    start: Once,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url())
            .field("pending", &self.pending.count())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client delivering over HTTP.
    pub fn new(options: ClientOptions) -> Result<Self, ConfigError> {
        let transport = Arc::new(HttpTransport::new(&options));
        Self::with_transport(options, transport)
    }

    /// Creates a client configured from `SENTRY_*` and `REPORTER_*`
    /// environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(ClientOptions::from_env()?)
    }

    pub fn with_transport(
        options: ClientOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        options.validate()?;

        let mut state = ClientState {
            release: options.release,
            environment: options.environment,
            sample_rate: options.sample_rate,
            tags: options.tags,
            ..Default::default()
        };
        if let Some(dsn) = options.dsn.as_deref().filter(|d| !d.is_empty()) {
            let dsn = Dsn::parse(dsn)?;
            state.url = dsn.url;
            state.auth_header = dsn.auth_header;
            state.project_id = dsn.project_id;
        }

        let shared = Arc::new(Shared {
            state: RwLock::new(state),
            transport,
        });
        let (tx, rx) = mpsc::channel(options.queue_capacity);

        Ok(Client {
            worker: Mutex::new(Some(Worker::new(Arc::clone(&shared), rx))),
            shared,
            pending: Arc::new(Pending::new()),
            queue: RwLock::new(Some(tx)),
            start: Once::new(),
        })
    }

    /// Submits `packet` for asynchronous delivery.
    ///
    /// `tags` are added to the packet, followed by the client's default tags
    /// and the context tags. Duplicate keys are kept.
    pub fn capture(&self, packet: impl Into<Option<Packet>>, tags: impl Into<Tags>) -> CaptureHandle {
        let settings = self.shared.read().settings();

        if settings.sample_rate < 1.0 && rand::random::<f32>() >= settings.sample_rate {
            return CaptureHandle::resolved();
        }

        let packet: Option<Packet> = packet.into();
        let Some(mut packet) = packet else {
            return CaptureHandle::failed(None, Error::MissingEvent);
        };

        if settings
            .ignore_errors
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(&packet.message))
        {
            return CaptureHandle::resolved();
        }

        // Registered before any path that can complete the event.
        let in_flight = self.pending.register();

        let tags: Tags = tags.into();
        packet.add_tags(&tags);
        packet.add_tags(&settings.tags);
        packet.add_tags(&settings.context_tags);

        if packet.logger.as_deref().map_or(true, str::is_empty) {
            if let Some(name) = settings.default_logger_name {
                packet.logger = Some(name);
            }
        }

        if let Err(e) = packet.init(&settings.project_id) {
            let handle = CaptureHandle::failed(None, Error::EventId(e));
            drop(in_flight);
            return handle;
        }

        if packet.release.as_deref().map_or(true, str::is_empty) {
            packet.release = settings.release;
        }
        if packet.environment.as_deref().map_or(true, str::is_empty) {
            packet.environment = settings.environment;
        }

        let event_id = packet.event_id.clone();
        let (result_tx, result_rx) = oneshot::channel();
        let outgoing = OutgoingEvent::new(packet, result_tx, in_flight);

        self.start_worker();
        self.enqueue(outgoing, settings.drop_handler.as_ref());

        CaptureHandle {
            event_id,
            rx: Some(result_rx),
        }
    }

    fn start_worker(&self) {
        self.start.call_once(|| {
            let worker = self
                .worker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(worker) = worker {
                if let Err(e) = worker.spawn() {
                    error!("Failed to start delivery worker: {}", e);
                }
            }
        });
    }

    fn enqueue(&self, outgoing: OutgoingEvent, drop_handler: Option<&DropHandler>) {
        // Cloned so the drop handler runs without holding the queue lock.
        let sender = self
            .queue
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            error!(
                "Event {} captured after the client was closed",
                outgoing.event_id()
            );
            outgoing.complete(Err(Error::QueueClosed));
            return;
        };

        match sender.try_send(outgoing) {
            Ok(()) => {}
            Err(TrySendError::Full(outgoing)) => {
                warn!(
                    "Delivery queue is full, dropping event {}",
                    outgoing.event_id()
                );
                if let Some(handler) = drop_handler {
                    handler(&outgoing.packet);
                }
                outgoing.complete(Err(Error::Dropped));
            }
            Err(TrySendError::Closed(outgoing)) => {
                error!(
                    "Delivery worker is not running, event {} not sent",
                    outgoing.event_id()
                );
                outgoing.complete(Err(Error::WorkerGone));
            }
        }
    }

    /// Captures a plain message, with the context user and request attached.
    pub fn capture_message(
        &self,
        message: &str,
        tags: impl Into<Tags>,
        facts: Vec<Fact>,
    ) -> CaptureHandle {
        if self.excludes(message) {
            return CaptureHandle::resolved();
        }
        let mut facts = facts;
        facts.extend(self.context_facts());
        facts.push(Message::new(message).into());
        self.capture(Packet::new(message, facts), tags)
    }

    pub fn capture_message_and_wait(
        &self,
        message: &str,
        tags: impl Into<Tags>,
        facts: Vec<Fact>,
    ) -> (Option<String>, Result<(), Error>) {
        wait_for(self.capture_message(message, tags, facts))
    }

    /// Captures an error with a stack trace of the caller.
    ///
    /// The exception carries the type and text of `err` itself, the only
    /// error in the chain whose concrete type is known here. Every error in
    /// its `source()` chain is listed, outermost first, in extra under
    /// `error.causes`.
    pub fn capture_error<E>(&self, err: &E, tags: impl Into<Tags>, facts: Vec<Fact>) -> CaptureHandle
    where
        E: std::error::Error + ?Sized,
    {
        let message = err.to_string();
        if self.excludes(&message) {
            return CaptureHandle::resolved();
        }

        let mut causes = Vec::new();
        let mut current = err.source();
        while let Some(cause) = current {
            causes.push(cause.to_string());
            current = cause.source();
        }

        let mut extra = Extra::new();
        if !causes.is_empty() {
            extra.insert(
                "error.causes".to_string(),
                Value::Array(causes.into_iter().map(Value::String).collect()),
            );
        }

        let trace = Stacktrace::capture(&CAPTURE_FRAMES, &self.include_paths());
        let mut facts = facts;
        facts.extend(self.context_facts());
        facts.push(Exception::new(std::any::type_name::<E>(), message.clone(), Some(trace)).into());

        self.capture(Packet::with_extra(message, extra, facts), tags)
    }

    pub fn capture_error_and_wait<E>(
        &self,
        err: &E,
        tags: impl Into<Tags>,
        facts: Vec<Fact>,
    ) -> (Option<String>, Result<(), Error>)
    where
        E: std::error::Error + ?Sized,
    {
        wait_for(self.capture_error(err, tags, facts))
    }

    /// Runs `f`, reporting a panic if one occurs.
    ///
    /// Returns `f`'s value, or the panic payload together with the handle of
    /// the captured event. The event's stack trace is taken at the panic
    /// site through a chained panic hook; if a hook installed later replaced
    /// it, the trace ends at the call to `capture_panic`.
    pub fn capture_panic<F, R>(
        &self,
        f: F,
        tags: impl Into<Tags>,
        facts: Vec<Fact>,
    ) -> Result<R, CapturedPanic>
    where
        F: FnOnce() -> R + UnwindSafe,
    {
        capture_panic_on(Some(self), f, tags, facts)
    }

    pub fn capture_panic_and_wait<F, R>(
        &self,
        f: F,
        tags: impl Into<Tags>,
        facts: Vec<Fact>,
    ) -> Result<R, PanicReport>
    where
        F: FnOnce() -> R + UnwindSafe,
    {
        self.capture_panic(f, tags, facts).map_err(PanicReport::from)
    }

    fn report_panic(
        &self,
        message: String,
        trace: Option<Stacktrace>,
        tags: Tags,
        facts: Vec<Fact>,
    ) -> CaptureHandle {
        if self.excludes(&message) {
            return CaptureHandle::resolved();
        }
        // no trace when the hook was replaced after install
        let trace =
            trace.unwrap_or_else(|| Stacktrace::capture(&CAPTURE_FRAMES, &self.include_paths()));
        let mut facts = facts;
        facts.extend(self.context_facts());
        facts.push(Exception::new("Panic", message.clone(), Some(trace)).into());
        self.capture(Packet::new(message, facts), tags)
    }

    fn excludes(&self, text: &str) -> bool {
        self.shared.read().excludes(text)
    }

    fn context_facts(&self) -> Vec<Fact> {
        self.shared.read().context.facts()
    }

    /// Stops accepting events. Events already queued are still delivered.
    ///
    /// Captures made after this resolve to [`Error::QueueClosed`].
    pub fn close(&self) {
        let sender = self
            .queue
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);
        // a worker that never started owns the receiver
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!("Client closed");
    }

    /// Blocks until every event captured so far has been delivered, has
    /// failed, or was dropped.
    pub fn wait(&self) {
        self.pending.wait();
    }

    /// Like [`Client::wait`] with an upper bound. Returns whether all
    /// outstanding events finished in time.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.pending.wait_timeout(timeout)
    }

    /// Number of captured events not yet in a terminal state.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.count()
    }

    /// Points the client at a new DSN. An empty string leaves the current
    /// destination unchanged.
    pub fn set_dsn(&self, dsn: &str) -> Result<(), ConfigError> {
        if dsn.is_empty() {
            return Ok(());
        }
        let dsn = Dsn::parse(dsn)?;
        let mut state = self.shared.write();
        state.url = dsn.url;
        state.auth_header = dsn.auth_header;
        state.project_id = dsn.project_id;
        Ok(())
    }

    pub fn set_release(&self, release: impl Into<String>) {
        self.shared.write().release = Some(release.into());
    }

    pub fn set_environment(&self, environment: impl Into<String>) {
        self.shared.write().environment = Some(environment.into());
    }

    /// Logger used for events that do not name one.
    pub fn set_default_logger_name(&self, name: impl Into<String>) {
        self.shared.write().default_logger_name = Some(name.into());
    }

    pub fn set_sample_rate(&self, rate: f32) -> Result<(), ConfigError> {
        validate_sample_rate(rate)?;
        self.shared.write().sample_rate = rate;
        Ok(())
    }

    /// Skips every event whose message matches one of `patterns`.
    /// An empty list removes the filter.
    pub fn set_ignore_errors<S: AsRef<str>>(&self, patterns: &[S]) -> Result<(), ConfigError> {
        let regex = if patterns.is_empty() {
            None
        } else {
            let joined = patterns
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join("|");
            let regex = Regex::new(&joined).map_err(|source| ConfigError::InvalidIgnorePattern {
                pattern: joined.clone(),
                source,
            })?;
            Some(regex)
        };
        self.shared.write().ignore_errors = regex;
        Ok(())
    }

    /// Module prefixes whose stack frames count as application code.
    pub fn set_include_paths(&self, paths: Vec<String>) {
        self.shared.write().include_paths = paths;
    }

    /// Replaces the default tags added to every event.
    pub fn set_tags(&self, tags: impl Into<Tags>) {
        self.shared.write().tags = tags.into();
    }

    pub fn set_drop_handler(&self, handler: impl Fn(&Packet) + Send + Sync + 'static) {
        self.shared.write().drop_handler = Some(Arc::new(handler));
    }

    pub fn set_user_context(&self, user: User) {
        self.shared.write().context.user = Some(user);
    }

    pub fn set_http_context(&self, http: Http) {
        self.shared.write().context.http = Some(http);
    }

    /// Merges `tags` into the context tags; an existing key takes the new value.
    pub fn set_tags_context(&self, tags: impl Into<Tags>) {
        let mut state = self.shared.write();
        for tag in tags.into().iter() {
            state.context.tags.set(tag.key.clone(), tag.value.clone());
        }
    }

    pub fn clear_context(&self) {
        self.shared.write().context = Context::default();
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.shared.read().url.clone()
    }

    #[must_use]
    pub fn project_id(&self) -> String {
        self.shared.read().project_id.clone()
    }

    #[must_use]
    pub fn release(&self) -> Option<String> {
        self.shared.read().release.clone()
    }

    #[must_use]
    pub fn environment(&self) -> Option<String> {
        self.shared.read().environment.clone()
    }

    #[must_use]
    pub fn sample_rate(&self) -> f32 {
        self.shared.read().sample_rate
    }

    #[must_use]
    pub fn include_paths(&self) -> Vec<String> {
        self.shared.read().include_paths.clone()
    }
}

impl From<CapturedPanic> for PanicReport {
    fn from(captured: CapturedPanic) -> Self {
        let event_id = captured.handle.event_id().map(str::to_string);
        PanicReport {
            payload: captured.payload,
            event_id,
            delivery: captured.handle.wait(),
        }
    }
}

fn wait_for(handle: CaptureHandle) -> (Option<String>, Result<(), Error>) {
    let event_id = handle.event_id().map(str::to_string);
    (event_id, handle.wait())
}

/// Text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Runs `f` and reports its panic through `client`, if there is one.
pub(crate) fn capture_panic_on<F, R>(
    client: Option<&Client>,
    f: F,
    tags: impl Into<Tags>,
    facts: Vec<Fact>,
) -> Result<R, CapturedPanic>
where
    F: FnOnce() -> R + UnwindSafe,
{
    let Some(client) = client else {
        return panic::catch_unwind(f).map_err(|payload| CapturedPanic {
            payload,
            handle: CaptureHandle::resolved(),
        });
    };

    match catch_with_trace(f, client.include_paths()) {
        Ok(value) => Ok(value),
        Err((payload, trace)) => {
            let handle = client.report_panic(panic_message(&*payload), trace, tags.into(), facts);
            Err(CapturedPanic { payload, handle })
        }
    }
}
