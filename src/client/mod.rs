//! MQTT client session.
//!
//! A [`Client`] gives a single caller timeline event-driven access to one
//! MQTT session while the session's I/O runs on a background engine thread.
//! Every operation exists in two forms: the asynchronous variant returns an
//! [`OperationHandle`] immediately; the synchronous variant is a blocking
//! join on the same handle, so `connect` has already confirmed the session
//! (and `connected()` is true) by the time it returns.
//!
//! Registered handlers run only on the caller's own timeline, while it is
//! blocked in [`Client::join`] (or finishing a top-level [`Client::end`]) —
//! never concurrently with the caller's code or with each other. The run is
//! over once the terminal `end` notification has fired, so the owning
//! context finishes its unit of work by calling `join`.
//!
//! ```no_run
//! use photon::{Client, ClientOptions, Event, EventKind, PublishOptions, SubscribeOptions};
//!
//! let client = Client::new(ClientOptions::default())?;
//! client.on(EventKind::Connect, |client, _| {
//!     client.subscribe("greeting", SubscribeOptions::default()).unwrap();
//!     client
//!         .publish("greeting", "Hello MQTT!", PublishOptions::default())
//!         .unwrap();
//! });
//! client.on(EventKind::Message, |client, event| {
//!     if let Event::Message(message) = event {
//!         println!("{}: {:?}", message.topic, message.payload);
//!         client.end().unwrap();
//!     }
//! });
//! client.connect("mqtt://127.0.0.1:1883")?;
//! client.join();
//! # Ok::<(), photon::SessionError>(())
//! ```

mod bridge;
mod dispatcher;
mod engine;
mod lifecycle;

use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{Result, SessionError};
use crate::metrics::{MetricsSnapshot, SessionMetrics};
use crate::options::{
    ClientOptions, ConnectOptions, ConnectParams, IntoTopics, Message, PublishOptions, QoS,
    SubscribeOptions,
};
use crate::transport::{TcpTransport, Transport};
use engine::{Command, Engine};

pub use bridge::{OpKind, OperationHandle};
pub use dispatcher::{Event, EventKind};
pub use lifecycle::SessionStatus;

use dispatcher::Dispatcher;
use lifecycle::Lifecycle;

/// Handle to one MQTT client session. Cheap to clone; all clones address
/// the same session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    commands: mpsc::UnboundedSender<Command>,
    lifecycle: Arc<Lifecycle>,
    dispatcher: Dispatcher,
    metrics: Arc<SessionMetrics>,
    options: ClientOptions,
    last_connect: Mutex<Option<ConnectParams>>,
    engine: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Client {
    /// Create a session backed by the TCP transport.
    pub fn new(options: ClientOptions) -> Result<Self> {
        Self::with_transport(TcpTransport::new(), options)
    }

    /// Create a session over a caller-supplied transport.
    pub fn with_transport(
        transport: impl Transport + 'static,
        options: ClientOptions,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| {
                SessionError::Transport(format!("failed to build session runtime: {err}"))
            })?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let lifecycle = Arc::new(Lifecycle::new());
        let metrics = Arc::new(SessionMetrics::new());
        let (dispatcher, sink) = Dispatcher::new();
        let engine = Engine::new(
            command_rx,
            Box::new(transport),
            lifecycle.clone(),
            sink,
            metrics.clone(),
        );
        let thread = thread::Builder::new()
            .name("photon-session".into())
            .spawn(move || runtime.block_on(engine.run()))
            .map_err(|err| {
                SessionError::Transport(format!("failed to start session thread: {err}"))
            })?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                commands: command_tx,
                lifecycle,
                dispatcher,
                metrics,
                options,
                last_connect: Mutex::new(None),
                engine: Mutex::new(Some(thread)),
            }),
        })
    }

    /// Register a handler for an event kind. Handlers for the same kind
    /// fire in registration order; they receive the client they were
    /// registered on and may issue any operation, including `end`.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: FnMut(&Client, &Event) + Send + 'static,
    {
        self.inner.dispatcher.register(kind, Box::new(handler));
    }

    /// Whether the session has a confirmed, not-yet-torn-down connection.
    pub fn connected(&self) -> bool {
        self.inner.lifecycle.is_connected()
    }

    /// Counter values for this session.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Connect to a broker and block until the session is usable; code
    /// after a successful `connect` can rely on `connected()`.
    pub fn connect(&self, url: impl Into<String>) -> Result<()> {
        self.connect_with(url, ConnectOptions::default())
    }

    pub fn connect_with(&self, url: impl Into<String>, options: ConnectOptions) -> Result<()> {
        self.connect_request(url.into(), options, false).wait()
    }

    pub fn connect_async(&self, url: impl Into<String>) -> OperationHandle {
        self.connect_request(url.into(), ConnectOptions::default(), false)
    }

    pub fn connect_with_async(
        &self,
        url: impl Into<String>,
        options: ConnectOptions,
    ) -> OperationHandle {
        self.connect_request(url.into(), options, false)
    }

    /// Replay the parameters of the last connect. A no-op when the session
    /// is already connecting or connected; fires `reconnect` instead of
    /// `connect` on success.
    pub fn reconnect(&self) -> Result<()> {
        self.reconnect_request().wait()
    }

    pub fn reconnect_async(&self) -> OperationHandle {
        self.reconnect_request()
    }

    /// Subscribe to one or more topic filters; every filter in the call
    /// shares the same options.
    pub fn subscribe(&self, topics: impl IntoTopics, options: SubscribeOptions) -> Result<()> {
        self.subscribe_async(topics, options).wait()
    }

    pub fn subscribe_async(
        &self,
        topics: impl IntoTopics,
        options: SubscribeOptions,
    ) -> OperationHandle {
        let filters: Vec<(String, QoS)> = topics
            .into_topics()
            .into_iter()
            .map(|topic| (topic, options.qos))
            .collect();
        self.submit(OpKind::Subscribe, |reply| Command::Subscribe { filters, reply })
    }

    pub fn unsubscribe(&self, topics: impl IntoTopics) -> Result<()> {
        self.unsubscribe_async(topics).wait()
    }

    pub fn unsubscribe_async(&self, topics: impl IntoTopics) -> OperationHandle {
        let topics = topics.into_topics();
        self.submit(OpKind::Unsubscribe, |reply| Command::Unsubscribe { topics, reply })
    }

    /// Publish a payload to a topic. QoS 0 resolves once the transport
    /// accepts the send; QoS 1/2 resolve on delivery confirmation.
    pub fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Result<()> {
        self.publish_async(topic, payload, options).wait()
    }

    pub fn publish_async(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> OperationHandle {
        let message = Message {
            topic: topic.into(),
            payload: payload.into(),
            qos: options.qos,
            retain: options.retain,
        };
        self.submit(OpKind::Publish, |reply| Command::Publish { message, reply })
    }

    /// Gracefully disconnect and block until teardown completes. From top
    /// level the `end` handler has already fired when this returns; from
    /// inside a handler the terminal dispatch happens right after the
    /// current handler returns. Ending an already-ended session is a no-op
    /// success.
    pub fn end(&self) -> Result<()> {
        let result = self.end_async().wait();
        if result.is_ok() && !self.inner.dispatcher.is_dispatching() {
            self.inner.dispatcher.drain_terminal(self);
        }
        result
    }

    /// Request teardown without blocking the timeline. The handle resolves
    /// once the session is down; the `end` handler fires on the next pump.
    pub fn end_async(&self) -> OperationHandle {
        self.submit(OpKind::End, |reply| Command::End { reply })
    }

    /// Block the owning context until the terminal `end` notification has
    /// been dispatched, driving all registered handlers in arrival order.
    /// Returns immediately when the session is down and nothing is queued.
    /// Call it once the connect outcome has been observed (the sync
    /// `connect` already guarantees that).
    pub fn join(&self) {
        self.inner.dispatcher.pump(self);
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.inner.lifecycle.status()
    }

    fn connect_request(
        &self,
        url: String,
        options: ConnectOptions,
        reconnect: bool,
    ) -> OperationHandle {
        let params = ConnectParams::resolve(url, &self.inner.options, options);
        *self.inner.last_connect.lock() = Some(params.clone());
        self.inner.dispatcher.reset_terminating();
        self.submit(OpKind::Connect, |reply| Command::Connect {
            params,
            reconnect,
            reply,
        })
    }

    fn reconnect_request(&self) -> OperationHandle {
        if self.status() != SessionStatus::Disconnected {
            // Already live; nothing to replay.
            return OperationHandle::resolved(OpKind::Connect, Ok(()));
        }
        let Some(params) = self.inner.last_connect.lock().clone() else {
            return OperationHandle::resolved(
                OpKind::Connect,
                Err(SessionError::ConnectFailure(
                    "no previous connect parameters".into(),
                )),
            );
        };
        self.inner.dispatcher.reset_terminating();
        self.submit(OpKind::Connect, |reply| Command::Connect {
            params,
            reconnect: true,
            reply,
        })
    }

    fn submit(
        &self,
        kind: OpKind,
        build: impl FnOnce(bridge::OpReply) -> Command,
    ) -> OperationHandle {
        let (handle, reply) = OperationHandle::new(kind);
        // A failed send drops the reply, which resolves the handle with an
        // engine-stopped error.
        let _ = self.inner.commands.send(build(reply));
        handle
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.engine.lock().take() {
            let _ = thread.join();
        }
    }
}
