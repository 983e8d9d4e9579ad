//! Background session engine.
//!
//! One engine task per client, running on a dedicated current-thread
//! runtime. It owns the transport link, the pending-operation table, and
//! every state transition, and serializes transport completions into the
//! session's notification queue. Caller commands and transport events are
//! the only inputs; the engine itself never blocks on the dispatcher, which
//! is what keeps `end()` safe to call from inside any handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use super::bridge::{OpKind, OpReply, PendingOps};
use super::dispatcher::{Event, EventSink};
use super::lifecycle::{Lifecycle, SessionStatus};
use crate::error::SessionError;
use crate::metrics::SessionMetrics;
use crate::options::{ConnectParams, Message, QoS, DEFAULT_CONNECT_TIMEOUT};
use crate::transport::{OpToken, Transport, TransportCommand, TransportEvent};

/// Requests from the caller surface to the engine.
pub(crate) enum Command {
    Connect {
        params: ConnectParams,
        reconnect: bool,
        reply: OpReply,
    },
    Subscribe {
        filters: Vec<(String, QoS)>,
        reply: OpReply,
    },
    Unsubscribe {
        topics: Vec<String>,
        reply: OpReply,
    },
    Publish {
        message: Message,
        reply: OpReply,
    },
    End {
        reply: OpReply,
    },
    Shutdown,
}

/// An open (or opening) transport link.
struct Link {
    commands: mpsc::UnboundedSender<TransportCommand>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    task: JoinHandle<()>,
}

/// A connect call waiting for the transport's handshake confirmation.
struct ConnectAttempt {
    reply: OpReply,
    reconnect: bool,
    deadline: Instant,
}

impl ConnectAttempt {
    fn method(&self) -> &'static str {
        if self.reconnect {
            "reconnect"
        } else {
            "connect"
        }
    }
}

pub(crate) struct Engine {
    commands: mpsc::UnboundedReceiver<Command>,
    transport: Box<dyn Transport>,
    lifecycle: Arc<Lifecycle>,
    events: EventSink,
    metrics: Arc<SessionMetrics>,
    pending: PendingOps,
    link: Option<Link>,
    connect: Option<ConnectAttempt>,
    end_waiters: Vec<OpReply>,
    end_deadline: Option<Instant>,
    /// Acknowledgement budget for the current session; taken from the
    /// connect parameters.
    timeout: Duration,
}

impl Engine {
    pub fn new(
        commands: mpsc::UnboundedReceiver<Command>,
        transport: Box<dyn Transport>,
        lifecycle: Arc<Lifecycle>,
        events: EventSink,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            commands,
            transport,
            lifecycle,
            events,
            metrics,
            pending: PendingOps::new(),
            link: None,
            connect: None,
            end_waiters: Vec::new(),
            end_deadline: None,
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub async fn run(mut self) {
        loop {
            let deadline = self.earliest_deadline();
            let link_open = self.link.is_some();
            tokio::select! {
                biased;
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => {
                            self.shutdown().await;
                            return;
                        }
                        Some(command) => self.handle_command(command),
                    }
                }
                event = recv_link(&mut self.link), if link_open => {
                    match event {
                        Some(event) => self.handle_transport_event(event),
                        None => self.handle_link_closed(),
                    }
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.expire_deadlines();
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                params,
                reconnect,
                reply,
            } => self.start_connect(params, reconnect, reply),
            Command::Subscribe { filters, reply } => {
                self.start_operation(OpKind::Subscribe, reply, 0, |token| {
                    TransportCommand::Subscribe { token, filters }
                });
            }
            Command::Unsubscribe { topics, reply } => {
                self.start_operation(OpKind::Unsubscribe, reply, 0, |token| {
                    TransportCommand::Unsubscribe { token, topics }
                });
            }
            Command::Publish { message, reply } => {
                let bytes = message.payload.len();
                self.start_operation(OpKind::Publish, reply, bytes, |token| {
                    TransportCommand::Publish { token, message }
                });
            }
            Command::End { reply } => self.start_end(reply),
            Command::Shutdown => {}
        }
    }

    fn start_connect(&mut self, params: ConnectParams, reconnect: bool, reply: OpReply) {
        let method: &'static str = if reconnect { "reconnect" } else { "connect" };
        self.metrics.record_call(method);
        if let Err(err) = self.lifecycle.begin_connect() {
            self.metrics.record_error(method, &err);
            let _ = reply.send(Err(err));
            return;
        }
        debug!(
            client_id = %params.client_id,
            servers = ?params.servers,
            tags = ?params.tags,
            "opening broker link"
        );
        self.timeout = params.connect_timeout;
        let deadline = Instant::now() + params.connect_timeout;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.transport.open(params, command_rx, event_tx));
        self.link = Some(Link {
            commands: command_tx,
            events: event_rx,
            task,
        });
        self.connect = Some(ConnectAttempt {
            reply,
            reconnect,
            deadline,
        });
    }

    fn start_operation(
        &mut self,
        kind: OpKind,
        reply: OpReply,
        bytes: usize,
        build: impl FnOnce(OpToken) -> TransportCommand,
    ) {
        self.metrics.record_call(kind.name());
        if !self.lifecycle.is_connected() {
            self.metrics.record_error(kind.name(), &SessionError::NotConnected);
            let _ = reply.send(Err(SessionError::NotConnected));
            return;
        }
        let Some(link) = &self.link else {
            self.metrics.record_error(kind.name(), &SessionError::NotConnected);
            let _ = reply.send(Err(SessionError::NotConnected));
            return;
        };
        let deadline = Instant::now() + self.timeout;
        let token = self.pending.register(kind, reply, deadline, bytes);
        if link.commands.send(build(token)).is_err() {
            // The link task died under us; the event side will surface the
            // teardown, but this operation fails now.
            self.complete(token, Err(SessionError::Transport("broker link lost".into())));
        }
    }

    fn start_end(&mut self, reply: OpReply) {
        self.metrics.record_call("end");
        match self.lifecycle.status() {
            // Ending a session that is already down is a no-op success and
            // fires no event.
            SessionStatus::Disconnected => {
                let _ = reply.send(Ok(()));
            }
            // A teardown is already in flight; this caller observes its
            // completion too.
            SessionStatus::Disconnecting => {
                self.end_waiters.push(reply);
            }
            SessionStatus::Connecting | SessionStatus::Connected => {
                if let Some(attempt) = self.connect.take() {
                    let err =
                        SessionError::ConnectFailure("session ended during connect".into());
                    self.metrics.record_error(attempt.method(), &err);
                    let _ = attempt.reply.send(Err(err));
                }
                self.lifecycle.begin_disconnect();
                self.end_deadline = Some(Instant::now() + self.timeout);
                self.end_waiters.push(reply);
                let delivered = match &self.link {
                    Some(link) => link.commands.send(TransportCommand::Disconnect).is_ok(),
                    None => false,
                };
                if !delivered {
                    // No live link to confirm anything; finish locally.
                    self.finish_teardown();
                }
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                if let Some(attempt) = self.connect.take() {
                    self.lifecycle.complete_connect();
                    self.events.push(if attempt.reconnect {
                        Event::Reconnect
                    } else {
                        Event::Connect
                    });
                    let _ = attempt.reply.send(Ok(()));
                }
            }
            TransportEvent::Completed { token, result } => self.complete(token, result),
            TransportEvent::Message(message) => {
                self.metrics.record_received(message.payload.len());
                self.events.push(Event::Message(message));
            }
            TransportEvent::Disconnected => self.finish_teardown(),
            TransportEvent::Error(err) => self.handle_link_error(err),
        }
    }

    /// The link's event channel closed without a Disconnected/Error event.
    fn handle_link_closed(&mut self) {
        if self.end_waiters.is_empty() {
            self.handle_link_error(SessionError::Transport(
                "transport stopped unexpectedly".into(),
            ));
        } else {
            self.finish_teardown();
        }
    }

    fn handle_link_error(&mut self, err: SessionError) {
        if let Some(attempt) = self.connect.take() {
            // The handshake never completed; the failure belongs to the
            // connect caller and no session existed to tear down.
            self.lifecycle.fail_connect();
            self.metrics.record_error(attempt.method(), &err);
            let _ = attempt.reply.send(Err(err));
            self.drop_link();
            return;
        }
        warn!(error = %err, "broker link failed");
        self.metrics.record_error("link", &err);
        self.fail_inflight(&err);
        if self.end_waiters.is_empty() {
            if self.lifecycle.force_disconnect() {
                self.events.push(Event::Error(err));
                self.events.push(Event::End);
            }
            self.drop_link();
        } else {
            // The link died mid-teardown; the session still ends cleanly.
            self.finish_teardown();
        }
    }

    /// Complete a requested teardown: terminal notification first, then the
    /// blocked `end` callers, so a top-level `end()` finds the end event
    /// already queued when it resumes.
    fn finish_teardown(&mut self) {
        self.end_deadline = None;
        self.fail_inflight(&SessionError::Transport("connection closed".into()));
        self.lifecycle.complete_disconnect();
        self.events.push_terminal_end();
        for reply in self.end_waiters.drain(..) {
            let _ = reply.send(Ok(()));
        }
        self.drop_link();
        debug!("broker link closed");
    }

    fn fail_inflight(&mut self, err: &SessionError) {
        for op in self.pending.drain() {
            self.metrics.record_error(op.kind.name(), err);
            let _ = op.reply.send(Err(err.clone()));
        }
    }

    fn complete(&mut self, token: OpToken, result: Result<(), SessionError>) {
        let Some(op) = self.pending.take(token) else {
            return;
        };
        match &result {
            Ok(()) => {
                if op.kind == OpKind::Publish {
                    self.metrics.record_sent(op.bytes);
                }
            }
            Err(err) => self.metrics.record_error(op.kind.name(), err),
        }
        let _ = op.reply.send(result);
    }

    fn expire_deadlines(&mut self) {
        let now = Instant::now();
        if self.connect.as_ref().is_some_and(|a| a.deadline <= now) {
            if let Some(attempt) = self.connect.take() {
                let err = SessionError::ConnectFailure(format!(
                    "connect timed out after {:?}",
                    self.timeout
                ));
                self.lifecycle.fail_connect();
                self.metrics.record_error(attempt.method(), &err);
                let _ = attempt.reply.send(Err(err));
                self.drop_link();
            }
        }
        for op in self.pending.take_overdue(now) {
            self.metrics
                .record_error(op.kind.name(), &SessionError::OperationTimeout);
            let _ = op.reply.send(Err(SessionError::OperationTimeout));
        }
        if self.end_deadline.is_some_and(|deadline| deadline <= now) {
            warn!("teardown unacknowledged; closing session locally");
            self.finish_teardown();
        }
    }

    fn earliest_deadline(&self) -> Option<Instant> {
        let candidates = [
            self.connect.as_ref().map(|attempt| attempt.deadline),
            self.pending.earliest_deadline(),
            self.end_deadline,
        ];
        candidates.into_iter().flatten().min()
    }

    fn drop_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.task.abort();
        }
    }

    /// Last Client handle is gone: best-effort disconnect, bounded wait for
    /// the link task, then stop.
    async fn shutdown(&mut self) {
        debug!("session engine shutting down");
        self.fail_inflight(&SessionError::Transport("session engine stopped".into()));
        if let Some(link) = self.link.take() {
            let _ = link.commands.send(TransportCommand::Disconnect);
            let _ = tokio::time::timeout(Duration::from_secs(1), link.task).await;
        }
    }
}

async fn recv_link(link: &mut Option<Link>) -> Option<TransportEvent> {
    match link {
        Some(link) => link.events.recv().await,
        None => std::future::pending().await,
    }
}
