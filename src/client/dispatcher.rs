//! Event dispatch for the session timeline.
//!
//! One ordered queue per client. The engine is the only producer; the
//! caller's thread is the only consumer, so handlers never run concurrently
//! with each other or with the caller's own code. Handlers for the same
//! kind run in registration order. A handler may register handlers or issue
//! operations mid-dispatch; the new work lands behind the current
//! notification, never inside it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::lifecycle::SessionStatus;
use super::Client;
use crate::error::SessionError;
use crate::options::Message;

/// Kinds of session notifications handlers can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Reconnect,
    Message,
    Error,
    End,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Reconnect => "reconnect",
            Self::Message => "message",
            Self::Error => "error",
            Self::End => "end",
        }
    }
}

/// A notification delivered on the session timeline.
#[derive(Debug, Clone)]
pub enum Event {
    /// The session completed a connect handshake.
    Connect,
    /// The session completed a `reconnect` handshake.
    Reconnect,
    /// A message arrived on a subscribed topic.
    Message(Message),
    /// The link failed without the caller asking for teardown.
    Error(SessionError),
    /// The session finished tearing down. Always the last notification.
    End,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connect => EventKind::Connect,
            Self::Reconnect => EventKind::Reconnect,
            Self::Message(_) => EventKind::Message,
            Self::Error(_) => EventKind::Error,
            Self::End => EventKind::End,
        }
    }
}

type Handler = Box<dyn FnMut(&Client, &Event) + Send>;

/// Engine-side handle feeding the session's notification queue.
pub(crate) struct EventSink {
    queue: mpsc::UnboundedSender<Event>,
    terminating: Arc<AtomicBool>,
}

impl EventSink {
    pub fn push(&self, event: Event) {
        trace!(kind = event.kind().name(), "queueing notification");
        let _ = self.queue.send(event);
    }

    /// Queue the terminal end notification of a requested teardown.
    /// Notifications still queued ahead of it will be dropped by the pump;
    /// the end itself is always delivered.
    pub fn push_terminal_end(&self) {
        self.terminating.store(true, Ordering::Release);
        let _ = self.queue.send(Event::End);
    }
}

/// Caller-side half: handler registry plus the queue consumer.
pub(crate) struct Dispatcher {
    queue: Mutex<mpsc::UnboundedReceiver<Event>>,
    handlers: Mutex<HashMap<EventKind, Vec<Arc<Mutex<Handler>>>>>,
    dispatching: AtomicBool,
    terminating: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new() -> (Self, EventSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let terminating = Arc::new(AtomicBool::new(false));
        let sink = EventSink {
            queue: tx,
            terminating: terminating.clone(),
        };
        let dispatcher = Self {
            queue: Mutex::new(rx),
            handlers: Mutex::new(HashMap::new()),
            dispatching: AtomicBool::new(false),
            terminating,
        };
        (dispatcher, sink)
    }

    pub fn register(&self, kind: EventKind, handler: Handler) {
        debug!(event = kind.name(), "event handler registered");
        self.handlers
            .lock()
            .entry(kind)
            .or_default()
            .push(Arc::new(Mutex::new(handler)));
    }

    /// Whether the current thread is inside a handler invocation. `end()`
    /// uses this to defer the terminal dispatch to the enclosing pump
    /// instead of nesting it.
    pub fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::Relaxed)
    }

    /// A new connect attempt begins a fresh notification stream.
    pub fn reset_terminating(&self) {
        self.terminating.store(false, Ordering::Release);
    }

    /// Drive the session timeline until the terminal end notification has
    /// been dispatched, or until nothing further can arrive.
    pub fn pump(&self, client: &Client) {
        loop {
            let Some(event) = self.next_event(client) else {
                break;
            };
            let is_end = matches!(event, Event::End);
            if self.terminating.load(Ordering::Acquire) && !is_end {
                trace!(
                    kind = event.kind().name(),
                    "dropping notification queued behind end"
                );
            } else {
                self.dispatch(client, &event);
            }
            if is_end {
                break;
            }
        }
    }

    /// Deliver the already-queued terminal end after a top-level `end()`
    /// resolved, dropping anything queued ahead of it.
    pub fn drain_terminal(&self, client: &Client) {
        loop {
            let polled = { self.queue.lock().try_recv().ok() };
            let Some(event) = polled else { break };
            if matches!(event, Event::End) {
                self.dispatch(client, &event);
                break;
            }
            trace!(
                kind = event.kind().name(),
                "dropping notification queued behind end"
            );
        }
    }

    fn next_event(&self, client: &Client) -> Option<Event> {
        let mut queue = self.queue.lock();
        match queue.try_recv() {
            Ok(event) => Some(event),
            Err(mpsc::error::TryRecvError::Empty) => {
                if client.status() == SessionStatus::Disconnected {
                    // Nothing in flight and nothing can arrive; look once
                    // more for a terminal notification racing the state
                    // change, then stop.
                    queue.try_recv().ok()
                } else {
                    queue.blocking_recv()
                }
            }
            Err(mpsc::error::TryRecvError::Disconnected) => None,
        }
    }

    fn dispatch(&self, client: &Client, event: &Event) {
        let handlers = {
            self.handlers
                .lock()
                .get(&event.kind())
                .cloned()
                .unwrap_or_default()
        };
        if handlers.is_empty() {
            trace!(kind = event.kind().name(), "no handler registered");
            return;
        }
        trace!(kind = event.kind().name(), "firing event handlers");
        self.dispatching.store(true, Ordering::Relaxed);
        for handler in handlers {
            let mut callback = handler.lock();
            (*callback)(client, event);
        }
        self.dispatching.store(false, Ordering::Relaxed);
    }
}
