//! Transport adapter seam.
//!
//! The session engine never speaks the wire protocol itself; it drives a
//! [`Transport`] implementation through a command channel and consumes the
//! link's completions and inbound traffic from an event channel. The
//! production adapter wraps rumqttc; the loopback adapter routes publishes
//! back to the session's own subscriptions for tests and offline use.

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::{Result, SessionError};
use crate::options::{ConnectParams, Message, QoS};

mod loopback;
mod rumqtt;

pub use loopback::LoopbackTransport;
pub use rumqtt::TcpTransport;

/// Correlates a command with its completion event.
pub type OpToken = u64;

/// Commands issued by the session engine to an open link.
#[derive(Debug)]
pub enum TransportCommand {
    Subscribe {
        token: OpToken,
        filters: Vec<(String, QoS)>,
    },
    Unsubscribe {
        token: OpToken,
        topics: Vec<String>,
    },
    Publish {
        token: OpToken,
        message: Message,
    },
    Disconnect,
}

/// Notifications flowing from a link back to the session engine.
#[derive(Debug)]
pub enum TransportEvent {
    /// The broker accepted the connect handshake.
    Connected,
    /// An in-flight command finished.
    Completed { token: OpToken, result: Result<()> },
    /// An application message arrived on a subscribed topic.
    Message(Message),
    /// A requested graceful teardown completed.
    Disconnected,
    /// The link failed; no further events follow.
    Error(SessionError),
}

pub type CommandReceiver = mpsc::UnboundedReceiver<TransportCommand>;
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Factory for broker links.
///
/// `open` returns the task future that drives one connection: it emits
/// `Connected` exactly once on handshake success, answers every tokened
/// command with a `Completed` event, and finishes with exactly one of
/// `Disconnected` (after a `Disconnect` command) or `Error`. Dropping the
/// command channel tears the link down silently.
pub trait Transport: Send {
    fn open(
        &mut self,
        params: ConnectParams,
        commands: CommandReceiver,
        events: EventSender,
    ) -> BoxFuture<'static, ()>;
}

/// Check whether an MQTT topic matches a subscription filter.
///
/// `+` matches exactly one level, `#` matches any number of trailing
/// levels (including zero).
pub fn topic_matches(topic: &str, filter: &str) -> bool {
    if filter == "#" {
        return true;
    }
    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(level), Some(part)) if level == part => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
