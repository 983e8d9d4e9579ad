//! In-process loopback transport.
//!
//! Routes every publish back to the session's own matching subscriptions
//! without touching the network, which makes session behavior fully
//! deterministic. Used by the test suite and handy for offline development.

use futures::future::BoxFuture;
use tracing::debug;

use super::{
    topic_matches, CommandReceiver, EventSender, Transport, TransportCommand, TransportEvent,
};
use crate::error::SessionError;
use crate::options::{ConnectParams, Message, QoS};

/// Broker stand-in that echoes publishes to the session's subscriptions.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    reject: Option<String>,
    fault_topic: Option<String>,
    unresponsive: bool,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every connect attempt with the given reason.
    pub fn refuse(reason: impl Into<String>) -> Self {
        Self {
            reject: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Accept the link but never complete the handshake.
    pub fn unresponsive() -> Self {
        Self {
            unresponsive: true,
            ..Self::default()
        }
    }

    /// Treat publishes to `topic` as a link fault: the link reports an
    /// error and drops, as a broker-side connection loss would.
    pub fn with_fault_topic(mut self, topic: impl Into<String>) -> Self {
        self.fault_topic = Some(topic.into());
        self
    }
}

impl Transport for LoopbackTransport {
    fn open(
        &mut self,
        params: ConnectParams,
        mut commands: CommandReceiver,
        events: EventSender,
    ) -> BoxFuture<'static, ()> {
        let reject = self.reject.clone();
        let fault_topic = self.fault_topic.clone();
        let unresponsive = self.unresponsive;
        Box::pin(async move {
            debug!(client_id = %params.client_id, "opening loopback link");
            if let Some(reason) = reject {
                let _ = events.send(TransportEvent::Error(SessionError::ConnectFailure(reason)));
                return;
            }
            if unresponsive {
                // Hold the link open without ever acknowledging the handshake.
                while commands.recv().await.is_some() {}
                return;
            }
            if events.send(TransportEvent::Connected).is_err() {
                return;
            }

            let mut subscriptions: Vec<(String, QoS)> = Vec::new();
            while let Some(command) = commands.recv().await {
                match command {
                    TransportCommand::Subscribe { token, filters } => {
                        subscriptions.extend(filters);
                        let _ = events.send(TransportEvent::Completed {
                            token,
                            result: Ok(()),
                        });
                    }
                    TransportCommand::Unsubscribe { token, topics } => {
                        subscriptions.retain(|(filter, _)| !topics.iter().any(|t| t == filter));
                        let _ = events.send(TransportEvent::Completed {
                            token,
                            result: Ok(()),
                        });
                    }
                    TransportCommand::Publish { token, message } => {
                        if fault_topic.as_deref() == Some(message.topic.as_str()) {
                            let _ = events.send(TransportEvent::Error(SessionError::Transport(
                                "loopback link fault".into(),
                            )));
                            return;
                        }
                        let _ = events.send(TransportEvent::Completed {
                            token,
                            result: Ok(()),
                        });
                        let matched = subscriptions
                            .iter()
                            .find(|(filter, _)| topic_matches(&message.topic, filter));
                        if let Some((_, qos)) = matched {
                            let delivered = Message {
                                qos: message.qos.min(*qos),
                                ..message
                            };
                            let _ = events.send(TransportEvent::Message(delivered));
                        }
                    }
                    TransportCommand::Disconnect => {
                        let _ = events.send(TransportEvent::Disconnected);
                        return;
                    }
                }
            }
        })
    }
}
