//! rumqttc-backed transport adapter.
//!
//! Speaks MQTT 3.1.1 over plain TCP. The adapter owns the rumqttc event
//! loop for one link and translates between the engine's command/event
//! model and rumqttc's request queue plus acknowledgement packets.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use futures::future::BoxFuture;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, LastWill,
    MqttOptions, Outgoing, SubscribeReasonCode,
};
use tracing::{debug, warn};
use url::Url;

use super::{CommandReceiver, EventSender, OpToken, Transport, TransportCommand, TransportEvent};
use crate::error::SessionError;
use crate::options::{ConnectParams, Message, QoS};

/// rumqttc rejects keep-alive intervals below five seconds.
const MIN_KEEPALIVE: Duration = Duration::from_secs(5);
/// Capacity of the rumqttc request queue.
const REQUEST_CAP: usize = 64;

/// Production transport speaking MQTT over plain TCP via rumqttc.
#[derive(Debug, Default)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for TcpTransport {
    fn open(
        &mut self,
        params: ConnectParams,
        commands: CommandReceiver,
        events: EventSender,
    ) -> BoxFuture<'static, ()> {
        Box::pin(run_link(params, commands, events))
    }
}

async fn run_link(params: ConnectParams, mut commands: CommandReceiver, events: EventSender) {
    // Try each configured server until one completes the handshake.
    let mut last_error = SessionError::ConnectFailure("no servers configured".into());
    for server in &params.servers {
        match establish(server, &params, &events).await {
            Ok(Some((client, eventloop))) => {
                serve(client, eventloop, &mut commands, &events).await;
                return;
            }
            // Engine is gone; nothing left to report to.
            Ok(None) => return,
            Err(err) => {
                warn!(server = %server, error = %err, "connect attempt failed");
                last_error = err;
            }
        }
    }
    let _ = events.send(TransportEvent::Error(last_error));
}

/// Drive the handshake against one server until CONNACK.
async fn establish(
    server: &str,
    params: &ConnectParams,
    events: &EventSender,
) -> Result<Option<(AsyncClient, EventLoop)>, SessionError> {
    let options = broker_options(server, params)?;
    let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAP);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    return Err(SessionError::ConnectFailure(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )));
                }
                debug!(server = %server, "broker link established");
                if events.send(TransportEvent::Connected).is_err() {
                    return Ok(None);
                }
                return Ok(Some((client, eventloop)));
            }
            Ok(_) => {}
            Err(err) => return Err(classify(err)),
        }
    }
}

/// Serve an established link until teardown.
async fn serve(
    client: AsyncClient,
    mut eventloop: EventLoop,
    commands: &mut CommandReceiver,
    events: &EventSender,
) {
    let mut acks = AckLedger::default();
    let mut disconnecting = false;
    loop {
        tokio::select! {
            command = commands.recv(), if !disconnecting => {
                match command {
                    None => {
                        // Engine dropped the link; tear down silently.
                        let _ = client.try_disconnect();
                        return;
                    }
                    Some(command) => {
                        if let ControlFlow::Stop = handle_command(
                            &client, command, &mut acks, &mut disconnecting, events,
                        ) {
                            return;
                        }
                    }
                }
            }
            polled = eventloop.poll() => {
                match polled {
                    Ok(event) => {
                        if let ControlFlow::Stop = handle_packet(
                            event, &mut acks, disconnecting, events,
                        ) {
                            return;
                        }
                    }
                    Err(err) => {
                        if disconnecting {
                            // The broker closing the stream is the expected
                            // epilogue of a graceful disconnect.
                            let _ = events.send(TransportEvent::Disconnected);
                        } else {
                            let _ = events.send(TransportEvent::Error(classify(err)));
                        }
                        return;
                    }
                }
            }
        }
    }
}

enum ControlFlow {
    Continue,
    Stop,
}

/// Issue one engine command through rumqttc's non-blocking request API.
/// Awaiting the request queue here would starve `eventloop.poll()`, which
/// is the only thing draining that queue.
fn handle_command(
    client: &AsyncClient,
    command: TransportCommand,
    acks: &mut AckLedger,
    disconnecting: &mut bool,
    events: &EventSender,
) -> ControlFlow {
    match command {
        TransportCommand::Subscribe { token, filters } => {
            let count = filters.len();
            for (topic, qos) in filters {
                if let Err(err) = client.try_subscribe(topic, wire_qos(qos)) {
                    let _ = events.send(TransportEvent::Completed {
                        token,
                        result: Err(SessionError::Transport(err.to_string())),
                    });
                    return ControlFlow::Continue;
                }
            }
            acks.expect_subscribe(token, count);
        }
        TransportCommand::Unsubscribe { token, topics } => {
            let count = topics.len();
            for topic in topics {
                if let Err(err) = client.try_unsubscribe(topic) {
                    let _ = events.send(TransportEvent::Completed {
                        token,
                        result: Err(SessionError::Transport(err.to_string())),
                    });
                    return ControlFlow::Continue;
                }
            }
            acks.expect_unsubscribe(token, count);
        }
        TransportCommand::Publish { token, message } => {
            let qos = message.qos;
            let outcome = client.try_publish(
                message.topic,
                wire_qos(qos),
                message.retain,
                message.payload.to_vec(),
            );
            match outcome {
                // Fire-and-forget resolves as soon as the request queue
                // accepts the send; acknowledged QoS waits for the broker.
                Ok(()) if qos == QoS::AtMostOnce => {
                    let _ = events.send(TransportEvent::Completed {
                        token,
                        result: Ok(()),
                    });
                }
                Ok(()) => acks.expect_publish(token),
                Err(err) => {
                    let _ = events.send(TransportEvent::Completed {
                        token,
                        result: Err(SessionError::Transport(err.to_string())),
                    });
                }
            }
        }
        TransportCommand::Disconnect => {
            *disconnecting = true;
            if client.try_disconnect().is_err() {
                // Request queue already gone; the link is down.
                let _ = events.send(TransportEvent::Disconnected);
                return ControlFlow::Stop;
            }
        }
    }
    ControlFlow::Continue
}

fn handle_packet(
    event: Event,
    acks: &mut AckLedger,
    disconnecting: bool,
    events: &EventSender,
) -> ControlFlow {
    match event {
        Event::Incoming(Incoming::Publish(publish)) => {
            let message = Message {
                topic: publish.topic,
                payload: publish.payload,
                qos: session_qos(publish.qos),
                retain: publish.retain,
            };
            let _ = events.send(TransportEvent::Message(message));
        }
        Event::Incoming(Incoming::SubAck(ack)) => {
            let rejected = ack
                .return_codes
                .iter()
                .any(|code| matches!(code, SubscribeReasonCode::Failure));
            let result = if rejected {
                Err(SessionError::Protocol("broker rejected subscription".into()))
            } else {
                Ok(())
            };
            if let Some((token, result)) = acks.subscribe_acked(result) {
                let _ = events.send(TransportEvent::Completed { token, result });
            }
        }
        Event::Incoming(Incoming::UnsubAck(_)) => {
            if let Some(token) = acks.unsubscribe_acked() {
                let _ = events.send(TransportEvent::Completed {
                    token,
                    result: Ok(()),
                });
            }
        }
        Event::Incoming(Incoming::PubAck(ack)) => {
            if let Some(token) = acks.publish_acked(ack.pkid) {
                let _ = events.send(TransportEvent::Completed {
                    token,
                    result: Ok(()),
                });
            }
        }
        Event::Incoming(Incoming::PubComp(comp)) => {
            if let Some(token) = acks.publish_acked(comp.pkid) {
                let _ = events.send(TransportEvent::Completed {
                    token,
                    result: Ok(()),
                });
            }
        }
        Event::Outgoing(Outgoing::Publish(pkid)) => {
            // Packet id 0 is a fire-and-forget publish; nothing to track.
            if pkid != 0 {
                acks.assign_packet_id(pkid);
            }
        }
        Event::Outgoing(Outgoing::Disconnect) => {
            if disconnecting {
                let _ = events.send(TransportEvent::Disconnected);
                return ControlFlow::Stop;
            }
        }
        _ => {}
    }
    ControlFlow::Continue
}

/// Correlates broker acknowledgements back to in-flight operation tokens.
///
/// The broker answers subscribe/unsubscribe requests in order, one ack per
/// request packet; publishes are matched by the packet id rumqttc assigns
/// when the packet goes on the wire.
#[derive(Debug, Default)]
struct AckLedger {
    subscribes: VecDeque<Expected>,
    unsubscribes: VecDeque<Expected>,
    unassigned_publishes: VecDeque<OpToken>,
    inflight_publishes: HashMap<u16, OpToken>,
}

#[derive(Debug)]
struct Expected {
    token: OpToken,
    remaining: usize,
    failure: Option<SessionError>,
}

impl AckLedger {
    fn expect_subscribe(&mut self, token: OpToken, count: usize) {
        self.subscribes.push_back(Expected {
            token,
            remaining: count,
            failure: None,
        });
    }

    fn expect_unsubscribe(&mut self, token: OpToken, count: usize) {
        self.unsubscribes.push_back(Expected {
            token,
            remaining: count,
            failure: None,
        });
    }

    fn expect_publish(&mut self, token: OpToken) {
        self.unassigned_publishes.push_back(token);
    }

    /// One SubAck arrived; returns the finished operation, if any.
    fn subscribe_acked(
        &mut self,
        result: Result<(), SessionError>,
    ) -> Option<(OpToken, Result<(), SessionError>)> {
        let expected = self.subscribes.front_mut()?;
        if let Err(err) = result {
            expected.failure = Some(err);
        }
        expected.remaining = expected.remaining.saturating_sub(1);
        if expected.remaining > 0 {
            return None;
        }
        let done = self.subscribes.pop_front()?;
        match done.failure {
            Some(err) => Some((done.token, Err(err))),
            None => Some((done.token, Ok(()))),
        }
    }

    /// One UnsubAck arrived; returns the finished operation, if any.
    fn unsubscribe_acked(&mut self) -> Option<OpToken> {
        let expected = self.unsubscribes.front_mut()?;
        expected.remaining = expected.remaining.saturating_sub(1);
        if expected.remaining > 0 {
            return None;
        }
        self.unsubscribes.pop_front().map(|done| done.token)
    }

    /// rumqttc put a publish on the wire; bind its packet id to the oldest
    /// acknowledged-delivery publish still waiting for one.
    fn assign_packet_id(&mut self, pkid: u16) {
        if let Some(token) = self.unassigned_publishes.pop_front() {
            self.inflight_publishes.insert(pkid, token);
        }
    }

    fn publish_acked(&mut self, pkid: u16) -> Option<OpToken> {
        self.inflight_publishes.remove(&pkid)
    }
}

fn broker_options(server: &str, params: &ConnectParams) -> Result<MqttOptions, SessionError> {
    let url = Url::parse(server)
        .map_err(|err| SessionError::ConnectFailure(format!("invalid broker url {server}: {err}")))?;
    match url.scheme() {
        "mqtt" | "tcp" => {}
        other => {
            return Err(SessionError::ConnectFailure(format!(
                "unsupported broker url scheme: {other}"
            )));
        }
    }
    let host = url
        .host_str()
        .ok_or_else(|| SessionError::ConnectFailure(format!("broker url has no host: {server}")))?;
    let port = url.port().unwrap_or(1883);

    let mut options = MqttOptions::new(params.client_id.clone(), host, port);
    options.set_keep_alive(params.keepalive.max(MIN_KEEPALIVE));
    options.set_clean_session(params.clean_session);
    if let Some(username) = &params.username {
        options.set_credentials(username.clone(), params.password.clone().unwrap_or_default());
    }
    if let Some(will) = &params.will {
        options.set_last_will(LastWill::new(
            will.topic.clone(),
            will.payload.to_vec(),
            wire_qos(will.qos),
            will.retain,
        ));
    }
    Ok(options)
}

fn classify(err: ConnectionError) -> SessionError {
    match err {
        ConnectionError::ConnectionRefused(code) => {
            SessionError::ConnectFailure(format!("broker refused connection: {code:?}"))
        }
        ConnectionError::Io(err) => SessionError::Transport(err.to_string()),
        ConnectionError::MqttState(err) => SessionError::Protocol(err.to_string()),
        other => SessionError::Transport(other.to_string()),
    }
}

fn wire_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn session_qos(qos: rumqttc::QoS) -> QoS {
    match qos {
        rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
        rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
        rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ClientOptions, ConnectOptions};

    fn params(url: &str) -> ConnectParams {
        ConnectParams::resolve(
            url.to_string(),
            &ClientOptions::default(),
            ConnectOptions::default(),
        )
    }

    #[test]
    fn test_broker_options_parses_url() {
        let params = params("mqtt://broker.example:2883");
        let options = broker_options(&params.servers[0], &params).unwrap();
        assert_eq!(options.broker_address(), ("broker.example".to_string(), 2883));
    }

    #[test]
    fn test_broker_options_defaults_port() {
        let params = params("tcp://10.0.0.7");
        let options = broker_options(&params.servers[0], &params).unwrap();
        assert_eq!(options.broker_address(), ("10.0.0.7".to_string(), 1883));
    }

    #[test]
    fn test_broker_options_rejects_unknown_scheme() {
        let params = params("wss://broker.example");
        let err = broker_options(&params.servers[0], &params).unwrap_err();
        assert!(matches!(err, SessionError::ConnectFailure(_)));
    }

    #[test]
    fn test_ack_ledger_matches_subscribes_in_order() {
        let mut acks = AckLedger::default();
        acks.expect_subscribe(1, 2);
        acks.expect_subscribe(2, 1);
        assert!(acks.subscribe_acked(Ok(())).is_none());
        assert_eq!(acks.subscribe_acked(Ok(())).unwrap().0, 1);
        assert_eq!(acks.subscribe_acked(Ok(())).unwrap().0, 2);
    }

    #[test]
    fn test_ack_ledger_flags_partial_subscribe_failure() {
        let mut acks = AckLedger::default();
        acks.expect_subscribe(7, 2);
        assert!(acks
            .subscribe_acked(Err(SessionError::Protocol("rejected".into())))
            .is_none());
        let (token, result) = acks.subscribe_acked(Ok(())).unwrap();
        assert_eq!(token, 7);
        assert!(result.is_err());
    }

    #[test]
    fn test_ack_ledger_binds_publish_packet_ids() {
        let mut acks = AckLedger::default();
        acks.expect_publish(10);
        acks.expect_publish(11);
        acks.assign_packet_id(3);
        acks.assign_packet_id(4);
        assert_eq!(acks.publish_acked(4), Some(11));
        assert_eq!(acks.publish_acked(3), Some(10));
        assert_eq!(acks.publish_acked(3), None);
    }
}
