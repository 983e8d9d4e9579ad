//! End-to-end session scenarios over the loopback transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use photon::{
    Client, ClientOptions, ConnectOptions, Event, EventKind, LoopbackTransport, PublishOptions,
    QoS, SessionError, SubscribeOptions,
};

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn loopback_client() -> Client {
    Client::with_transport(LoopbackTransport::new(), ClientOptions::default())
        .expect("create client")
}

#[test]
fn connected_flag_follows_session_lifecycle() {
    let client = loopback_client();
    assert!(!client.connected());

    client.connect("mqtt://loopback").unwrap();
    assert!(client.connected());

    client.end().unwrap();
    assert!(!client.connected());
}

#[test]
fn greeting_roundtrip_drives_handlers_in_order() {
    let client = loopback_client();
    let log = new_log();

    let connect_log = log.clone();
    client.on(EventKind::Connect, move |client, _| {
        record(&connect_log, "connect");
        client
            .subscribe("greeting", SubscribeOptions::default())
            .unwrap();
        client
            .publish("greeting", "Hello MQTT!", PublishOptions::default())
            .unwrap();
    });

    let message_log = log.clone();
    client.on(EventKind::Message, move |client, event| {
        if let Event::Message(message) = event {
            record(
                &message_log,
                format!(
                    "message {} {}",
                    message.topic,
                    String::from_utf8_lossy(&message.payload)
                ),
            );
            client.end().unwrap();
        }
    });

    let end_log = log.clone();
    client.on(EventKind::End, move |_, _| record(&end_log, "end"));

    client.connect("mqtt://loopback").unwrap();
    client.join();

    assert_eq!(
        entries(&log),
        ["connect", "message greeting Hello MQTT!", "end"]
    );
    assert!(!client.connected());
}

#[test]
fn publish_async_resolves_before_subsequent_sync_publish() {
    let client = loopback_client();
    let log = new_log();

    client.on(EventKind::Connect, |client, _| {
        client
            .subscribe(
                "test/topic",
                SubscribeOptions {
                    qos: QoS::AtLeastOnce,
                },
            )
            .unwrap();
        let options = PublishOptions {
            qos: QoS::AtLeastOnce,
            retain: false,
        };
        let handle = client.publish_async("test/topic", "Hello, Async MQTT!", options);
        // Await the deferred handle to exercise the future surface.
        futures::executor::block_on(handle).unwrap();
        client
            .publish("test/topic", "Hello, MQTT!", options)
            .unwrap();
    });

    let message_log = log.clone();
    client.on(EventKind::Message, move |client, event| {
        if let Event::Message(message) = event {
            record(&message_log, String::from_utf8_lossy(&message.payload));
            if message_log.lock().unwrap().len() == 2 {
                client.end().unwrap();
            }
        }
    });

    client.connect("mqtt://loopback").unwrap();
    client.join();

    assert_eq!(entries(&log), ["Hello, Async MQTT!", "Hello, MQTT!"]);
}

#[test]
fn end_is_idempotent_and_fires_end_once() {
    let client = loopback_client();
    let log = new_log();

    let end_log = log.clone();
    client.on(EventKind::End, move |_, _| record(&end_log, "end"));

    client.connect("mqtt://loopback").unwrap();
    client.end().unwrap();
    client.end().unwrap();
    client.join();

    assert_eq!(entries(&log), ["end"]);
}

#[test]
fn end_async_resolves_and_end_event_fires_on_join() {
    let client = loopback_client();
    let log = new_log();

    let end_log = log.clone();
    client.on(EventKind::End, move |_, _| record(&end_log, "end"));

    client.connect("mqtt://loopback").unwrap();
    client.end_async().wait().unwrap();
    assert!(!client.connected());

    client.join();
    assert_eq!(entries(&log), ["end"]);
}

#[test]
fn topic_operations_require_connected_session() {
    let client = loopback_client();

    assert_eq!(
        client.publish("t", "x", PublishOptions::default()),
        Err(SessionError::NotConnected)
    );
    assert_eq!(
        client.subscribe("t", SubscribeOptions::default()),
        Err(SessionError::NotConnected)
    );
    assert_eq!(client.unsubscribe("t"), Err(SessionError::NotConnected));

    let metrics = client.metrics();
    assert_eq!(metrics.calls, 3);
    assert_eq!(metrics.errors, 3);
}

#[test]
fn counters_match_performed_operations() {
    let client = loopback_client();

    client.on(EventKind::Connect, |client, _| {
        client
            .subscribe("greeting", SubscribeOptions::default())
            .unwrap();
        client
            .publish("greeting", "Hello MQTT!", PublishOptions::default())
            .unwrap();
    });
    client.on(EventKind::Message, |client, _| {
        client.end().unwrap();
    });

    client.connect("mqtt://loopback").unwrap();
    client.join();

    let metrics = client.metrics();
    assert_eq!(metrics.calls, 4);
    assert_eq!(metrics.errors, 0);
    assert_eq!(metrics.messages_sent, 1);
    assert_eq!(metrics.messages_received, 1);
    assert_eq!(metrics.data_sent, "Hello MQTT!".len() as u64);
    assert_eq!(metrics.data_received, "Hello MQTT!".len() as u64);
}

#[test]
fn handlers_fire_in_registration_order() {
    let client = loopback_client();
    let log = new_log();

    client.on(EventKind::Connect, |client, _| {
        client.subscribe("t", SubscribeOptions::default()).unwrap();
        client
            .publish("t", "payload", PublishOptions::default())
            .unwrap();
    });

    let first_log = log.clone();
    client.on(EventKind::Message, move |_, _| record(&first_log, "first"));
    let second_log = log.clone();
    client.on(EventKind::Message, move |client, _| {
        record(&second_log, "second");
        client.end().unwrap();
    });

    client.connect("mqtt://loopback").unwrap();
    client.join();

    assert_eq!(entries(&log), ["first", "second"]);
}

#[test]
fn handler_registered_mid_dispatch_sees_later_events() {
    let client = loopback_client();
    let log = new_log();

    let end_log = log.clone();
    client.on(EventKind::Connect, move |client, _| {
        let end_log = end_log.clone();
        client.on(EventKind::End, move |_, _| record(&end_log, "end"));
        client.subscribe("t", SubscribeOptions::default()).unwrap();
        client.publish("t", "x", PublishOptions::default()).unwrap();
    });
    client.on(EventKind::Message, |client, _| {
        client.end().unwrap();
    });

    client.connect("mqtt://loopback").unwrap();
    client.join();

    assert_eq!(entries(&log), ["end"]);
}

#[test]
fn wildcard_subscription_receives_matching_topics() {
    let client = loopback_client();
    let log = new_log();

    client.on(EventKind::Connect, |client, _| {
        client
            .subscribe("metrics/+/cpu", SubscribeOptions::default())
            .unwrap();
        client
            .publish("metrics/host1/cpu", "0.93", PublishOptions::default())
            .unwrap();
    });
    let message_log = log.clone();
    client.on(EventKind::Message, move |client, event| {
        if let Event::Message(message) = event {
            record(&message_log, message.topic.clone());
            client.end().unwrap();
        }
    });

    client.connect("mqtt://loopback").unwrap();
    client.join();

    assert_eq!(entries(&log), ["metrics/host1/cpu"]);
}

#[test]
fn unsubscribe_stops_delivery() {
    let client = loopback_client();
    let log = new_log();

    client.on(EventKind::Connect, |client, _| {
        client
            .subscribe(vec!["alpha", "omega"], SubscribeOptions::default())
            .unwrap();
        client.unsubscribe("alpha").unwrap();
        client
            .publish("alpha", "dropped", PublishOptions::default())
            .unwrap();
        client
            .publish("omega", "delivered", PublishOptions::default())
            .unwrap();
    });
    let message_log = log.clone();
    client.on(EventKind::Message, move |client, event| {
        if let Event::Message(message) = event {
            record(&message_log, message.topic.clone());
            client.end().unwrap();
        }
    });

    client.connect("mqtt://loopback").unwrap();
    client.join();

    assert_eq!(entries(&log), ["omega"]);
}

#[test]
fn notifications_queued_behind_end_are_dropped() {
    let client = loopback_client();
    let log = new_log();

    let message_log = log.clone();
    client.on(EventKind::Message, move |_, _| {
        record(&message_log, "message");
    });
    let end_log = log.clone();
    client.on(EventKind::End, move |_, _| record(&end_log, "end"));

    client.connect("mqtt://loopback").unwrap();
    client.subscribe("t", SubscribeOptions::default()).unwrap();
    client.publish("t", "x", PublishOptions::default()).unwrap();
    // The message is queued but never pumped; a top-level end drops it and
    // still delivers the terminal notification.
    client.end().unwrap();
    client.join();

    assert_eq!(entries(&log), ["end"]);
}

#[test]
fn unsolicited_link_failure_fires_error_then_end() {
    let client = Client::with_transport(
        LoopbackTransport::new().with_fault_topic("boom"),
        ClientOptions::default(),
    )
    .expect("create client");
    let log = new_log();

    let error_log = log.clone();
    client.on(EventKind::Error, move |_, event| {
        if let Event::Error(err) = event {
            record(&error_log, format!("error {err}"));
        }
    });
    let end_log = log.clone();
    client.on(EventKind::End, move |_, _| record(&end_log, "end"));

    client.connect("mqtt://loopback").unwrap();
    let err = client
        .publish("boom", "x", PublishOptions::default())
        .unwrap_err();
    assert!(matches!(err, SessionError::Transport(_)));

    client.join();

    assert_eq!(
        entries(&log),
        ["error transport error: loopback link fault", "end"]
    );
    assert!(!client.connected());
}

#[test]
fn reconnect_replays_params_and_fires_reconnect_event() {
    let client = loopback_client();
    let log = new_log();

    let connect_log = log.clone();
    client.on(EventKind::Connect, move |_, _| {
        record(&connect_log, "connect");
    });
    let reconnect_log = log.clone();
    client.on(EventKind::Reconnect, move |client, _| {
        record(&reconnect_log, "reconnect");
        client.end().unwrap();
    });
    let end_log = log.clone();
    client.on(EventKind::End, move |_, _| record(&end_log, "end"));

    client.connect("mqtt://loopback").unwrap();
    client.end().unwrap();

    client.reconnect().unwrap();
    assert!(client.connected());
    client.join();

    // The first connect notification was dropped behind its own end; the
    // replay fires reconnect, not connect.
    assert_eq!(entries(&log), ["end", "reconnect", "end"]);
}

#[test]
fn reconnect_is_a_noop_while_connected() {
    let client = loopback_client();
    client.connect("mqtt://loopback").unwrap();
    client.reconnect().unwrap();
    assert!(client.connected());
    client.end().unwrap();
}

#[test]
fn reconnect_without_prior_connect_fails() {
    let client = loopback_client();
    let err = client.reconnect().unwrap_err();
    assert!(matches!(err, SessionError::ConnectFailure(_)));
}

#[test]
fn refused_connect_surfaces_connect_failure() {
    let client = Client::with_transport(
        LoopbackTransport::refuse("bad credentials"),
        ClientOptions::default(),
    )
    .expect("create client");

    assert_eq!(
        client.connect("mqtt://loopback"),
        Err(SessionError::ConnectFailure("bad credentials".into()))
    );
    assert!(!client.connected());

    let metrics = client.metrics();
    assert_eq!(metrics.calls, 1);
    assert_eq!(metrics.errors, 1);
}

#[test]
fn connect_times_out_when_transport_stalls() {
    let client = Client::with_transport(LoopbackTransport::unresponsive(), ClientOptions::default())
        .expect("create client");

    let options = ConnectOptions {
        connect_timeout: Duration::from_millis(100),
        ..ConnectOptions::default()
    };
    let err = client
        .connect_with("mqtt://loopback", options)
        .unwrap_err();
    match err {
        SessionError::ConnectFailure(reason) => assert!(reason.contains("timed out")),
        other => panic!("expected connect failure, got {other:?}"),
    }
    assert!(!client.connected());
}

#[test]
fn connect_while_connected_fails() {
    let client = loopback_client();
    client.connect("mqtt://loopback").unwrap();

    let err = client.connect("mqtt://loopback").unwrap_err();
    assert!(matches!(err, SessionError::ConnectFailure(_)));
    assert!(client.connected());

    client.end().unwrap();
}

#[test]
fn join_returns_immediately_without_a_session() {
    let client = loopback_client();
    client.join();
    assert!(!client.connected());
}
