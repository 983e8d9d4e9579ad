//! Subscribe and Publish command implementations, built on the session
//! engine rather than on a raw transport so the CLI exercises the same
//! code paths as library callers.

use std::io::BufRead;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine as _;
use chrono::Utc;
use serde::Serialize;

use crate::cli::args::{ConnectionArgs, OutputFormat, PublishArgs, SubscribeArgs};
use crate::client::{Client, Event, EventKind};
use crate::options::{ClientOptions, ConnectOptions, PublishOptions, SubscribeOptions};

/// Environment variable holding the default broker address.
pub const ENV_BROKER_ADDRESS: &str = "MQTT_BROKER_ADDRESS";

const DEFAULT_BROKER_URL: &str = "mqtt://127.0.0.1:1883";

/// Run the subscribe command: connect, subscribe, and stream messages to
/// stdout until `--count` is reached or the link drops.
pub fn run_subscribe(args: SubscribeArgs) -> Result<()> {
    let url = broker_url(&args.connection);
    let client = Client::new(client_options(&args.connection)).context("create MQTT client")?;

    let format = args.format.clone();
    let count = args.count;
    let received = Arc::new(AtomicU64::new(0));
    let tally = received.clone();
    client.on(EventKind::Message, move |client, event| {
        if let Event::Message(message) = event {
            output_message(&format, &message.topic, &message.payload);
            let seen = tally.fetch_add(1, Ordering::Relaxed) + 1;
            if count > 0 && seen >= count {
                if let Err(err) = client.end() {
                    tracing::warn!(error = %err, "disconnect failed");
                }
            }
        }
    });
    client.on(EventKind::Error, |_, event| {
        if let Event::Error(err) = event {
            eprintln!("session error: {err}");
        }
    });

    client
        .connect_with(url.as_str(), connect_options(&args.connection))
        .with_context(|| format!("connect to {url}"))?;
    client
        .subscribe(
            args.topic.clone(),
            SubscribeOptions {
                qos: args.qos.to_qos(),
            },
        )
        .context("subscribe")?;
    eprintln!(
        "subscribed to {} topic(s): {}",
        args.topic.len(),
        args.topic.join(", ")
    );

    client.join();

    report_metrics(&client)?;
    Ok(())
}

/// Run the publish command: publish `--message`, or one message per stdin
/// line, then disconnect.
pub fn run_publish(args: PublishArgs) -> Result<()> {
    let url = broker_url(&args.connection);
    let client = Client::new(client_options(&args.connection)).context("create MQTT client")?;
    client
        .connect_with(url.as_str(), connect_options(&args.connection))
        .with_context(|| format!("connect to {url}"))?;

    let options = PublishOptions {
        qos: args.qos.to_qos(),
        retain: args.retain,
    };
    match &args.message {
        Some(message) => {
            client
                .publish(args.topic.as_str(), message.clone(), options)
                .context("publish message")?;
        }
        None => {
            for line in std::io::stdin().lock().lines() {
                let line = line.context("read stdin")?;
                client
                    .publish(args.topic.as_str(), line, options)
                    .context("publish line")?;
            }
        }
    }

    client.end().context("disconnect")?;
    client.join();

    report_metrics(&client)?;
    Ok(())
}

fn broker_url(connection: &ConnectionArgs) -> String {
    connection
        .url
        .clone()
        .or_else(|| std::env::var(ENV_BROKER_ADDRESS).ok())
        .unwrap_or_else(|| DEFAULT_BROKER_URL.to_string())
}

fn client_options(connection: &ConnectionArgs) -> ClientOptions {
    ClientOptions {
        client_id: connection.client_id.clone(),
        username: connection.username.clone(),
        password: connection.password.clone(),
        ..ClientOptions::default()
    }
}

fn connect_options(connection: &ConnectionArgs) -> ConnectOptions {
    ConnectOptions {
        keepalive: Duration::from_secs(connection.keepalive),
        connect_timeout: Duration::from_millis(connection.connect_timeout),
        ..ConnectOptions::default()
    }
}

fn report_metrics(client: &Client) -> Result<()> {
    let metrics = serde_json::to_string(&client.metrics()).context("encode metrics")?;
    eprintln!("session metrics: {metrics}");
    Ok(())
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    ts: String,
    topic: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_b64: Option<String>,
}

fn output_message(format: &OutputFormat, topic: &str, payload: &[u8]) {
    match format {
        OutputFormat::Json => {
            let (payload_str, payload_b64) = match std::str::from_utf8(payload) {
                Ok(text) => (Some(text), None),
                Err(_) => (
                    None,
                    Some(base64::engine::general_purpose::STANDARD.encode(payload)),
                ),
            };
            let message = MessageOutput {
                ts: Utc::now().to_rfc3339(),
                topic,
                payload: payload_str,
                payload_b64,
            };
            if let Ok(json) = serde_json::to_string(&message) {
                println!("{json}");
            }
        }
        OutputFormat::Raw => {
            if let Ok(text) = std::str::from_utf8(payload) {
                println!("{text}");
            } else {
                // Binary data in raw mode goes to stdout unmodified.
                use std::io::Write;
                let _ = std::io::stdout().write_all(payload);
                let _ = std::io::stdout().write_all(b"\n");
            }
        }
    }
}
