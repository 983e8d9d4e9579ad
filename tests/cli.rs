//! CLI argument parsing tests for subscribe/publish commands.
//!
//! # Manual Verification Instructions (kcat parity)
//!
//! These tests verify programmatic CLI parsing. For end-to-end behavior,
//! manually verify the following scenarios against a running broker:
//!
//! ## Subscribe command
//! ```shell
//! # Basic subscription (should stream JSON to stdout)
//! photon subscribe --topic "test/topic"
//!
//! # Multi-topic subscription
//! photon subscribe --topic "topic1,topic2,topic3"
//!
//! # QoS 0 subscription with raw output, stop after 5 messages
//! photon subscribe --topic "test/#" --qos qos0 --format raw --count 5
//! ```
//!
//! ## Publish command
//! ```shell
//! # Single message
//! photon publish --topic "test/topic" --message "value"
//!
//! # With retain flag
//! photon publish --topic "test/retained" --message "value" --retain
//!
//! # Stream mode: one publish per stdin line
//! printf 'one\ntwo\n' | photon publish --topic "test/stream"
//! ```

use clap::Parser;
use photon::cli::{Cli, Commands, OutputFormat, QosLevel};
use photon::QoS;

/// Helper to parse CLI args, returning the Commands enum.
fn parse_args(args: &[&str]) -> Result<Commands, clap::Error> {
    let mut full_args = vec!["photon"];
    full_args.extend(args);
    Cli::try_parse_from(full_args).map(|cli| cli.command)
}

/// Helper to get error string from failed parse.
fn parse_error(args: &[&str]) -> String {
    let mut full_args = vec!["photon"];
    full_args.extend(args);
    match Cli::try_parse_from(full_args) {
        Ok(_) => panic!("expected parse error"),
        Err(err) => err.to_string(),
    }
}

// =============================================================================
// Subscribe command
// =============================================================================

#[test]
fn subscribe_splits_comma_separated_topics() {
    let cmd = parse_args(&["subscribe", "--topic", "a/b,c/d,e/#"]).unwrap();

    if let Commands::Subscribe(args) = cmd {
        assert_eq!(args.topic, ["a/b", "c/d", "e/#"]);
    } else {
        panic!("expected Subscribe command");
    }
}

#[test]
fn subscribe_requires_a_topic() {
    let err = parse_error(&["subscribe"]);
    assert!(err.contains("--topic"));
}

#[test]
fn subscribe_defaults_qos1_json_unbounded() {
    let cmd = parse_args(&["subscribe", "--topic", "t"]).unwrap();

    if let Commands::Subscribe(args) = cmd {
        assert_eq!(args.qos.to_qos(), QoS::AtLeastOnce);
        assert!(matches!(args.format, OutputFormat::Json));
        assert_eq!(args.count, 0);
    } else {
        panic!("expected Subscribe command");
    }
}

#[test]
fn subscribe_accepts_qos_and_count() {
    let cmd = parse_args(&["subscribe", "--topic", "t", "--qos", "qos2", "--count", "5"]).unwrap();

    if let Commands::Subscribe(args) = cmd {
        assert_eq!(args.qos.to_qos(), QoS::ExactlyOnce);
        assert_eq!(args.count, 5);
    } else {
        panic!("expected Subscribe command");
    }
}

#[test]
fn subscribe_rejects_unknown_qos() {
    let err = parse_error(&["subscribe", "--topic", "t", "--qos", "qos3"]);
    assert!(err.contains("qos3"));
}

// =============================================================================
// Publish command
// =============================================================================

#[test]
fn publish_defaults_to_stdin_stream_mode() {
    let cmd = parse_args(&["publish", "--topic", "t"]).unwrap();

    if let Commands::Publish(args) = cmd {
        assert_eq!(args.topic, "t");
        assert!(args.message.is_none());
        assert!(!args.retain);
    } else {
        panic!("expected Publish command");
    }
}

#[test]
fn publish_accepts_message_and_retain() {
    let cmd = parse_args(&[
        "publish", "--topic", "t", "--message", "hello", "--retain", "--qos", "qos0",
    ])
    .unwrap();

    if let Commands::Publish(args) = cmd {
        assert_eq!(args.message.as_deref(), Some("hello"));
        assert!(args.retain);
        assert_eq!(args.qos.to_qos(), QoS::AtMostOnce);
    } else {
        panic!("expected Publish command");
    }
}

#[test]
fn publish_requires_a_topic() {
    let err = parse_error(&["publish", "--message", "hello"]);
    assert!(err.contains("--topic"));
}

// =============================================================================
// Shared connection arguments
// =============================================================================

#[test]
fn connection_defaults_match_session_defaults() {
    let cmd = parse_args(&["subscribe", "--topic", "t"]).unwrap();

    if let Commands::Subscribe(args) = cmd {
        assert!(args.connection.url.is_none());
        assert_eq!(args.connection.keepalive, 60);
        assert_eq!(args.connection.connect_timeout, 30_000);
    } else {
        panic!("expected Subscribe command");
    }
}

#[test]
fn connection_accepts_credentials_and_url() {
    let cmd = parse_args(&[
        "subscribe",
        "--topic",
        "t",
        "--url",
        "mqtt://broker:1883",
        "--client-id",
        "probe-1",
        "--username",
        "user",
        "--password",
        "secret",
    ])
    .unwrap();

    if let Commands::Subscribe(args) = cmd {
        assert_eq!(args.connection.url.as_deref(), Some("mqtt://broker:1883"));
        assert_eq!(args.connection.client_id.as_deref(), Some("probe-1"));
        assert_eq!(args.connection.username.as_deref(), Some("user"));
        assert_eq!(args.connection.password.as_deref(), Some("secret"));
    } else {
        panic!("expected Subscribe command");
    }
}

#[test]
fn qos_levels_map_to_session_qos() {
    assert_eq!(QosLevel::Qos0.to_qos(), QoS::AtMostOnce);
    assert_eq!(QosLevel::Qos1.to_qos(), QoS::AtLeastOnce);
    assert_eq!(QosLevel::Qos2.to_qos(), QoS::ExactlyOnce);
}
