//! Client, connection, and per-operation options.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default keep-alive interval.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(60);
/// Default connect timeout; also bounds acknowledgement waits for
/// individual operations on the session.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// MQTT delivery guarantee for publishes and subscriptions.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum QoS {
    /// At most once (fire and forget).
    #[default]
    AtMostOnce,
    /// At least once (acknowledged delivery).
    AtLeastOnce,
    /// Exactly once (assured delivery).
    ExactlyOnce,
}

impl QoS {
    /// Parse a wire-level QoS byte.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }

    /// The wire-level QoS byte.
    pub fn level(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

/// Last Will and Testament message the broker publishes on the client's
/// behalf after an ungraceful disconnect.
#[derive(Debug, Clone)]
pub struct Will {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl Will {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }
}

/// Options fixed at client creation.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Client identifier; auto-generated when unset.
    pub client_id: Option<String>,
    /// Username for broker authentication.
    pub username: Option<String>,
    /// Password for broker authentication.
    pub password: Option<String>,
    /// Last Will and Testament attached to every connect.
    pub will: Option<Will>,
    /// Tags attached to log events for this client.
    pub tags: HashMap<String, String>,
}

/// Options for a single connect attempt.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Additional broker URLs tried in order after the primary.
    pub servers: Vec<String>,
    /// Keep-alive interval in seconds granularity.
    pub keepalive: Duration,
    /// Handshake deadline; doubles as the acknowledgement budget for
    /// operations on the established session.
    pub connect_timeout: Duration,
    /// Ask the broker to discard prior session state.
    pub clean_session: bool,
    /// Tags attached to log events for this connection.
    pub tags: HashMap<String, String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            keepalive: DEFAULT_KEEPALIVE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            clean_session: true,
            tags: HashMap::new(),
        }
    }
}

/// Options for a subscribe operation; every topic in the call shares them.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    pub qos: QoS,
}

/// Options for a publish operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    pub qos: QoS,
    pub retain: bool,
}

/// Fully resolved connection parameters, retained by the session so
/// `reconnect` can replay them.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub servers: Vec<String>,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keepalive: Duration,
    pub connect_timeout: Duration,
    pub clean_session: bool,
    pub will: Option<Will>,
    pub tags: HashMap<String, String>,
}

impl ConnectParams {
    pub(crate) fn resolve(url: String, client: &ClientOptions, options: ConnectOptions) -> Self {
        let mut servers = vec![url];
        servers.extend(options.servers);
        let client_id = client
            .client_id
            .clone()
            .unwrap_or_else(|| format!("photon-{}", Uuid::new_v4().simple()));
        let mut tags = client.tags.clone();
        tags.extend(options.tags);
        Self {
            servers,
            client_id,
            username: client.username.clone(),
            password: client.password.clone(),
            keepalive: options.keepalive,
            connect_timeout: options.connect_timeout,
            clean_session: options.clean_session,
            will: client.will.clone(),
            tags,
        }
    }
}

/// A single MQTT application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }
}

/// Conversion accepted wherever an operation takes one topic or many.
pub trait IntoTopics {
    fn into_topics(self) -> Vec<String>;
}

impl IntoTopics for &str {
    fn into_topics(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoTopics for String {
    fn into_topics(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoTopics for Vec<String> {
    fn into_topics(self) -> Vec<String> {
        self
    }
}

impl IntoTopics for Vec<&str> {
    fn into_topics(self) -> Vec<String> {
        self.into_iter().map(str::to_string).collect()
    }
}

impl IntoTopics for &[&str] {
    fn into_topics(self) -> Vec<String> {
        self.iter().map(|topic| (*topic).to_string()).collect()
    }
}

impl<const N: usize> IntoTopics for [&str; N] {
    fn into_topics(self) -> Vec<String> {
        self.iter().map(|topic| (*topic).to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_level_roundtrip() {
        for level in 0..=2 {
            let qos = QoS::from_level(level).unwrap();
            assert_eq!(qos.level(), level);
        }
        assert_eq!(QoS::from_level(3), None);
    }

    #[test]
    fn test_resolve_generates_client_id_and_merges_tags() {
        let mut client = ClientOptions::default();
        client.tags.insert("team".into(), "edge".into());
        let mut options = ConnectOptions::default();
        options.tags.insert("run".into(), "7".into());
        options.servers.push("mqtt://fallback:1883".into());

        let params = ConnectParams::resolve("mqtt://primary:1883".into(), &client, options);
        assert!(params.client_id.starts_with("photon-"));
        assert_eq!(params.servers, ["mqtt://primary:1883", "mqtt://fallback:1883"]);
        assert_eq!(params.keepalive, DEFAULT_KEEPALIVE);
        assert_eq!(params.tags.len(), 2);
    }

    #[test]
    fn test_resolve_keeps_explicit_client_id() {
        let client = ClientOptions {
            client_id: Some("sensor-1".into()),
            ..Default::default()
        };
        let params =
            ConnectParams::resolve("mqtt://broker".into(), &client, ConnectOptions::default());
        assert_eq!(params.client_id, "sensor-1");
    }

    #[test]
    fn test_into_topics_accepts_single_and_many() {
        assert_eq!("a/b".into_topics(), vec!["a/b"]);
        assert_eq!(vec!["a", "b"].into_topics(), vec!["a", "b"]);
        assert_eq!(["x", "y"].into_topics(), vec!["x", "y"]);
    }
}
