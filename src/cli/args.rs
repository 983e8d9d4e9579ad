//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};

use crate::options::QoS;

/// Photon - event-driven MQTT client.
#[derive(Parser)]
#[command(name = "photon")]
#[command(version)]
#[command(about = "Event-driven MQTT pub/sub client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Subscribe to MQTT topics and stream messages to stdout (kcat-style)
    Subscribe(SubscribeArgs),

    /// Publish MQTT messages from the command line or stdin (kcat-style)
    Publish(PublishArgs),
}

// -----------------------------------------------------------------------------
// Shared connection arguments
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct ConnectionArgs {
    /// Broker URL (defaults to $MQTT_BROKER_ADDRESS, then mqtt://127.0.0.1:1883)
    #[arg(long)]
    pub url: Option<String>,

    /// MQTT client identifier (auto-generated if not specified)
    #[arg(long)]
    pub client_id: Option<String>,

    /// Username for broker authentication
    #[arg(long)]
    pub username: Option<String>,

    /// Password for broker authentication
    #[arg(long)]
    pub password: Option<String>,

    /// Keep-alive interval in seconds
    #[arg(long, default_value_t = 60)]
    pub keepalive: u64,

    /// Connect timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    pub connect_timeout: u64,
}

/// Output format for received messages.
#[derive(clap::ValueEnum, Clone, Default)]
pub enum OutputFormat {
    /// JSON objects, one per line
    #[default]
    Json,
    /// Raw payload only (no metadata)
    Raw,
}

/// QoS level for MQTT operations.
#[derive(clap::ValueEnum, Clone, Copy, Default)]
pub enum QosLevel {
    /// At most once (fire and forget)
    Qos0,
    /// At least once (acknowledged delivery)
    #[default]
    Qos1,
    /// Exactly once (assured delivery)
    Qos2,
}

impl QosLevel {
    pub fn to_qos(self) -> QoS {
        match self {
            Self::Qos0 => QoS::AtMostOnce,
            Self::Qos1 => QoS::AtLeastOnce,
            Self::Qos2 => QoS::ExactlyOnce,
        }
    }
}

// -----------------------------------------------------------------------------
// Subscribe command
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct SubscribeArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Comma-separated list of topic filters to subscribe to
    #[arg(long, value_delimiter = ',', required = true)]
    pub topic: Vec<String>,

    /// QoS level for subscriptions
    #[arg(long, value_enum, default_value = "qos1")]
    pub qos: QosLevel,

    /// Output format
    #[arg(long, value_enum, default_value = "json")]
    pub format: OutputFormat,

    /// Disconnect after receiving this many messages (0 = run until the
    /// link drops)
    #[arg(long, default_value_t = 0)]
    pub count: u64,
}

// -----------------------------------------------------------------------------
// Publish command
// -----------------------------------------------------------------------------

#[derive(Args)]
pub struct PublishArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Topic to publish to
    #[arg(long)]
    pub topic: String,

    /// Message payload (if omitted, each stdin line is published)
    #[arg(long)]
    pub message: Option<String>,

    /// QoS level for publishes
    #[arg(long, value_enum, default_value = "qos1")]
    pub qos: QosLevel,

    /// Set retain flag on published messages
    #[arg(long)]
    pub retain: bool,
}
