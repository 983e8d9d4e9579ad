//! # Photon - event-driven MQTT client session engine
//!
//! Photon gives a single-threaded caller ergonomic, event-driven access to
//! an MQTT session while the session's network I/O runs concurrently on a
//! background engine. The building blocks:
//!
//! - Session state machine owning every connection-state transition
//! - Per-session ordered event dispatch: handlers fire on the caller's own
//!   timeline, in arrival order, never concurrently or re-entrantly
//! - Dual operation surface: each operation is built once as an
//!   asynchronous primitive and the synchronous variant is a blocking join
//!   on it
//! - Per-session metrics accounting (calls, errors, messages and bytes in
//!   both directions)
//! - A transport seam: rumqttc-backed TCP links in production, an
//!   in-process loopback for tests and offline development
//!
//! The wire protocol itself is delegated to the transport; the engine
//! orchestrates calls into it and converts its asynchronous completions
//! into the event/handle model above.

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::uninlined_format_args)]

pub mod cli;
pub mod client;
pub mod error;
pub mod metrics;
pub mod options;
pub mod transport;

pub use client::{Client, Event, EventKind, OpKind, OperationHandle, SessionStatus};
pub use error::{Result, SessionError};
pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use options::{
    ClientOptions, ConnectOptions, ConnectParams, IntoTopics, Message, PublishOptions, QoS,
    SubscribeOptions, Will,
};
pub use transport::{LoopbackTransport, TcpTransport, Transport};
