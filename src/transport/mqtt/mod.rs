//! MQTT v5 over mutual TLS
//!
//! This module separates pure functions from I/O operations for better
//! testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state, endpoint and backoff policy
//! - [`credentials`] - CA certificate, client certificate and key loading
//! - [`message_handler`] - Pure routing of rumqttc events
//! - [`health_monitor`] - Pure reconnection decisions and state transitions
//! - [`subscriptions`] - Topic subscriptions issued on each connect
//! - [`link`] - rumqttc client and event loop per connection attempt
//! - [`session`] - Impure I/O and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use edge_ingest::config::IngestConfig;
//! use edge_ingest::transport::mqtt::TransportSession;
//!
//! # tokio_test::block_on(async {
//! let config = IngestConfig::load_from_file("edge-ingest.toml")?;
//! let (tx, _rx) = tokio::sync::mpsc::channel(config.mqtt.inbound_capacity);
//!
//! let mut session = TransportSession::open(&config, tx)?;
//! session.connect(&config.endpoint()?).await?;
//! session.run().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod connection;
pub mod credentials;
pub mod health_monitor;
pub mod link;
pub mod message_handler;
pub mod session;
pub mod subscriptions;

pub use connection::{
    BrokerEndpoint, ConnectionState, DisconnectReason, LinkError, ReconnectPolicy, SessionError,
};
pub use credentials::{CredentialArtifact, CredentialError, TlsMaterial};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use link::{RumqttLink, RumqttLinkFactory};
pub use message_handler::{EventRoute, MessageHandler};
pub use session::{SessionHandle, SessionSettings, TransportSession};
pub use subscriptions::{SubscriptionError, SubscriptionManager, SubscriptionReport};
