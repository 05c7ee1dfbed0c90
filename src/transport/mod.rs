//! Transport layer for broker communication
//!
//! The session logic talks to the broker only through the traits below, so
//! tests can drive it with scripted links instead of a real TLS socket.

use crate::protocol::QosLevel;
use std::sync::Arc;

pub mod mqtt;

use mqtt::{BrokerEndpoint, EventRoute, LinkError, SessionError, SubscriptionError};

/// Issues subscribe requests on a live link
#[async_trait::async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), SubscriptionError>;
}

/// One connection attempt's worth of client and event loop
///
/// A link is never reused: after an error the session drops it and asks the
/// factory for a fresh one.
#[async_trait::async_trait]
pub trait BrokerLink: Send {
    /// Drive the connection until the next routed event
    async fn next_event(&mut self) -> Result<EventRoute, LinkError>;

    /// Handle for issuing subscriptions on this link
    fn subscriber(&self) -> Arc<dyn Subscriber>;

    /// Send DISCONNECT best-effort and release the socket
    async fn disconnect(&mut self);
}

/// Builds brand-new links for connect and reconnect attempts
pub trait LinkFactory: Send + Sync {
    fn establish(&self, endpoint: &BrokerEndpoint) -> Result<Box<dyn BrokerLink>, SessionError>;
}
