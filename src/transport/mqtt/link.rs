//! rumqttc-backed broker links
//!
//! Each connection attempt gets its own `AsyncClient` and `EventLoop` built
//! from fresh options, so nothing from a failed attempt leaks into the next.

use super::connection::{BrokerEndpoint, LinkError, SessionError};
use super::credentials::TlsMaterial;
use super::message_handler::{EventRoute, MessageHandler};
use super::subscriptions::SubscriptionError;
use crate::protocol::QosLevel;
use crate::transport::{BrokerLink, LinkFactory, Subscriber};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop, MqttOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// How long close waits for the DISCONNECT packet to be flushed
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

fn to_mqtt_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Builds a TLS-secured rumqttc link per attempt
pub struct RumqttLinkFactory {
    client_id_prefix: String,
    tls: TlsMaterial,
    request_capacity: usize,
}

impl RumqttLinkFactory {
    pub fn new(client_id_prefix: impl Into<String>, tls: TlsMaterial, topic_count: usize) -> Self {
        Self {
            client_id_prefix: client_id_prefix.into(),
            tls,
            // Room for one subscribe per topic plus disconnect and pings
            request_capacity: 10 + topic_count,
        }
    }

    /// Options for a single attempt; the client id is unique per attempt
    pub fn options(&self, endpoint: &BrokerEndpoint) -> MqttOptions {
        let client_id = format!("{}-{}", self.client_id_prefix, Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, endpoint.host.clone(), endpoint.port);
        options.set_keep_alive(endpoint.keepalive);
        options.set_clean_start(true);
        options.set_transport(self.tls.transport());
        options
    }
}

impl LinkFactory for RumqttLinkFactory {
    fn establish(&self, endpoint: &BrokerEndpoint) -> Result<Box<dyn BrokerLink>, SessionError> {
        let options = self.options(endpoint);
        debug!(broker = %endpoint, client_id = %options.client_id(), "Creating broker link");

        let (client, event_loop) = AsyncClient::new(options, self.request_capacity);
        Ok(Box::new(RumqttLink { client, event_loop }))
    }
}

/// A live rumqttc client and the event loop that drives its socket
pub struct RumqttLink {
    client: AsyncClient,
    event_loop: EventLoop,
}

#[async_trait::async_trait]
impl BrokerLink for RumqttLink {
    async fn next_event(&mut self) -> Result<EventRoute, LinkError> {
        let event = self
            .event_loop
            .poll()
            .await
            .map_err(MessageHandler::classify_connection_error)?;
        Ok(MessageHandler::route_mqtt_event(event))
    }

    fn subscriber(&self) -> Arc<dyn Subscriber> {
        Arc::new(ClientSubscriber {
            client: self.client.clone(),
        })
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "DISCONNECT could not be queued");
            return;
        }

        // Poll until the event loop reports the connection closed
        let flush = async {
            while self.event_loop.poll().await.is_ok() {}
        };
        if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, flush)
            .await
            .is_err()
        {
            debug!("DISCONNECT not flushed before timeout");
        }
    }
}

struct ClientSubscriber {
    client: AsyncClient,
}

#[async_trait::async_trait]
impl Subscriber for ClientSubscriber {
    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), SubscriptionError> {
        self.client
            .subscribe(topic, to_mqtt_qos(qos))
            .await
            .map_err(|e| SubscriptionError::Request {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_mapping() {
        assert_eq!(to_mqtt_qos(QosLevel::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(to_mqtt_qos(QosLevel::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(to_mqtt_qos(QosLevel::ExactlyOnce), QoS::ExactlyOnce);
    }
}
