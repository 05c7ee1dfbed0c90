//! Pure message routing logic for MQTT events
//!
//! This module turns rumqttc events into routing decisions for the session
//! without touching the network.

use super::connection::LinkError;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, SubscribeReasonCode};
use rumqttc::v5::{ConnectionError, Event};
use rumqttc::TlsError;
use std::io::ErrorKind;

/// Reason code reported for a SUBACK entry that did not grant a QoS
pub const SUBACK_FAILURE: u8 = 0x80;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => match connack.code {
                    ConnectReturnCode::Success => EventRoute::ConnectionAcknowledged,
                    refused => EventRoute::ConnectionRefused {
                        code: refused as u8,
                    },
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                    payload: publish.payload,
                    retain: publish.retain,
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    return_codes: suback
                        .return_codes
                        .iter()
                        .map(Self::suback_code)
                        .collect(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    fn suback_code(code: &SubscribeReasonCode) -> u8 {
        match code {
            SubscribeReasonCode::Success(qos) => *qos as u8,
            _ => SUBACK_FAILURE,
        }
    }

    /// Classify an event loop error (pure function)
    pub fn classify_connection_error(error: ConnectionError) -> LinkError {
        match error {
            ConnectionError::ConnectionRefused(code) => LinkError::Refused(code as u8),
            // rustls failures surface as InvalidData; other I/O during TLS is the network
            ConnectionError::Tls(TlsError::Io(e)) if e.kind() != ErrorKind::InvalidData => {
                LinkError::Lost(e.to_string())
            }
            ConnectionError::Tls(e) => LinkError::Handshake(e.to_string()),
            other => LinkError::Lost(other.to_string()),
        }
    }

    /// Validate subscription success from SubAck (pure function)
    pub fn validate_subscription_success(return_codes: &[u8]) -> Result<(), Vec<u8>> {
        if return_codes.is_empty() || return_codes.iter().any(|&code| code >= SUBACK_FAILURE) {
            Err(return_codes.to_vec())
        } else {
            Ok(())
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to subscribe
    ConnectionAcknowledged,
    /// CONNACK carried a non-success reason code
    ConnectionRefused { code: u8 },
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Bytes,
        retain: bool,
    },
    /// MQTT broker disconnected
    Disconnected,
    /// Subscription confirmed with return codes
    SubscriptionConfirmed {
        packet_id: u16,
        return_codes: Vec<u8>,
    },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, Disconnect, Publish, SubAck};
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_route_connack() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(event),
            EventRoute::ConnectionAcknowledged
        );
    }

    #[test]
    fn test_route_refused_connack_keeps_reason_code() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::NotAuthorized,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(event),
            EventRoute::ConnectionRefused { code: 0x87 }
        );
    }

    #[test]
    fn test_route_publish() {
        let publish = Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("/average"),
            pkid: 1,
            payload: Bytes::from(r#"{"node_id":"n1","aggregation_result":"1.0"}"#),
            properties: None,
        };
        let route = MessageHandler::route_mqtt_event(Event::Incoming(Packet::Publish(publish)));

        match route {
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                assert_eq!(topic, "/average");
                assert!(payload.starts_with(b"{\"node_id\""));
                assert!(!retain);
            }
            other => panic!("Expected MessageReceived, got {other:?}"),
        }
    }

    #[test]
    fn test_route_suback_codes() {
        let suback = SubAck {
            pkid: 7,
            return_codes: vec![
                SubscribeReasonCode::Success(QoS::AtLeastOnce),
                SubscribeReasonCode::NotAuthorized,
            ],
            properties: None,
        };
        let route = MessageHandler::route_mqtt_event(Event::Incoming(Packet::SubAck(suback)));
        assert_eq!(
            route,
            EventRoute::SubscriptionConfirmed {
                packet_id: 7,
                return_codes: vec![0x01, SUBACK_FAILURE],
            }
        );
    }

    #[test]
    fn test_route_disconnect() {
        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: rumqttc::v5::mqttbytes::v5::DisconnectReasonCode::ServerShuttingDown,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(disconnect),
            EventRoute::Disconnected
        );
    }

    #[test]
    fn test_classify_connection_errors() {
        let refused = ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword);
        assert_eq!(
            MessageHandler::classify_connection_error(refused),
            LinkError::Refused(0x86)
        );

        let lost = ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        ));
        assert!(matches!(
            MessageHandler::classify_connection_error(lost),
            LinkError::Lost(_)
        ));
    }

    #[test]
    fn test_classify_io_during_tls_as_lost() {
        let reset = ConnectionError::Tls(TlsError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        )));
        assert!(matches!(
            MessageHandler::classify_connection_error(reset),
            LinkError::Lost(_)
        ));

        let eof = ConnectionError::Tls(TlsError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "tls handshake eof",
        )));
        assert!(matches!(
            MessageHandler::classify_connection_error(eof),
            LinkError::Lost(_)
        ));
    }

    #[test]
    fn test_classify_rustls_failure_as_handshake() {
        let bad_cert = ConnectionError::Tls(TlsError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "invalid peer certificate: UnknownIssuer",
        )));
        assert!(matches!(
            MessageHandler::classify_connection_error(bad_cert),
            LinkError::Handshake(_)
        ));

        let no_ca = ConnectionError::Tls(TlsError::NoValidCertInChain);
        assert!(matches!(
            MessageHandler::classify_connection_error(no_ca),
            LinkError::Handshake(_)
        ));
    }

    #[test]
    fn test_validate_subscription_success() {
        assert!(MessageHandler::validate_subscription_success(&[0x00, 0x01, 0x02]).is_ok());
        assert_eq!(
            MessageHandler::validate_subscription_success(&[0x01, 0x87]),
            Err(vec![0x01, 0x87])
        );
        assert!(MessageHandler::validate_subscription_success(&[]).is_err());
    }
}
