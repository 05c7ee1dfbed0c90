//! Topic subscriptions issued on every transition into Connected

use super::message_handler::MessageHandler;
use crate::observability::metrics::metrics;
use crate::protocol::TopicSubscription;
use crate::transport::Subscriber;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubscriptionError {
    #[error("Subscribe request for {topic} failed: {reason}")]
    Request { topic: String, reason: String },
    #[error("Broker rejected subscription {packet_id} (reason codes {codes:?})")]
    Rejected { packet_id: u16, codes: Vec<u8> },
}

/// What happened when subscriptions were issued
#[derive(Debug, Default)]
pub struct SubscriptionReport {
    pub subscribed: Vec<String>,
    pub failed: Vec<SubscriptionError>,
}

impl SubscriptionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Holds the immutable topic set and subscribes it on each connect
#[derive(Debug, Clone)]
pub struct SubscriptionManager {
    topics: Arc<[TopicSubscription]>,
}

impl SubscriptionManager {
    pub fn new(topics: Vec<TopicSubscription>) -> Self {
        Self {
            topics: topics.into(),
        }
    }

    pub fn topics(&self) -> &[TopicSubscription] {
        &self.topics
    }

    /// Subscribe every configured topic; one failure does not stop the rest
    pub async fn on_connected(&self, subscriber: &dyn Subscriber) -> SubscriptionReport {
        let mut report = SubscriptionReport::default();

        for subscription in self.topics.iter() {
            match subscriber
                .subscribe(&subscription.topic, subscription.qos)
                .await
            {
                Ok(()) => {
                    debug!(topic = %subscription.topic, qos = u8::from(subscription.qos), "Subscribe request sent");
                    report.subscribed.push(subscription.topic.clone());
                }
                Err(e) => {
                    error!(topic = %subscription.topic, error = %e, "Failed to subscribe");
                    metrics().subscription_failed();
                    report.failed.push(e);
                }
            }
        }

        info!(
            subscribed = report.subscribed.len(),
            failed = report.failed.len(),
            "Subscriptions issued"
        );
        report
    }

    /// Check the reason codes of a SUBACK
    pub fn check_suback(&self, packet_id: u16, return_codes: &[u8]) -> Result<(), SubscriptionError> {
        match MessageHandler::validate_subscription_success(return_codes) {
            Ok(()) => {
                for _ in return_codes {
                    metrics().subscription_succeeded();
                }
                debug!(packet_id, ?return_codes, "Subscription confirmed");
                Ok(())
            }
            Err(codes) => {
                metrics().subscription_failed();
                let error = SubscriptionError::Rejected { packet_id, codes };
                error!(error = %error, "Subscription rejected by broker");
                Err(error)
            }
        }
    }
}
