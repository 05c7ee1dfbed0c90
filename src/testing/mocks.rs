//! Mock implementations for testing
//!
//! Scripted broker links, a recording subscriber and a recording sink, so the
//! session and pipeline can be exercised without a broker or certificates.

use crate::processing::{DispatchSink, Rejection};
use crate::protocol::{QosLevel, TelemetryRecord};
use crate::transport::mqtt::{BrokerEndpoint, EventRoute, LinkError, SessionError, SubscriptionError};
use crate::transport::{BrokerLink, LinkFactory, Subscriber};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// One scripted link: events returned in order, then the link goes idle
pub type LinkScript = Vec<Result<EventRoute, LinkError>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Records subscribe calls; optionally fails for chosen topics
#[derive(Debug, Clone, Default)]
pub struct MockSubscriber {
    calls: Arc<Mutex<Vec<(String, QosLevel)>>>,
    failing: Arc<Vec<String>>,
}

impl MockSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(topics: &[&str]) -> Self {
        Self {
            calls: Arc::default(),
            failing: Arc::new(topics.iter().map(|t| t.to_string()).collect()),
        }
    }

    /// Every subscribe request seen so far, failed ones included
    pub fn calls(&self) -> Vec<(String, QosLevel)> {
        lock(&self.calls).clone()
    }

    pub fn calls_for(&self, topic: &str) -> usize {
        lock(&self.calls).iter().filter(|(t, _)| t == topic).count()
    }
}

#[async_trait]
impl Subscriber for MockSubscriber {
    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), SubscriptionError> {
        lock(&self.calls).push((topic.to_string(), qos));

        if self.failing.iter().any(|t| t == topic) {
            return Err(SubscriptionError::Request {
                topic: topic.to_string(),
                reason: "mock subscribe failure".to_string(),
            });
        }
        Ok(())
    }
}

/// A link that replays a script and then waits forever
pub struct ScriptedLink {
    events: VecDeque<Result<EventRoute, LinkError>>,
    subscriber: MockSubscriber,
    disconnects: Arc<AtomicUsize>,
}

#[async_trait]
impl BrokerLink for ScriptedLink {
    async fn next_event(&mut self) -> Result<EventRoute, LinkError> {
        match self.events.pop_front() {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    fn subscriber(&self) -> Arc<dyn Subscriber> {
        Arc::new(self.subscriber.clone())
    }

    async fn disconnect(&mut self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out one [`ScriptedLink`] per connection attempt
///
/// Once the scripts run out, every further link fails immediately with
/// [`LinkError::Lost`].
pub struct MockLinkFactory {
    scripts: Mutex<VecDeque<LinkScript>>,
    subscriber: MockSubscriber,
    establish_count: AtomicUsize,
    disconnects: Arc<AtomicUsize>,
}

impl MockLinkFactory {
    pub fn new(scripts: Vec<LinkScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            subscriber: MockSubscriber::new(),
            establish_count: AtomicUsize::new(0),
            disconnects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Use a particular subscriber for every link
    pub fn with_subscriber(mut self, subscriber: MockSubscriber) -> Self {
        self.subscriber = subscriber;
        self
    }

    /// Shared by every link this factory creates
    pub fn subscriber(&self) -> MockSubscriber {
        self.subscriber.clone()
    }

    pub fn establish_count(&self) -> usize {
        self.establish_count.load(Ordering::SeqCst)
    }

    /// DISCONNECTs sent across all links
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl LinkFactory for MockLinkFactory {
    fn establish(&self, _endpoint: &BrokerEndpoint) -> Result<Box<dyn BrokerLink>, SessionError> {
        self.establish_count.fetch_add(1, Ordering::SeqCst);

        let events = lock(&self.scripts)
            .pop_front()
            .unwrap_or_else(|| vec![Err(LinkError::Lost("no more scripted links".to_string()))]);

        Ok(Box::new(ScriptedLink {
            events: events.into(),
            subscriber: self.subscriber.clone(),
            disconnects: self.disconnects.clone(),
        }))
    }
}

/// Keeps everything the pipeline dispatches
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<TelemetryRecord>>>,
    rejections: Arc<Mutex<Vec<Rejection>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        lock(&self.records).clone()
    }

    pub fn rejections(&self) -> Vec<Rejection> {
        lock(&self.rejections).clone()
    }
}

#[async_trait]
impl DispatchSink for RecordingSink {
    async fn dispatch(&self, record: TelemetryRecord) {
        lock(&self.records).push(record);
    }

    async fn reject(&self, rejection: &Rejection) {
        lock(&self.rejections).push(rejection.clone());
    }
}
