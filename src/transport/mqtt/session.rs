//! Broker session: connect, receive, reconnect, close
//!
//! `TransportSession` owns the current link and is the only task doing
//! network I/O. Inbound publishes leave it by value over an mpsc channel;
//! its state is published on a watch channel for observers. Every await in
//! the run loop is raced against the shutdown signal.

use super::connection::{
    BrokerEndpoint, ConnectionState, DisconnectReason, LinkError, ReconnectPolicy, SessionError,
};
use super::credentials::TlsMaterial;
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::link::RumqttLinkFactory;
use super::message_handler::EventRoute;
use super::subscriptions::SubscriptionManager;
use crate::config::IngestConfig;
use crate::observability::metrics::metrics;
use crate::protocol::{default_subscriptions, RawMessage, TopicSubscription};
use crate::transport::{BrokerLink, LinkFactory};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Session tuning taken from configuration
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub policy: ReconnectPolicy,
    pub topics: Vec<TopicSubscription>,
    pub connect_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            policy: ReconnectPolicy::default(),
            topics: default_subscriptions(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            policy: config.reconnect_policy(),
            topics: config.topics.clone(),
            connect_timeout: Duration::from_secs(config.mqtt.connect_timeout_secs),
        }
    }
}

/// Cloneable control surface for a running session
///
/// `close()` is synchronous and may be called from any task or thread.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    /// Ask the session to close; `run()` returns promptly afterwards
    pub fn close(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    pub fn is_closing(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

/// A persistent, mutually-authenticated session with the broker
pub struct TransportSession {
    factory: Arc<dyn LinkFactory>,
    policy: ReconnectPolicy,
    subscriptions: SubscriptionManager,
    connect_timeout: Duration,
    inbound: mpsc::Sender<RawMessage>,
    endpoint: Option<BrokerEndpoint>,
    link: Option<Box<dyn BrokerLink>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    last_refusal: Option<u8>,
    reconnect_count: u32,
    pipeline_closed: bool,
}

impl TransportSession {
    /// Load credentials and prepare a session; nothing is connected yet
    pub fn open(
        config: &IngestConfig,
        inbound: mpsc::Sender<RawMessage>,
    ) -> Result<Self, SessionError> {
        let mqtt = &config.mqtt;
        let tls = TlsMaterial::load(&mqtt.ca_cert, &mqtt.client_cert, &mqtt.client_key)?;
        info!(node_id = %config.node.id, "Loaded broker credentials");

        let factory = RumqttLinkFactory::new(config.node.id.clone(), tls, config.topics.len());
        Ok(Self::new(
            Arc::new(factory),
            SessionSettings::from_config(config),
            inbound,
        ))
    }

    /// Build a session around any link factory
    pub fn new(
        factory: Arc<dyn LinkFactory>,
        settings: SessionSettings,
        inbound: mpsc::Sender<RawMessage>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            factory,
            policy: settings.policy,
            subscriptions: SubscriptionManager::new(settings.topics),
            connect_timeout: settings.connect_timeout,
            inbound,
            endpoint: None,
            link: None,
            state_tx,
            state_rx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            last_refusal: None,
            reconnect_count: 0,
            pipeline_closed: false,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            state_rx: self.state_rx.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Reason code of the most recent CONNACK refusal
    pub fn last_refusal(&self) -> Option<u8> {
        self.last_refusal
    }

    /// Number of successful reconnections since the session was created
    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn apply(&self, event: ConnectionEvent) {
        let next = HealthMonitor::determine_next_state(event);
        let previous = self.state_tx.send_replace(next.clone());
        if previous != next {
            HealthMonitor::log_state_transition(&previous, &next);
            metrics().set_session_state(next.label());
        }
    }

    /// Single connection attempt, waiting up to the connect timeout for CONNACK
    ///
    /// On success the configured topics are subscribed before returning.
    pub async fn connect(&mut self, endpoint: &BrokerEndpoint) -> Result<(), SessionError> {
        if self.shutdown_requested() {
            return Err(SessionError::ShutdownRequested);
        }
        if let Some(mut previous) = self.link.take() {
            debug!("Replacing existing broker link");
            previous.disconnect().await;
        }

        self.endpoint = Some(endpoint.clone());
        self.apply(ConnectionEvent::ConnectStarted);
        info!(broker = %endpoint, "Connecting to broker");

        match self.attempt(endpoint).await {
            Ok(link) => {
                self.on_established(link).await;
                Ok(())
            }
            Err(error) => {
                self.on_attempt_failed(&error);
                Err(error)
            }
        }
    }

    /// Drive the link until close is requested
    ///
    /// Unexpected disconnects are retried per the reconnect policy. Returns
    /// `Ok` after a requested close; errors are fatal (handshake failure
    /// without `retry_on_handshake_failure`, or attempts exhausted).
    pub async fn run(&mut self) -> Result<(), SessionError> {
        if self.endpoint.is_none() {
            return Err(SessionError::NotConnected {
                state: self.state(),
            });
        }

        let mut shutdown_rx = self.shutdown_rx.clone();
        let result = loop {
            if *shutdown_rx.borrow() {
                break Ok(());
            }

            if self.link.is_none() {
                match self.reconnect().await {
                    Ok(()) => continue,
                    Err(SessionError::ShutdownRequested) => break Ok(()),
                    Err(error) => break Err(error),
                }
            }

            let next = match self.link.as_mut() {
                Some(link) => {
                    tokio::select! {
                        biased;
                        _ = wait_for_shutdown(&mut shutdown_rx) => None,
                        event = link.next_event() => Some(event),
                    }
                }
                None => continue,
            };

            match next {
                None => break Ok(()),
                Some(Ok(route)) => self.handle_route(route, &mut shutdown_rx).await,
                Some(Err(error)) => self.on_link_lost(&error),
            }
        };

        match &result {
            Ok(()) => self.release().await,
            Err(error) => warn!(error = %error, "Broker session stopped"),
        }
        result
    }

    /// Send DISCONNECT best-effort, release the link and stop `run()`
    pub async fn close(&mut self) {
        self.shutdown_tx.send_replace(true);
        self.release().await;
    }

    async fn release(&mut self) {
        let already_closed = matches!(
            self.state(),
            ConnectionState::Disconnected(DisconnectReason::Closed)
        );
        if already_closed && self.link.is_none() {
            return;
        }

        self.apply(ConnectionEvent::ShutdownStarted);
        if let Some(mut link) = self.link.take() {
            link.disconnect().await;
        }
        metrics().connection_closed();
        self.apply(ConnectionEvent::Closed);
    }

    async fn attempt(
        &mut self,
        endpoint: &BrokerEndpoint,
    ) -> Result<Box<dyn BrokerLink>, SessionError> {
        metrics().connection_attempt();
        let mut link = self.factory.establish(endpoint)?;

        let timeout = self.connect_timeout;
        let mut shutdown_rx = self.shutdown_rx.clone();
        let outcome = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut shutdown_rx) => None,
            result = tokio::time::timeout(timeout, await_connack(link.as_mut())) => Some(result),
        };

        match outcome {
            Some(Ok(Ok(()))) => Ok(link),
            Some(Ok(Err(error))) => Err(error.into()),
            Some(Err(_elapsed)) => Err(SessionError::Timeout(timeout)),
            None => Err(SessionError::ShutdownRequested),
        }
    }

    async fn on_established(&mut self, link: Box<dyn BrokerLink>) {
        metrics().connection_established();

        let subscriber = link.subscriber();
        self.link = Some(link);
        self.apply(ConnectionEvent::ConnAckReceived);

        if !HealthMonitor::can_subscribe(&self.state()) {
            debug!(state = %self.state(), "Not subscribing outside Connected");
            return;
        }
        let report = self.subscriptions.on_connected(subscriber.as_ref()).await;
        if !report.is_complete() {
            warn!(
                failed = report.failed.len(),
                "Some subscriptions failed, retrying on next connect"
            );
        }
    }

    fn on_attempt_failed(&mut self, error: &SessionError) {
        let refusal = match error {
            SessionError::ConnectionRefused { code } => Some(*code),
            _ => None,
        };
        if refusal.is_some() {
            self.last_refusal = refusal;
        }
        metrics().connection_failed(refusal);
        self.apply(ConnectionEvent::ConnectionFailed(
            DisconnectReason::from_session_error(error),
        ));
    }

    fn on_link_lost(&mut self, error: &LinkError) {
        // Dropping the link closes the socket and its TLS context
        self.link = None;
        if let LinkError::Refused(code) = error {
            self.last_refusal = Some(*code);
        }
        metrics().connection_lost();
        self.apply(ConnectionEvent::ConnectionFailed(error.into()));
    }

    async fn handle_route(&mut self, route: EventRoute, shutdown_rx: &mut watch::Receiver<bool>) {
        match route {
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                trace!(%topic, bytes = payload.len(), retain, "Message received");
                self.forward(RawMessage::new(topic, payload), shutdown_rx)
                    .await;
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                return_codes,
            } => {
                // Failures are logged and counted; the next connect retries them
                let _ = self.subscriptions.check_suback(packet_id, &return_codes);
            }
            EventRoute::Disconnected => {
                self.on_link_lost(&LinkError::Lost("disconnected by broker".to_string()));
            }
            EventRoute::ConnectionRefused { code } => {
                self.on_link_lost(&LinkError::Refused(code));
            }
            EventRoute::ConnectionAcknowledged => {
                debug!("CONNACK on an established link ignored");
            }
            EventRoute::InfrastructureEvent(event) => {
                trace!(%event, "Broker event");
            }
            EventRoute::OutgoingEvent => {}
        }
    }

    async fn forward(&mut self, raw: RawMessage, shutdown_rx: &mut watch::Receiver<bool>) {
        if self.pipeline_closed {
            return;
        }

        let sent = tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown_rx) => None,
            result = self.inbound.send(raw) => Some(result.is_ok()),
        };

        if sent == Some(false) {
            warn!("Ingest pipeline closed, inbound messages will be dropped");
            self.pipeline_closed = true;
        }
    }

    async fn reconnect(&mut self) -> Result<(), SessionError> {
        let Some(endpoint) = self.endpoint.clone() else {
            return Err(SessionError::NotConnected {
                state: self.state(),
            });
        };

        let mut attempts = 0u32;
        loop {
            let decision = HealthMonitor::should_attempt_reconnection(
                attempts,
                &self.policy,
                self.shutdown_requested(),
            );

            match decision {
                ReconnectionDecision::Proceed { attempt, delay } => {
                    attempts = attempt;
                    self.apply(ConnectionEvent::ReconnectionStarted(attempt));

                    let max_display = self
                        .policy
                        .max_attempts
                        .map_or("unlimited".to_string(), |max| max.to_string());
                    info!(
                        attempt,
                        max_attempts = %max_display,
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling reconnection"
                    );

                    if !interruptible_sleep(self.shutdown_rx.clone(), delay).await {
                        return Err(SessionError::ShutdownRequested);
                    }

                    match self.attempt(&endpoint).await {
                        Ok(link) => {
                            self.reconnect_count += 1;
                            metrics().reconnected();
                            self.on_established(link).await;
                            return Ok(());
                        }
                        Err(SessionError::ShutdownRequested) => {
                            return Err(SessionError::ShutdownRequested);
                        }
                        Err(error) => {
                            self.on_attempt_failed(&error);
                            if matches!(error, SessionError::Handshake(_))
                                && !self.policy.retry_on_handshake_failure
                            {
                                return Err(error);
                            }
                        }
                    }
                }
                ReconnectionDecision::AbortShutdownRequested => {
                    return Err(SessionError::ShutdownRequested);
                }
                ReconnectionDecision::AbortMaxAttemptsExceeded => {
                    self.apply(ConnectionEvent::ReconnectExhausted(attempts));
                    return Err(SessionError::ReconnectExhausted { attempts });
                }
            }
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);

        // Can't send DISCONNECT here; dropping the link still closes the socket
        if self.link.take().is_some() {
            metrics().connection_closed();
            self.state_tx
                .send_replace(ConnectionState::Disconnected(DisconnectReason::Closed));
        }
    }
}

async fn await_connack(link: &mut dyn BrokerLink) -> Result<(), LinkError> {
    loop {
        match link.next_event().await? {
            EventRoute::ConnectionAcknowledged => return Ok(()),
            EventRoute::ConnectionRefused { code } => return Err(LinkError::Refused(code)),
            other => trace!(?other, "Event before CONNACK"),
        }
    }
}

/// Resolves once shutdown is requested
async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    let sender_gone = shutdown_rx.wait_for(|requested| *requested).await.is_err();
    if sender_gone {
        std::future::pending::<()>().await;
    }
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = wait_for_shutdown(&mut shutdown_rx) => {
            info!("Shutdown signal received during reconnection delay");
            false
        }
        _ = tokio::time::sleep(delay) => true,
    }
}
