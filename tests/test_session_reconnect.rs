//! Broker session behavior against scripted links
//!
//! Covers connect, refusal, handshake failure, timeout, reconnect with
//! re-subscription, attempt exhaustion and close from other threads. No
//! broker or certificates are needed.

use bytes::Bytes;
use edge_ingest::protocol::{default_subscriptions, RawMessage};
use edge_ingest::testing::mocks::{LinkScript, MockLinkFactory};
use edge_ingest::transport::mqtt::{
    BrokerEndpoint, ConnectionState, DisconnectReason, EventRoute, LinkError, ReconnectPolicy,
    SessionError, SessionSettings, TransportSession,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn endpoint() -> BrokerEndpoint {
    BrokerEndpoint::new("broker.test", 8883, Duration::from_secs(60))
}

fn fast_settings(max_attempts: Option<u32>) -> SessionSettings {
    SessionSettings {
        policy: ReconnectPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            max_attempts,
            retry_on_handshake_failure: false,
        },
        topics: default_subscriptions(),
        connect_timeout: Duration::from_millis(200),
    }
}

fn session(
    scripts: Vec<LinkScript>,
    settings: SessionSettings,
) -> (
    TransportSession,
    Arc<MockLinkFactory>,
    mpsc::Receiver<RawMessage>,
) {
    let factory = Arc::new(MockLinkFactory::new(scripts));
    let (tx, rx) = mpsc::channel(16);
    let session = TransportSession::new(factory.clone(), settings, tx);
    (session, factory, rx)
}

fn connack() -> Result<EventRoute, LinkError> {
    Ok(EventRoute::ConnectionAcknowledged)
}

fn publish(topic: &str, payload: &'static str) -> Result<EventRoute, LinkError> {
    Ok(EventRoute::MessageReceived {
        topic: topic.to_string(),
        payload: Bytes::from_static(payload.as_bytes()),
        retain: false,
    })
}

fn lost() -> Result<EventRoute, LinkError> {
    Err(LinkError::Lost("connection reset by peer".to_string()))
}

#[tokio::test]
async fn test_connect_subscribes_both_topics() {
    let (mut session, factory, _rx) = session(vec![vec![connack()]], fast_settings(None));

    session.connect(&endpoint()).await.unwrap();

    assert_eq!(session.state(), ConnectionState::Connected);
    let subscriber = factory.subscriber();
    assert_eq!(subscriber.calls_for("/average"), 1);
    assert_eq!(subscriber.calls_for("/energy"), 1);
    assert_eq!(session.last_refusal(), None);
}

#[tokio::test]
async fn test_reconnect_resubscribes_exactly_once_per_connect() {
    let scripts = vec![
        vec![
            connack(),
            publish("/average", r#"{"node_id":"n1","aggregation_result":"1"}"#),
            lost(),
        ],
        vec![
            connack(),
            publish("/energy", r#"{"node_id":"n1","energy_optimal":"1","energy_original":"2","details":"d"}"#),
        ],
    ];
    let (mut session, factory, mut rx) = session(scripts, fast_settings(None));
    session.connect(&endpoint()).await.unwrap();
    let handle = session.handle();

    let task = tokio::spawn(async move {
        let result = session.run().await;
        (session, result)
    });

    let first = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.topic, "/average");
    let second = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(second.topic, "/energy");

    handle.close();
    let (session, result) = timeout(WAIT, task).await.unwrap().unwrap();
    assert!(result.is_ok());

    let subscriber = factory.subscriber();
    assert_eq!(factory.establish_count(), 2);
    assert_eq!(subscriber.calls_for("/average"), 2);
    assert_eq!(subscriber.calls_for("/energy"), 2);
    assert_eq!(session.reconnect_count(), 1);
    assert_eq!(
        session.state(),
        ConnectionState::Disconnected(DisconnectReason::Closed)
    );
    assert_eq!(factory.disconnect_count(), 1);
}

#[tokio::test]
async fn test_transient_initial_failure_recovers_in_run() {
    let scripts = vec![vec![lost()], vec![connack()]];
    let (mut session, factory, _rx) = session(scripts, fast_settings(Some(3)));

    let error = session.connect(&endpoint()).await.unwrap_err();
    assert!(matches!(error, SessionError::ConnectionLost(_)));
    assert!(error.is_transient());
    assert_eq!(factory.subscriber().calls().len(), 0);

    let handle = session.handle();
    let mut state_rx = handle.subscribe_state();
    let task = tokio::spawn(async move {
        let result = session.run().await;
        (session, result)
    });

    timeout(WAIT, state_rx.wait_for(|state| state.is_connected()))
        .await
        .unwrap()
        .unwrap();

    handle.close();
    let (session, result) = timeout(WAIT, task).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(factory.establish_count(), 2);
    assert_eq!(factory.subscriber().calls_for("/average"), 1);
    assert_eq!(factory.subscriber().calls_for("/energy"), 1);
    assert_eq!(session.reconnect_count(), 1);
}

#[tokio::test]
async fn test_refusal_code_is_recorded() {
    let scripts = vec![vec![Ok(EventRoute::ConnectionRefused { code: 0x87 })]];
    let (mut session, _factory, _rx) = session(scripts, fast_settings(None));

    let result = session.connect(&endpoint()).await;

    assert!(matches!(
        result,
        Err(SessionError::ConnectionRefused { code: 0x87 })
    ));
    assert_eq!(session.last_refusal(), Some(0x87));
    assert_eq!(
        session.state(),
        ConnectionState::Disconnected(DisconnectReason::Refused(0x87))
    );
}

#[tokio::test]
async fn test_handshake_failure_at_startup_is_fatal() {
    let scripts = vec![vec![Err(LinkError::Handshake(
        "certificate verify failed".to_string(),
    ))]];
    let (mut session, factory, _rx) = session(scripts, fast_settings(None));

    let error = session.connect(&endpoint()).await.unwrap_err();

    assert!(matches!(error, SessionError::Handshake(_)));
    assert!(!error.is_transient());
    assert_eq!(factory.establish_count(), 1);
    assert_eq!(factory.subscriber().calls().len(), 0);
}

#[tokio::test]
async fn test_connect_times_out_without_connack() {
    let mut settings = fast_settings(None);
    settings.connect_timeout = Duration::from_millis(50);
    let (mut session, _factory, _rx) = session(vec![vec![]], settings);

    let result = session.connect(&endpoint()).await;

    assert!(matches!(result, Err(SessionError::Timeout(_))));
    assert_eq!(
        session.state(),
        ConnectionState::Disconnected(DisconnectReason::Timeout)
    );
}

#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() {
    // After the first link, every attempt fails with a lost connection
    let (mut session, factory, _rx) =
        session(vec![vec![connack(), lost()]], fast_settings(Some(3)));
    session.connect(&endpoint()).await.unwrap();

    let result = timeout(WAIT, session.run()).await.unwrap();

    assert!(matches!(
        result,
        Err(SessionError::ReconnectExhausted { attempts: 3 })
    ));
    assert_eq!(
        session.state(),
        ConnectionState::Disconnected(DisconnectReason::Exhausted(3))
    );
    assert_eq!(factory.establish_count(), 4);
}

#[tokio::test]
async fn test_handshake_failure_during_reconnect_stops_by_default() {
    let scripts = vec![
        vec![connack(), lost()],
        vec![Err(LinkError::Handshake("unknown CA".to_string()))],
    ];
    let (mut session, factory, _rx) = session(scripts, fast_settings(None));
    session.connect(&endpoint()).await.unwrap();

    let result = timeout(WAIT, session.run()).await.unwrap();

    assert!(matches!(result, Err(SessionError::Handshake(_))));
    assert_eq!(factory.establish_count(), 2);
}

#[tokio::test]
async fn test_handshake_failure_during_reconnect_retried_when_enabled() {
    let scripts = vec![
        vec![connack(), lost()],
        vec![Err(LinkError::Handshake("unknown CA".to_string()))],
        vec![connack()],
    ];
    let mut settings = fast_settings(Some(5));
    settings.policy.retry_on_handshake_failure = true;
    let (mut session, factory, _rx) = session(scripts, settings);
    session.connect(&endpoint()).await.unwrap();
    let handle = session.handle();
    let mut state_rx = handle.subscribe_state();

    let task = tokio::spawn(async move {
        let result = session.run().await;
        (session, result)
    });

    // Wait for the third link to come up
    timeout(WAIT, async {
        while factory.establish_count() < 3 || !state_rx.borrow().is_connected() {
            if state_rx.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .unwrap();

    handle.close();
    let (session, result) = timeout(WAIT, task).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(session.reconnect_count(), 1);
    assert_eq!(factory.subscriber().calls_for("/average"), 2);
}

#[tokio::test]
async fn test_close_interrupts_backoff_sleep() {
    let mut settings = fast_settings(None);
    settings.policy.initial_delay = Duration::from_secs(30);
    settings.policy.max_delay = Duration::from_secs(60);
    let (mut session, factory, _rx) = session(vec![vec![connack(), lost()]], settings);
    session.connect(&endpoint()).await.unwrap();
    let handle = session.handle();
    let mut state_rx = handle.subscribe_state();

    let task = tokio::spawn(async move { session.run().await });

    timeout(
        WAIT,
        state_rx.wait_for(|state| matches!(state, ConnectionState::Reconnecting(1))),
    )
    .await
    .unwrap()
    .unwrap();

    let started = Instant::now();
    handle.close();
    let result = timeout(WAIT, task).await.unwrap().unwrap();

    assert!(result.is_ok());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(factory.establish_count(), 1);
    assert_eq!(
        handle.state(),
        ConnectionState::Disconnected(DisconnectReason::Closed)
    );
}

#[tokio::test]
async fn test_close_from_another_thread() {
    let (mut session, factory, _rx) = session(vec![vec![connack()]], fast_settings(None));
    session.connect(&endpoint()).await.unwrap();
    let handle = session.handle();

    let task = tokio::spawn(async move { session.run().await });

    let closer = handle.clone();
    std::thread::spawn(move || closer.close())
        .join()
        .unwrap();

    let result = timeout(WAIT, task).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert!(handle.is_closing());
    assert_eq!(
        handle.state(),
        ConnectionState::Disconnected(DisconnectReason::Closed)
    );
    assert_eq!(factory.disconnect_count(), 1);
}

#[tokio::test]
async fn test_closed_pipeline_does_not_stop_the_session() {
    let scripts = vec![vec![
        connack(),
        publish("/average", "{}"),
        publish("/energy", "{}"),
    ]];
    let (mut session, _factory, rx) = session(scripts, fast_settings(None));
    drop(rx);
    session.connect(&endpoint()).await.unwrap();
    let handle = session.handle();

    let task = tokio::spawn(async move { session.run().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handle.is_connected());

    handle.close();
    let result = timeout(WAIT, task).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (mut session, factory, _rx) = session(vec![vec![connack()]], fast_settings(None));
    session.connect(&endpoint()).await.unwrap();

    session.close().await;
    session.close().await;

    assert_eq!(
        session.state(),
        ConnectionState::Disconnected(DisconnectReason::Closed)
    );
    assert_eq!(factory.disconnect_count(), 1);
}
