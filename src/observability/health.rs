//! Health check HTTP server for container orchestration
//!
//! Serves the session state and ingest counters over plain HTTP:
//! `/health`, `/ready`, `/live` and `/metrics`.

use crate::observability::metrics::{current_timestamp, metrics};
use crate::transport::mqtt::health_monitor::MESSAGE_STALENESS_THRESHOLD;
use crate::transport::mqtt::ConnectionState;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::sync::watch;
use warp::http::StatusCode;
use warp::Filter;

/// HTTP health check server
pub struct HealthServer {
    node_id: String,
    port: u16,
    state_rx: watch::Receiver<ConnectionState>,
}

impl HealthServer {
    pub fn new(node_id: impl Into<String>, port: u16, state_rx: watch::Receiver<ConnectionState>) -> Self {
        Self {
            node_id: node_id.into(),
            port,
            state_rx,
        }
    }

    /// All endpoints as one warp filter
    pub fn routes(
        &self,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let health_state = self.state_rx.clone();
        let ready_state = self.state_rx.clone();
        let node_id = self.node_id.clone();

        // GET /health - overall status with individual checks
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let status = health_status(&node_id, &health_state.borrow());
                async move {
                    let code = if status.status == "healthy" {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
                }
            });

        // GET /ready - ready only while connected to the broker
        let ready_route = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let state = ready_state.borrow().clone();
                async move {
                    let response = ReadinessResponse {
                        ready: state.is_connected(),
                        state: state.label().to_string(),
                        timestamp: current_timestamp(),
                    };
                    let code = if response.ready {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(
                        warp::reply::json(&response),
                        code,
                    ))
                }
            });

        // GET /live - the process is up
        let live_route = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: current_timestamp(),
                })
            });

        // GET /metrics
        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| warp::reply::json(&metrics().get_metrics()));

        health_route
            .or(ready_route)
            .or(live_route)
            .or(metrics_route)
    }

    /// Serve until the task is dropped
    pub async fn start(self) {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!(%addr, "Starting health server");
        warp::serve(self.routes()).run(addr).await;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    node_id: String,
    state: String,
    uptime_seconds: u64,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    state: String,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

fn health_status(node_id: &str, state: &ConnectionState) -> HealthStatus {
    let now = current_timestamp();
    let snapshot = metrics().get_metrics();

    let mut checks = HashMap::new();
    checks.insert("broker".to_string(), broker_check(state));
    checks.insert(
        "ingest".to_string(),
        ingest_check(snapshot.ingest.last_message_time, now),
    );

    // A quiet ingest stream is reported but does not make the node unhealthy
    let status = if state.is_connected() {
        "healthy"
    } else {
        "unhealthy"
    };

    HealthStatus {
        status: status.to_string(),
        timestamp: now,
        node_id: node_id.to_string(),
        state: state.to_string(),
        uptime_seconds: snapshot.lifecycle.uptime_seconds,
        checks,
    }
}

fn broker_check(state: &ConnectionState) -> HealthCheck {
    if state.is_connected() {
        HealthCheck {
            status: "healthy".to_string(),
            message: Some("Broker session established".to_string()),
        }
    } else {
        HealthCheck {
            status: "unhealthy".to_string(),
            message: Some(format!("Broker session {state}")),
        }
    }
}

fn ingest_check(last_message_time: u64, now: u64) -> HealthCheck {
    let threshold = MESSAGE_STALENESS_THRESHOLD.as_secs();

    if last_message_time == 0 {
        HealthCheck {
            status: "healthy".to_string(),
            message: Some("No messages received yet".to_string()),
        }
    } else if now.saturating_sub(last_message_time) > threshold {
        HealthCheck {
            status: "stale".to_string(),
            message: Some(format!(
                "No messages for {} seconds",
                now.saturating_sub(last_message_time)
            )),
        }
    } else {
        HealthCheck {
            status: "healthy".to_string(),
            message: Some("Recent message activity".to_string()),
        }
    }
}
