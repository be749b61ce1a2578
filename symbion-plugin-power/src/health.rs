use crate::mqtt::TaskQueue;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub uptime_seconds: u64,
    pub entities: usize,
    pub task_queue_size: usize,
}

#[derive(Clone)]
pub struct HealthState {
    start_time: Instant,
    entities: usize,
    queue: Arc<TaskQueue>,
}

impl HealthState {
    pub fn new(entities: usize, queue: Arc<TaskQueue>) -> Self {
        Self {
            start_time: Instant::now(),
            entities,
            queue,
        }
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: "ok".to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            entities: self.entities,
            task_queue_size: self.queue.len(),
        }
    }
}

async fn health(State(state): State<HealthState>) -> Json<HealthReport> {
    Json(state.report())
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// Bind address resolved before serving, so a port of 0 reports the real one.
pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await
}

pub async fn serve<F>(listener: TcpListener, state: HealthState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "health endpoint listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
