//! Health-Check-Endpunkt fuer Voicerelay
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Anzahl aktiver Sessions

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::metrics::RelayMetrics;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Prozess laeuft, ist aber (noch) nicht betriebsbereit
    Degraded,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub aktive_sessions: i64,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Arc<Instant>,
    betriebsbereit: Arc<AtomicBool>,
    metriken: RelayMetrics,
}

impl HealthState {
    pub fn neu(metriken: RelayMetrics) -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            betriebsbereit: Arc::new(AtomicBool::new(false)),
            metriken,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn ist_bereit(&self) -> bool {
        self.betriebsbereit.load(Ordering::Relaxed)
    }

    pub fn bereit_setzen(&self, bereit: bool) {
        self.betriebsbereit.store(bereit, Ordering::Relaxed);
    }

    fn antwort(&self) -> HealthResponse {
        HealthResponse {
            status: if self.ist_bereit() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            aktive_sessions: self.metriken.sessions_active.get(),
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Relay-Status zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    // Immer 200, der Zustand steht im Body
    (StatusCode::OK, Json(state.antwort()))
}
