//! Prometheus-kompatible Metriken fuer Voicerelay
//!
//! Registrierte Metriken:
//! - `voicerelay_sessions_active` – Gauge: Aktive Voice-Sessions
//! - `voicerelay_inbound_packets_total` – Counter: Empfangene Datagramme
//! - `voicerelay_inbound_packets_dropped_total` – Counter: Verworfene Datagramme (grund)
//! - `voicerelay_model_chunks_total` – Counter: An das Sprachmodell gesendete Chunks
//! - `voicerelay_outbound_packets_total` – Counter: In den Anruf gesendete Pakete
//! - `voicerelay_outbound_queue_dropped_total` – Counter: Wegen voller Pacing-Queue verworfen
//! - `voicerelay_speech_reconnects_total` – Counter: Wiederverbindungen zum Sprachmodell
//! - `voicerelay_pacing_delay_seconds` – Histogram: Verspaetung gegenueber dem Sendetakt

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Alle Voicerelay-Prometheus-Metriken
#[derive(Clone)]
pub struct RelayMetrics {
    pub registry: Arc<Registry>,

    // Sessions
    pub sessions_active: IntGauge,
    pub speech_reconnects_total: IntCounter,

    // Eingehend (Anruf -> Modell)
    pub inbound_packets_total: IntCounter,
    pub inbound_packets_dropped_total: IntCounterVec,
    pub model_chunks_total: IntCounter,

    // Ausgehend (Modell -> Anruf)
    pub outbound_packets_total: IntCounter,
    pub outbound_queue_dropped_total: IntCounter,
    pub pacing_delay_seconds: Histogram,
}

impl RelayMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Sessions ---
        let sessions_active = IntGauge::with_opts(Opts::new(
            "voicerelay_sessions_active",
            "Anzahl aktiver Voice-Sessions",
        ))?;
        registry.register(Box::new(sessions_active.clone()))?;

        let speech_reconnects_total = IntCounter::with_opts(Opts::new(
            "voicerelay_speech_reconnects_total",
            "Wiederverbindungen zum Sprachmodell",
        ))?;
        registry.register(Box::new(speech_reconnects_total.clone()))?;

        // --- Eingehend ---
        let inbound_packets_total = IntCounter::with_opts(Opts::new(
            "voicerelay_inbound_packets_total",
            "Empfangene Datagramme aus dem Anruf",
        ))?;
        registry.register(Box::new(inbound_packets_total.clone()))?;

        let inbound_packets_dropped_total = IntCounterVec::new(
            Opts::new(
                "voicerelay_inbound_packets_dropped_total",
                "Verworfene Datagramme nach Grund",
            ),
            &["grund"],
        )?;
        registry.register(Box::new(inbound_packets_dropped_total.clone()))?;

        let model_chunks_total = IntCounter::with_opts(Opts::new(
            "voicerelay_model_chunks_total",
            "An das Sprachmodell gesendete Audio-Chunks",
        ))?;
        registry.register(Box::new(model_chunks_total.clone()))?;

        // --- Ausgehend ---
        let outbound_packets_total = IntCounter::with_opts(Opts::new(
            "voicerelay_outbound_packets_total",
            "In den Anruf gesendete Pakete",
        ))?;
        registry.register(Box::new(outbound_packets_total.clone()))?;

        let outbound_queue_dropped_total = IntCounter::with_opts(Opts::new(
            "voicerelay_outbound_queue_dropped_total",
            "Wegen voller Pacing-Queue verworfene Pakete",
        ))?;
        registry.register(Box::new(outbound_queue_dropped_total.clone()))?;

        let pacing_delay_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "voicerelay_pacing_delay_seconds",
                "Verspaetung eines Pakets gegenueber seinem Sendezeitpunkt",
            )
            .buckets(vec![0.0005, 0.001, 0.002, 0.005, 0.01, 0.02, 0.05]),
        )?;
        registry.register(Box::new(pacing_delay_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            sessions_active,
            speech_reconnects_total,
            inbound_packets_total,
            inbound_packets_dropped_total,
            model_chunks_total,
            outbound_packets_total,
            outbound_queue_dropped_total,
            pacing_delay_seconds,
        })
    }

    /// Zaehlt ein verworfenes Datagramm unter seinem Grund
    pub fn inbound_verworfen(&self, grund: &str) {
        self.inbound_packets_dropped_total
            .with_label_values(&[grund])
            .inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: RelayMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<RelayMetrics>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = RelayMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn gauge_sessions_setzen() {
        let metriken = RelayMetrics::neu().unwrap();
        metriken.sessions_active.inc();
        metriken.sessions_active.inc();
        metriken.sessions_active.dec();
        assert_eq!(metriken.sessions_active.get(), 1);
    }

    #[test]
    fn verworfen_mit_grund() {
        let metriken = RelayMetrics::neu().unwrap();
        metriken.inbound_verworfen("entschluesselung");
        metriken.inbound_verworfen("entschluesselung");
        metriken.inbound_verworfen("header");
        assert_eq!(
            metriken
                .inbound_packets_dropped_total
                .with_label_values(&["entschluesselung"])
                .get(),
            2
        );
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = RelayMetrics::neu().unwrap();
        metriken.outbound_packets_total.inc_by(5);
        metriken.pacing_delay_seconds.observe(0.001);

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("voicerelay_outbound_packets_total 5"));
        assert!(output.contains("voicerelay_pacing_delay_seconds_bucket"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn alle_metriken_in_registry_registriert() {
        let metriken = RelayMetrics::neu().unwrap();
        // Vec-Metriken erscheinen in gather() erst nach dem ersten Label-Zugriff
        metriken.inbound_verworfen("header");

        let families = metriken.registry.gather();
        let namen: Vec<&str> = families.iter().map(|f| f.get_name()).collect();

        for name in [
            "voicerelay_sessions_active",
            "voicerelay_speech_reconnects_total",
            "voicerelay_inbound_packets_total",
            "voicerelay_inbound_packets_dropped_total",
            "voicerelay_model_chunks_total",
            "voicerelay_outbound_packets_total",
            "voicerelay_outbound_queue_dropped_total",
            "voicerelay_pacing_delay_seconds",
        ] {
            assert!(namen.contains(&name), "{name} fehlt");
        }
    }

    #[test]
    fn zwei_instanzen_unabhaengig() {
        let a = RelayMetrics::neu().unwrap();
        let b = RelayMetrics::neu().unwrap();
        a.model_chunks_total.inc();
        assert_eq!(b.model_chunks_total.get(), 0);
    }
}
