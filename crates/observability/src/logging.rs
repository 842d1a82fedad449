//! Structured Logging via tracing-subscriber
//!
//! Die Umgebung hat Vorrang vor der Konfigurationsdatei:
//! - `VR_LOG_LEVEL`: Filter-Direktive, z.B. `debug` oder `voicerelay_voice=trace`
//! - `VR_LOG_FORMAT`: `text` oder `json`
//!
//! Die WebSocket-Crates loggen jeden Frame auf `debug`; sie werden auf `warn`
//! gedeckelt, solange die Direktive sie nicht selbst nennt.

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::{fmt as tracing_fmt, EnvFilter};

const ENV_LEVEL: &str = "VR_LOG_LEVEL";
const ENV_FORMAT: &str = "VR_LOG_FORMAT";

/// Gedeckelte Targets
const LAUTE_TARGETS: &[&str] = &["tungstenite", "tokio_tungstenite", "rustls"];

/// Ausgabeformat der Log-Zeilen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            andere => Err(format!("unbekanntes Log-Format '{andere}'")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

/// Initialisiert das Logging
///
/// Ungueltige Werte fallen auf `info` bzw. `text` zurueck und werden nach
/// der Initialisierung als Warnung gemeldet. Ein zweiter Aufruf laesst den
/// bestehenden Subscriber unveraendert.
pub fn logging_initialisieren(level: &str, format: &str) {
    let direktive = log_level_aus_env().unwrap_or_else(|| level.to_string());
    let (filter, level_ok) = match EnvFilter::try_new(filter_direktive(&direktive)) {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(filter_direktive("info")), false),
    };

    let format_roh = log_format_aus_env().unwrap_or_else(|| format.to_string());
    let format_ok = format_roh.parse::<LogFormat>();

    let _ = match format_ok.clone().unwrap_or_default() {
        LogFormat::Json => tracing_fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => tracing_fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .try_init(),
    };

    if !level_ok {
        tracing::warn!(direktive = %direktive, "Ungueltiger Log-Level, verwende info");
    }
    if let Err(e) = format_ok {
        tracing::warn!(fehler = %e, "Verwende Text-Format");
    }
}

/// Haengt die Deckel fuer laute Targets an, sofern die Direktive sie nicht nennt
pub fn filter_direktive(level: &str) -> String {
    let mut direktive = level.trim().to_string();
    let genannt: Vec<String> = direktive
        .split(',')
        .filter_map(|teil| teil.split_once('=').map(|(target, _)| target.trim().to_string()))
        .collect();
    for target in LAUTE_TARGETS {
        if !genannt.iter().any(|g| g == target) {
            direktive.push_str(&format!(",{target}=warn"));
        }
    }
    direktive
}

fn log_level_aus_env() -> Option<String> {
    std::env::var(ENV_LEVEL).ok().filter(|s| !s.trim().is_empty())
}

fn log_format_aus_env() -> Option<String> {
    std::env::var(ENV_FORMAT).ok().filter(|s| !s.trim().is_empty())
}

/// Prueft einen einfachen Level-Namen
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}
