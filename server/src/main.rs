//! Voicerelay Server – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet das Relay.

use anyhow::Result;
use voicerelay_observability::logging_initialisieren;
use voicerelay_server::{config::RelayServerConfig, Server};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("VOICERELAY_CONFIG").unwrap_or_else(|_| "config.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = RelayServerConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Voicerelay wird initialisiert"
    );

    Server::neu(config).starten().await
}
