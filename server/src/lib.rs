//! voicerelay-server – Bibliotheks-Root
//!
//! Deklariert die Server-Module und stellt den Einstiegspunkt fuer
//! Integrationstests bereit.

pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};

use voicerelay_observability::{observability_server_starten, HealthState, RelayMetrics};
use voicerelay_speech::WsConnector;
use voicerelay_voice::{SessionManager, StatischerGateway};

use config::RelayServerConfig;

/// Haelt den laufenden Relay-Zustand zusammen
pub struct Server {
    pub config: RelayServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: RelayServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Metriken und Health-Check (optional HTTP-Server)
    /// 2. Connector zum Sprachmodell
    /// 3. SessionManager
    /// 4. Beitritt zum konfigurierten Anruf
    /// 5. Auf Ctrl-C warten, dann alle Anrufe verlassen
    pub async fn starten(self) -> Result<()> {
        let metriken = RelayMetrics::neu()?;
        let health = HealthState::neu(metriken.clone());

        if self.config.observability.aktiviert {
            let adresse: SocketAddr = self
                .config
                .observability_bind_adresse()
                .parse()
                .context("Ungueltige Observability-Adresse")?;
            let metriken = metriken.clone();
            let health = health.clone();
            tokio::spawn(async move {
                if let Err(e) = observability_server_starten(adresse, metriken, health).await {
                    tracing::error!(fehler = %e, "Observability-Server beendet");
                }
            });
        }

        let sprache = &self.config.sprache;
        let api_key = std::env::var(&sprache.api_key_env).unwrap_or_else(|_| {
            tracing::warn!(
                variable = %sprache.api_key_env,
                "Kein API-Schluessel gesetzt, Verbindungen zum Sprachmodell werden scheitern"
            );
            String::new()
        });
        let connector = Arc::new(WsConnector::neu(&sprache.url, &sprache.modell, api_key)?);
        tracing::info!(url = %connector.url(), "Sprachmodell-Endpunkt");

        let manager = SessionManager::neu(
            self.config.relay_config(),
            connector,
            self.config.speech_config(),
            metriken,
        )?;

        match &self.config.anruf {
            Some(anruf) => {
                let gateway = Arc::new(StatischerGateway::neu(anruf.statischer_anruf()?));
                let session = manager.join(gateway).await?;
                tracing::info!(
                    call_id = %session.call_id(),
                    session_id = %session.session_id(),
                    "Relay verbunden"
                );
            }
            None => {
                tracing::warn!("Kein [anruf] konfiguriert, Relay wartet ohne Session");
            }
        }
        health.bereit_setzen(true);

        tracing::info!("Relay laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Relay wird beendet");

        health.bereit_setzen(false);
        let verlassen = manager.alle_verlassen().await;
        tracing::info!(sessions = verlassen, "Alle Anrufe verlassen");

        Ok(())
    }
}
