//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass das Relay ohne Konfigurationsdatei
//! startet (dann ohne statischen Anruf).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use voicerelay_core::CallId;
use voicerelay_crypto::{SecretBytes, VerschluesselungsModus, SCHLUESSEL_LAENGE};
use voicerelay_protocol::codec::OpusConfig;
use voicerelay_protocol::speech::{SessionKonfiguration, TurnDetection};
use voicerelay_speech::ws::{STANDARD_MODELL, STANDARD_URL};
use voicerelay_speech::SpeechConfig;
use voicerelay_voice::{RelayConfig, StatischerAnruf};

/// Vollstaendige Relay-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayServerConfig {
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
    /// Verbindung zum Sprachmodell
    pub sprache: SprachEinstellungen,
    /// Audio-Pipeline
    pub audio: AudioEinstellungen,
    /// Zeitschranken der Session
    pub session: SessionEinstellungen,
    /// Optional: fest konfigurierter Anruf, dem beim Start beigetreten wird
    pub anruf: Option<AnrufEinstellungen>,
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    pub bind_adresse: String,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            bind_adresse: "0.0.0.0".into(),
            port: 9300,
        }
    }
}

/// Sprachmodell-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SprachEinstellungen {
    /// WebSocket-Endpunkt ohne Query
    pub url: String,
    pub modell: String,
    /// Umgebungsvariable mit dem API-Schluessel
    pub api_key_env: String,
    pub stimme: String,
    pub anweisungen: String,
    pub temperatur: f32,
    pub vad_schwelle: f32,
    pub vad_vorlauf_ms: u32,
    pub vad_stille_ms: u32,
    /// Aufeinanderfolgende Trennungen bis zum Abbau der Session
    pub max_versuche: u32,
    pub backoff_ms: u64,
    pub stabil_nach_s: u64,
}

impl Default for SprachEinstellungen {
    fn default() -> Self {
        Self {
            url: STANDARD_URL.into(),
            modell: STANDARD_MODELL.into(),
            api_key_env: "OPENAI_API_KEY".into(),
            stimme: "alloy".into(),
            anweisungen: String::new(),
            temperatur: 0.8,
            vad_schwelle: 0.5,
            vad_vorlauf_ms: 300,
            vad_stille_ms: 200,
            max_versuche: 3,
            backoff_ms: 500,
            stabil_nach_s: 30,
        }
    }
}

/// Audio-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Tiefe des Reorder-Puffers in Paketen
    pub reorder_tiefe: usize,
    /// Chunk-Dauer in Richtung Sprachmodell
    pub chunk_ms: u64,
    /// Ruhephase bis "speaking stopped"
    pub sprech_pause_ms: u64,
    /// Kapazitaet der Pacing-Queue in Frames
    pub sende_queue_groesse: usize,
    pub bitrate_kbps: u16,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            reorder_tiefe: 8,
            chunk_ms: 100,
            sprech_pause_ms: 300,
            sende_queue_groesse: 100,
            bitrate_kbps: 64,
        }
    }
}

/// Zeitschranken einer Session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionEinstellungen {
    pub beitritt_timeout_ms: u64,
    pub abbau_timeout_ms: u64,
    pub thread_join_timeout_ms: u64,
    pub poll_intervall_ms: u64,
}

impl Default for SessionEinstellungen {
    fn default() -> Self {
        Self {
            beitritt_timeout_ms: 20_000,
            abbau_timeout_ms: 2_000,
            thread_join_timeout_ms: 1_000,
            poll_intervall_ms: 10,
        }
    }
}

/// Fest konfigurierter Anruf
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnrufEinstellungen {
    pub kennung: u64,
    /// UDP-Medien-Endpunkt (`host:port`)
    pub server_adresse: SocketAddr,
    #[serde(default = "standard_lokale_adresse")]
    pub lokale_adresse: SocketAddr,
    pub ssrc: u32,
    /// 32-Byte Session-Schluessel, Base64
    pub schluessel_base64: String,
    #[serde(default)]
    pub verschluesselung: VerschluesselungsModus,
}

fn standard_lokale_adresse() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 0))
}

impl AnrufEinstellungen {
    /// Dekodiert den Schluessel und baut die Gateway-Parameter
    pub fn statischer_anruf(&self) -> Result<StatischerAnruf> {
        let schluessel = STANDARD
            .decode(self.schluessel_base64.trim())
            .context("schluessel_base64 ist kein gueltiges Base64")?;
        if schluessel.len() != SCHLUESSEL_LAENGE {
            anyhow::bail!(
                "Schluessel muss {SCHLUESSEL_LAENGE} Bytes haben, hat {}",
                schluessel.len()
            );
        }
        Ok(StatischerAnruf {
            call_id: CallId(self.kennung),
            server_adresse: self.server_adresse,
            lokale_adresse: self.lokale_adresse,
            ssrc: self.ssrc,
            schluessel: SecretBytes::new(schluessel),
            modus: self.verschluesselung,
        })
    }
}

impl RelayServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> String {
        format!(
            "{}:{}",
            self.observability.bind_adresse, self.observability.port
        )
    }

    /// Parameter fuer den SessionManager
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            reorder_tiefe: self.audio.reorder_tiefe,
            chunk_dauer: Duration::from_millis(self.audio.chunk_ms),
            sprech_pause: Duration::from_millis(self.audio.sprech_pause_ms),
            sende_queue_groesse: self.audio.sende_queue_groesse,
            beitritt_timeout: Duration::from_millis(self.session.beitritt_timeout_ms),
            abbau_timeout: Duration::from_millis(self.session.abbau_timeout_ms),
            thread_join_timeout: Duration::from_millis(self.session.thread_join_timeout_ms),
            poll_intervall: Duration::from_millis(self.session.poll_intervall_ms),
            opus: OpusConfig::mit_bitrate(self.audio.bitrate_kbps),
            ..RelayConfig::default()
        }
    }

    /// Parameter fuer den Sprachmodell-Client
    pub fn speech_config(&self) -> SpeechConfig {
        let s = &self.sprache;
        let session = SessionKonfiguration {
            turn_detection: TurnDetection {
                threshold: s.vad_schwelle,
                prefix_padding_ms: s.vad_vorlauf_ms,
                silence_duration_ms: s.vad_stille_ms,
                ..TurnDetection::default()
            },
            voice: s.stimme.clone(),
            instructions: s.anweisungen.clone(),
            temperature: s.temperatur,
            ..SessionKonfiguration::default()
        };
        SpeechConfig::default()
            .mit_session(session)
            .mit_wiederverbindung(s.max_versuche, Duration::from_millis(s.backoff_ms))
            .mit_stabilitaet(Duration::from_secs(s.stabil_nach_s))
    }
}
