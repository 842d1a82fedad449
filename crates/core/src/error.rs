//! Fehlertypen fuer Voicerelay
//!
//! Zentraler Fehler-Enum fuer alle Fehler, die auf Session-Ebene sichtbar
//! werden. Komponentenlokale Fehler (Decode, Decrypt, Resample) bleiben in
//! ihren Crates und werden dort behandelt.

use thiserror::Error;

use crate::types::CallId;

/// Globaler Result-Alias fuer Voicerelay
pub type Result<T> = std::result::Result<T, RelayError>;

/// Fehlerkategorien des Relays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FehlerKategorie {
    /// Einzelnes Paket unbrauchbar – verwerfen, weitermachen
    TransientesPaket,
    /// Socket unerwartet geschlossen
    TransportTrennung,
    /// Gegenstelle meldet einen strukturierten Fehler
    Protokoll,
    /// Queue voll – nach Policy verwerfen
    Ressourcen,
    /// Beitritt konnte nicht abgeschlossen werden
    Setup,
}

/// Alle Fehler, die den Session-Manager erreichen koennen
#[derive(Debug, Error)]
pub enum RelayError {
    // --- Verbindung & Netzwerk ---
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    #[error("Call-Transport fehlgeschlagen: {0}")]
    Transport(String),

    // --- Session ---
    #[error("Anruf nicht beitretbar: {0}")]
    NichtBeitretbar(String),

    #[error("Fuer {0} existiert bereits eine Session")]
    BereitsVerbunden(CallId),

    #[error("Wiederverbindung nach {versuche} Versuchen aufgegeben")]
    WiederverbindungErschoepft { versuche: u32 },

    // --- Protokoll ---
    #[error("Protokollfehler der Gegenstelle (code={code}): {nachricht}")]
    Protokoll { code: String, nachricht: String },

    #[error("Queue voll: {0}")]
    QueueVoll(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Audio / Krypto (nur beim Aufbau fatal) ---
    #[error("Audiofehler: {0}")]
    Audio(String),

    #[error("Kryptofehler: {0}")]
    Krypto(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl RelayError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::Zeitlimit(_) | Self::Verbindung(_) | Self::Getrennt(_)
        )
    }

    /// Ordnet den Fehler einer Kategorie zu
    pub fn kategorie(&self) -> FehlerKategorie {
        match self {
            Self::Verbindung(_) | Self::Getrennt(_) | Self::Transport(_) => {
                FehlerKategorie::TransportTrennung
            }
            Self::Protokoll { .. } => FehlerKategorie::Protokoll,
            Self::QueueVoll(_) => FehlerKategorie::Ressourcen,
            Self::Audio(_) | Self::Krypto(_) => FehlerKategorie::TransientesPaket,
            Self::Zeitlimit(_)
            | Self::NichtBeitretbar(_)
            | Self::BereitsVerbunden(_)
            | Self::WiederverbindungErschoepft { .. }
            | Self::Konfiguration(_)
            | Self::Intern(_)
            | Self::Anyhow(_) => FehlerKategorie::Setup,
        }
    }
}
