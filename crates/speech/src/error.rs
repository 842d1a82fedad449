//! Fehlertypen des Sprachmodell-Clients

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Fehler der Verbindung zum Sprachmodell
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("WebSocket-Fehler: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("JSON-Fehler: {0}")]
    Serialisierung(#[from] serde_json::Error),

    #[error("Ungueltige URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Ungueltiger Header: {0}")]
    Header(#[from] tungstenite::http::header::InvalidHeaderValue),

    #[error("Base64-Dekodierung fehlgeschlagen: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Verbindung unerwartet geschlossen: {0}")]
    VerbindungGeschlossen(String),

    #[error("Fehler vom Sprachmodell (code={code}): {nachricht}")]
    Api { code: String, nachricht: String },

    #[error("Wiederverbindung nach {versuche} Versuchen aufgegeben")]
    WiederverbindungErschoepft { versuche: u32 },
}

impl SpeechError {
    /// Gibt true zurueck wenn der Fehler eine Transporttrennung ist
    pub fn ist_trennung(&self) -> bool {
        matches!(
            self,
            Self::WebSocket(_) | Self::Verbindung(_) | Self::VerbindungGeschlossen(_)
        )
    }
}

pub type SpeechResult<T> = Result<T, SpeechError>;
