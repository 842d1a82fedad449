//! Sprachmodell-Protokoll (JSON ueber WebSocket)
//!
//! Nur die Nachrichten, die das Relay braucht: Session-Konfiguration und
//! Audio-Eingabe in Richtung Modell, Session-/Antwort-Ereignisse zurueck.
//! Unbekannte Ereignistypen werden als [`ServerEvent::Unbekannt`] gelesen.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session-Konfiguration
// ---------------------------------------------------------------------------

/// Turn-Detection-Parameter (serverseitige Sprachaktivitaetserkennung)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub typ: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    pub create_response: bool,
    pub interrupt_response: bool,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            typ: "server_vad".into(),
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 200,
            create_response: true,
            interrupt_response: true,
        }
    }
}

/// Inhalt einer `session.update`-Nachricht
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionKonfiguration {
    pub turn_detection: TurnDetection,
    pub voice: String,
    pub instructions: String,
    pub modalities: Vec<String>,
    pub temperature: f32,
    pub input_audio_format: String,
    pub output_audio_format: String,
}

impl Default for SessionKonfiguration {
    fn default() -> Self {
        Self {
            turn_detection: TurnDetection::default(),
            voice: "alloy".into(),
            instructions: String::new(),
            modalities: vec!["audio".into(), "text".into()],
            temperature: 0.8,
            input_audio_format: "pcm16".into(),
            output_audio_format: "pcm16".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client -> Modell
// ---------------------------------------------------------------------------

/// Nachrichten vom Relay an das Sprachmodell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionKonfiguration },

    /// Base64-kodiertes pcm16 (little-endian, 24 kHz, Mono)
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
}

// ---------------------------------------------------------------------------
// Modell -> Client
// ---------------------------------------------------------------------------

/// Fehlerdetails eines `error`-Ereignisses
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApiFehler {
    #[serde(rename = "type", default)]
    pub typ: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Ereignisse vom Sprachmodell an das Relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "session.updated")]
    SessionUpdated,

    #[serde(rename = "response.created")]
    ResponseCreated,

    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },

    #[serde(rename = "response.audio.done")]
    ResponseAudioDone,

    #[serde(rename = "response.text.delta")]
    ResponseTextDelta {
        #[serde(alias = "text", default)]
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.done")]
    ResponseDone,

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ApiFehler,
    },

    #[serde(other)]
    Unbekannt,
}

impl ServerEvent {
    /// Parst ein Ereignis aus einem JSON-Text
    pub fn parsen(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
