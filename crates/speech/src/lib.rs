//! voicerelay-speech: Client fuer das Realtime-Sprachmodell
//!
//! Haelt eine persistente Streaming-Verbindung, konfiguriert die Session,
//! reicht Audio in beide Richtungen durch und verbindet nach Trennungen
//! begrenzt neu. Der Transport ist hinter [`SpeechConnector`] austauschbar:
//! [`WsConnector`] fuer den echten Endpunkt, [`KanalConnector`] fuer
//! In-Process-Gegenstellen.

pub mod client;
pub mod config;
pub mod error;
pub mod policy;
pub mod state;
pub mod transport;
pub mod ws;

pub use client::{SpeechClient, SprachAusgabe};
pub use config::SpeechConfig;
pub use error::{SpeechError, SpeechResult};
pub use policy::{Entscheidung, ReconnectPolicy};
pub use state::SpeechState;
pub use transport::{KanalConnector, LinkEreignis, LinkGegenstelle, SpeechConnector, SpeechLink};
pub use ws::WsConnector;
