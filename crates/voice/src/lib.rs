//! voicerelay-voice – Relay-Engine zwischen Anruf und Sprachmodell
//!
//! Verbindet den UDP-Medienkanal eines Anrufs mit einer Sprachsession.
//!
//! ## Module
//! - [`manager`] – Beitritt, Abbau und Ueberwachung der Sessions
//! - [`session`] – Zustand und Ressourcen einer Session
//! - [`registry`] – Sessions nach Anruf
//! - [`gateway`] – Naht zur Call-Plattform
//! - [`transport`] – UDP-Empfangs- und Sende-Thread
//! - [`inbound`] – Anruf -> Sprachmodell
//! - [`outbound`] – Sprachmodell -> Anruf
//! - [`pacing`] – Sende-Queue und Echtzeit-Taktgeber
//! - [`reorder`] – Reorder-Puffer pro Quelle
//! - [`config`] – Laufzeit-Parameter

pub mod config;
pub mod gateway;
pub mod inbound;
pub mod manager;
pub mod outbound;
pub mod pacing;
pub mod registry;
pub mod reorder;
pub mod session;
pub mod transport;

pub use config::RelayConfig;
pub use gateway::{CallConnection, CallGateway, StatischerAnruf, StatischerGateway};
pub use inbound::{InboundPipeline, Verwerfgrund};
pub use manager::SessionManager;
pub use outbound::{OutboundPipeline, PaketZaehler};
pub use pacing::{Pacer, PacingQueue};
pub use registry::SessionRegistry;
pub use reorder::{ReorderPuffer, ReorderStatistik};
pub use session::{Lebenszyklus, SessionSignal, SessionStatistik, VoiceSession};
pub use transport::CallTransport;
