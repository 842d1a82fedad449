//! voicerelay-protocol – Protokoll-Definitionen
//!
//! Dieses Crate definiert die Paketstruktur des Call-Transports, die
//! Audio-Formate beider Seiten und die JSON-Nachrichten des Sprachmodells.

pub mod codec;
pub mod speech;
pub mod voice;

pub use codec::{AudioFormat, OpusConfig, CALL_FORMAT, CALL_FRAME_MS, MODEL_FORMAT};
pub use speech::{ClientEvent, ServerEvent, SessionKonfiguration, TurnDetection};
pub use voice::RtpHeader;
