//! # voicerelay-crypto
//!
//! Payload-Verschluesselung fuer den Call-Transport.
//!
//! ## Module
//! - `context` - XSalsa20-Poly1305 mit Nonce-Schemata pro Richtung
//! - `types` - Schluessel-Container und Verschluesselungsmodus
//! - `error` - Fehlertypen

pub mod context;
pub mod error;
pub mod types;

// Bequeme Re-Exports
pub use context::{ausgehende_nonce, CryptoContext, SCHLUESSEL_LAENGE};
pub use error::{CryptoError, CryptoResult};
pub use types::{SecretBytes, VerschluesselungsModus};
