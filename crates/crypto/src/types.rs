//! Gemeinsame Typen fuer die Payload-Verschluesselung

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sicherer Schluessel-Container (wird beim Drop genullt)
#[derive(Clone)]
pub struct SecretBytes(pub Vec<u8>);

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([REDACTED] {} bytes)", self.0.len())
    }
}

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Nonce-Schema fuer eingehende Pakete, wie vom Call-Transport ausgehandelt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerschluesselungsModus {
    /// Nonce = 12-Byte-Header, mit Nullen auf 24 Bytes aufgefuellt
    #[default]
    Normal,
    /// Nonce = 4-Byte-Zaehler am Paketende, mit Nullen aufgefuellt
    Lite,
}

impl FromStr for VerschluesselungsModus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "lite" => Ok(Self::Lite),
            anders => Err(format!("Unbekannter Verschluesselungsmodus: {anders}")),
        }
    }
}
