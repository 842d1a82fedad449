//! Payload-Verschluesselung einer Voice-Session
//!
//! XSalsa20-Poly1305 (secretbox) mit dem 32-Byte-Schluessel des Anrufs.
//! Der 12-Byte-Header bleibt im Klartext.
//!
//! ## Ausgehend
//! ```text
//! Nonce:  [header(12)] [zaehler(12, little-endian)]
//! Paket:  [header(12)] [ciphertext + tag(16)]
//! ```
//! Der Zaehler steigt pro gesendetem Paket; eine Nonce wiederholt sich unter
//! demselben Schluessel nie.
//!
//! ## Eingehend
//! - `Normal`: Nonce = Header, mit Nullen aufgefuellt
//! - `Lite`: die letzten 4 Bytes des Pakets sind die Nonce, mit Nullen aufgefuellt

use std::sync::atomic::{AtomicU64, Ordering};

use crypto_secretbox::{
    aead::{Aead, KeyInit},
    Nonce, XSalsa20Poly1305,
};

use crate::error::{CryptoError, CryptoResult};
use crate::types::{SecretBytes, VerschluesselungsModus};

/// Laenge des Session-Schluessels
pub const SCHLUESSEL_LAENGE: usize = 32;

/// Laenge des Klartext-Headers vor dem Ciphertext
pub const HEADER_LAENGE: usize = 12;

/// Laenge des Poly1305-Tags
pub const TAG_LAENGE: usize = 16;

/// Laenge des Nonce-Anhangs im Lite-Modus
pub const LITE_NONCE_LAENGE: usize = 4;

const NONCE_LAENGE: usize = 24;

/// Verschluesselungskontext, Lebensdauer = Voice-Session
pub struct CryptoContext {
    cipher: XSalsa20Poly1305,
    modus: VerschluesselungsModus,
    /// Naechster ausgehender Nonce-Zaehler
    zaehler: AtomicU64,
}

impl std::fmt::Debug for CryptoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoContext")
            .field("modus", &self.modus)
            .field("zaehler", &self.zaehler.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CryptoContext {
    /// Erstellt einen Kontext aus dem Session-Schluessel
    pub fn neu(schluessel: &SecretBytes, modus: VerschluesselungsModus) -> CryptoResult<Self> {
        if schluessel.len() != SCHLUESSEL_LAENGE {
            return Err(CryptoError::UngueltigeSchluesselLaenge {
                erwartet: SCHLUESSEL_LAENGE,
                erhalten: schluessel.len(),
            });
        }
        let cipher = XSalsa20Poly1305::new_from_slice(schluessel.as_bytes()).map_err(|_| {
            CryptoError::UngueltigeSchluesselLaenge {
                erwartet: SCHLUESSEL_LAENGE,
                erhalten: schluessel.len(),
            }
        })?;

        Ok(Self {
            cipher,
            modus,
            zaehler: AtomicU64::new(0),
        })
    }

    pub fn modus(&self) -> VerschluesselungsModus {
        self.modus
    }

    /// Anzahl bisher vergebener ausgehender Nonces
    pub fn gesendete_nonces(&self) -> u64 {
        self.zaehler.load(Ordering::Relaxed)
    }

    /// Verschluesselt einen Opus-Frame und liefert das fertige Paket (Header + Ciphertext)
    pub fn verschluesseln(&self, header: &[u8; HEADER_LAENGE], klartext: &[u8]) -> CryptoResult<Vec<u8>> {
        let zaehler = self.zaehler.fetch_add(1, Ordering::Relaxed);
        let nonce = ausgehende_nonce(header, zaehler);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), klartext)
            .map_err(|e| CryptoError::Verschluesselung(e.to_string()))?;

        let mut paket = Vec::with_capacity(HEADER_LAENGE + ciphertext.len());
        paket.extend_from_slice(header);
        paket.extend_from_slice(&ciphertext);
        Ok(paket)
    }

    /// Entschluesselt ein eingehendes Paket (inklusive Header) nach dem Modus der Session
    pub fn entschluesseln(&self, paket: &[u8]) -> CryptoResult<Vec<u8>> {
        let minimum = match self.modus {
            VerschluesselungsModus::Normal => HEADER_LAENGE + TAG_LAENGE,
            VerschluesselungsModus::Lite => HEADER_LAENGE + TAG_LAENGE + LITE_NONCE_LAENGE,
        };
        if paket.len() < minimum {
            return Err(CryptoError::PaketZuKurz {
                laenge: paket.len(),
                minimum,
            });
        }

        let mut nonce = [0u8; NONCE_LAENGE];
        let ciphertext = match self.modus {
            VerschluesselungsModus::Normal => {
                nonce[..HEADER_LAENGE].copy_from_slice(&paket[..HEADER_LAENGE]);
                &paket[HEADER_LAENGE..]
            }
            VerschluesselungsModus::Lite => {
                let ende = paket.len() - LITE_NONCE_LAENGE;
                nonce[..LITE_NONCE_LAENGE].copy_from_slice(&paket[ende..]);
                &paket[HEADER_LAENGE..ende]
            }
        };

        self.cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|e| CryptoError::Entschluesselung(e.to_string()))
    }

    #[cfg(any(test, feature = "test-util"))]
    /// Entschluesselt ein ausgehend erzeugtes Paket mit bekanntem Zaehlerstand
    ///
    /// Gegenstueck zu [`verschluesseln`](Self::verschluesseln) fuer Empfaenger,
    /// die den Zaehler mitfuehren.
    pub fn entschluesseln_mit_zaehler(&self, paket: &[u8], zaehler: u64) -> CryptoResult<Vec<u8>> {
        if paket.len() < HEADER_LAENGE + TAG_LAENGE {
            return Err(CryptoError::PaketZuKurz {
                laenge: paket.len(),
                minimum: HEADER_LAENGE + TAG_LAENGE,
            });
        }
        let mut header = [0u8; HEADER_LAENGE];
        header.copy_from_slice(&paket[..HEADER_LAENGE]);
        let nonce = ausgehende_nonce(&header, zaehler);

        self.cipher
            .decrypt(Nonce::from_slice(&nonce), &paket[HEADER_LAENGE..])
            .map_err(|e| CryptoError::Entschluesselung(e.to_string()))
    }

    #[cfg(any(test, feature = "test-util"))]
    /// Verschluesselt wie die Gegenstelle des Call-Transports im Modus der Session
    ///
    /// `Normal` nutzt den Header als Nonce, `Lite` haengt `lite_nonce`
    /// (big-endian) an das Paket an.
    pub fn eingehend_verschluesseln(
        &self,
        header: &[u8; HEADER_LAENGE],
        klartext: &[u8],
        lite_nonce: u32,
    ) -> CryptoResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LAENGE];
        match self.modus {
            VerschluesselungsModus::Normal => nonce[..HEADER_LAENGE].copy_from_slice(header),
            VerschluesselungsModus::Lite => {
                nonce[..LITE_NONCE_LAENGE].copy_from_slice(&lite_nonce.to_be_bytes())
            }
        }

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), klartext)
            .map_err(|e| CryptoError::Verschluesselung(e.to_string()))?;

        let mut paket = Vec::with_capacity(HEADER_LAENGE + ciphertext.len() + LITE_NONCE_LAENGE);
        paket.extend_from_slice(header);
        paket.extend_from_slice(&ciphertext);
        if self.modus == VerschluesselungsModus::Lite {
            paket.extend_from_slice(&lite_nonce.to_be_bytes());
        }
        Ok(paket)
    }
}

/// Nonce fuer ausgehende Pakete: Header gefolgt vom 12-Byte-Zaehler (little-endian)
pub fn ausgehende_nonce(header: &[u8; HEADER_LAENGE], zaehler: u64) -> [u8; NONCE_LAENGE] {
    let mut nonce = [0u8; NONCE_LAENGE];
    nonce[..HEADER_LAENGE].copy_from_slice(header);
    nonce[HEADER_LAENGE..HEADER_LAENGE + 8].copy_from_slice(&zaehler.to_le_bytes());
    nonce
}
