//! Fehlertypen fuer die Payload-Verschluesselung

use thiserror::Error;

/// Fehler der Payload-Verschluesselung
///
/// Alle Varianten betreffen genau ein Paket und sind fuer die Session nicht fatal,
/// ausser `UngueltigeSchluesselLaenge` beim Aufbau.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),

    #[error("Entschluesselung fehlgeschlagen: {0}")]
    Entschluesselung(String),

    #[error("Ungueltige Schluessel-Laenge: erwartet {erwartet}, erhalten {erhalten}")]
    UngueltigeSchluesselLaenge { erwartet: usize, erhalten: usize },

    #[error("Paket zu kurz: {laenge} Bytes (mindestens {minimum})")]
    PaketZuKurz { laenge: usize, minimum: usize },
}

pub type CryptoResult<T> = Result<T, CryptoError>;
