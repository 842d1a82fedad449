//! Fehlertypen fuer Codec und Resampling

use thiserror::Error;

/// Typisierte Art eines Codec-Fehlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFehlerArt {
    UngueltigesArgument,
    PufferZuKlein,
    UngueltigesPaket,
    Intern,
    NichtImplementiert,
}

impl CodecFehlerArt {
    /// Ordnet einen libopus-Fehlercode einer Art zu
    ///
    /// Ungueltiger Zustand (-6) und Allokationsfehler (-7) zaehlen als intern.
    pub fn aus_opus_code(code: i32) -> Self {
        match code {
            -1 => Self::UngueltigesArgument,
            -2 => Self::PufferZuKlein,
            -4 => Self::UngueltigesPaket,
            -5 => Self::NichtImplementiert,
            _ => Self::Intern,
        }
    }
}

impl std::fmt::Display for CodecFehlerArt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::UngueltigesArgument => "ungueltiges Argument",
            Self::PufferZuKlein => "Puffer zu klein",
            Self::UngueltigesPaket => "ungueltiges Paket",
            Self::Intern => "interner Fehler",
            Self::NichtImplementiert => "nicht implementiert",
        };
        f.write_str(text)
    }
}

/// Alle moeglichen Fehler der Audio-Verarbeitung
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Codec-Fehler ({art}): {detail}")]
    Codec { art: CodecFehlerArt, detail: String },

    #[error("Ungueltiges PCM-Format: {0}")]
    Format(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),
}

impl AudioError {
    /// Gibt die Codec-Fehlerart zurueck, falls es ein Codec-Fehler ist
    pub fn codec_art(&self) -> Option<CodecFehlerArt> {
        match self {
            Self::Codec { art, .. } => Some(*art),
            _ => None,
        }
    }
}

pub type AudioResult<T> = Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opus_codes_zuordnen() {
        assert_eq!(CodecFehlerArt::aus_opus_code(-1), CodecFehlerArt::UngueltigesArgument);
        assert_eq!(CodecFehlerArt::aus_opus_code(-2), CodecFehlerArt::PufferZuKlein);
        assert_eq!(CodecFehlerArt::aus_opus_code(-3), CodecFehlerArt::Intern);
        assert_eq!(CodecFehlerArt::aus_opus_code(-4), CodecFehlerArt::UngueltigesPaket);
        assert_eq!(CodecFehlerArt::aus_opus_code(-5), CodecFehlerArt::NichtImplementiert);
        assert_eq!(CodecFehlerArt::aus_opus_code(-6), CodecFehlerArt::Intern);
        assert_eq!(CodecFehlerArt::aus_opus_code(-7), CodecFehlerArt::Intern);
    }

    #[test]
    fn codec_fehler_anzeige() {
        let e = AudioError::Codec {
            art: CodecFehlerArt::UngueltigesPaket,
            detail: "corrupted stream".into(),
        };
        assert_eq!(e.to_string(), "Codec-Fehler (ungueltiges Paket): corrupted stream");
        assert_eq!(e.codec_art(), Some(CodecFehlerArt::UngueltigesPaket));
    }
}
