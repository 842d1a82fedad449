//! Audio-Formate und Codec-Konfiguration
//!
//! Zwei feste Formate treffen im Relay aufeinander: das native Format des
//! Anrufs (48 kHz, Stereo, 20 ms Opus-Frames) und das Format des
//! Sprachmodells (24 kHz, Mono, pcm16).

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Audio-Formate
// ---------------------------------------------------------------------------

/// PCM-Format: Abtastrate und Kanalanzahl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Anzahl der Kanaele (interleaved)
    pub kanaele: u16,
}

impl AudioFormat {
    /// Samples pro Kanal fuer die gegebene Dauer
    pub const fn samples_pro_kanal(&self, dauer_ms: u32) -> usize {
        (self.sample_rate as u64 * dauer_ms as u64 / 1000) as usize
    }

    /// Interleaved Samples (alle Kanaele) fuer die gegebene Dauer
    pub const fn samples(&self, dauer_ms: u32) -> usize {
        self.samples_pro_kanal(dauer_ms) * self.kanaele as usize
    }
}

/// Natives Format des Anrufs
pub const CALL_FORMAT: AudioFormat = AudioFormat {
    sample_rate: 48_000,
    kanaele: 2,
};

/// Natives Format des Sprachmodells
pub const MODEL_FORMAT: AudioFormat = AudioFormat {
    sample_rate: 24_000,
    kanaele: 1,
};

/// Frame-Dauer des Anrufs in Millisekunden
pub const CALL_FRAME_MS: u32 = 20;

/// Samples pro Kanal und Frame im Anruf (960 bei 48 kHz / 20 ms)
pub const CALL_SAMPLES_PRO_FRAME: usize = CALL_FORMAT.samples_pro_kanal(CALL_FRAME_MS);

/// Zeitstempel-Inkrement pro ausgehendem Frame
pub const TIMESTAMP_PRO_FRAME: u32 = CALL_SAMPLES_PRO_FRAME as u32;

/// Laengster Opus-Frame (120 ms) in Samples pro Kanal bei 48 kHz
pub const MAX_OPUS_SAMPLES_PRO_KANAL: usize = 5760;

// ---------------------------------------------------------------------------
// Opus-Konfiguration
// ---------------------------------------------------------------------------

/// Opus-Anwendungsmodus
///
/// Beeinflusst intern den Opus-Encoder-Algorithmus.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpusApplication {
    /// Optimiert fuer Sprachverstaendlichkeit (VOIP)
    #[default]
    Voip,
    /// Optimiert fuer allgemeine Audio-Qualitaet (Musik)
    Audio,
    /// Minimale Verarbeitungsverzoegerung (Restricted Lowdelay)
    RestrictedLowdelay,
}

/// Opus-Encoder-Konfiguration fuer den ausgehenden Pfad
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpusConfig {
    /// Ziel-Bitrate in kbps (6–510)
    pub bitrate_kbps: u16,
    /// Anwendungsmodus
    pub application: OpusApplication,
    /// Forward Error Correction aktivieren
    pub fec_enabled: bool,
    /// Komplexitaet (0–10, hoeher = bessere Qualitaet, mehr CPU)
    pub complexity: u8,
    /// Variable Bitrate aktivieren
    pub vbr_enabled: bool,
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self {
            bitrate_kbps: 64,
            application: OpusApplication::Voip,
            fec_enabled: true,
            complexity: 10,
            vbr_enabled: true,
        }
    }
}

impl OpusConfig {
    /// Standardkonfiguration mit abweichender Bitrate
    pub fn mit_bitrate(bitrate_kbps: u16) -> Self {
        Self {
            bitrate_kbps,
            ..Self::default()
        }
    }

    /// Validiert die Konfiguration
    pub fn validieren(&self) -> Result<(), String> {
        if self.bitrate_kbps < 6 || self.bitrate_kbps > 510 {
            return Err(format!(
                "Bitrate muss zwischen 6 und 510 kbps liegen (war: {})",
                self.bitrate_kbps
            ));
        }
        if self.complexity > 10 {
            return Err(format!(
                "Komplexitaet muss zwischen 0 und 10 liegen (war: {})",
                self.complexity
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_frame_groessen() {
        assert_eq!(CALL_SAMPLES_PRO_FRAME, 960);
        assert_eq!(CALL_FORMAT.samples(CALL_FRAME_MS), 1920);
        assert_eq!(TIMESTAMP_PRO_FRAME, 960);
    }

    #[test]
    fn modell_chunk_groesse() {
        // 100 ms bei 24 kHz Mono
        assert_eq!(MODEL_FORMAT.samples(100), 2400);
    }

    #[test]
    fn opus_config_validierung() {
        assert!(OpusConfig::default().validieren().is_ok());
        assert!(OpusConfig::mit_bitrate(4).validieren().is_err());
        let cfg = OpusConfig {
            complexity: 11,
            ..OpusConfig::default()
        };
        assert!(cfg.validieren().is_err());
    }
}
