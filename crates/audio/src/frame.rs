//! Unveraenderlicher PCM-Frame
//!
//! Ein `AudioFrame` wird von Decode- oder Resample-Schritten erzeugt, genau
//! einmal konsumiert und danach verworfen. Transformationen liefern immer
//! einen neuen Frame.

use std::time::Duration;

use voicerelay_protocol::codec::AudioFormat;

use crate::error::{AudioError, AudioResult};

/// PCM-Samples (i16, interleaved) mit Format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    format: AudioFormat,
}

impl AudioFrame {
    /// Erstellt einen Frame; die Sampleanzahl muss durch die Kanalanzahl teilbar sein
    pub fn neu(samples: Vec<i16>, format: AudioFormat) -> AudioResult<Self> {
        if format.kanaele == 0 || format.sample_rate == 0 {
            return Err(AudioError::Format(format!(
                "{} Hz / {} Kanaele ist kein gueltiges Format",
                format.sample_rate, format.kanaele
            )));
        }
        if samples.len() % format.kanaele as usize != 0 {
            return Err(AudioError::Format(format!(
                "{} Samples passen nicht zu {} Kanaelen",
                samples.len(),
                format.kanaele
            )));
        }
        Ok(Self { samples, format })
    }

    /// Stille der gegebenen Laenge
    pub fn stille(format: AudioFormat, samples_pro_kanal: usize) -> Self {
        Self {
            samples: vec![0; samples_pro_kanal * format.kanaele as usize],
            format,
        }
    }

    /// Liest pcm16 little-endian; ein unvollstaendiger Rest am Ende wird ignoriert
    pub fn aus_le_bytes(bytes: &[u8], format: AudioFormat) -> AudioResult<Self> {
        let block = 2 * format.kanaele.max(1) as usize;
        let nutzbar = bytes.len() - bytes.len() % block;
        let samples = bytes[..nutzbar]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        Self::neu(samples, format)
    }

    /// Schreibt die Samples als pcm16 little-endian
    pub fn zu_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn in_samples(self) -> Vec<i16> {
        self.samples
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Anzahl der Samples pro Kanal
    pub fn samples_pro_kanal(&self) -> usize {
        self.samples.len() / self.format.kanaele as usize
    }

    /// Abspieldauer des Frames
    pub fn dauer(&self) -> Duration {
        Duration::from_micros(
            self.samples_pro_kanal() as u64 * 1_000_000 / self.format.sample_rate as u64,
        )
    }

    pub fn ist_leer(&self) -> bool {
        self.samples.is_empty()
    }
}
