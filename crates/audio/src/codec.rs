//! Opus Encoder/Decoder Wrapper
//!
//! Kapselt audiopus und arbeitet auf i16-PCM im Call-Format (48 kHz,
//! Stereo). Jede Instanz gehoert genau einem Stream: ein Decoder pro
//! entfernter Quelle, ein Encoder pro Session. Der libopus-Zustand wird
//! beim Drop des Wrappers freigegeben.

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Channels, SampleRate,
};
use tracing::debug;

use crate::error::{AudioError, AudioResult, CodecFehlerArt};
use crate::frame::AudioFrame;
use voicerelay_protocol::codec::{
    OpusApplication, OpusConfig, CALL_FORMAT, CALL_SAMPLES_PRO_FRAME, MAX_OPUS_SAMPLES_PRO_KANAL,
};

/// Maximale Groesse eines kodierten Frames
const MAX_PAKET_BYTES: usize = 4000;

/// Opus-Encoder: kodiert 20 ms Call-Frames zu Opus-Bytes
pub struct OpusEncoder {
    encoder: Encoder,
    config: OpusConfig,
}

impl OpusEncoder {
    /// Erstellt einen neuen Encoder mit der gegebenen Konfiguration
    pub fn new(config: OpusConfig) -> AudioResult<Self> {
        config.validieren().map_err(AudioError::Konfiguration)?;

        let application = protocol_app_to_audiopus(config.application);
        let mut encoder =
            Encoder::new(SampleRate::Hz48000, Channels::Stereo, application).map_err(codec_fehler)?;

        encoder
            .set_bitrate(audiopus::Bitrate::BitsPerSecond(
                (config.bitrate_kbps as i32) * 1000,
            ))
            .map_err(codec_fehler)?;
        encoder
            .set_complexity(config.complexity)
            .map_err(codec_fehler)?;
        encoder.set_vbr(config.vbr_enabled).map_err(codec_fehler)?;
        encoder
            .set_inband_fec(config.fec_enabled)
            .map_err(codec_fehler)?;

        debug!(
            bitrate_kbps = config.bitrate_kbps,
            application = ?config.application,
            "OpusEncoder erstellt"
        );

        Ok(Self { encoder, config })
    }

    /// Kodiert einen Frame; er muss exakt 20 ms im Call-Format lang sein
    pub fn encode(&mut self, frame: &AudioFrame) -> AudioResult<Vec<u8>> {
        if frame.format() != CALL_FORMAT || frame.samples_pro_kanal() != CALL_SAMPLES_PRO_FRAME {
            return Err(AudioError::Codec {
                art: CodecFehlerArt::UngueltigesArgument,
                detail: format!(
                    "Frame muss {} Samples pro Kanal bei {:?} haben, war {} bei {:?}",
                    CALL_SAMPLES_PRO_FRAME,
                    CALL_FORMAT,
                    frame.samples_pro_kanal(),
                    frame.format()
                ),
            });
        }

        let mut output = vec![0u8; MAX_PAKET_BYTES];
        let written = self
            .encoder
            .encode(frame.samples(), &mut output)
            .map_err(codec_fehler)?;

        output.truncate(written);
        Ok(output)
    }

    /// Gibt die aktuelle Konfiguration zurueck
    pub fn config(&self) -> &OpusConfig {
        &self.config
    }
}

/// Opus-Decoder: dekodiert Opus-Bytes zu Call-Format-PCM
pub struct OpusDecoder {
    decoder: Decoder,
}

impl OpusDecoder {
    /// Erstellt einen neuen Decoder (48 kHz, Stereo)
    pub fn new() -> AudioResult<Self> {
        let decoder = Decoder::new(SampleRate::Hz48000, Channels::Stereo).map_err(codec_fehler)?;
        debug!("OpusDecoder erstellt");
        Ok(Self { decoder })
    }

    /// Dekodiert ein Opus-Paket; die Laenge ergibt sich aus dem Paket selbst
    pub fn decode(&mut self, opus_data: &[u8]) -> AudioResult<AudioFrame> {
        let mut output = vec![0i16; MAX_OPUS_SAMPLES_PRO_KANAL * CALL_FORMAT.kanaele as usize];
        let decoded = self
            .decoder
            .decode(Some(opus_data), &mut output, false)
            .map_err(codec_fehler)?;

        output.truncate(decoded * CALL_FORMAT.kanaele as usize);
        AudioFrame::neu(output, CALL_FORMAT)
    }
}

// ---------------------------------------------------------------------------
// Konvertierungs-Hilfsfunktionen
// ---------------------------------------------------------------------------

fn codec_fehler(e: audiopus::Error) -> AudioError {
    let detail = e.to_string();
    let art = match e {
        audiopus::Error::Opus(code) => CodecFehlerArt::aus_opus_code(code as i32),
        _ => CodecFehlerArt::UngueltigesArgument,
    };
    AudioError::Codec { art, detail }
}

fn protocol_app_to_audiopus(app: OpusApplication) -> Application {
    match app {
        OpusApplication::Voip => Application::Voip,
        OpusApplication::Audio => Application::Audio,
        OpusApplication::RestrictedLowdelay => Application::LowDelay,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ton_frame() -> AudioFrame {
        let mut samples = Vec::with_capacity(CALL_SAMPLES_PRO_FRAME * 2);
        for i in 0..CALL_SAMPLES_PRO_FRAME {
            let t = i as f32 / 48_000.0;
            let wert = ((t * 440.0 * std::f32::consts::TAU).sin() * 6000.0) as i16;
            samples.push(wert);
            samples.push(wert);
        }
        AudioFrame::neu(samples, CALL_FORMAT).unwrap()
    }

    #[test]
    fn encode_decode_gleiche_dauer() {
        let mut encoder = OpusEncoder::new(OpusConfig::default()).unwrap();
        let mut decoder = OpusDecoder::new().unwrap();

        let frame = ton_frame();
        let paket = encoder.encode(&frame).unwrap();
        assert!(!paket.is_empty());
        assert!(paket.len() < MAX_PAKET_BYTES);

        let decoded = decoder.decode(&paket).unwrap();
        assert_eq!(decoded.samples_pro_kanal(), frame.samples_pro_kanal());
        assert_eq!(decoded.dauer(), frame.dauer());
        assert_eq!(decoded.format(), CALL_FORMAT);
    }

    #[test]
    fn falsche_frame_groesse_ist_typisierter_fehler() {
        let mut encoder = OpusEncoder::new(OpusConfig::default()).unwrap();
        let zu_kurz = AudioFrame::stille(CALL_FORMAT, 100);
        let err = encoder.encode(&zu_kurz).unwrap_err();
        assert_eq!(err.codec_art(), Some(CodecFehlerArt::UngueltigesArgument));
    }

    #[test]
    fn ungueltige_config_abgelehnt() {
        let config = OpusConfig::mit_bitrate(1000);
        assert!(matches!(
            OpusEncoder::new(config),
            Err(AudioError::Konfiguration(_))
        ));
    }
}
