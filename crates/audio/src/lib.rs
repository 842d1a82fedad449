//! voicerelay-audio – Codec- und Resample-Engine
//!
//! ## Module
//! - `frame` – unveraenderlicher PCM-Frame mit Format
//! - `resample` – lineare Abtastraten- und Kanalkonvertierung
//! - `codec` – Opus Encoder/Decoder (ein Zustand pro Stream)
//! - `error` – typisierte Fehler

pub mod codec;
pub mod error;
pub mod frame;
pub mod resample;

pub use codec::{OpusDecoder, OpusEncoder};
pub use error::{AudioError, AudioResult, CodecFehlerArt};
pub use frame::AudioFrame;
pub use resample::resample;
