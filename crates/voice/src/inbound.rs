//! Eingehender Pfad: Anruf -> Sprachmodell
//!
//! ```text
//! Datagramm
//!     -> Header pruefen (Audio? eigene SSRC?)
//!     -> entschluesseln -> Header-Extension entfernen
//!     -> Reorder-Puffer der Quelle
//!     -> Opus decode (Decoder pro Quelle) -> resample (24 kHz mono)
//!     -> in 100 ms Chunks sammeln -> Sprachmodell
//! ```
//!
//! Jeder Fehler betrifft genau ein Datagramm und wird als [`Verwerfgrund`]
//! gemeldet; die Session laeuft weiter.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voicerelay_audio::{resample, AudioFrame, OpusDecoder};
use voicerelay_core::CallId;
use voicerelay_crypto::CryptoContext;
use voicerelay_observability::RelayMetrics;
use voicerelay_protocol::codec::MODEL_FORMAT;
use voicerelay_protocol::voice::{extension_entfernen, RtpHeader};
use voicerelay_speech::SpeechClient;

use crate::reorder::ReorderPuffer;
use crate::session::SessionZaehler;

/// Warum ein Datagramm nicht zu Audio wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verwerfgrund {
    /// Header zu kurz oder falsche Version
    Header,
    /// Kein Audio-Payload-Typ
    KeinAudio,
    /// Echo der eigenen Sendungen
    EigeneSsrc,
    /// Authentifizierung fehlgeschlagen
    Entschluesselung,
    /// Nur Header-Extension, kein Audio
    Stille,
    /// Verspaetet oder doppelt
    Verspaetet,
    /// Opus-Decoder hat abgelehnt
    Dekodierung,
}

impl Verwerfgrund {
    /// Label fuer die Metrik `inbound_packets_dropped_total`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::KeinAudio => "kein_audio",
            Self::EigeneSsrc => "eigene_ssrc",
            Self::Entschluesselung => "entschluesselung",
            Self::Stille => "stille",
            Self::Verspaetet => "verspaetet",
            Self::Dekodierung => "dekodierung",
        }
    }
}

impl std::fmt::Display for Verwerfgrund {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct QuellenZustand {
    reorder: ReorderPuffer<Vec<u8>>,
    decoder: OpusDecoder,
    /// Modell-Samples, die noch keinen vollen Chunk ergeben
    akkumulator: Vec<i16>,
}

/// Zustand des eingehenden Pfads; gehoert exklusiv dem Inbound-Task
pub struct InboundPipeline {
    crypto: Arc<CryptoContext>,
    quellen: HashMap<u32, QuellenZustand>,
    reorder_tiefe: usize,
    chunk_samples: usize,
    eigene_ssrc: Option<u32>,
}

impl InboundPipeline {
    /// `eigene_ssrc` = Some(ssrc) verwirft Pakete mit dieser SSRC
    pub fn neu(
        crypto: Arc<CryptoContext>,
        reorder_tiefe: usize,
        chunk_samples: usize,
        eigene_ssrc: Option<u32>,
    ) -> Self {
        Self {
            crypto,
            quellen: HashMap::new(),
            reorder_tiefe,
            chunk_samples: chunk_samples.max(1),
            eigene_ssrc,
        }
    }

    /// Verarbeitet ein Datagramm und gibt alle fertigen Chunks zurueck
    ///
    /// Ein leeres `Ok` bedeutet: Paket angenommen, aber noch kein voller Chunk.
    pub fn datagramm_verarbeiten(&mut self, datagramm: &[u8]) -> Result<Vec<AudioFrame>, Verwerfgrund> {
        let header = RtpHeader::decode(datagramm).map_err(|_| Verwerfgrund::Header)?;
        if !header.ist_audio() {
            return Err(Verwerfgrund::KeinAudio);
        }
        if self.eigene_ssrc == Some(header.ssrc) {
            return Err(Verwerfgrund::EigeneSsrc);
        }

        let klartext = self
            .crypto
            .entschluesseln(datagramm)
            .map_err(|_| Verwerfgrund::Entschluesselung)?;
        let nutzdaten = extension_entfernen(&klartext).to_vec();
        let ist_stille = nutzdaten.is_empty();

        let quelle = match self.quellen.entry(header.ssrc) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let decoder = OpusDecoder::new().map_err(|fehler| {
                    tracing::warn!(ssrc = header.ssrc, fehler = %fehler, "Decoder konnte nicht erstellt werden");
                    Verwerfgrund::Dekodierung
                })?;
                tracing::debug!(ssrc = header.ssrc, "Neue Quelle im Anruf");
                e.insert(QuellenZustand {
                    reorder: ReorderPuffer::neu(self.reorder_tiefe),
                    decoder,
                    akkumulator: Vec::with_capacity(self.chunk_samples),
                })
            }
        };

        // Stille-Pakete laufen mit durch den Puffer, damit ihre Sequenznummer keine Luecke hinterlaesst
        let verworfen_vorher = quelle.reorder.statistik().verworfen;
        let freigegeben = quelle.reorder.einfuegen(header.sequence, nutzdaten);
        if quelle.reorder.statistik().verworfen > verworfen_vorher {
            return Err(Verwerfgrund::Verspaetet);
        }

        let mut chunks = Vec::new();
        let mut dekodierfehler = false;
        for opus in freigegeben.iter().filter(|p| !p.is_empty()) {
            match quelle.decoder.decode(opus) {
                Ok(frame) => {
                    let modell = resample(&frame, MODEL_FORMAT);
                    quelle.akkumulator.extend_from_slice(modell.samples());
                }
                Err(e) => {
                    tracing::debug!(ssrc = header.ssrc, fehler = %e, "Opus-Frame nicht dekodierbar");
                    dekodierfehler = true;
                }
            }

            while quelle.akkumulator.len() >= self.chunk_samples {
                let chunk: Vec<i16> = quelle.akkumulator.drain(..self.chunk_samples).collect();
                if let Ok(frame) = AudioFrame::neu(chunk, MODEL_FORMAT) {
                    chunks.push(frame);
                }
            }
        }

        if chunks.is_empty() {
            if dekodierfehler {
                return Err(Verwerfgrund::Dekodierung);
            }
            if ist_stille {
                return Err(Verwerfgrund::Stille);
            }
        }
        Ok(chunks)
    }

    /// Anzahl bisher gesehener Quellen
    pub fn quellen_anzahl(&self) -> usize {
        self.quellen.len()
    }
}

// ---------------------------------------------------------------------------
// Inbound-Task
// ---------------------------------------------------------------------------

/// Liest Datagramme vom Empfangs-Thread und speist das Sprachmodell
pub struct InboundTask {
    pub call_id: CallId,
    pub pipeline: InboundPipeline,
    pub eingang_rx: mpsc::Receiver<Vec<u8>>,
    pub speech: Arc<SpeechClient>,
    pub zaehler: Arc<SessionZaehler>,
    pub token: CancellationToken,
    pub metriken: RelayMetrics,
}

impl InboundTask {
    pub async fn laufen(mut self) {
        loop {
            let datagramm = tokio::select! {
                _ = self.token.cancelled() => break,
                datagramm = self.eingang_rx.recv() => match datagramm {
                    Some(d) => d,
                    None => break,
                },
            };

            self.metriken.inbound_packets_total.inc();
            SessionZaehler::erhoehen(&self.zaehler.empfangen);

            match self.pipeline.datagramm_verarbeiten(&datagramm) {
                Ok(chunks) => {
                    for chunk in chunks {
                        if self.speech.audio_senden(chunk) {
                            self.metriken.model_chunks_total.inc();
                            SessionZaehler::erhoehen(&self.zaehler.chunks);
                        } else {
                            tracing::trace!(call_id = %self.call_id, "Sprachmodell nicht bereit, Chunk verworfen");
                        }
                    }
                }
                Err(grund) => {
                    self.metriken.inbound_verworfen(grund.as_str());
                    SessionZaehler::erhoehen(&self.zaehler.verworfen);
                    match grund {
                        Verwerfgrund::Entschluesselung | Verwerfgrund::Dekodierung => {
                            tracing::debug!(call_id = %self.call_id, grund = %grund, "Datagramm verworfen");
                        }
                        _ => {
                            tracing::trace!(call_id = %self.call_id, grund = %grund, "Datagramm verworfen");
                        }
                    }
                }
            }
        }

        tracing::debug!(
            call_id = %self.call_id,
            quellen = self.pipeline.quellen_anzahl(),
            "Inbound-Task beendet"
        );
    }
}
