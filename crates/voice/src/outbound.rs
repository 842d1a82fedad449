//! Ausgehender Pfad: Sprachmodell -> Anruf
//!
//! ```text
//! SprachAusgabe::Audio (24 kHz mono)
//!     -> resample (48 kHz stereo)
//!     -> Rest + neue Samples in 20 ms Frames schneiden
//!     -> Opus encode -> Header (seq, ts, ssrc) -> verschluesseln
//!     -> PacingQueue -> Pacer -> Sende-Thread
//! ```
//!
//! Ein unvollstaendiger letzter Frame bleibt als Rest liegen, bis das
//! naechste Fragment ihn fuellt. Erst am Ende einer Antwort wird er mit
//! Stille aufgefuellt und gesendet.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use voicerelay_audio::{resample, AudioFrame, AudioResult, OpusEncoder};
use voicerelay_crypto::CryptoContext;
use voicerelay_observability::RelayMetrics;
use voicerelay_protocol::codec::{
    OpusConfig, CALL_FORMAT, CALL_SAMPLES_PRO_FRAME, TIMESTAMP_PRO_FRAME,
};
use voicerelay_protocol::voice::RtpHeader;
use voicerelay_speech::SprachAusgabe;

use crate::gateway::CallGateway;
use crate::pacing::PacingQueue;
use crate::session::{SessionZaehler, VoiceSession};

/// Interleaved Samples eines Call-Frames
const FRAME_SAMPLES: usize = CALL_SAMPLES_PRO_FRAME * CALL_FORMAT.kanaele as usize;

/// Sequenz- und Zeitstempelzaehler einer Session
///
/// Beide laufen modulo 2^16 bzw. 2^32 ueber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaketZaehler {
    sequence: u16,
    timestamp: u32,
}

impl PaketZaehler {
    pub fn neu(sequence: u16, timestamp: u32) -> Self {
        Self {
            sequence,
            timestamp,
        }
    }

    /// Liefert die Werte fuer das naechste Paket und schaltet weiter
    pub fn naechster(&mut self) -> (u16, u32) {
        let aktuell = (self.sequence, self.timestamp);
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(TIMESTAMP_PRO_FRAME);
        aktuell
    }
}

/// Zustand des ausgehenden Pfads einer Session
pub struct OutboundPipeline {
    encoder: OpusEncoder,
    crypto: Arc<CryptoContext>,
    zaehler: PaketZaehler,
    ssrc: u32,
    rest: Vec<i16>,
    queue: Arc<PacingQueue>,
}

impl OutboundPipeline {
    pub fn neu(
        opus: OpusConfig,
        crypto: Arc<CryptoContext>,
        ssrc: u32,
        queue: Arc<PacingQueue>,
    ) -> AudioResult<Self> {
        Ok(Self {
            encoder: OpusEncoder::new(opus)?,
            crypto,
            zaehler: PaketZaehler::default(),
            ssrc,
            rest: Vec::with_capacity(FRAME_SAMPLES),
            queue,
        })
    }

    /// Verarbeitet ein Fragment des Modells; gibt die Anzahl erzeugter Pakete zurueck
    pub fn frame_verarbeiten(&mut self, frame: &AudioFrame) -> usize {
        let call = resample(frame, CALL_FORMAT);
        self.rest.extend_from_slice(call.samples());

        let mut erzeugt = 0;
        while self.rest.len() >= FRAME_SAMPLES {
            let samples: Vec<i16> = self.rest.drain(..FRAME_SAMPLES).collect();
            if self.paket_erzeugen(samples) {
                erzeugt += 1;
            }
        }
        erzeugt
    }

    /// Fuellt einen Rest mit Stille auf und sendet ihn als letzten Frame
    pub fn abschliessen(&mut self) -> usize {
        if self.rest.is_empty() {
            return 0;
        }
        let mut samples = std::mem::take(&mut self.rest);
        samples.resize(FRAME_SAMPLES, 0);
        usize::from(self.paket_erzeugen(samples))
    }

    /// Verwirft Rest und alle wartenden Pakete (Barge-in, Wiederverbindung)
    pub fn verwerfen(&mut self) -> usize {
        self.rest.clear();
        self.queue.leeren()
    }

    /// Samples (interleaved) die auf den naechsten Frame warten
    pub fn rest_samples(&self) -> usize {
        self.rest.len()
    }

    pub fn zaehler(&self) -> PaketZaehler {
        self.zaehler
    }

    fn paket_erzeugen(&mut self, samples: Vec<i16>) -> bool {
        let opus = match AudioFrame::neu(samples, CALL_FORMAT)
            .and_then(|frame| self.encoder.encode(&frame))
        {
            Ok(opus) => opus,
            Err(e) => {
                tracing::warn!(fehler = %e, "Frame konnte nicht kodiert werden, verworfen");
                return false;
            }
        };

        // Zaehler erst nach erfolgreichem Encode, damit keine Luecke entsteht
        let (sequence, timestamp) = self.zaehler.naechster();
        let header = RtpHeader::audio(sequence, timestamp, self.ssrc).encode();

        match self.crypto.verschluesseln(&header, &opus) {
            Ok(paket) => {
                self.queue.einreihen(paket);
                true
            }
            Err(e) => {
                tracing::warn!(sequence, fehler = %e, "Verschluesselung fehlgeschlagen, Frame verworfen");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound-Task
// ---------------------------------------------------------------------------

/// Recheck-Intervall solange noch Pakete in der Queue stehen
const NACHLAUF_PRUEFUNG: Duration = Duration::from_millis(20);

/// Treibt die [`OutboundPipeline`] mit den Ausgaben des Sprachmodells
pub struct OutboundTask {
    pub pipeline: OutboundPipeline,
    pub ausgabe_rx: mpsc::Receiver<SprachAusgabe>,
    pub session: Arc<VoiceSession>,
    pub gateway: Arc<dyn CallGateway>,
    pub queue: Arc<PacingQueue>,
    pub sprech_pause: Duration,
    pub token: CancellationToken,
    pub metriken: RelayMetrics,
}

impl OutboundTask {
    pub async fn laufen(mut self) {
        let ssrc = self.session.ssrc();
        let zaehler = self.session.zaehler();
        let mut ruhe_pruefung = Instant::now();

        loop {
            let sprechend = self.session.ist_sprechend();
            tokio::select! {
                _ = self.token.cancelled() => break,

                ausgabe = self.ausgabe_rx.recv() => {
                    let Some(ausgabe) = ausgabe else { break };
                    let verdraengt_vorher = self.queue.verworfen();

                    match ausgabe {
                        SprachAusgabe::Audio(frame) => {
                            if !sprechend {
                                Self::sprechen_melden(&self.gateway, &self.session, ssrc, true).await;
                            }
                            let pakete = self.pipeline.frame_verarbeiten(&frame);
                            tracing::trace!(pakete, "Fragment des Sprachmodells eingereiht");
                            ruhe_pruefung = Instant::now() + self.sprech_pause;
                        }
                        SprachAusgabe::AntwortFertig => {
                            self.pipeline.abschliessen();
                        }
                        SprachAusgabe::Unterbrechung => {
                            let verworfen = self.pipeline.verwerfen();
                            tracing::debug!(verworfen, "Barge-in, Ausgabe verworfen");
                            ruhe_pruefung = Instant::now();
                        }
                        SprachAusgabe::Wiederverbindung { versuch } => {
                            self.pipeline.verwerfen();
                            self.metriken.speech_reconnects_total.inc();
                            tracing::info!(versuch, "Sprachmodell verbindet neu, Ausgabe verworfen");
                            ruhe_pruefung = Instant::now();
                        }
                    }

                    let verdraengt = self.queue.verworfen() - verdraengt_vorher;
                    if verdraengt > 0 {
                        self.metriken.outbound_queue_dropped_total.inc_by(verdraengt);
                        zaehler
                            .queue_verworfen
                            .fetch_add(verdraengt, std::sync::atomic::Ordering::Relaxed);
                    }
                }

                _ = tokio::time::sleep_until(ruhe_pruefung), if sprechend => {
                    if self.pipeline.abschliessen() > 0 || !self.queue.ist_leer() {
                        ruhe_pruefung = Instant::now() + NACHLAUF_PRUEFUNG;
                    } else {
                        Self::sprechen_melden(&self.gateway, &self.session, ssrc, false).await;
                    }
                }
            }
        }

        tracing::debug!(call_id = %self.session.call_id(), "Outbound-Task beendet");
    }

    async fn sprechen_melden(
        gateway: &Arc<dyn CallGateway>,
        session: &Arc<VoiceSession>,
        ssrc: u32,
        sprechend: bool,
    ) {
        if let Err(e) = gateway.speaking_setzen(ssrc, sprechend).await {
            tracing::warn!(fehler = %e, sprechend, "Sprechstatus konnte nicht gemeldet werden");
        }
        session.sprechend_setzen(sprechend);
    }
}
