//! Persistenter Client zum Sprachmodell
//!
//! Ein Treiber-Task besitzt die Verbindung und die Zustandsmaschine:
//!
//! 1. `Connecting`: Verbindung ueber den [`SpeechConnector`] aufbauen
//! 2. `Configuring`: sofort `session.update` senden
//! 3. `Ready`: nach `session.created`; ab hier fliesst Audio in beide Richtungen
//! 4. `Streaming`: waehrend das Modell eine Antwort erzeugt
//!
//! Jede unerwartete Trennung laeuft ueber `Error -> Disconnected` und die
//! [`ReconnectPolicy`]. Gibt die Policy auf, landet der Fehler einmalig im
//! Fatal-Kanal; der Besitzer baut daraufhin die Session ab.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use voicerelay_audio::AudioFrame;
use voicerelay_protocol::codec::MODEL_FORMAT;
use voicerelay_protocol::speech::{ClientEvent, ServerEvent};

use crate::config::SpeechConfig;
use crate::error::{SpeechError, SpeechResult};
use crate::policy::{Entscheidung, ReconnectPolicy};
use crate::state::SpeechState;
use crate::transport::{LinkEreignis, SpeechConnector, SpeechLink};

/// Was der Client an die Ausgabeseite weiterreicht
#[derive(Debug, Clone, PartialEq)]
pub enum SprachAusgabe {
    /// PCM-Fragment im Modellformat
    Audio(AudioFrame),
    /// Antwort des Modells ist vollstaendig
    AntwortFertig,
    /// Der Anrufer spricht dazwischen; laufende Ausgabe verwerfen
    Unterbrechung,
    /// Verbindung wird neu aufgebaut
    Wiederverbindung { versuch: u32 },
}

/// Handle auf den laufenden Sprachmodell-Client
pub struct SpeechClient {
    zustand_rx: watch::Receiver<SpeechState>,
    eingabe_tx: mpsc::Sender<AudioFrame>,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    fatal_rx: Mutex<Option<oneshot::Receiver<SpeechError>>>,
    fehlversuche: Arc<AtomicU32>,
}

impl SpeechClient {
    /// Startet den Treiber-Task und kehrt sofort zurueck
    pub fn starten(
        connector: Arc<dyn SpeechConnector>,
        config: SpeechConfig,
        ausgabe_tx: mpsc::Sender<SprachAusgabe>,
    ) -> Self {
        let (zustand_tx, zustand_rx) = watch::channel(SpeechState::Disconnected);
        let (eingabe_tx, eingabe_rx) = mpsc::channel(config.eingabe_kapazitaet.max(1));
        let (fatal_tx, fatal_rx) = oneshot::channel();
        let token = CancellationToken::new();
        let fehlversuche = Arc::new(AtomicU32::new(0));

        let policy = ReconnectPolicy::neu(config.max_versuche, config.backoff, config.stabil_nach);
        let mut treiber = Treiber {
            connector,
            config,
            policy,
            ausgabe_tx,
            zustand_tx,
            eingabe_rx,
            token: token.clone(),
            fehlversuche: fehlversuche.clone(),
        };

        let task = tokio::spawn(async move {
            if let Err(e) = treiber.laufen().await {
                error!("Sprachsession endgueltig verloren: {e}");
                let _ = fatal_tx.send(e);
            }
        });

        Self {
            zustand_rx,
            eingabe_tx,
            token,
            task: Mutex::new(Some(task)),
            fatal_rx: Mutex::new(Some(fatal_rx)),
            fehlversuche,
        }
    }

    /// Wartet bis die Session `Ready` (oder `Streaming`) ist
    ///
    /// Schlaegt fehl, sobald der Treiber endet ohne bereit geworden zu sein.
    /// Eine Zeitschranke setzt der Aufrufer.
    pub async fn bereit_abwarten(&self) -> SpeechResult<()> {
        let mut rx = self.zustand_rx.clone();
        rx.wait_for(|zustand| zustand.ist_aktiv())
            .await
            .map(|_| ())
            .map_err(|_| SpeechError::Verbindung("Sprachsession beendet bevor sie bereit war".into()))
    }

    pub fn zustand(&self) -> SpeechState {
        *self.zustand_rx.borrow()
    }

    /// Reicht einen Chunk im Modellformat weiter
    ///
    /// Gibt false zurueck wenn die Session nicht aktiv ist oder der Puffer
    /// voll ist; der Chunk wird dann verworfen.
    pub fn audio_senden(&self, frame: AudioFrame) -> bool {
        if !self.zustand().ist_aktiv() {
            return false;
        }
        self.eingabe_tx.try_send(frame).is_ok()
    }

    /// Empfaenger fuer den einmaligen fatalen Fehler
    ///
    /// Kann nur einmal abgeholt werden.
    pub fn fatal_empfaenger(&self) -> Option<oneshot::Receiver<SpeechError>> {
        self.fatal_rx.lock().take()
    }

    /// Aufeinanderfolgende Trennungen seit der letzten stabilen Verbindung
    pub fn fehlversuche(&self) -> u32 {
        self.fehlversuche.load(Ordering::Relaxed)
    }

    /// Beendet den Treiber; nach `timeout` wird der Task abgebrochen
    pub async fn stoppen(&self, timeout: Duration) {
        self.token.cancel();
        let task = self.task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                warn!("Sprach-Treiber reagiert nicht, wird abgebrochen");
                task.abort();
            }
        }
    }
}

impl Drop for SpeechClient {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

// ---------------------------------------------------------------------------
// Treiber
// ---------------------------------------------------------------------------

struct Treiber {
    connector: Arc<dyn SpeechConnector>,
    config: SpeechConfig,
    policy: ReconnectPolicy,
    ausgabe_tx: mpsc::Sender<SprachAusgabe>,
    zustand_tx: watch::Sender<SpeechState>,
    eingabe_rx: mpsc::Receiver<AudioFrame>,
    token: CancellationToken,
    fehlversuche: Arc<AtomicU32>,
}

impl Treiber {
    async fn laufen(&mut self) -> SpeechResult<()> {
        loop {
            self.zustand_setzen(SpeechState::Connecting);

            let verbindung = tokio::select! {
                _ = self.token.cancelled() => {
                    self.zustand_setzen(SpeechState::Disconnected);
                    return Ok(());
                }
                link = self.connector.verbinden() => link,
            };

            let ergebnis = match verbindung {
                Ok(link) => self.betreiben(link).await,
                Err(e) => Err(e),
            };

            let fehler = match ergebnis {
                Ok(()) => {
                    self.zustand_setzen(SpeechState::Disconnected);
                    return Ok(());
                }
                Err(e) => e,
            };

            warn!("Verbindung zum Sprachmodell verloren: {fehler}");
            self.zustand_setzen(SpeechState::Error);
            self.zustand_setzen(SpeechState::Disconnected);

            if self.token.is_cancelled() {
                return Ok(());
            }

            let jetzt = tokio::time::Instant::now().into_std();
            match self.policy.verbindung_verloren(jetzt) {
                Entscheidung::Erneut { versuch, wartezeit } => {
                    self.fehlversuche.store(versuch, Ordering::Relaxed);
                    info!(
                        versuch,
                        max = self.policy.max_versuche(),
                        wartezeit_ms = wartezeit.as_millis() as u64,
                        "Verbinde erneut mit Sprachmodell"
                    );
                    let _ = self
                        .ausgabe_tx
                        .try_send(SprachAusgabe::Wiederverbindung { versuch });

                    tokio::select! {
                        _ = self.token.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(wartezeit) => {}
                    }
                }
                Entscheidung::Aufgeben { versuche } => {
                    self.fehlversuche.store(versuche, Ordering::Relaxed);
                    return Err(SpeechError::WiederverbindungErschoepft { versuche });
                }
            }
        }
    }

    /// Betreibt eine aufgebaute Verbindung bis sie endet
    ///
    /// `Ok` nur bei Abbruch durch den Besitzer.
    async fn betreiben(&mut self, mut link: SpeechLink) -> SpeechResult<()> {
        self.zustand_setzen(SpeechState::Configuring);

        // Audio aus der vorherigen Verbindung ist veraltet
        while self.eingabe_rx.try_recv().is_ok() {}

        link.senden(ClientEvent::SessionUpdate {
            session: self.config.session.clone(),
        })
        .await?;
        debug!("session.update gesendet");

        loop {
            tokio::select! {
                biased;

                _ = self.token.cancelled() => return Ok(()),

                frame = self.eingabe_rx.recv() => {
                    let Some(frame) = frame else { return Ok(()) };
                    if self.zustand().ist_aktiv() {
                        let audio = STANDARD.encode(frame.zu_le_bytes());
                        link.senden(ClientEvent::InputAudioBufferAppend { audio }).await?;
                    }
                }

                ereignis = link.empfangen() => {
                    match ereignis {
                        Some(LinkEreignis::Ereignis(ereignis)) => self.ereignis_verarbeiten(ereignis)?,
                        Some(LinkEreignis::Audio(pcm)) => self.audio_weiterleiten(&pcm),
                        Some(LinkEreignis::Geschlossen(grund)) => {
                            return Err(SpeechError::VerbindungGeschlossen(
                                grund.unwrap_or_else(|| "ohne Grund".into()),
                            ));
                        }
                        None => {
                            return Err(SpeechError::VerbindungGeschlossen("Transport beendet".into()));
                        }
                    }
                }
            }
        }
    }

    fn ereignis_verarbeiten(&mut self, ereignis: ServerEvent) -> SpeechResult<()> {
        match ereignis {
            ServerEvent::SessionCreated => {
                if self.zustand() == SpeechState::Configuring {
                    self.zustand_setzen(SpeechState::Ready);
                    self.policy
                        .verbindung_bereit(tokio::time::Instant::now().into_std());
                    info!("Sprachsession bereit");
                }
            }
            ServerEvent::SessionUpdated => debug!("Session-Konfiguration bestaetigt"),
            ServerEvent::ResponseCreated => {
                if self.zustand() == SpeechState::Ready {
                    self.zustand_setzen(SpeechState::Streaming);
                }
            }
            ServerEvent::ResponseAudioDelta { delta } => match STANDARD.decode(delta.as_bytes()) {
                Ok(pcm) => self.audio_weiterleiten(&pcm),
                Err(e) => warn!("Audio-Delta nicht dekodierbar: {e}"),
            },
            ServerEvent::ResponseAudioDone => self.ausgeben(SprachAusgabe::AntwortFertig),
            ServerEvent::ResponseTextDelta { delta } => info!(text = %delta, "Text vom Modell"),
            ServerEvent::ResponseAudioTranscriptDelta { delta } => {
                info!(transkript = %delta, "Transkript vom Modell")
            }
            ServerEvent::ResponseDone => {
                if self.zustand() == SpeechState::Streaming {
                    self.zustand_setzen(SpeechState::Ready);
                }
                self.ausgeben(SprachAusgabe::AntwortFertig);
            }
            ServerEvent::SpeechStarted => {
                debug!("Anrufer spricht, Ausgabe wird unterbrochen");
                self.ausgeben(SprachAusgabe::Unterbrechung);
            }
            ServerEvent::SpeechStopped => debug!("Anrufer hat aufgehoert zu sprechen"),
            ServerEvent::Error { error } => {
                return Err(SpeechError::Api {
                    code: error.code.unwrap_or_default(),
                    nachricht: error.message,
                });
            }
            ServerEvent::Unbekannt => debug!("Unbekanntes Ereignis vom Sprachmodell ignoriert"),
        }
        Ok(())
    }

    fn audio_weiterleiten(&mut self, pcm: &[u8]) {
        if pcm.len() < self.config.min_fragment_bytes {
            debug!(bytes = pcm.len(), "Audio-Fragment zu klein, verworfen");
            return;
        }
        if !self.zustand().ist_aktiv() {
            debug!("Audio vom Modell ausserhalb von Ready verworfen");
            return;
        }
        let frame = match AudioFrame::aus_le_bytes(pcm, MODEL_FORMAT) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Audio vom Modell unbrauchbar: {e}");
                return;
            }
        };
        if self.zustand() == SpeechState::Ready {
            self.zustand_setzen(SpeechState::Streaming);
        }
        self.ausgeben(SprachAusgabe::Audio(frame));
    }

    /// Nie blockieren: ein voller Ausgabekanal verliert das Element
    fn ausgeben(&self, ausgabe: SprachAusgabe) {
        match self.ausgabe_tx.try_send(ausgabe) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Ausgabekanal voll, Audio vom Modell verworfen")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => debug!("Ausgabekanal geschlossen"),
        }
    }

    fn zustand(&self) -> SpeechState {
        *self.zustand_tx.borrow()
    }

    fn zustand_setzen(&self, nach: SpeechState) {
        let von = self.zustand();
        if von == nach {
            return;
        }
        if !von.uebergang_erlaubt(nach) {
            debug!(%von, %nach, "Zustandswechsel nicht zulaessig, ignoriert");
            return;
        }
        debug!(%von, %nach, "Sprachsession Zustandswechsel");
        self.zustand_tx.send_replace(nach);
    }
}
