//! Voice-Session: Zustand und Besitz aller Ressourcen eines Anrufs
//!
//! Die Session besitzt Transport-Threads, Sprachmodell-Client und alle
//! Tasks. Geteilt werden nur Atomics, der Lebenszyklus und die Laufzeit
//! hinter kurzen Locks; die Pipelines selbst gehoeren exklusiv ihren Tasks.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use voicerelay_core::{CallId, SessionId};
use voicerelay_speech::SpeechClient;

use crate::gateway::CallGateway;
use crate::pacing::PacingQueue;
use crate::transport::CallTransport;

/// Lebenszyklus einer Session aus Sicht des Managers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lebenszyklus {
    /// `join` laeuft noch
    Connecting,
    /// Audio fliesst in beide Richtungen
    Streaming,
    /// Abbau laeuft
    Draining,
    /// Alle Ressourcen freigegeben
    Closed,
}

impl std::fmt::Display for Lebenszyklus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(text)
    }
}

/// Meldungen der Pipelines an den Supervisor einer Session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    /// Der UDP-Transport ist nicht mehr benutzbar
    TransportVerloren(String),
    /// Die Verbindung zum Sprachmodell ist endgueltig verloren
    SprachsessionVerloren(String),
}

impl std::fmt::Display for SessionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransportVerloren(grund) => write!(f, "Transport verloren: {grund}"),
            Self::SprachsessionVerloren(grund) => write!(f, "Sprachsession verloren: {grund}"),
        }
    }
}

/// Laufende Zaehler einer Session
#[derive(Debug, Default)]
pub struct SessionZaehler {
    pub empfangen: AtomicU64,
    pub verworfen: AtomicU64,
    pub chunks: AtomicU64,
    pub gesendet: AtomicU64,
    pub queue_verworfen: AtomicU64,
}

/// Momentaufnahme von [`SessionZaehler`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatistik {
    /// Empfangene Datagramme
    pub empfangen: u64,
    /// Verworfene Datagramme (alle Gruende)
    pub verworfen: u64,
    /// An das Sprachmodell gereichte Chunks
    pub chunks: u64,
    /// In den Anruf gesendete Pakete
    pub gesendet: u64,
    /// Wegen voller Pacing-Queue verworfene Pakete
    pub queue_verworfen: u64,
}

impl SessionZaehler {
    pub fn erhoehen(zaehler: &AtomicU64) {
        zaehler.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStatistik {
        SessionStatistik {
            empfangen: self.empfangen.load(Ordering::Relaxed),
            verworfen: self.verworfen.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            gesendet: self.gesendet.load(Ordering::Relaxed),
            queue_verworfen: self.queue_verworfen.load(Ordering::Relaxed),
        }
    }
}

/// Alles was beim Abbau gestoppt werden muss
pub(crate) struct SessionLaufzeit {
    pub tasks: Vec<(&'static str, JoinHandle<()>)>,
    pub transport: Option<CallTransport>,
    pub speech: Option<Arc<SpeechClient>>,
    pub queue: Option<Arc<PacingQueue>>,
}

/// Eine aktive Verbindung zwischen Anruf und Sprachmodell
pub struct VoiceSession {
    call_id: CallId,
    session_id: SessionId,
    beigetreten_um: DateTime<Utc>,
    ssrc: AtomicU32,
    lebenszyklus: Mutex<Lebenszyklus>,
    sprechend: AtomicBool,
    zaehler: Arc<SessionZaehler>,
    token: CancellationToken,
    laufzeit: Mutex<Option<SessionLaufzeit>>,
    gateway: Arc<dyn CallGateway>,
}

impl VoiceSession {
    pub(crate) fn neu(gateway: Arc<dyn CallGateway>) -> Self {
        Self {
            call_id: gateway.call_id(),
            session_id: SessionId::new(),
            beigetreten_um: Utc::now(),
            ssrc: AtomicU32::new(0),
            lebenszyklus: Mutex::new(Lebenszyklus::Connecting),
            sprechend: AtomicBool::new(false),
            zaehler: Arc::new(SessionZaehler::default()),
            token: CancellationToken::new(),
            laufzeit: Mutex::new(None),
            gateway,
        }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn beigetreten_um(&self) -> DateTime<Utc> {
        self.beigetreten_um
    }

    /// Eigene SSRC; 0 bis der Medienkanal steht
    pub fn ssrc(&self) -> u32 {
        self.ssrc.load(Ordering::Relaxed)
    }

    pub fn lebenszyklus(&self) -> Lebenszyklus {
        *self.lebenszyklus.lock()
    }

    pub fn ist_sprechend(&self) -> bool {
        self.sprechend.load(Ordering::Relaxed)
    }

    pub fn statistik(&self) -> SessionStatistik {
        self.zaehler.snapshot()
    }

    /// Aktuelle Laenge der Pacing-Queue
    pub fn sende_queue_laenge(&self) -> usize {
        self.laufzeit
            .lock()
            .as_ref()
            .and_then(|l| l.queue.as_ref().map(|q| q.laenge()))
            .unwrap_or(0)
    }

    pub(crate) fn ssrc_setzen(&self, ssrc: u32) {
        self.ssrc.store(ssrc, Ordering::Relaxed);
    }

    pub(crate) fn sprechend_setzen(&self, sprechend: bool) {
        self.sprechend.store(sprechend, Ordering::Relaxed);
    }

    pub(crate) fn zaehler(&self) -> Arc<SessionZaehler> {
        self.zaehler.clone()
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn gateway(&self) -> Arc<dyn CallGateway> {
        self.gateway.clone()
    }

    pub(crate) fn lebenszyklus_setzen(&self, neu: Lebenszyklus) {
        let mut zustand = self.lebenszyklus.lock();
        tracing::debug!(call_id = %self.call_id, von = %*zustand, nach = %neu, "Lebenszyklus");
        *zustand = neu;
    }

    pub(crate) fn laufzeit_setzen(&self, laufzeit: SessionLaufzeit) {
        *self.laufzeit.lock() = Some(laufzeit);
    }

    /// Wechselt atomar von `Connecting` nach `Streaming`
    ///
    /// false wenn die Session waehrend des Beitritts bereits abgebaut wurde.
    pub(crate) fn streaming_setzen(&self) -> bool {
        let mut zustand = self.lebenszyklus.lock();
        if *zustand != Lebenszyklus::Connecting {
            return false;
        }
        *zustand = Lebenszyklus::Streaming;
        true
    }

    /// Baut die Session ab; jeder Schritt ist zeitlich begrenzt
    ///
    /// Gibt den Zustand vor dem Abbau zurueck. Nur der erste Aufruf baut ab,
    /// alle weiteren liefern `None`.
    pub(crate) async fn abbauen(
        &self,
        abbau_timeout: Duration,
        thread_timeout: Duration,
    ) -> Option<Lebenszyklus> {
        let vorher = {
            let mut zustand = self.lebenszyklus.lock();
            if matches!(*zustand, Lebenszyklus::Draining | Lebenszyklus::Closed) {
                return None;
            }
            std::mem::replace(&mut *zustand, Lebenszyklus::Draining)
        };

        tracing::info!(call_id = %self.call_id, session_id = %self.session_id, "Session wird abgebaut");
        self.token.cancel();
        self.laufzeit_freigeben(abbau_timeout, thread_timeout).await;
        self.sprechend_setzen(false);

        self.anruf_trennen(abbau_timeout).await;
        self.lebenszyklus_setzen(Lebenszyklus::Closed);

        let statistik = self.statistik();
        tracing::info!(
            call_id = %self.call_id,
            empfangen = statistik.empfangen,
            verworfen = statistik.verworfen,
            chunks = statistik.chunks,
            gesendet = statistik.gesendet,
            "Session geschlossen"
        );
        Some(vorher)
    }

    /// Verlaesst den Anruf am Gateway; Fehler werden nur geloggt
    pub(crate) async fn anruf_trennen(&self, timeout: Duration) {
        match tokio::time::timeout(timeout, self.gateway.trennen()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(call_id = %self.call_id, fehler = %e, "Anruf konnte nicht sauber verlassen werden");
            }
            Err(_) => {
                tracing::warn!(call_id = %self.call_id, "Verlassen des Anrufs ueberschreitet Zeitlimit");
            }
        }
    }

    /// Stoppt Tasks, Transport-Threads und Sprachmodell-Client
    pub(crate) async fn laufzeit_freigeben(&self, abbau_timeout: Duration, thread_timeout: Duration) {
        self.token.cancel();
        let laufzeit = self.laufzeit.lock().take();
        let Some(laufzeit) = laufzeit else {
            return;
        };

        let frist = tokio::time::Instant::now() + abbau_timeout;
        for (name, mut task) in laufzeit.tasks {
            if tokio::time::timeout_at(frist, &mut task).await.is_err() {
                tracing::warn!(call_id = %self.call_id, task = name, "Task reagiert nicht, wird abgebrochen");
                task.abort();
            }
        }

        if let Some(mut transport) = laufzeit.transport {
            transport.stoppen(thread_timeout).await;
        }

        if let Some(speech) = laufzeit.speech {
            speech.stoppen(abbau_timeout).await;
        }

        if let Some(queue) = laufzeit.queue {
            queue.leeren();
        }
    }
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("call_id", &self.call_id)
            .field("session_id", &self.session_id)
            .field("lebenszyklus", &self.lebenszyklus())
            .finish()
    }
}
