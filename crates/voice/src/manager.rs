//! Session Manager: Beitritt, Abbau und Ueberwachung aller Voice-Sessions
//!
//! ## Beitritt
//! 1. Anruf beitretbar? Platz in der Registry reservieren
//! 2. Medienkanal ueber das [`CallGateway`] aufbauen
//! 3. Sprachmodell-Client starten und auf `Ready` warten
//! 4. Pipelines, Pacer, Transport-Threads und Supervisor starten
//!
//! Schritte 2 und 3 teilen sich die Frist `beitritt_timeout` und enden sofort,
//! wenn `leave` waehrenddessen die Session abbricht. Schlaegt ein Schritt
//! fehl, wird alles bereits Gestartete wieder abgebaut, der Anruf verlassen
//! und der Registry-Platz freigegeben.
//!
//! ## Abbau
//! Ausgeloest durch `leave`, einen Transportfehler oder eine endgueltig
//! verlorene Sprachsession. Jeder Schritt hat eine Zeitschranke.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use voicerelay_core::{CallId, RelayError, Result, SessionId};
use voicerelay_crypto::CryptoContext;
use voicerelay_observability::RelayMetrics;
use voicerelay_speech::{SpeechClient, SpeechConfig, SpeechConnector, SpeechError, SprachAusgabe};

use crate::config::RelayConfig;
use crate::gateway::{CallConnection, CallGateway};
use crate::inbound::{InboundPipeline, InboundTask};
use crate::outbound::{OutboundPipeline, OutboundTask};
use crate::pacing::{Pacer, PacingQueue};
use crate::registry::SessionRegistry;
use crate::session::{Lebenszyklus, SessionLaufzeit, SessionSignal, VoiceSession};
use crate::transport::CallTransport;

struct ManagerInner {
    config: RelayConfig,
    speech_config: SpeechConfig,
    connector: Arc<dyn SpeechConnector>,
    registry: SessionRegistry,
    metriken: RelayMetrics,
}

/// Verwaltet hoechstens eine Voice-Session pro Anruf
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn neu(
        config: RelayConfig,
        connector: Arc<dyn SpeechConnector>,
        speech_config: SpeechConfig,
        metriken: RelayMetrics,
    ) -> Result<Self> {
        config.validieren().map_err(RelayError::Konfiguration)?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                speech_config,
                connector,
                registry: SessionRegistry::neu(),
                metriken,
            }),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    pub fn metriken(&self) -> &RelayMetrics {
        &self.inner.metriken
    }

    /// Tritt einem Anruf bei und verbindet ihn mit einer neuen Sprachsession
    pub async fn join(&self, gateway: Arc<dyn CallGateway>) -> Result<Arc<VoiceSession>> {
        let call_id = gateway.call_id();
        if self.inner.registry.holen(call_id).is_some() {
            return Err(RelayError::BereitsVerbunden(call_id));
        }
        if !gateway.ist_beitretbar().await {
            return Err(RelayError::NichtBeitretbar(format!(
                "{call_id} ist nicht betretbar"
            )));
        }

        let session = Arc::new(VoiceSession::neu(gateway));
        self.inner.registry.reservieren(session.clone())?;
        tracing::info!(call_id = %call_id, session_id = %session.session_id(), "Beitritt gestartet");

        if let Err(e) = self.aufbauen(&session).await {
            tracing::warn!(call_id = %call_id, fehler = %e, "Beitritt fehlgeschlagen");
            self.inner
                .registry
                .entfernen_wenn(call_id, session.session_id());
            let config = &self.inner.config;
            if session
                .abbauen(config.abbau_timeout, config.thread_join_timeout)
                .await
                .is_none()
            {
                // leave war schneller; der Medienkanal kann danach noch aufgebaut worden sein
                session.anruf_trennen(config.abbau_timeout).await;
            }
            return Err(e);
        }

        if !session.streaming_setzen() {
            let config = &self.inner.config;
            session
                .laufzeit_freigeben(config.abbau_timeout, config.thread_join_timeout)
                .await;
            session.anruf_trennen(config.abbau_timeout).await;
            return Err(verlassen_waehrend_beitritt(call_id));
        }

        self.inner.metriken.sessions_active.inc();
        tracing::info!(
            call_id = %call_id,
            session_id = %session.session_id(),
            ssrc = session.ssrc(),
            "Session aktiv"
        );
        Ok(session)
    }

    /// Verlaesst einen Anruf; false wenn es keine Session gab
    pub async fn leave(&self, call_id: CallId) -> bool {
        let Some(session) = self.inner.registry.entfernen(call_id) else {
            tracing::debug!(call_id = %call_id, "leave ohne Session");
            return false;
        };
        self.session_abbauen(&session).await;
        true
    }

    pub fn session(&self, call_id: CallId) -> Option<Arc<VoiceSession>> {
        self.inner.registry.holen(call_id)
    }

    pub fn aktive_sessions(&self) -> Vec<CallId> {
        self.inner.registry.call_ids()
    }

    /// Verlaesst alle Anrufe; gibt die Anzahl abgebauter Sessions zurueck
    pub async fn alle_verlassen(&self) -> usize {
        let mut anzahl = 0;
        for call_id in self.inner.registry.call_ids() {
            if self.leave(call_id).await {
                anzahl += 1;
            }
        }
        anzahl
    }

    async fn session_abbauen(&self, session: &VoiceSession) {
        let config = &self.inner.config;
        let vorher = session
            .abbauen(config.abbau_timeout, config.thread_join_timeout)
            .await;
        if vorher == Some(Lebenszyklus::Streaming) {
            self.inner.metriken.sessions_active.dec();
        }
    }

    /// Abbau durch den Supervisor; trifft nur die eigene Session
    async fn abbauen_wenn(&self, call_id: CallId, session_id: SessionId) {
        if let Some(session) = self.inner.registry.entfernen_wenn(call_id, session_id) {
            self.session_abbauen(&session).await;
        }
    }

    async fn aufbauen(&self, session: &Arc<VoiceSession>) -> Result<()> {
        let config = &self.inner.config;
        let frist = Instant::now() + config.beitritt_timeout;

        let gateway = session.gateway();
        let token = session.token();
        let verbindung = tokio::select! {
            _ = token.cancelled() => return Err(verlassen_waehrend_beitritt(session.call_id())),
            ergebnis = tokio::time::timeout_at(frist, gateway.verbinden()) => match ergebnis {
                Ok(verbindung) => verbindung?,
                Err(_) => {
                    return Err(RelayError::Zeitlimit(format!(
                        "Medienkanal nicht innerhalb von {:?} aufgebaut",
                        config.beitritt_timeout
                    )))
                }
            },
        };
        let crypto = Arc::new(
            CryptoContext::neu(&verbindung.schluessel, verbindung.modus)
                .map_err(|e| RelayError::Krypto(e.to_string()))?,
        );

        let (ausgabe_tx, ausgabe_rx) = mpsc::channel(config.ausgabe_queue_groesse.max(1));
        let speech = Arc::new(SpeechClient::starten(
            self.inner.connector.clone(),
            self.inner.speech_config.clone(),
            ausgabe_tx,
        ));

        let bereit = tokio::select! {
            _ = token.cancelled() => Err(verlassen_waehrend_beitritt(session.call_id())),
            ergebnis = tokio::time::timeout_at(frist, speech.bereit_abwarten()) => match ergebnis {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(RelayError::Verbindung(format!("Sprachmodell: {e}"))),
                Err(_) => Err(RelayError::Zeitlimit(format!(
                    "Sprachmodell nicht innerhalb von {:?} bereit",
                    config.beitritt_timeout
                ))),
            },
        };
        if let Err(e) = bereit {
            speech.stoppen(config.abbau_timeout).await;
            return Err(e);
        }

        match self.pipelines_starten(session, verbindung, crypto, speech.clone(), ausgabe_rx) {
            Ok(laufzeit) => {
                session.laufzeit_setzen(laufzeit);
                Ok(())
            }
            Err(e) => {
                speech.stoppen(config.abbau_timeout).await;
                Err(e)
            }
        }
    }

    fn pipelines_starten(
        &self,
        session: &Arc<VoiceSession>,
        verbindung: CallConnection,
        crypto: Arc<CryptoContext>,
        speech: Arc<SpeechClient>,
        ausgabe_rx: mpsc::Receiver<SprachAusgabe>,
    ) -> Result<SessionLaufzeit> {
        let config = &self.inner.config;
        let metriken = &self.inner.metriken;
        let call_id = session.call_id();
        let ssrc = verbindung.ssrc;
        let token = session.token();
        session.ssrc_setzen(ssrc);

        let queue = Arc::new(PacingQueue::neu(config.sende_queue_groesse));
        let outbound = OutboundPipeline::neu(config.opus.clone(), crypto.clone(), ssrc, queue.clone())
            .map_err(|e| RelayError::Audio(e.to_string()))?;
        let inbound = InboundPipeline::neu(
            crypto,
            config.reorder_tiefe,
            config.chunk_samples(),
            config.eigene_ssrc_ignorieren.then_some(ssrc),
        );

        let (eingang_tx, eingang_rx) = mpsc::channel(config.empfangs_queue_groesse);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let transport = CallTransport::starten(
            call_id,
            verbindung.socket,
            config.poll_intervall,
            eingang_tx,
            signal_tx.clone(),
        )?;

        let pacer = Pacer::neu(
            queue.clone(),
            transport.sender(),
            config.frame_dauer(),
            signal_tx,
            token.clone(),
            session.zaehler(),
            metriken.clone(),
        );

        let inbound_task = InboundTask {
            call_id,
            pipeline: inbound,
            eingang_rx,
            speech: speech.clone(),
            zaehler: session.zaehler(),
            token: token.clone(),
            metriken: metriken.clone(),
        };

        let outbound_task = OutboundTask {
            pipeline: outbound,
            ausgabe_rx,
            session: session.clone(),
            gateway: session.gateway(),
            queue: queue.clone(),
            sprech_pause: config.sprech_pause,
            token: token.clone(),
            metriken: metriken.clone(),
        };

        let supervisor = ueberwachen(
            self.clone(),
            call_id,
            session.session_id(),
            signal_rx,
            speech.fatal_empfaenger(),
            token,
        );

        let tasks = vec![
            ("inbound", tokio::spawn(inbound_task.laufen())),
            ("outbound", tokio::spawn(outbound_task.laufen())),
            ("pacer", tokio::spawn(pacer.laufen())),
            ("supervisor", tokio::spawn(supervisor)),
        ];

        Ok(SessionLaufzeit {
            tasks,
            transport: Some(transport),
            speech: Some(speech),
            queue: Some(queue),
        })
    }
}

fn verlassen_waehrend_beitritt(call_id: CallId) -> RelayError {
    RelayError::Getrennt(format!("{call_id} wurde waehrend des Beitritts verlassen"))
}

/// Wartet auf ein fatales Signal und stoesst dann den Abbau an
///
/// Der Abbau laeuft in einem eigenen Task, weil er auf diesen hier wartet.
async fn ueberwachen(
    manager: SessionManager,
    call_id: CallId,
    session_id: SessionId,
    mut signal_rx: mpsc::UnboundedReceiver<SessionSignal>,
    fatal_rx: Option<oneshot::Receiver<SpeechError>>,
    token: CancellationToken,
) {
    let fatal = async move {
        match fatal_rx {
            Some(rx) => rx.await.ok(),
            None => None,
        }
    };
    tokio::pin!(fatal);

    let mut signal_offen = true;
    let mut fatal_offen = true;
    let signal = loop {
        tokio::select! {
            _ = token.cancelled() => return,
            signal = signal_rx.recv(), if signal_offen => match signal {
                Some(signal) => break signal,
                None => signal_offen = false,
            },
            fehler = &mut fatal, if fatal_offen => match fehler {
                Some(fehler) => break SessionSignal::SprachsessionVerloren(fehler.to_string()),
                None => fatal_offen = false,
            },
        }
    };

    tracing::error!(call_id = %call_id, grund = %signal, "Session wird wegen Fehler abgebaut");
    tokio::spawn(async move {
        manager.abbauen_wenn(call_id, session_id).await;
    });
}
