//! Transport-Naht zwischen Client und Sprachmodell
//!
//! Ein [`SpeechConnector`] baut pro Verbindungsversuch einen [`SpeechLink`]
//! auf: einen Kanal fuer ausgehende Nachrichten und einen fuer eingehende
//! Ereignisse. Die Netzwerk-Schleifen des Transports laufen in eigenen Tasks
//! und uebergeben geparste Ereignisse ueber den Kanal an den Client.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use voicerelay_protocol::speech::{ClientEvent, ServerEvent};

use crate::error::{SpeechError, SpeechResult};

/// Kanalgroesse eines Links in beide Richtungen
pub const LINK_KAPAZITAET: usize = 256;

/// Eingehendes Ereignis eines Links
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEreignis {
    /// Geparste JSON-Nachricht
    Ereignis(ServerEvent),
    /// Binaerer Frame mit rohem pcm16
    Audio(Vec<u8>),
    /// Gegenstelle hat geschlossen (optional mit Grund)
    Geschlossen(Option<String>),
}

/// Baut Verbindungen zum Sprachmodell auf
#[async_trait]
pub trait SpeechConnector: Send + Sync {
    async fn verbinden(&self) -> SpeechResult<SpeechLink>;
}

/// Eine aufgebaute Verbindung
///
/// Beim Drop werden die Transport-Tasks abgebrochen.
pub struct SpeechLink {
    ausgang: mpsc::Sender<ClientEvent>,
    eingang: mpsc::Receiver<LinkEreignis>,
    tasks: Vec<JoinHandle<()>>,
}

impl SpeechLink {
    pub fn neu(
        ausgang: mpsc::Sender<ClientEvent>,
        eingang: mpsc::Receiver<LinkEreignis>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            ausgang,
            eingang,
            tasks,
        }
    }

    /// In-Memory-Link mit Gegenstelle, ohne Netzwerk
    pub fn paar(kapazitaet: usize) -> (SpeechLink, LinkGegenstelle) {
        let (ausgang_tx, ausgang_rx) = mpsc::channel(kapazitaet);
        let (eingang_tx, eingang_rx) = mpsc::channel(kapazitaet);
        (
            SpeechLink::neu(ausgang_tx, eingang_rx, Vec::new()),
            LinkGegenstelle {
                von_client: ausgang_rx,
                an_client: eingang_tx,
            },
        )
    }

    /// Sendet eine Nachricht an das Modell
    pub async fn senden(&self, ereignis: ClientEvent) -> SpeechResult<()> {
        self.ausgang
            .send(ereignis)
            .await
            .map_err(|_| SpeechError::VerbindungGeschlossen("Sende-Task beendet".into()))
    }

    /// Naechstes eingehendes Ereignis; `None` wenn der Transport beendet ist
    pub async fn empfangen(&mut self) -> Option<LinkEreignis> {
        self.eingang.recv().await
    }
}

impl Drop for SpeechLink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Gegenseite eines In-Memory-Links
pub struct LinkGegenstelle {
    /// Nachrichten, die der Client gesendet hat
    pub von_client: mpsc::Receiver<ClientEvent>,
    /// Ereignisse an den Client
    pub an_client: mpsc::Sender<LinkEreignis>,
}

impl LinkGegenstelle {
    /// Schickt ein Server-Ereignis; false wenn der Client weg ist
    pub async fn ereignis(&self, ereignis: ServerEvent) -> bool {
        self.an_client
            .send(LinkEreignis::Ereignis(ereignis))
            .await
            .is_ok()
    }

    /// Schliesst die Verbindung von der Serverseite
    pub async fn schliessen(self, grund: &str) {
        let _ = self
            .an_client
            .send(LinkEreignis::Geschlossen(Some(grund.to_string())))
            .await;
    }
}

// ---------------------------------------------------------------------------
// KanalConnector
// ---------------------------------------------------------------------------

/// Connector fuer In-Process-Gegenstellen
///
/// Jeder Verbindungsversuch erzeugt ein [`SpeechLink::paar`]; die Gegenstelle
/// wird ueber den Empfaenger aus [`KanalConnector::neu`] herausgereicht.
pub struct KanalConnector {
    gegenstellen: mpsc::UnboundedSender<LinkGegenstelle>,
    versuche: AtomicU32,
}

impl KanalConnector {
    pub fn neu() -> (Self, mpsc::UnboundedReceiver<LinkGegenstelle>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                gegenstellen: tx,
                versuche: AtomicU32::new(0),
            },
            rx,
        )
    }

    /// Anzahl bisheriger Verbindungsversuche
    pub fn verbindungsversuche(&self) -> u32 {
        self.versuche.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechConnector for KanalConnector {
    async fn verbinden(&self) -> SpeechResult<SpeechLink> {
        self.versuche.fetch_add(1, Ordering::SeqCst);
        let (link, gegenstelle) = SpeechLink::paar(LINK_KAPAZITAET);
        self.gegenstellen
            .send(gegenstelle)
            .map_err(|_| SpeechError::Verbindung("keine Gegenstelle mehr".into()))?;
        Ok(link)
    }
}
