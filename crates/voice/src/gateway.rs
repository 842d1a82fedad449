//! Naht zur Call-Plattform
//!
//! Ein [`CallGateway`] kapselt alles, was vor und neben dem Medienpfad
//! passiert: pruefen ob der Anruf betreten werden kann, den UDP-Endpunkt
//! samt Session-Schluessel aushandeln, den Sprechstatus melden und den
//! Anruf wieder verlassen. Der Medienpfad selbst laeuft ueber den
//! [`CallConnection::socket`].

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use voicerelay_core::{CallId, RelayError, Result};
use voicerelay_crypto::{SecretBytes, VerschluesselungsModus};

/// Ausgehandelter Medienkanal eines Anrufs
#[derive(Debug)]
pub struct CallConnection {
    /// Mit dem Medien-Endpunkt verbundener UDP-Socket
    pub socket: UdpSocket,
    /// Eigene SSRC fuer ausgehende Pakete
    pub ssrc: u32,
    /// 32-Byte Session-Schluessel
    pub schluessel: SecretBytes,
    /// Nonce-Schema eingehender Pakete
    pub modus: VerschluesselungsModus,
}

/// Zugang zu einem Anruf auf der Call-Plattform
#[async_trait]
pub trait CallGateway: Send + Sync {
    fn call_id(&self) -> CallId;

    /// Prueft ob der Aufrufer in einem betretbaren Anruf ist
    async fn ist_beitretbar(&self) -> bool;

    /// Baut den Medienkanal auf
    async fn verbinden(&self) -> Result<CallConnection>;

    /// Meldet "speaking started/stopped" fuer die eigene SSRC
    async fn speaking_setzen(&self, ssrc: u32, sprechend: bool) -> Result<()>;

    /// Verlaesst den Anruf; mehrfacher Aufruf ist kein Fehler
    async fn trennen(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// StatischerGateway
// ---------------------------------------------------------------------------

/// Parameter eines fest konfigurierten Anrufs
#[derive(Debug, Clone)]
pub struct StatischerAnruf {
    pub call_id: CallId,
    /// UDP-Medien-Endpunkt der Gegenstelle
    pub server_adresse: SocketAddr,
    /// Lokale Bind-Adresse
    pub lokale_adresse: SocketAddr,
    pub ssrc: u32,
    pub schluessel: SecretBytes,
    pub modus: VerschluesselungsModus,
}

/// Gateway fuer einen Anruf, dessen Medienparameter vorab bekannt sind
///
/// Es gibt keinen Signalisierungskanal; der Sprechstatus wird nur geloggt.
pub struct StatischerGateway {
    anruf: StatischerAnruf,
    verbunden: AtomicBool,
}

impl StatischerGateway {
    pub fn neu(anruf: StatischerAnruf) -> Self {
        Self {
            anruf,
            verbunden: AtomicBool::new(false),
        }
    }

    pub fn ist_verbunden(&self) -> bool {
        self.verbunden.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CallGateway for StatischerGateway {
    fn call_id(&self) -> CallId {
        self.anruf.call_id
    }

    async fn ist_beitretbar(&self) -> bool {
        !self.ist_verbunden()
    }

    async fn verbinden(&self) -> Result<CallConnection> {
        let socket = UdpSocket::bind(self.anruf.lokale_adresse).map_err(|e| {
            RelayError::Verbindung(format!("Bind auf {} fehlgeschlagen: {e}", self.anruf.lokale_adresse))
        })?;
        socket.connect(self.anruf.server_adresse).map_err(|e| {
            RelayError::Verbindung(format!(
                "Medien-Endpunkt {} nicht erreichbar: {e}",
                self.anruf.server_adresse
            ))
        })?;
        self.verbunden.store(true, Ordering::SeqCst);

        tracing::info!(
            call_id = %self.anruf.call_id,
            ziel = %self.anruf.server_adresse,
            ssrc = self.anruf.ssrc,
            "Medienkanal aufgebaut"
        );

        Ok(CallConnection {
            socket,
            ssrc: self.anruf.ssrc,
            schluessel: self.anruf.schluessel.clone(),
            modus: self.anruf.modus,
        })
    }

    async fn speaking_setzen(&self, ssrc: u32, sprechend: bool) -> Result<()> {
        tracing::debug!(call_id = %self.anruf.call_id, ssrc, sprechend, "Sprechstatus");
        Ok(())
    }

    async fn trennen(&self) -> Result<()> {
        if self.verbunden.swap(false, Ordering::SeqCst) {
            tracing::info!(call_id = %self.anruf.call_id, "Anruf verlassen");
        }
        Ok(())
    }
}
