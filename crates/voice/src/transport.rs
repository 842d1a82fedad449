//! Call-Transport: blockierende UDP-I/O auf eigenen OS-Threads
//!
//! ## Architektur
//!
//! ```text
//! UDP Socket (recv, Lese-Timeout = poll_intervall)
//!     |
//!     v
//! Empfangs-Thread --try_send--> tokio mpsc --> Inbound-Task
//!
//! Pacer-Task --crossbeam--> Sende-Thread --> UDP Socket (send)
//! ```
//!
//! Beide Threads pruefen bei jedem Poll-Zyklus ein gemeinsames Stop-Flag.
//! Beim Stoppen wird hoechstens `timeout` auf sie gewartet; haengende
//! Threads werden aufgegeben statt den Abbau zu blockieren.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tokio::sync::mpsc;

use voicerelay_core::{CallId, RelayError, Result};
use voicerelay_protocol::voice::MAX_DATAGRAMM_LAENGE;

use crate::session::SessionSignal;

/// Pruefintervall waehrend auf Threads gewartet wird
const JOIN_POLL: Duration = Duration::from_millis(5);

/// Handle auf die beiden Transport-Threads einer Session
pub struct CallTransport {
    stop: Arc<AtomicBool>,
    sende_tx: Sender<Vec<u8>>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl CallTransport {
    /// Startet Empfangs- und Sende-Thread auf dem verbundenen Socket
    pub fn starten(
        call_id: CallId,
        socket: UdpSocket,
        poll_intervall: Duration,
        eingang_tx: mpsc::Sender<Vec<u8>>,
        signal_tx: mpsc::UnboundedSender<SessionSignal>,
    ) -> Result<Self> {
        socket
            .set_read_timeout(Some(poll_intervall))
            .map_err(|e| RelayError::Transport(format!("Lese-Timeout nicht setzbar: {e}")))?;
        let sende_socket = socket
            .try_clone()
            .map_err(|e| RelayError::Transport(format!("Socket nicht klonbar: {e}")))?;

        let stop = Arc::new(AtomicBool::new(false));
        let (sende_tx, sende_rx) = crossbeam_channel::unbounded::<Vec<u8>>();

        let leser = {
            let stop = stop.clone();
            let signal_tx = signal_tx.clone();
            thread::Builder::new()
                .name(format!("vr-empfang-{}", call_id.inner()))
                .spawn(move || empfangs_schleife(call_id, socket, stop, eingang_tx, signal_tx))
                .map_err(|e| RelayError::Transport(format!("Empfangs-Thread: {e}")))?
        };

        let schreiber = {
            let stop = stop.clone();
            let sende_stop = stop.clone();
            let spawn = thread::Builder::new()
                .name(format!("vr-senden-{}", call_id.inner()))
                .spawn(move || {
                    sende_schleife(call_id, sende_socket, sende_stop, sende_rx, poll_intervall, signal_tx)
                });
            match spawn {
                Ok(handle) => handle,
                Err(e) => {
                    stop.store(true, Ordering::Release);
                    return Err(RelayError::Transport(format!("Sende-Thread: {e}")));
                }
            }
        };

        tracing::debug!(call_id = %call_id, "Transport-Threads gestartet");

        Ok(Self {
            stop,
            sende_tx,
            threads: vec![leser, schreiber],
        })
    }

    /// Eingang des Sende-Threads
    pub fn sender(&self) -> Sender<Vec<u8>> {
        self.sende_tx.clone()
    }

    /// Setzt das Stop-Flag und wartet begrenzt auf beide Threads
    ///
    /// Gibt false zurueck wenn mindestens ein Thread aufgegeben wurde.
    pub async fn stoppen(&mut self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::Release);
        let frist = tokio::time::Instant::now() + timeout;
        let mut offen = std::mem::take(&mut self.threads);

        loop {
            let (fertig, laufend): (Vec<_>, Vec<_>) =
                offen.into_iter().partition(|t| t.is_finished());
            for thread in fertig {
                if thread.join().is_err() {
                    tracing::warn!("Transport-Thread ist abgestuerzt");
                }
            }
            offen = laufend;

            if offen.is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= frist {
                tracing::warn!(
                    offen = offen.len(),
                    "Transport-Threads reagieren nicht, werden aufgegeben"
                );
                return false;
            }
            tokio::time::sleep(JOIN_POLL).await;
        }
    }
}

impl Drop for CallTransport {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

fn empfangs_schleife(
    call_id: CallId,
    socket: UdpSocket,
    stop: Arc<AtomicBool>,
    eingang_tx: mpsc::Sender<Vec<u8>>,
    signal_tx: mpsc::UnboundedSender<SessionSignal>,
) {
    // Wiederverwendeter Empfangspuffer
    let mut puffer = [0u8; MAX_DATAGRAMM_LAENGE];

    while !stop.load(Ordering::Acquire) {
        match socket.recv(&mut puffer) {
            Ok(laenge) => match eingang_tx.try_send(puffer[..laenge].to_vec()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::trace!(call_id = %call_id, "Empfangs-Queue voll, Datagramm verworfen");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            },
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            // ICMP "port unreachable" einer vorherigen Sendung, kein Verbindungsende
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                tracing::debug!(call_id = %call_id, "Gegenstelle meldet Port unerreichbar");
            }
            Err(e) => {
                if !stop.load(Ordering::Acquire) {
                    tracing::error!(call_id = %call_id, fehler = %e, "UDP-Empfangsfehler");
                    let _ = signal_tx.send(SessionSignal::TransportVerloren(e.to_string()));
                }
                break;
            }
        }
    }

    tracing::debug!(call_id = %call_id, "Empfangs-Thread beendet");
}

fn sende_schleife(
    call_id: CallId,
    socket: UdpSocket,
    stop: Arc<AtomicBool>,
    sende_rx: Receiver<Vec<u8>>,
    poll_intervall: Duration,
    signal_tx: mpsc::UnboundedSender<SessionSignal>,
) {
    while !stop.load(Ordering::Acquire) {
        match sende_rx.recv_timeout(poll_intervall) {
            Ok(paket) => match socket.send(&paket) {
                Ok(_) => {
                    tracing::trace!(call_id = %call_id, bytes = paket.len(), "UDP-Paket gesendet");
                }
                Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                    tracing::debug!(call_id = %call_id, "Gegenstelle meldet Port unerreichbar");
                }
                Err(e) => {
                    tracing::error!(call_id = %call_id, fehler = %e, "UDP-Sendefehler");
                    let _ = signal_tx.send(SessionSignal::TransportVerloren(e.to_string()));
                    break;
                }
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::debug!(call_id = %call_id, "Sende-Thread beendet");
}
