//! Pacing: begrenzte Sende-Queue und Echtzeit-Taktgeber
//!
//! Der Outbound-Pfad erzeugt Pakete schneller als Echtzeit, sobald das
//! Sprachmodell ein Fragment liefert. Die [`PacingQueue`] puffert sie, der
//! [`Pacer`] gibt genau ein Paket pro Frame-Intervall an den Sende-Thread.
//!
//! Ist die Queue voll, wird das aelteste Paket verdraengt: der Anrufer hoert
//! lieber einen Sprung als eine wachsende Verzoegerung.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use voicerelay_observability::RelayMetrics;

use crate::session::{SessionSignal, SessionZaehler};

/// Begrenzte FIFO zwischen Outbound-Task und Pacer
#[derive(Debug)]
pub struct PacingQueue {
    pakete: Mutex<VecDeque<Vec<u8>>>,
    kapazitaet: usize,
    signal: Notify,
    verworfen: AtomicU64,
}

impl PacingQueue {
    pub fn neu(kapazitaet: usize) -> Self {
        let kapazitaet = kapazitaet.max(1);
        Self {
            pakete: Mutex::new(VecDeque::with_capacity(kapazitaet)),
            kapazitaet,
            signal: Notify::new(),
            verworfen: AtomicU64::new(0),
        }
    }

    /// Haengt ein Paket an; gibt true zurueck wenn dafuer das aelteste verdraengt wurde
    pub fn einreihen(&self, paket: Vec<u8>) -> bool {
        let verdraengt = {
            let mut pakete = self.pakete.lock();
            let voll = pakete.len() >= self.kapazitaet;
            if voll {
                pakete.pop_front();
            }
            pakete.push_back(paket);
            voll
        };
        if verdraengt {
            self.verworfen.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Pacing-Queue voll, aeltestes Paket verworfen");
        }
        self.signal.notify_one();
        verdraengt
    }

    /// Wartet auf das naechste Paket
    ///
    /// Es gibt genau einen Konsumenten (den Pacer).
    pub async fn naechstes(&self) -> Vec<u8> {
        loop {
            let paket = self.pakete.lock().pop_front();
            if let Some(paket) = paket {
                return paket;
            }
            self.signal.notified().await;
        }
    }

    pub fn try_naechstes(&self) -> Option<Vec<u8>> {
        self.pakete.lock().pop_front()
    }

    /// Verwirft alle wartenden Pakete und gibt ihre Anzahl zurueck
    pub fn leeren(&self) -> usize {
        let mut pakete = self.pakete.lock();
        let anzahl = pakete.len();
        pakete.clear();
        anzahl
    }

    pub fn laenge(&self) -> usize {
        self.pakete.lock().len()
    }

    pub fn ist_leer(&self) -> bool {
        self.pakete.lock().is_empty()
    }

    pub fn kapazitaet(&self) -> usize {
        self.kapazitaet
    }

    /// Bisher verdraengte Pakete
    pub fn verworfen(&self) -> u64 {
        self.verworfen.load(Ordering::Relaxed)
    }
}

/// Gibt Pakete im festen Frame-Takt an den Sende-Thread weiter
pub struct Pacer {
    queue: Arc<PacingQueue>,
    ausgang: Sender<Vec<u8>>,
    intervall: Duration,
    signal_tx: mpsc::UnboundedSender<SessionSignal>,
    token: CancellationToken,
    zaehler: Arc<SessionZaehler>,
    metriken: RelayMetrics,
}

impl Pacer {
    pub fn neu(
        queue: Arc<PacingQueue>,
        ausgang: Sender<Vec<u8>>,
        intervall: Duration,
        signal_tx: mpsc::UnboundedSender<SessionSignal>,
        token: CancellationToken,
        zaehler: Arc<SessionZaehler>,
        metriken: RelayMetrics,
    ) -> Self {
        Self {
            queue,
            ausgang,
            intervall,
            signal_tx,
            token,
            zaehler,
            metriken,
        }
    }

    /// Laeuft bis zum Abbruch oder bis der Sende-Thread weg ist
    ///
    /// Die Sendezeitpunkte werden aus einer Basis fortgeschrieben statt
    /// pro Paket neu geschlafen; so summiert sich kein Jitter. Kommt ein
    /// Paket erst nach seinem Sendezeitpunkt (leere Queue, Pause), beginnt
    /// die Zaehlung bei diesem Paket neu. Zwei Pakete liegen nie weniger als
    /// ein Intervall auseinander.
    pub async fn laufen(self) {
        let mut naechster = Instant::now();

        loop {
            let paket = tokio::select! {
                _ = self.token.cancelled() => break,
                paket = self.queue.naechstes() => paket,
            };

            let jetzt = Instant::now();
            if jetzt > naechster {
                naechster = jetzt;
            }
            if naechster > jetzt {
                tokio::select! {
                    _ = self.token.cancelled() => break,
                    _ = tokio::time::sleep_until(naechster) => {}
                }
            }

            let verspaetung = Instant::now().saturating_duration_since(naechster);
            self.metriken
                .pacing_delay_seconds
                .observe(verspaetung.as_secs_f64());

            if self.ausgang.send(paket).is_err() {
                tracing::warn!("Sende-Thread beendet, Pacer stoppt");
                let _ = self
                    .signal_tx
                    .send(SessionSignal::TransportVerloren("Sende-Thread beendet".into()));
                break;
            }
            self.metriken.outbound_packets_total.inc();
            SessionZaehler::erhoehen(&self.zaehler.gesendet);

            naechster += self.intervall;
        }

        tracing::debug!("Pacer beendet");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paket(n: u8) -> Vec<u8> {
        vec![n; 4]
    }

    #[test]
    fn volle_queue_verdraengt_aeltestes() {
        let q = PacingQueue::neu(3);
        assert!(!q.einreihen(paket(1)));
        assert!(!q.einreihen(paket(2)));
        assert!(!q.einreihen(paket(3)));
        assert!(q.einreihen(paket(4)));

        assert_eq!(q.laenge(), 3);
        assert_eq!(q.verworfen(), 1);
        assert_eq!(q.try_naechstes(), Some(paket(2)));
        assert_eq!(q.leeren(), 2);
        assert!(q.ist_leer());
    }

    #[tokio::test]
    async fn naechstes_wartet_auf_paket() {
        let q = Arc::new(PacingQueue::neu(4));
        let q2 = q.clone();
        let warten = tokio::spawn(async move { q2.naechstes().await });
        tokio::task::yield_now().await;
        q.einreihen(paket(9));
        let p = tokio::time::timeout(Duration::from_secs(1), warten)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(p, paket(9));
    }

    struct Aufbau {
        queue: Arc<PacingQueue>,
        rx: crossbeam_channel::Receiver<Vec<u8>>,
        token: CancellationToken,
        zaehler: Arc<SessionZaehler>,
        _signal_rx: mpsc::UnboundedReceiver<SessionSignal>,
    }

    fn pacer_starten() -> Aufbau {
        let queue = Arc::new(PacingQueue::neu(16));
        let (tx, rx) = crossbeam_channel::unbounded();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let zaehler = Arc::new(SessionZaehler::default());
        let pacer = Pacer::neu(
            queue.clone(),
            tx,
            Duration::from_millis(20),
            signal_tx,
            token.clone(),
            zaehler.clone(),
            RelayMetrics::neu().unwrap(),
        );
        tokio::spawn(pacer.laufen());
        Aufbau {
            queue,
            rx,
            token,
            zaehler,
            _signal_rx: signal_rx,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ein_paket_pro_intervall() {
        let a = pacer_starten();
        for n in 0..3 {
            a.queue.einreihen(paket(n));
        }

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(a.rx.try_recv().unwrap(), paket(0));
        assert!(a.rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(a.rx.try_recv().unwrap(), paket(1));
        assert!(a.rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(a.rx.try_recv().unwrap(), paket(2));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(a.rx.try_recv().is_err());
        assert_eq!(a.zaehler.snapshot().gesendet, 3);
        a.token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn nach_pause_kein_aufholen() {
        let a = pacer_starten();
        a.queue.einreihen(paket(0));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(a.rx.try_recv().is_ok());

        // Lange Pause: die naechsten Pakete duerfen nicht als Burst kommen
        tokio::time::sleep(Duration::from_millis(500)).await;
        a.queue.einreihen(paket(1));
        a.queue.einreihen(paket(2));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(a.rx.try_recv().unwrap(), paket(1));
        assert!(a.rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(a.rx.try_recv().unwrap(), paket(2));
        a.token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn kurze_luecke_verkuerzt_nicht_den_abstand() {
        let a = pacer_starten();
        a.queue.einreihen(paket(0));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(a.rx.try_recv().is_ok());

        // Paket 1 kommt bei t=35, 15 ms nach seinem Sendezeitpunkt
        tokio::time::sleep(Duration::from_millis(34)).await;
        a.queue.einreihen(paket(1));
        a.queue.einreihen(paket(2));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(a.rx.try_recv().unwrap(), paket(1));

        // Nicht im alten Raster bei t=40, sondern ein Intervall spaeter
        tokio::time::sleep(Duration::from_millis(14)).await;
        assert!(a.rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_millis(6)).await;
        assert_eq!(a.rx.try_recv().unwrap(), paket(2));
        a.token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn abbruch_beendet_pacer() {
        let a = pacer_starten();
        a.token.cancel();
        tokio::time::sleep(Duration::from_millis(1)).await;
        a.queue.einreihen(paket(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(a.rx.try_recv().is_err());
        assert_eq!(a.queue.laenge(), 1);
    }
}
