//! Integration-Tests fuer den SessionManager
//!
//! Der Anruf ist ein echter localhost-UDP-Socket, das Sprachmodell eine
//! In-Memory-Gegenstelle ueber den KanalConnector.

use std::net::UdpSocket as StdUdpSocket;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

use voicerelay_audio::{AudioFrame, OpusDecoder, OpusEncoder};
use voicerelay_core::{CallId, RelayError, Result};
use voicerelay_crypto::{CryptoContext, SecretBytes, VerschluesselungsModus};
use voicerelay_observability::RelayMetrics;
use voicerelay_protocol::codec::{OpusConfig, CALL_FORMAT, CALL_SAMPLES_PRO_FRAME, MODEL_FORMAT};
use voicerelay_protocol::speech::{ClientEvent, ServerEvent};
use voicerelay_protocol::voice::RtpHeader;
use voicerelay_speech::{KanalConnector, LinkGegenstelle, SpeechConfig};
use voicerelay_voice::{
    CallConnection, CallGateway, Lebenszyklus, RelayConfig, SessionManager, VoiceSession,
};

const WARTEN: Duration = Duration::from_secs(3);
const SCHLUESSEL: [u8; 32] = [0x42; 32];
const EIGENE_SSRC: u32 = 0x1111;
const FREMDE_SSRC: u32 = 0x2222;

// ---------------------------------------------------------------------------
// Test-Gateway
// ---------------------------------------------------------------------------

struct TestAnruf {
    call_id: CallId,
    socket: StdUdpSocket,
    beitretbar: bool,
    sprechstatus: Mutex<Vec<bool>>,
    trennungen: AtomicUsize,
    /// Dauer des Medienkanal-Aufbaus
    verbinde_dauer: Duration,
    verbunden: AtomicBool,
}

impl TestAnruf {
    fn sprechstatus(&self) -> Vec<bool> {
        self.sprechstatus.lock().expect("Lock vergiftet").clone()
    }

    fn trennungen(&self) -> usize {
        self.trennungen.load(Ordering::SeqCst)
    }

    fn ist_verbunden(&self) -> bool {
        self.verbunden.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CallGateway for TestAnruf {
    fn call_id(&self) -> CallId {
        self.call_id
    }

    async fn ist_beitretbar(&self) -> bool {
        self.beitretbar
    }

    async fn verbinden(&self) -> Result<CallConnection> {
        if !self.verbinde_dauer.is_zero() {
            tokio::time::sleep(self.verbinde_dauer).await;
        }
        self.verbunden.store(true, Ordering::SeqCst);
        let socket = self
            .socket
            .try_clone()
            .map_err(|e| RelayError::Verbindung(e.to_string()))?;
        Ok(CallConnection {
            socket,
            ssrc: EIGENE_SSRC,
            schluessel: SecretBytes::new(SCHLUESSEL.to_vec()),
            modus: VerschluesselungsModus::Normal,
        })
    }

    async fn speaking_setzen(&self, ssrc: u32, sprechend: bool) -> Result<()> {
        assert_eq!(ssrc, EIGENE_SSRC);
        self.sprechstatus.lock().expect("Lock vergiftet").push(sprechend);
        Ok(())
    }

    async fn trennen(&self) -> Result<()> {
        self.verbunden.store(false, Ordering::SeqCst);
        self.trennungen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Gegenstelle des Anrufs: sendet und empfaengt wie die Call-Plattform
struct CallGegenstelle {
    socket: UdpSocket,
    crypto: CryptoContext,
    encoder: OpusEncoder,
}

impl CallGegenstelle {
    async fn paket_senden(&mut self, seq: u16) {
        let samples: Vec<i16> = (0..CALL_SAMPLES_PRO_FRAME * 2)
            .map(|i| ((i % 96) as i16 - 48) * 200)
            .collect();
        let frame = AudioFrame::neu(samples, CALL_FORMAT).expect("Frame ungueltig");
        let opus = self.encoder.encode(&frame).expect("Encode fehlgeschlagen");
        let header = RtpHeader::audio(seq, seq as u32 * 960, FREMDE_SSRC).encode();
        let paket = self
            .crypto
            .eingehend_verschluesseln(&header, &opus, 0)
            .expect("Verschluesselung fehlgeschlagen");
        self.socket.send(&paket).await.expect("Senden fehlgeschlagen");
    }

    async fn empfangen(&self) -> Vec<u8> {
        let mut puffer = [0u8; 1500];
        let n = timeout(WARTEN, self.socket.recv(&mut puffer))
            .await
            .expect("kein Paket aus dem Relay")
            .expect("Empfangen fehlgeschlagen");
        puffer[..n].to_vec()
    }
}

// ---------------------------------------------------------------------------
// Aufbau
// ---------------------------------------------------------------------------

struct Umgebung {
    manager: SessionManager,
    metriken: RelayMetrics,
    gegenstellen: mpsc::UnboundedReceiver<LinkGegenstelle>,
}

fn test_config() -> RelayConfig {
    RelayConfig {
        beitritt_timeout: Duration::from_secs(2),
        abbau_timeout: Duration::from_millis(500),
        thread_join_timeout: Duration::from_millis(500),
        ..RelayConfig::default()
    }
}

fn umgebung(config: RelayConfig, speech: SpeechConfig) -> Umgebung {
    let (connector, gegenstellen) = KanalConnector::neu();
    let metriken = RelayMetrics::neu().expect("Metriken konnten nicht erstellt werden");
    let manager = SessionManager::neu(config, Arc::new(connector), speech, metriken.clone())
        .expect("Manager konnte nicht erstellt werden");
    Umgebung {
        manager,
        metriken,
        gegenstellen,
    }
}

async fn anruf(call_id: u64) -> (Arc<TestAnruf>, CallGegenstelle) {
    anruf_mit_verzoegerung(call_id, Duration::ZERO).await
}

async fn anruf_mit_verzoegerung(
    call_id: u64,
    verbinde_dauer: Duration,
) -> (Arc<TestAnruf>, CallGegenstelle) {
    let relay = StdUdpSocket::bind("127.0.0.1:0").expect("Bind Relay-Seite");
    let gegenstelle = UdpSocket::bind("127.0.0.1:0").await.expect("Bind Gegenstelle");
    relay
        .connect(gegenstelle.local_addr().expect("Adresse Gegenstelle"))
        .expect("Connect Relay-Seite");
    gegenstelle
        .connect(relay.local_addr().expect("Adresse Relay"))
        .await
        .expect("Connect Gegenstelle");

    let anruf = Arc::new(TestAnruf {
        call_id: CallId(call_id),
        socket: relay,
        beitretbar: true,
        sprechstatus: Mutex::new(Vec::new()),
        trennungen: AtomicUsize::new(0),
        verbinde_dauer,
        verbunden: AtomicBool::new(false),
    });
    let gegenstelle = CallGegenstelle {
        socket: gegenstelle,
        crypto: CryptoContext::neu(
            &SecretBytes::new(SCHLUESSEL.to_vec()),
            VerschluesselungsModus::Normal,
        )
        .expect("Kontext ungueltig"),
        encoder: OpusEncoder::new(OpusConfig::default()).expect("Encoder ungueltig"),
    };
    (anruf, gegenstelle)
}

/// Nimmt die naechste Verbindung an, prueft session.update und bestaetigt
async fn sprachsession_bestaetigen(
    gegenstellen: &mut mpsc::UnboundedReceiver<LinkGegenstelle>,
) -> LinkGegenstelle {
    let mut link = timeout(WARTEN, gegenstellen.recv())
        .await
        .expect("kein Verbindungsversuch zum Sprachmodell")
        .expect("Connector geschlossen");
    let erste = timeout(WARTEN, link.von_client.recv())
        .await
        .expect("keine erste Nachricht");
    assert!(matches!(erste, Some(ClientEvent::SessionUpdate { .. })));
    assert!(link.ereignis(ServerEvent::SessionCreated).await);
    link
}

async fn beitreten(
    umgebung: &mut Umgebung,
    anruf: Arc<TestAnruf>,
) -> (Arc<VoiceSession>, LinkGegenstelle) {
    let manager = umgebung.manager.clone();
    let join = tokio::spawn(async move { manager.join(anruf).await });
    let link = sprachsession_bestaetigen(&mut umgebung.gegenstellen).await;
    let session = timeout(WARTEN, join)
        .await
        .expect("join haengt")
        .expect("join-Task abgestuerzt")
        .expect("join fehlgeschlagen");
    (session, link)
}

async fn warten_bis(mut bedingung: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < WARTEN {
        if bedingung() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bedingung()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_beitritt_ist_streaming() {
    let mut umgebung = umgebung(test_config(), SpeechConfig::default());
    let (anruf, _gegenstelle) = anruf(1).await;

    let (session, _link) = beitreten(&mut umgebung, anruf.clone()).await;

    assert_eq!(session.lebenszyklus(), Lebenszyklus::Streaming);
    assert_eq!(session.ssrc(), EIGENE_SSRC);
    assert_eq!(umgebung.manager.aktive_sessions(), vec![CallId(1)]);
    assert_eq!(umgebung.metriken.sessions_active.get(), 1);

    assert!(umgebung.manager.leave(CallId(1)).await);
}

#[tokio::test]
async fn test_fuenf_pakete_ergeben_einen_chunk() {
    let mut umgebung = umgebung(test_config(), SpeechConfig::default());
    let (anruf, mut gegenstelle) = anruf(2).await;
    let (session, mut link) = beitreten(&mut umgebung, anruf).await;

    for seq in 100..105 {
        gegenstelle.paket_senden(seq).await;
    }

    let nachricht = timeout(WARTEN, link.von_client.recv())
        .await
        .expect("kein Chunk beim Sprachmodell")
        .expect("Link geschlossen");
    match nachricht {
        ClientEvent::InputAudioBufferAppend { audio } => {
            let bytes = STANDARD.decode(audio).expect("kein gueltiges Base64");
            let chunk = AudioFrame::aus_le_bytes(&bytes, MODEL_FORMAT).expect("kein PCM");
            assert_eq!(chunk.samples_pro_kanal(), 2400);
        }
        andere => panic!("Audio erwartet, erhalten: {andere:?}"),
    }

    let statistik = session.statistik();
    assert_eq!(statistik.empfangen, 5);
    assert_eq!(statistik.chunks, 1);
    assert_eq!(umgebung.metriken.inbound_packets_total.get(), 5);
    assert_eq!(umgebung.metriken.model_chunks_total.get(), 1);

    umgebung.manager.leave(CallId(2)).await;
}

#[tokio::test]
async fn test_fehlerhaftes_paket_wird_uebersprungen() {
    let mut umgebung = umgebung(test_config(), SpeechConfig::default());
    let (anruf, mut gegenstelle) = anruf(3).await;
    let (session, mut link) = beitreten(&mut umgebung, anruf).await;

    // Gueltiger Header, Nutzdaten nicht authentisch
    let mut kaputt = RtpHeader::audio(99, 0, FREMDE_SSRC).encode().to_vec();
    kaputt.extend_from_slice(&[0xAA; 40]);
    gegenstelle.socket.send(&kaputt).await.expect("Senden fehlgeschlagen");

    for seq in 100..105 {
        gegenstelle.paket_senden(seq).await;
    }

    let nachricht = timeout(WARTEN, link.von_client.recv())
        .await
        .expect("kein Chunk nach fehlerhaftem Paket")
        .expect("Link geschlossen");
    assert!(matches!(nachricht, ClientEvent::InputAudioBufferAppend { .. }));

    assert!(warten_bis(|| session.statistik().verworfen == 1).await);
    assert_eq!(
        umgebung
            .metriken
            .inbound_packets_dropped_total
            .with_label_values(&["entschluesselung"])
            .get(),
        1
    );
    assert_eq!(session.lebenszyklus(), Lebenszyklus::Streaming);

    umgebung.manager.leave(CallId(3)).await;
}

#[tokio::test]
async fn test_antwort_wird_getaktet_gesendet() {
    let mut umgebung = umgebung(test_config(), SpeechConfig::default());
    let (anruf, gegenstelle) = anruf(4).await;
    let (session, link) = beitreten(&mut umgebung, anruf.clone()).await;

    assert!(link.ereignis(ServerEvent::ResponseCreated).await);
    let delta = STANDARD.encode(AudioFrame::stille(MODEL_FORMAT, 2400).zu_le_bytes());
    assert!(link.ereignis(ServerEvent::ResponseAudioDelta { delta }).await);

    let mut pakete = Vec::new();
    let mut ankunft = Vec::new();
    for _ in 0..5 {
        pakete.push(gegenstelle.empfangen().await);
        ankunft.push(Instant::now());
    }
    assert!(ankunft[4] - ankunft[0] >= Duration::from_millis(60));
    assert_eq!(anruf.sprechstatus().first(), Some(&true));

    let mut decoder = OpusDecoder::new().expect("Decoder ungueltig");
    let mut erste_sequenz = None;
    for (n, paket) in pakete.iter().enumerate() {
        let header = RtpHeader::decode(paket).expect("Header ungueltig");
        let basis = *erste_sequenz.get_or_insert(header.sequence);
        assert_eq!(header.sequence, basis.wrapping_add(n as u16));
        assert_eq!(header.timestamp, n as u32 * 960);
        assert_eq!(header.ssrc, EIGENE_SSRC);

        let opus = gegenstelle
            .crypto
            .entschluesseln_mit_zaehler(paket, n as u64)
            .expect("Paket nicht entschluesselbar");
        let frame = decoder.decode(&opus).expect("Opus ungueltig");
        assert_eq!(frame.samples_pro_kanal(), CALL_SAMPLES_PRO_FRAME);
    }

    assert!(link.ereignis(ServerEvent::ResponseDone).await);
    assert!(warten_bis(|| anruf.sprechstatus() == vec![true, false]).await);
    assert!(!session.ist_sprechend());
    assert_eq!(session.statistik().gesendet, 5);
    assert_eq!(umgebung.metriken.outbound_packets_total.get(), 5);

    umgebung.manager.leave(CallId(4)).await;
}

#[tokio::test]
async fn test_leave_ist_begrenzt_und_raeumt_auf() {
    let mut umgebung = umgebung(test_config(), SpeechConfig::default());
    let (anruf, mut gegenstelle) = anruf(5).await;
    let (session, _link) = beitreten(&mut umgebung, anruf.clone()).await;

    // Laufender Verkehr waehrend des Abbaus
    for seq in 0..3 {
        gegenstelle.paket_senden(seq).await;
    }

    let start = Instant::now();
    assert!(umgebung.manager.leave(CallId(5)).await);
    assert!(start.elapsed() < Duration::from_secs(2));

    assert_eq!(session.lebenszyklus(), Lebenszyklus::Closed);
    assert!(umgebung.manager.aktive_sessions().is_empty());
    assert!(umgebung.manager.session(CallId(5)).is_none());
    assert_eq!(anruf.trennungen(), 1);
    assert_eq!(umgebung.metriken.sessions_active.get(), 0);

    assert!(!umgebung.manager.leave(CallId(5)).await);
    assert_eq!(anruf.trennungen(), 1);
}

#[tokio::test]
async fn test_leave_ohne_session() {
    let umgebung = umgebung(test_config(), SpeechConfig::default());
    assert!(!umgebung.manager.leave(CallId(77)).await);
    assert_eq!(umgebung.manager.alle_verlassen().await, 0);
}

#[tokio::test]
async fn test_beitritt_zeitlimit_hinterlaesst_nichts() {
    let config = RelayConfig {
        beitritt_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let mut umgebung = umgebung(config, SpeechConfig::default());
    let (anruf, _gegenstelle) = anruf(6).await;

    let manager = umgebung.manager.clone();
    let gateway = anruf.clone();
    let join = tokio::spawn(async move { manager.join(gateway).await });

    // Verbindung annehmen, aber nie bestaetigen
    let _link = timeout(WARTEN, umgebung.gegenstellen.recv())
        .await
        .expect("kein Verbindungsversuch")
        .expect("Connector geschlossen");

    let ergebnis = timeout(WARTEN, join)
        .await
        .expect("join haengt")
        .expect("join-Task abgestuerzt");
    assert!(matches!(ergebnis, Err(RelayError::Zeitlimit(_))));

    assert!(umgebung.manager.aktive_sessions().is_empty());
    assert_eq!(anruf.trennungen(), 1);
    assert_eq!(umgebung.metriken.sessions_active.get(), 0);
}

#[tokio::test]
async fn test_doppelter_beitritt_abgelehnt() {
    let mut umgebung = umgebung(test_config(), SpeechConfig::default());
    let (erster, _g1) = anruf(7).await;
    let (zweiter, _g2) = anruf(7).await;

    let (session, _link) = beitreten(&mut umgebung, erster).await;
    let ergebnis = umgebung.manager.join(zweiter.clone()).await;
    assert!(matches!(ergebnis, Err(RelayError::BereitsVerbunden(CallId(7)))));

    assert_eq!(zweiter.trennungen(), 0);
    assert_eq!(session.lebenszyklus(), Lebenszyklus::Streaming);
    assert_eq!(umgebung.manager.aktive_sessions(), vec![CallId(7)]);

    assert_eq!(umgebung.manager.alle_verlassen().await, 1);
    assert!(umgebung.manager.aktive_sessions().is_empty());
}

#[tokio::test]
async fn test_nicht_beitretbarer_anruf() {
    let umgebung = umgebung(test_config(), SpeechConfig::default());
    let relay = StdUdpSocket::bind("127.0.0.1:0").expect("Bind");
    let anruf = Arc::new(TestAnruf {
        call_id: CallId(8),
        socket: relay,
        beitretbar: false,
        sprechstatus: Mutex::new(Vec::new()),
        trennungen: AtomicUsize::new(0),
        verbinde_dauer: Duration::ZERO,
        verbunden: AtomicBool::new(false),
    });

    let ergebnis = umgebung.manager.join(anruf).await;
    assert!(matches!(ergebnis, Err(RelayError::NichtBeitretbar(_))));
    assert!(umgebung.manager.aktive_sessions().is_empty());
}

#[tokio::test]
async fn test_erschoepfte_wiederverbindung_baut_session_ab() {
    let speech = SpeechConfig::default().mit_wiederverbindung(3, Duration::from_millis(1));
    let mut umgebung = umgebung(test_config(), speech);
    let (anruf, _gegenstelle) = anruf(9).await;
    let (session, link) = beitreten(&mut umgebung, anruf.clone()).await;

    link.schliessen("Modell weg").await;
    for _ in 0..2 {
        let link = timeout(WARTEN, umgebung.gegenstellen.recv())
            .await
            .expect("kein erneuter Verbindungsversuch")
            .expect("Connector geschlossen");
        link.schliessen("Modell weg").await;
    }

    assert!(warten_bis(|| umgebung.manager.session(CallId(9)).is_none()).await);
    assert!(warten_bis(|| session.lebenszyklus() == Lebenszyklus::Closed).await);
    assert_eq!(anruf.trennungen(), 1);
    assert_eq!(umgebung.metriken.sessions_active.get(), 0);
}

#[tokio::test]
async fn test_leave_waehrend_medienaufbau() {
    let mut umgebung = umgebung(test_config(), SpeechConfig::default());
    let (anruf, _gegenstelle) = anruf_mit_verzoegerung(10, Duration::from_millis(300)).await;

    let manager = umgebung.manager.clone();
    let gateway = anruf.clone();
    let start = Instant::now();
    let join = tokio::spawn(async move { manager.join(gateway).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(umgebung.manager.leave(CallId(10)).await);

    let ergebnis = timeout(WARTEN, join)
        .await
        .expect("join haengt")
        .expect("join-Task abgestuerzt");
    assert!(matches!(ergebnis, Err(RelayError::Getrennt(_))));
    assert!(start.elapsed() < Duration::from_millis(300));

    // Der abgebrochene Aufbau darf nicht nachtraeglich verbinden
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!anruf.ist_verbunden());
    assert!(umgebung.gegenstellen.try_recv().is_err());
    assert!(umgebung.manager.aktive_sessions().is_empty());
    assert_eq!(umgebung.metriken.sessions_active.get(), 0);
}

#[tokio::test]
async fn test_leave_waehrend_warten_auf_sprachmodell() {
    let mut umgebung = umgebung(test_config(), SpeechConfig::default());
    let (anruf, _gegenstelle) = anruf(11).await;

    let manager = umgebung.manager.clone();
    let gateway = anruf.clone();
    let join = tokio::spawn(async move { manager.join(gateway).await });

    // Verbindung annehmen, aber nie bestaetigen
    let _link = timeout(WARTEN, umgebung.gegenstellen.recv())
        .await
        .expect("kein Verbindungsversuch")
        .expect("Connector geschlossen");
    assert!(anruf.ist_verbunden());

    let start = Instant::now();
    assert!(umgebung.manager.leave(CallId(11)).await);
    let ergebnis = timeout(WARTEN, join)
        .await
        .expect("join haengt")
        .expect("join-Task abgestuerzt");
    assert!(matches!(ergebnis, Err(RelayError::Getrennt(_))));
    assert!(start.elapsed() < Duration::from_secs(1));

    assert!(!anruf.ist_verbunden());
    assert!(umgebung.manager.aktive_sessions().is_empty());

    // Der Anruf ist wieder frei
    let (session, _link) = beitreten(&mut umgebung, anruf.clone()).await;
    assert_eq!(session.lebenszyklus(), Lebenszyklus::Streaming);
    assert!(umgebung.manager.leave(CallId(11)).await);
}
