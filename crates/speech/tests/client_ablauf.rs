//! Integrationstests fuer den SpeechClient ueber In-Memory-Gegenstellen

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::sync::mpsc;
use tokio::time::timeout;

use voicerelay_audio::AudioFrame;
use voicerelay_protocol::codec::MODEL_FORMAT;
use voicerelay_protocol::speech::{ApiFehler, ClientEvent, ServerEvent};
use voicerelay_speech::{
    KanalConnector, LinkGegenstelle, SpeechClient, SpeechConfig, SpeechError, SpeechState,
    SprachAusgabe,
};

const WARTEN: Duration = Duration::from_secs(2);

struct Aufbau {
    client: SpeechClient,
    connector: Arc<KanalConnector>,
    gegenstellen: mpsc::UnboundedReceiver<LinkGegenstelle>,
    ausgabe: mpsc::Receiver<SprachAusgabe>,
}

fn starten(config: SpeechConfig) -> Aufbau {
    let (connector, gegenstellen) = KanalConnector::neu();
    let connector = Arc::new(connector);
    let (ausgabe_tx, ausgabe) = mpsc::channel(32);
    let client = SpeechClient::starten(connector.clone(), config, ausgabe_tx);
    Aufbau {
        client,
        connector,
        gegenstellen,
        ausgabe,
    }
}

async fn naechste_gegenstelle(aufbau: &mut Aufbau) -> LinkGegenstelle {
    timeout(WARTEN, aufbau.gegenstellen.recv())
        .await
        .expect("kein Verbindungsversuch")
        .expect("Connector geschlossen")
}

/// Verbindet, bestaetigt die Session und wartet auf Ready
async fn bereit(aufbau: &mut Aufbau) -> LinkGegenstelle {
    let mut gegenstelle = naechste_gegenstelle(aufbau).await;
    let erste = timeout(WARTEN, gegenstelle.von_client.recv())
        .await
        .expect("keine erste Nachricht");
    assert!(matches!(erste, Some(ClientEvent::SessionUpdate { .. })));
    assert!(gegenstelle.ereignis(ServerEvent::SessionCreated).await);
    timeout(WARTEN, aufbau.client.bereit_abwarten())
        .await
        .expect("Ready nicht erreicht")
        .expect("Sprachsession beendet");
    gegenstelle
}

async fn naechste_ausgabe(aufbau: &mut Aufbau) -> SprachAusgabe {
    timeout(WARTEN, aufbau.ausgabe.recv())
        .await
        .expect("keine Ausgabe")
        .expect("Ausgabekanal geschlossen")
}

fn pcm_base64(samples: usize) -> String {
    STANDARD.encode(AudioFrame::stille(MODEL_FORMAT, samples).zu_le_bytes())
}

#[tokio::test]
async fn test_session_update_als_erste_nachricht() {
    let mut aufbau = starten(SpeechConfig::default());
    let mut gegenstelle = naechste_gegenstelle(&mut aufbau).await;

    match timeout(WARTEN, gegenstelle.von_client.recv()).await.unwrap() {
        Some(ClientEvent::SessionUpdate { session }) => {
            assert_eq!(session.voice, "alloy");
            assert_eq!(session.turn_detection.typ, "server_vad");
            assert_eq!(session.input_audio_format, "pcm16");
        }
        andere => panic!("unerwartete erste Nachricht: {andere:?}"),
    }
    assert_eq!(aufbau.client.zustand(), SpeechState::Configuring);

    assert!(gegenstelle.ereignis(ServerEvent::SessionCreated).await);
    timeout(WARTEN, aufbau.client.bereit_abwarten())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(aufbau.client.zustand(), SpeechState::Ready);
}

#[tokio::test]
async fn test_audio_nur_wenn_aktiv() {
    let mut aufbau = starten(SpeechConfig::default());
    let chunk = AudioFrame::stille(MODEL_FORMAT, 2400);

    assert!(!aufbau.client.audio_senden(chunk.clone()));

    let mut gegenstelle = bereit(&mut aufbau).await;
    assert!(aufbau.client.audio_senden(chunk.clone()));

    let nachricht = timeout(WARTEN, gegenstelle.von_client.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        nachricht,
        ClientEvent::InputAudioBufferAppend {
            audio: STANDARD.encode(chunk.zu_le_bytes())
        }
    );
}

#[tokio::test]
async fn test_audio_delta_wird_weitergeleitet() {
    let mut aufbau = starten(SpeechConfig::default());
    let gegenstelle = bereit(&mut aufbau).await;

    assert!(gegenstelle.ereignis(ServerEvent::ResponseCreated).await);
    assert!(
        gegenstelle
            .ereignis(ServerEvent::ResponseAudioDelta {
                delta: pcm_base64(2400)
            })
            .await
    );

    match naechste_ausgabe(&mut aufbau).await {
        SprachAusgabe::Audio(frame) => {
            assert_eq!(frame.format(), MODEL_FORMAT);
            assert_eq!(frame.samples_pro_kanal(), 2400);
        }
        andere => panic!("Audio erwartet, erhalten: {andere:?}"),
    }
    assert_eq!(aufbau.client.zustand(), SpeechState::Streaming);

    assert!(gegenstelle.ereignis(ServerEvent::ResponseDone).await);
    assert_eq!(naechste_ausgabe(&mut aufbau).await, SprachAusgabe::AntwortFertig);
    assert_eq!(aufbau.client.zustand(), SpeechState::Ready);
}

#[tokio::test]
async fn test_kleine_fragmente_verworfen() {
    let mut aufbau = starten(SpeechConfig::default());
    let gegenstelle = bereit(&mut aufbau).await;

    // 25 Samples = 50 Bytes, unter der Schwelle
    assert!(
        gegenstelle
            .ereignis(ServerEvent::ResponseAudioDelta {
                delta: pcm_base64(25)
            })
            .await
    );
    assert!(
        gegenstelle
            .ereignis(ServerEvent::ResponseAudioDelta {
                delta: pcm_base64(480)
            })
            .await
    );

    match naechste_ausgabe(&mut aufbau).await {
        SprachAusgabe::Audio(frame) => assert_eq!(frame.samples_pro_kanal(), 480),
        andere => panic!("Audio erwartet, erhalten: {andere:?}"),
    }
}

#[tokio::test]
async fn test_sprechbeginn_unterbricht_ausgabe() {
    let mut aufbau = starten(SpeechConfig::default());
    let gegenstelle = bereit(&mut aufbau).await;

    assert!(gegenstelle.ereignis(ServerEvent::SpeechStarted).await);
    assert_eq!(naechste_ausgabe(&mut aufbau).await, SprachAusgabe::Unterbrechung);
    assert!(aufbau.client.zustand().ist_aktiv());
}

#[tokio::test]
async fn test_fehlerereignis_verbindet_neu() {
    let config = SpeechConfig::default().mit_wiederverbindung(3, Duration::from_millis(1));
    let mut aufbau = starten(config);
    let gegenstelle = bereit(&mut aufbau).await;

    assert!(
        gegenstelle
            .ereignis(ServerEvent::Error {
                error: ApiFehler {
                    typ: Some("server_error".into()),
                    code: Some("intern".into()),
                    message: "kaputt".into(),
                }
            })
            .await
    );

    assert_eq!(
        naechste_ausgabe(&mut aufbau).await,
        SprachAusgabe::Wiederverbindung { versuch: 1 }
    );
    let _zweite = bereit(&mut aufbau).await;
    assert_eq!(aufbau.connector.verbindungsversuche(), 2);
    assert_eq!(aufbau.client.fehlversuche(), 1);
}

#[tokio::test]
async fn test_dritte_trennung_ist_fatal() {
    let config = SpeechConfig::default().mit_wiederverbindung(3, Duration::from_millis(1));
    let mut aufbau = starten(config);
    let fatal = aufbau.client.fatal_empfaenger().expect("Fatal-Kanal fehlt");
    assert!(aufbau.client.fatal_empfaenger().is_none());

    for _ in 0..3 {
        let gegenstelle = naechste_gegenstelle(&mut aufbau).await;
        gegenstelle.schliessen("Gegenstelle weg").await;
    }

    let fehler = timeout(WARTEN, fatal)
        .await
        .expect("kein fataler Fehler")
        .expect("Fatal-Kanal ohne Fehler geschlossen");
    assert!(matches!(
        fehler,
        SpeechError::WiederverbindungErschoepft { versuche: 3 }
    ));
    assert_eq!(aufbau.connector.verbindungsversuche(), 3);
    assert!(aufbau.gegenstellen.try_recv().is_err());
    assert_eq!(aufbau.client.zustand(), SpeechState::Disconnected);
    assert!(aufbau.client.bereit_abwarten().await.is_err());
}

#[tokio::test]
async fn test_stoppen_beendet_ohne_fatal() {
    let mut aufbau = starten(SpeechConfig::default());
    let _gegenstelle = bereit(&mut aufbau).await;
    let fatal = aufbau.client.fatal_empfaenger().unwrap();

    timeout(WARTEN, aufbau.client.stoppen(Duration::from_secs(1)))
        .await
        .expect("stoppen haengt");

    assert_eq!(aufbau.client.zustand(), SpeechState::Disconnected);
    assert!(fatal.await.is_err());
    assert_eq!(aufbau.connector.verbindungsversuche(), 1);
}
