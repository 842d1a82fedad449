//! WebSocket-Transport zum Realtime-Sprachmodell
//!
//! Lese- und Schreibschleife laufen als eigene Tasks ueber den geteilten
//! Stream. Ein Keepalive sendet alle `ping_intervall` ein Ping; bleibt die
//! Gegenstelle laenger als `ping_intervall + ping_timeout` stumm, gilt die
//! Verbindung als geschlossen.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use voicerelay_protocol::speech::{ClientEvent, ServerEvent};

use crate::error::SpeechResult;
use crate::transport::{LinkEreignis, SpeechConnector, SpeechLink, LINK_KAPAZITAET};

/// Standard-Endpunkt
pub const STANDARD_URL: &str = "wss://api.openai.com/v1/realtime";

/// Standard-Modell
pub const STANDARD_MODELL: &str = "gpt-4o-mini-realtime-preview-2024-12-17";

/// Verbindet per WebSocket mit dem Realtime-Endpunkt
pub struct WsConnector {
    url: Url,
    api_key: String,
    ping_intervall: Duration,
    ping_timeout: Duration,
}

impl std::fmt::Debug for WsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnector")
            .field("url", &self.url.as_str())
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl WsConnector {
    /// Baut die Endpunkt-URL `<basis>?model=<modell>`
    pub fn neu(basis_url: &str, modell: &str, api_key: impl Into<String>) -> SpeechResult<Self> {
        let mut url = Url::parse(basis_url)?;
        url.query_pairs_mut().append_pair("model", modell);

        // Ohne Prozess-Provider kann rustls keine TLS-Verbindung aufbauen
        let _ = rustls::crypto::ring::default_provider().install_default();

        Ok(Self {
            url,
            api_key: api_key.into(),
            ping_intervall: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
        })
    }

    /// Setzt Keepalive-Intervall und Timeout
    pub fn mit_keepalive(mut self, intervall: Duration, timeout: Duration) -> Self {
        self.ping_intervall = intervall;
        self.ping_timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl SpeechConnector for WsConnector {
    async fn verbinden(&self) -> SpeechResult<SpeechLink> {
        let mut request = self.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (stream, _antwort) = connect_async(request).await?;
        info!(host = ?self.url.host_str(), "WebSocket zum Sprachmodell verbunden");

        let (mut sink, mut stream) = stream.split();
        let (ausgang_tx, mut ausgang_rx) = mpsc::channel::<ClientEvent>(LINK_KAPAZITAET);
        let (eingang_tx, eingang_rx) = mpsc::channel::<LinkEreignis>(LINK_KAPAZITAET);
        let letzte_aktivitaet = Arc::new(Mutex::new(Instant::now()));

        // --- Schreiben + Keepalive ---
        let ping_intervall = self.ping_intervall;
        let stumm_grenze = self.ping_intervall + self.ping_timeout;
        let aktivitaet = letzte_aktivitaet.clone();
        let timeout_tx = eingang_tx.clone();
        let schreiber = tokio::spawn(async move {
            let mut ping = tokio::time::interval_at(Instant::now() + ping_intervall, ping_intervall);
            loop {
                tokio::select! {
                    ereignis = ausgang_rx.recv() => {
                        let Some(ereignis) = ereignis else { break };
                        let json = match serde_json::to_string(&ereignis) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!("Nachricht nicht serialisierbar: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::text(json)).await {
                            debug!("Senden an Sprachmodell fehlgeschlagen: {e}");
                            break;
                        }
                    }
                    _ = ping.tick() => {
                        let stumm = aktivitaet.lock().elapsed() > stumm_grenze;
                        if stumm {
                            warn!("Keepalive-Timeout, Gegenstelle antwortet nicht");
                            let _ = timeout_tx
                                .send(LinkEreignis::Geschlossen(Some("Ping-Timeout".into())))
                                .await;
                            break;
                        }
                        if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                            debug!("Ping fehlgeschlagen: {e}");
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
        });

        // --- Lesen ---
        let leser = tokio::spawn(async move {
            while let Some(nachricht) = stream.next().await {
                *letzte_aktivitaet.lock() = Instant::now();
                let ereignis = match nachricht {
                    Ok(Message::Text(text)) => match ServerEvent::parsen(&text) {
                        Ok(ereignis) => LinkEreignis::Ereignis(ereignis),
                        Err(e) => {
                            warn!("Unlesbares Ereignis vom Sprachmodell: {e}");
                            continue;
                        }
                    },
                    Ok(Message::Binary(daten)) => LinkEreignis::Audio(daten.to_vec()),
                    Ok(Message::Close(frame)) => {
                        let grund = frame.map(|f| f.reason.to_string());
                        let _ = eingang_tx.send(LinkEreignis::Geschlossen(grund)).await;
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = eingang_tx
                            .send(LinkEreignis::Geschlossen(Some(e.to_string())))
                            .await;
                        return;
                    }
                };
                if eingang_tx.send(ereignis).await.is_err() {
                    return;
                }
            }
            let _ = eingang_tx.send(LinkEreignis::Geschlossen(None)).await;
        });

        Ok(SpeechLink::neu(ausgang_tx, eingang_rx, vec![schreiber, leser]))
    }
}
