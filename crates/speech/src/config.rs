//! Konfiguration des Sprachmodell-Clients

use std::time::Duration;

use voicerelay_protocol::speech::SessionKonfiguration;

/// Einstellungen fuer [`crate::SpeechClient`]
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Inhalt der `session.update`-Nachricht nach jedem Verbindungsaufbau
    pub session: SessionKonfiguration,
    /// Aufeinanderfolgende Trennungen bis zum Aufgeben
    pub max_versuche: u32,
    /// Grund-Wartezeit; waechst linear mit dem Versuch
    pub backoff: Duration,
    /// So lange `Ready` gilt eine Verbindung als stabil
    pub stabil_nach: Duration,
    /// Puffer fuer Audio in Richtung Modell (in Chunks)
    pub eingabe_kapazitaet: usize,
    /// Kleinere Audio-Fragmente vom Modell werden verworfen
    pub min_fragment_bytes: usize,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            session: SessionKonfiguration::default(),
            max_versuche: 3,
            backoff: Duration::from_millis(500),
            stabil_nach: Duration::from_secs(30),
            eingabe_kapazitaet: 64,
            min_fragment_bytes: 100,
        }
    }
}

impl SpeechConfig {
    pub fn mit_session(mut self, session: SessionKonfiguration) -> Self {
        self.session = session;
        self
    }

    pub fn mit_wiederverbindung(mut self, max_versuche: u32, backoff: Duration) -> Self {
        self.max_versuche = max_versuche;
        self.backoff = backoff;
        self
    }

    /// Nach dieser Zeit im Zustand `Ready` beginnt die Zaehlung der Trennungen neu
    pub fn mit_stabilitaet(mut self, stabil_nach: Duration) -> Self {
        self.stabil_nach = stabil_nach;
        self
    }
}
