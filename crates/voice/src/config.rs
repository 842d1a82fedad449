//! Laufzeit-Parameter einer Voice-Session

use std::time::Duration;

use voicerelay_protocol::codec::{OpusConfig, CALL_FRAME_MS, MODEL_FORMAT};

/// Parameter fuer [`crate::SessionManager`] und alle Pipelines einer Session
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Tiefe des Reorder-Puffers pro Quelle (Pakete)
    pub reorder_tiefe: usize,
    /// Dauer eines Chunks in Richtung Sprachmodell
    pub chunk_dauer: Duration,
    /// Ruhephase, nach der "speaking stopped" gemeldet wird
    pub sprech_pause: Duration,
    /// Kapazitaet der Pacing-Queue in Frames
    pub sende_queue_groesse: usize,
    /// Kapazitaet zwischen Empfangs-Thread und Inbound-Task (Datagramme)
    pub empfangs_queue_groesse: usize,
    /// Kapazitaet zwischen Sprachmodell und Outbound-Task
    pub ausgabe_queue_groesse: usize,
    /// Schranke fuer `join` bis das Sprachmodell `Ready` ist
    pub beitritt_timeout: Duration,
    /// Schranke fuer das Auslaufen der Tasks beim `leave`
    pub abbau_timeout: Duration,
    /// Schranke fuer das Beenden der Transport-Threads
    pub thread_join_timeout: Duration,
    /// Lese-Timeout der Transport-Threads; so oft wird das Stop-Flag geprueft
    pub poll_intervall: Duration,
    /// Pakete mit der eigenen SSRC verwerfen
    pub eigene_ssrc_ignorieren: bool,
    /// Encoder-Einstellungen fuer den ausgehenden Pfad
    pub opus: OpusConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            reorder_tiefe: 8,
            chunk_dauer: Duration::from_millis(100),
            sprech_pause: Duration::from_millis(300),
            sende_queue_groesse: 100,
            empfangs_queue_groesse: 256,
            ausgabe_queue_groesse: 64,
            beitritt_timeout: Duration::from_secs(20),
            abbau_timeout: Duration::from_secs(2),
            thread_join_timeout: Duration::from_secs(1),
            poll_intervall: Duration::from_millis(10),
            eigene_ssrc_ignorieren: true,
            opus: OpusConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Samples pro Chunk im Modellformat (2400 bei 100 ms)
    pub fn chunk_samples(&self) -> usize {
        MODEL_FORMAT.samples_pro_kanal(self.chunk_dauer.as_millis() as u32)
    }

    /// Dauer eines Call-Frames
    pub fn frame_dauer(&self) -> Duration {
        Duration::from_millis(CALL_FRAME_MS as u64)
    }

    /// Prueft die Parameter auf offensichtliche Fehler
    pub fn validieren(&self) -> Result<(), String> {
        if self.reorder_tiefe == 0 {
            return Err("reorder_tiefe muss mindestens 1 sein".into());
        }
        if self.chunk_samples() == 0 {
            return Err(format!("chunk_dauer {:?} ist zu kurz", self.chunk_dauer));
        }
        if self.sende_queue_groesse == 0 || self.empfangs_queue_groesse == 0 {
            return Err("Queue-Groessen muessen groesser als 0 sein".into());
        }
        if self.poll_intervall.is_zero() {
            return Err("poll_intervall darf nicht 0 sein".into());
        }
        self.opus.validieren()
    }
}
