//! Begrenzte Wiederverbindung
//!
//! Zaehlt aufeinanderfolgende unerwartete Trennungen. Erreicht der Zaehler
//! `max_versuche`, wird aufgegeben statt erneut zu verbinden. Eine Verbindung,
//! die mindestens `stabil_nach` lang `Ready` war, setzt den Zaehler zurueck.

use std::time::{Duration, Instant};

/// Ergebnis nach einer Trennung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entscheidung {
    /// Nach `wartezeit` erneut verbinden
    Erneut { versuch: u32, wartezeit: Duration },
    /// Schranke erreicht
    Aufgeben { versuche: u32 },
}

/// Zustand der Wiederverbindungs-Policy
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_versuche: u32,
    backoff: Duration,
    stabil_nach: Duration,
    fehlversuche: u32,
    bereit_seit: Option<Instant>,
}

impl ReconnectPolicy {
    pub fn neu(max_versuche: u32, backoff: Duration, stabil_nach: Duration) -> Self {
        Self {
            max_versuche: max_versuche.max(1),
            backoff,
            stabil_nach,
            fehlversuche: 0,
            bereit_seit: None,
        }
    }

    /// Aktuelle Verbindung hat `Ready` erreicht
    pub fn verbindung_bereit(&mut self, jetzt: Instant) {
        self.bereit_seit = Some(jetzt);
    }

    /// Verbindung ist unerwartet weggefallen
    pub fn verbindung_verloren(&mut self, jetzt: Instant) -> Entscheidung {
        if let Some(seit) = self.bereit_seit.take() {
            if jetzt.saturating_duration_since(seit) >= self.stabil_nach {
                self.fehlversuche = 0;
            }
        }

        self.fehlversuche += 1;
        if self.fehlversuche >= self.max_versuche {
            return Entscheidung::Aufgeben {
                versuche: self.fehlversuche,
            };
        }

        Entscheidung::Erneut {
            versuch: self.fehlversuche,
            wartezeit: self.backoff * self.fehlversuche,
        }
    }

    /// Anzahl aufeinanderfolgender Trennungen
    pub fn fehlversuche(&self) -> u32 {
        self.fehlversuche
    }

    pub fn max_versuche(&self) -> u32 {
        self.max_versuche
    }
}
