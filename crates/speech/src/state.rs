//! Zustaende der Sprachmodell-Session

/// Zustand der Verbindung zum Sprachmodell
///
/// ```text
/// Disconnected -> Connecting -> Configuring -> Ready <-> Streaming
///        ^                                       |
///        +---------------- Error <---------------+ (aus jedem Zustand)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechState {
    Disconnected,
    Connecting,
    Configuring,
    Ready,
    /// Antwort des Modells laeuft
    Streaming,
    Error,
}

impl SpeechState {
    /// Audio fliesst nur in `Ready` und `Streaming`
    pub fn ist_aktiv(&self) -> bool {
        matches!(self, Self::Ready | Self::Streaming)
    }

    /// Prueft ob ein Uebergang zulaessig ist
    pub fn uebergang_erlaubt(&self, nach: SpeechState) -> bool {
        use SpeechState::*;
        match (self, nach) {
            (_, Error) => *self != Disconnected,
            (Error, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Configuring) => true,
            (Configuring, Ready) => true,
            (Ready, Streaming) | (Streaming, Ready) => true,
            // Regulaeres Beenden durch den Besitzer
            (_, Disconnected) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SpeechState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Configuring => "configuring",
            Self::Ready => "ready",
            Self::Streaming => "streaming",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}
