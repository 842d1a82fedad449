//! Call-Transport (UDP, RTP-artig)
//!
//! Definiert die binaere Paketstruktur der Audio-Uebertragung zwischen
//! Relay und Call-Plattform. Nutzdaten sind Opus-Frames, verschluesselt mit
//! dem Session-Schluessel (siehe `voicerelay-crypto`).
//!
//! ## Paketformat (Header = 12 Bytes, kein serde)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Version/Flags (obere zwei Bits = 10)
//!  1       1   Payload-Typ (0x78 = Audio)
//!  2       2   SequenzNummer (big-endian)
//!  4       4   Zeitstempel (big-endian, 48 kHz-Ticks)
//!  8       4   SSRC – Synchronisation Source (big-endian)
//! 12+      N   verschluesselte Nutzdaten
//! ```

use std::io;

/// Maske fuer die Versions-Bits im ersten Byte
pub const VERSION_MASKE: u8 = 0xC0;

/// Erwartete Versions-Bits (RTP Version 2)
pub const VERSION_BITS: u8 = 0x80;

/// Payload-Typ fuer Opus-Audio
pub const AUDIO_PAYLOAD_TYP: u8 = 0x78;

/// Magic-Bytes eines Header-Extension-Blocks (One-Byte-Header-Profil)
pub const EXTENSION_MAGIC: [u8; 2] = [0xBE, 0xDE];

/// Maximale Datagramm-Groesse die gelesen wird
pub const MAX_DATAGRAMM_LAENGE: usize = 1500;

// ---------------------------------------------------------------------------
// RtpHeader
// ---------------------------------------------------------------------------

/// 12-Byte Header eines Call-Transport-Pakets
///
/// Direkte Byte-Serialisierung, kein serde (Performance-kritisch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Version und Flags (erstes Byte, unveraendert)
    pub version_flags: u8,
    /// Payload-Typ
    pub payload_typ: u8,
    /// Sequenznummer, laeuft mod 2^16 um
    pub sequence: u16,
    /// Zeitstempel in 48 kHz-Ticks, laeuft mod 2^32 um
    pub timestamp: u32,
    /// Synchronisation Source – eindeutige Senderkennung
    pub ssrc: u32,
}

impl RtpHeader {
    /// Header-Groesse in Bytes
    pub const SIZE: usize = 12;

    /// Erstellt einen Audio-Header fuer ausgehende Pakete
    pub fn audio(sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version_flags: VERSION_BITS,
            payload_typ: AUDIO_PAYLOAD_TYP,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Serialisiert den Header in ein 12-Byte-Array (big-endian)
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.version_flags;
        buf[1] = self.payload_typ;
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }

    /// Deserialisiert einen Header aus einem Byte-Slice
    ///
    /// # Fehler
    /// - `InvalidData` wenn das Slice kuerzer als 12 Bytes ist
    /// - `InvalidData` wenn die Versions-Bits nicht `10` sind
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Header zu kurz: {} Bytes (erwartet {})",
                    buf.len(),
                    Self::SIZE
                ),
            ));
        }

        let version_flags = buf[0];
        if version_flags & VERSION_MASKE != VERSION_BITS {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Ungueltige Versions-Bits: {version_flags:#04x}"),
            ));
        }

        Ok(Self {
            version_flags,
            payload_typ: buf[1],
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    /// Prueft ob das Paket Audio traegt
    pub fn ist_audio(&self) -> bool {
        self.payload_typ == AUDIO_PAYLOAD_TYP
    }
}

// ---------------------------------------------------------------------------
// Header-Extension
// ---------------------------------------------------------------------------

/// Entfernt einen fuehrenden Header-Extension-Block aus entschluesselten Nutzdaten
///
/// Ein Block beginnt mit `BE DE`, gefolgt von der Laenge in 32-Bit-Worten
/// (u16, big-endian). Es werden `4 + 4 * laenge` Bytes uebersprungen.
/// Ein leeres Ergebnis bedeutet: das Paket traegt kein Audio (Stille).
pub fn extension_entfernen(nutzdaten: &[u8]) -> &[u8] {
    if nutzdaten.len() < 4 || nutzdaten[..2] != EXTENSION_MAGIC {
        return nutzdaten;
    }
    let worte = u16::from_be_bytes([nutzdaten[2], nutzdaten[3]]) as usize;
    let ende = 4 + worte * 4;
    nutzdaten.get(ende..).unwrap_or(&[])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
