//! Abtastraten- und Kanalkonvertierung
//!
//! Lineare Interpolation auf i16-Samples. Downmix mittelt die Kanaele,
//! Upmix dupliziert den (gemittelten) Monokanal.

use voicerelay_protocol::codec::AudioFormat;

use crate::frame::AudioFrame;

/// Konvertiert einen Frame in das Zielformat
pub fn resample(frame: &AudioFrame, ziel: AudioFormat) -> AudioFrame {
    let von = frame.format();
    if von == ziel {
        return frame.clone();
    }

    // Weniger Kanaele zuerst reduzieren, mehr Kanaele erst nach der Ratenanpassung
    let samples = if ziel.kanaele < von.kanaele {
        let gemischt = kanaele_konvertieren(frame.samples(), von.kanaele, ziel.kanaele);
        rate_konvertieren(&gemischt, ziel.kanaele, von.sample_rate, ziel.sample_rate)
    } else {
        let angepasst = rate_konvertieren(frame.samples(), von.kanaele, von.sample_rate, ziel.sample_rate);
        kanaele_konvertieren(&angepasst, von.kanaele, ziel.kanaele)
    };

    // Laenge ist per Konstruktion ein Vielfaches der Zielkanaele
    AudioFrame::neu(samples, ziel).unwrap_or_else(|_| AudioFrame::stille(ziel, 0))
}

/// Lineare Interpolation pro Kanal; Ausgabelaenge = floor(n * nach / von)
pub fn rate_konvertieren(samples: &[i16], kanaele: u16, von: u32, nach: u32) -> Vec<i16> {
    let kanaele = kanaele.max(1) as usize;
    if von == nach || samples.is_empty() {
        return samples.to_vec();
    }

    let n_ein = samples.len() / kanaele;
    let n_aus = (n_ein as u64 * nach as u64 / von as u64) as usize;
    let mut aus = Vec::with_capacity(n_aus * kanaele);

    for i in 0..n_aus {
        let pos = i as u64 * von as u64;
        let idx = (pos / nach as u64) as usize;
        let rest = (pos % nach as u64) as i64;
        let naechster = (idx + 1).min(n_ein - 1);
        for k in 0..kanaele {
            let a = samples[idx * kanaele + k] as i64;
            let b = samples[naechster * kanaele + k] as i64;
            let wert = a + (b - a) * rest / nach as i64;
            aus.push(wert.clamp(i16::MIN as i64, i16::MAX as i64) as i16);
        }
    }
    aus
}

/// Kanalanzahl aendern: mitteln auf Mono, dann duplizieren
pub fn kanaele_konvertieren(samples: &[i16], von: u16, nach: u16) -> Vec<i16> {
    let von = von.max(1) as usize;
    let nach = nach.max(1) as usize;
    if von == nach {
        return samples.to_vec();
    }

    let mut aus = Vec::with_capacity(samples.len() / von * nach);
    for gruppe in samples.chunks_exact(von) {
        let summe: i32 = gruppe.iter().map(|&s| s as i32).sum();
        let mono = (summe / von as i32) as i16;
        aus.extend(std::iter::repeat(mono).take(nach));
    }
    aus
}
