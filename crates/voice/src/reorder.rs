//! Reorder-Puffer pro Quelle
//!
//! Ordnet eingehende Pakete nach ihrer 16-Bit-Sequenznummer. Pakete, die
//! innerhalb des Fensters `tiefe` vor der erwarteten Nummer liegen, werden
//! gepuffert, bis die Luecke geschlossen ist. Alles ausserhalb des Fensters
//! wird sofort verarbeitet: es wird nie auf ein fehlendes Paket gewartet.
//!
//! ## Entscheidung pro Paket (d = seq - erwartet, vorzeichenbehaftet mod 2^16)
//!
//! | d                  | Aktion                                              |
//! |--------------------|-----------------------------------------------------|
//! | 0                  | zustellen, danach gepufferte Nachfolger             |
//! | 1 .. tiefe-1       | puffern                                             |
//! | >= tiefe           | Puffer in Reihenfolge leeren, Paket zustellen       |
//! | -tiefe .. -1       | verspaetet oder Duplikat, verwerfen                 |
//! | < -tiefe           | Quelle hat neu begonnen: Puffer leeren, zustellen   |
//!
//! Nicht thread-safe; gehoert genau einer Quelle im Inbound-Task.

/// Zaehler eines Reorder-Puffers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReorderStatistik {
    /// In Reihenfolge zugestellte Pakete
    pub zugestellt: u64,
    /// Zu spaet angekommene Pakete und Duplikate
    pub verworfen: u64,
    /// Pakete, die zunaechst gepuffert werden mussten
    pub umsortiert: u64,
    /// Luecken, die aufgegeben wurden
    pub luecken: u64,
}

/// Sortiert Pakete einer Quelle nach Sequenznummer
#[derive(Debug)]
pub struct ReorderPuffer<T> {
    tiefe: u16,
    /// Naechste erwartete Sequenznummer; `None` bis zum ersten Paket
    erwartet: Option<u16>,
    wartend: Vec<(u16, T)>,
    statistik: ReorderStatistik,
}

impl<T> ReorderPuffer<T> {
    /// Erstellt einen Puffer; `tiefe` wird auf 1..=16384 begrenzt
    pub fn neu(tiefe: usize) -> Self {
        let tiefe = tiefe.clamp(1, 1 << 14) as u16;
        Self {
            tiefe,
            erwartet: None,
            wartend: Vec::with_capacity(tiefe as usize),
            statistik: ReorderStatistik::default(),
        }
    }

    /// Nimmt ein Paket an und gibt alle jetzt zustellbaren Pakete in Reihenfolge zurueck
    pub fn einfuegen(&mut self, seq: u16, paket: T) -> Vec<T> {
        let mut freigegeben = Vec::new();

        let Some(erwartet) = self.erwartet else {
            self.zustellen(seq, paket, &mut freigegeben);
            return freigegeben;
        };

        let d = seq.wrapping_sub(erwartet) as i16;
        let tiefe = self.tiefe as i16;

        if d == 0 {
            self.zustellen(seq, paket, &mut freigegeben);
            self.aufholen(&mut freigegeben);
        } else if d > 0 && d < tiefe {
            if self.wartend.iter().any(|(s, _)| *s == seq) {
                self.statistik.verworfen += 1;
                tracing::trace!(sequence = seq, "Duplikat im Reorder-Puffer verworfen");
            } else {
                self.statistik.umsortiert += 1;
                self.wartend.push((seq, paket));
            }
        } else if d >= tiefe {
            tracing::debug!(
                sequence = seq,
                erwartet,
                "Luecke ausserhalb des Fensters, Puffer wird geleert"
            );
            self.statistik.luecken += 1;
            self.alles_freigeben(&mut freigegeben);
            self.zustellen(seq, paket, &mut freigegeben);
        } else if d >= -tiefe {
            self.statistik.verworfen += 1;
            tracing::trace!(sequence = seq, erwartet, "Verspaetetes Paket verworfen");
        } else {
            tracing::debug!(sequence = seq, erwartet, "Sequenzsprung zurueck, neu synchronisiert");
            self.statistik.luecken += 1;
            self.alles_freigeben(&mut freigegeben);
            self.zustellen(seq, paket, &mut freigegeben);
        }

        freigegeben
    }

    /// Anzahl gepufferter Pakete
    pub fn wartend(&self) -> usize {
        self.wartend.len()
    }

    pub fn statistik(&self) -> ReorderStatistik {
        self.statistik
    }

    fn zustellen(&mut self, seq: u16, paket: T, ziel: &mut Vec<T>) {
        ziel.push(paket);
        self.erwartet = Some(seq.wrapping_add(1));
        self.statistik.zugestellt += 1;
    }

    /// Stellt gepufferte Pakete zu, solange sie lueckenlos anschliessen
    fn aufholen(&mut self, ziel: &mut Vec<T>) {
        while let Some(erwartet) = self.erwartet {
            let Some(pos) = self.wartend.iter().position(|(s, _)| *s == erwartet) else {
                break;
            };
            let (seq, paket) = self.wartend.swap_remove(pos);
            self.zustellen(seq, paket, ziel);
        }
    }

    /// Stellt alle gepufferten Pakete in Sequenzreihenfolge zu
    fn alles_freigeben(&mut self, ziel: &mut Vec<T>) {
        let Some(basis) = self.erwartet else { return };
        let mut wartend = std::mem::take(&mut self.wartend);
        wartend.sort_by_key(|(s, _)| s.wrapping_sub(basis));
        for (seq, paket) in wartend {
            self.zustellen(seq, paket, ziel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alle(puffer: &mut ReorderPuffer<u16>, seqs: &[u16]) -> Vec<u16> {
        seqs.iter()
            .flat_map(|&s| puffer.einfuegen(s, s))
            .collect()
    }

    #[test]
    fn reihenfolge_bleibt_erhalten() {
        let mut p = ReorderPuffer::neu(8);
        assert_eq!(alle(&mut p, &[0, 1, 2, 3]), vec![0, 1, 2, 3]);
        assert_eq!(p.wartend(), 0);
    }

    #[test]
    fn vertauschte_pakete_werden_sortiert() {
        let mut p = ReorderPuffer::neu(8);
        assert_eq!(alle(&mut p, &[100, 102, 101, 104, 103]), vec![100, 101, 102, 103, 104]);
        assert_eq!(p.statistik().umsortiert, 2);
    }

    #[test]
    fn verspaetete_und_doppelte_werden_verworfen() {
        let mut p = ReorderPuffer::neu(8);
        assert_eq!(alle(&mut p, &[10, 11, 11, 10, 13, 13]), vec![10, 11]);
        assert_eq!(p.statistik().verworfen, 3);
        assert_eq!(p.wartend(), 1);
    }

    #[test]
    fn grosse_luecke_blockiert_nicht() {
        let mut p = ReorderPuffer::neu(4);
        assert_eq!(alle(&mut p, &[0, 2, 3]), vec![0]);
        // 1 fehlt dauerhaft; 10 liegt ausserhalb des Fensters
        assert_eq!(p.einfuegen(10, 10), vec![2, 3, 10]);
        assert_eq!(p.einfuegen(11, 11), vec![11]);
        assert_eq!(p.statistik().luecken, 1);
    }

    #[test]
    fn wrap_around() {
        let mut p = ReorderPuffer::neu(8);
        assert_eq!(
            alle(&mut p, &[65534, 0, 65535, 1]),
            vec![65534, 65535, 0, 1]
        );
    }

    #[test]
    fn neustart_der_quelle() {
        let mut p = ReorderPuffer::neu(8);
        alle(&mut p, &[5000, 5001]);
        assert_eq!(p.einfuegen(3, 3), vec![3]);
        assert_eq!(p.einfuegen(4, 4), vec![4]);
    }

    #[test]
    fn beliebige_reihenfolge_im_fenster_ist_monoton() {
        // Deterministische Permutationen von Bloecken innerhalb des Fensters
        let tiefe = 8usize;
        let mut zustand: u32 = 0x1234_5678;
        for runde in 0..200u16 {
            let start = runde.wrapping_mul(977);
            let mut seqs: Vec<u16> = (0..40u16).map(|i| start.wrapping_add(i)).collect();
            for block in seqs[1..].chunks_mut(tiefe - 1) {
                for i in (1..block.len()).rev() {
                    zustand = zustand.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                    let j = (zustand >> 16) as usize % (i + 1);
                    block.swap(i, j);
                }
            }

            let mut p = ReorderPuffer::neu(tiefe);
            let raus = alle(&mut p, &seqs);
            let erwartet: Vec<u16> = (0..40u16).map(|i| start.wrapping_add(i)).collect();
            assert_eq!(raus, erwartet, "Runde {runde}");
        }
    }
}
