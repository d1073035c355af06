//! Per-firing parameter selection. Every randomizable parameter follows
//! the same rule: an array with an arp mode selects deterministically by
//! the atom's position in the block; an array without one selects
//! uniformly; otherwise a range (explicit or the parameter's default)
//! is sampled uniformly and mapped to the parameter's unit.

use rand::Rng;

use crate::config;

use super::plan::{ArpMode, NoteAtom, NoteItem, Source};

/// Index into an ascending-ordered array for the given arp mode and
/// firing position. Up-down and down-up exclude the endpoints on the
/// return leg so continuous repeats produce a seamless back-and-forth
/// with period 2L−2.
pub fn arp_index(
    mode: ArpMode,
    len: usize,
    position: usize,
    rng: &mut impl Rng,
) -> usize {
    if len <= 1 {
        return 0;
    }
    match mode {
        ArpMode::None | ArpMode::Random => rng.gen_range(0..len),
        ArpMode::Up => position % len,
        ArpMode::Down => len - 1 - (position % len),
        ArpMode::UpDown => {
            let period = 2 * len - 2;
            let idx = position % period;
            (len - 1) - (idx as i64 - (len as i64 - 1)).unsigned_abs()
                as usize
        }
        ArpMode::DownUp => {
            let period = 2 * len - 2;
            let idx = position % period;
            (idx as i64 - (len as i64 - 1)).unsigned_abs() as usize
        }
    }
}

pub fn pick_note(
    atom: &NoteAtom,
    position: usize,
    rng: &mut impl Rng,
) -> Option<NoteItem> {
    match &atom.note {
        Source::Literal(item) => Some(item.clone()),
        Source::Array(items) => {
            if items.is_empty() {
                return None;
            }
            if atom.n_arp == ArpMode::None {
                Some(items[rng.gen_range(0..items.len())].clone())
            } else {
                let mut ordered = items.clone();
                ordered.sort_by_key(|item| item.lowest());
                let idx =
                    arp_index(atom.n_arp, ordered.len(), position, rng);
                Some(ordered[idx].clone())
            }
        }
        Source::Random => {
            let (lo, hi) =
                atom.n_range.unwrap_or(config::DEFAULT_NOTE_RANGE);
            Some(NoteItem::Single(sample_u8(lo, hi, rng)))
        }
    }
}

pub fn pick_velocity(
    atom: &NoteAtom,
    position: usize,
    rng: &mut impl Rng,
) -> u8 {
    select_u8(
        atom.velocity.as_ref(),
        atom.v_range,
        config::DEFAULT_VELOCITY,
        atom.v_arp,
        position,
        rng,
    )
}

pub fn pick_pan(
    atom: &NoteAtom,
    rng: &mut impl Rng,
) -> Option<u8> {
    match (&atom.pan, atom.p_range) {
        (Some(Source::Literal(v)), _) => Some(*v),
        (Some(Source::Array(items)), _) if !items.is_empty() => {
            Some(items[rng.gen_range(0..items.len())])
        }
        (Some(Source::Random), range) => {
            let (lo, hi) = range.unwrap_or((0, 127));
            Some(sample_u8(lo, hi, rng))
        }
        (None, Some((lo, hi))) => Some(sample_u8(lo, hi, rng)),
        _ => None,
    }
}

/// Resolved per-firing probability, or None when the atom carries no
/// source and no range for it.
pub fn pick_prob(
    source: Option<&Source<f64>>,
    range: Option<(f64, f64)>,
    arp: ArpMode,
    position: usize,
    rng: &mut impl Rng,
) -> Option<f64> {
    let p = match source {
        Some(Source::Literal(p)) => *p,
        Some(Source::Array(items)) if !items.is_empty() => {
            if arp == ArpMode::None {
                items[rng.gen_range(0..items.len())]
            } else {
                let mut ordered = items.clone();
                ordered.sort_by(|a, b| a.total_cmp(b));
                ordered[arp_index(arp, ordered.len(), position, rng)]
            }
        }
        Some(Source::Random) => {
            let (lo, hi) = range.unwrap_or((0.0, 1.0));
            rng.gen_range(lo..=hi)
        }
        _ => match range {
            Some((lo, hi)) => rng.gen_range(lo..=hi),
            None => return None,
        },
    };
    Some(p.clamp(0.0, 1.0))
}

fn select_u8(
    source: Option<&Source<u8>>,
    range: Option<(u8, u8)>,
    default: u8,
    arp: ArpMode,
    position: usize,
    rng: &mut impl Rng,
) -> u8 {
    match source {
        Some(Source::Literal(v)) => *v,
        Some(Source::Array(items)) if !items.is_empty() => {
            if arp == ArpMode::None {
                items[rng.gen_range(0..items.len())]
            } else {
                let mut ordered = items.clone();
                ordered.sort_unstable();
                ordered[arp_index(arp, ordered.len(), position, rng)]
            }
        }
        Some(Source::Random) => {
            let (lo, hi) = range.unwrap_or((0, 127));
            sample_u8(lo, hi, rng)
        }
        _ => match range {
            Some((lo, hi)) => sample_u8(lo, hi, rng),
            None => default,
        },
    }
}

/// Uniform real in [lo,hi] rounded into the range.
fn sample_u8(lo: u8, hi: u8, rng: &mut impl Rng) -> u8 {
    let (lo, hi) = (lo.min(hi), lo.max(hi));
    let v: f64 = rng.gen_range(lo as f64..=hi as f64);
    (v.round() as i64).clamp(lo as i64, hi as i64) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::engine::plan::Source;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(99)
    }

    #[test]
    fn test_arp_up_down_sequence() {
        let mut rng = rng();
        let picks: Vec<usize> = (0..8)
            .map(|i| arp_index(ArpMode::UpDown, 3, i, &mut rng))
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 1, 0, 1, 2, 1]);
    }

    #[test]
    fn test_arp_down_up_sequence() {
        let mut rng = rng();
        let picks: Vec<usize> = (0..8)
            .map(|i| arp_index(ArpMode::DownUp, 3, i, &mut rng))
            .collect();
        assert_eq!(picks, vec![2, 1, 0, 1, 2, 1, 0, 1]);
    }

    #[test]
    fn test_arp_up_and_down() {
        let mut rng = rng();
        let up: Vec<usize> = (0..4)
            .map(|i| arp_index(ArpMode::Up, 4, i, &mut rng))
            .collect();
        assert_eq!(up, vec![0, 1, 2, 3]);
        let down: Vec<usize> = (0..4)
            .map(|i| arp_index(ArpMode::Down, 4, i, &mut rng))
            .collect();
        assert_eq!(down, vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_up_down_seamless() {
        // no two consecutive equal values; period 2L-2
        let mut rng = rng();
        for len in 2..6usize {
            let period = 2 * len - 2;
            let picks: Vec<usize> = (0..period * 3)
                .map(|i| arp_index(ArpMode::UpDown, len, i, &mut rng))
                .collect();
            for pair in picks.windows(2) {
                assert_ne!(pair[0], pair[1], "len {}", len);
            }
            for (i, &v) in picks.iter().enumerate() {
                assert_eq!(v, picks[i % period]);
            }
        }
    }

    #[test]
    fn test_pick_note_arp_orders_ascending() {
        // array given out of order; arp walks it sorted
        let mut atom = NoteAtom::new(Source::Array(vec![
            NoteItem::Single(67),
            NoteItem::Single(60),
            NoteItem::Single(64),
        ]));
        atom.n_arp = ArpMode::Up;
        let mut rng = rng();
        let picks: Vec<u8> = (0..3)
            .map(|i| match pick_note(&atom, i, &mut rng).unwrap() {
                NoteItem::Single(n) => n,
                other => panic!("expected single: {:?}", other),
            })
            .collect();
        assert_eq!(picks, vec![60, 64, 67]);
    }

    #[test]
    fn test_chords_order_by_lowest() {
        let mut atom = NoteAtom::new(Source::Array(vec![
            NoteItem::Chord(vec![64, 67, 71]),
            NoteItem::Chord(vec![60, 64, 67]),
        ]));
        atom.n_arp = ArpMode::Up;
        let mut rng = rng();
        let first = pick_note(&atom, 0, &mut rng).unwrap();
        assert_eq!(first, NoteItem::Chord(vec![60, 64, 67]));
    }

    #[test]
    fn test_random_note_respects_range() {
        let mut atom = NoteAtom::new(Source::Random);
        atom.n_range = Some((40, 44));
        let mut rng = rng();
        for i in 0..200 {
            match pick_note(&atom, i, &mut rng).unwrap() {
                NoteItem::Single(n) => assert!((40..=44).contains(&n)),
                other => panic!("expected single: {:?}", other),
            }
        }
    }

    #[test]
    fn test_random_note_default_range() {
        let atom = NoteAtom::new(Source::Random);
        let mut rng = rng();
        for i in 0..200 {
            match pick_note(&atom, i, &mut rng).unwrap() {
                NoteItem::Single(n) => {
                    let (lo, hi) = crate::config::DEFAULT_NOTE_RANGE;
                    assert!((lo..=hi).contains(&n));
                }
                other => panic!("expected single: {:?}", other),
            }
        }
    }

    #[test]
    fn test_velocity_default_and_range() {
        let atom = NoteAtom::new(Source::Literal(NoteItem::Single(60)));
        let mut rng = rng();
        assert_eq!(
            pick_velocity(&atom, 0, &mut rng),
            crate::config::DEFAULT_VELOCITY
        );

        let mut ranged = atom.clone();
        ranged.v_range = Some((20, 30));
        for i in 0..100 {
            let v = pick_velocity(&ranged, i, &mut rng);
            assert!((20..=30).contains(&v));
        }
    }

    #[test]
    fn test_prob_sources() {
        let mut rng = rng();
        assert_eq!(
            pick_prob(None, None, ArpMode::None, 0, &mut rng),
            None
        );
        assert_eq!(
            pick_prob(
                Some(&Source::Literal(0.5)),
                None,
                ArpMode::None,
                0,
                &mut rng
            ),
            Some(0.5)
        );
        for _ in 0..50 {
            let p = pick_prob(
                Some(&Source::Random),
                Some((0.2, 0.4)),
                ArpMode::None,
                0,
                &mut rng,
            )
            .unwrap();
            assert!((0.2..=0.4).contains(&p));
        }
    }
}
