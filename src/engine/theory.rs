//! Static music theory tables and the pure note-math used by the parser:
//! note-token conversion, scale and chord interval lookup, and
//! range-bounded enumeration of scale/chord tones.
//!
//! Note tokens are `letter [# | b | #b] octave` with C4 = MIDI 60, e.g.
//! `c4`, `f#2`, `eb3`, `c-1`. Bare numbers in [0,127] pass through as
//! MIDI values.

/// Semitone offsets of the seven note letters from C.
fn letter_semitone(letter: char) -> Option<i32> {
    match letter.to_ascii_lowercase() {
        'c' => Some(0),
        'd' => Some(2),
        'e' => Some(4),
        'f' => Some(5),
        'g' => Some(7),
        'a' => Some(9),
        'b' => Some(11),
        _ => None,
    }
}

const SHARP_NAMES: [&str; 12] = [
    "c", "c#", "d", "d#", "e", "f", "f#", "g", "g#", "a", "a#", "b",
];

/// 30 scale interval vectors. Multi-word names are camelCase in program
/// text; lookup is case-insensitive. `major` and `minor` alias ionian
/// and aeolian.
pub const SCALES: &[(&str, &[u8])] = &[
    ("ionian", &[0, 2, 4, 5, 7, 9, 11]),
    ("dorian", &[0, 2, 3, 5, 7, 9, 10]),
    ("phrygian", &[0, 1, 3, 5, 7, 8, 10]),
    ("lydian", &[0, 2, 4, 6, 7, 9, 11]),
    ("mixolydian", &[0, 2, 4, 5, 7, 9, 10]),
    ("aeolian", &[0, 2, 3, 5, 7, 8, 10]),
    ("locrian", &[0, 1, 3, 5, 6, 8, 10]),
    ("harmonicMinor", &[0, 2, 3, 5, 7, 8, 11]),
    ("melodicMinor", &[0, 2, 3, 5, 7, 9, 11]),
    ("majorPentatonic", &[0, 2, 4, 7, 9]),
    ("minorPentatonic", &[0, 3, 5, 7, 10]),
    ("blues", &[0, 3, 5, 6, 7, 10]),
    ("wholeTone", &[0, 2, 4, 6, 8, 10]),
    ("chromatic", &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]),
    ("diminishedWholeHalf", &[0, 2, 3, 5, 6, 8, 9, 11]),
    ("diminishedHalfWhole", &[0, 1, 3, 4, 6, 7, 9, 10]),
    ("phrygianDominant", &[0, 1, 4, 5, 7, 8, 10]),
    ("doubleHarmonic", &[0, 1, 4, 5, 7, 8, 11]),
    ("hungarianMinor", &[0, 2, 3, 6, 7, 8, 11]),
    ("neapolitanMinor", &[0, 1, 3, 5, 7, 8, 11]),
    ("neapolitanMajor", &[0, 1, 3, 5, 7, 9, 11]),
    ("enigmatic", &[0, 1, 4, 6, 8, 10, 11]),
    ("persian", &[0, 1, 4, 5, 6, 8, 11]),
    ("hirajoshi", &[0, 2, 3, 7, 8]),
    ("inSen", &[0, 1, 5, 7, 10]),
    ("iwato", &[0, 1, 5, 6, 10]),
    ("yo", &[0, 2, 5, 7, 9]),
    ("egyptian", &[0, 2, 5, 7, 10]),
    ("bebopDominant", &[0, 2, 4, 5, 7, 9, 10, 11]),
    ("bebopMajor", &[0, 2, 4, 5, 7, 8, 9, 11]),
];

/// 45 chord quality interval vectors.
pub const CHORDS: &[(&str, &[u8])] = &[
    ("maj", &[0, 4, 7]),
    ("min", &[0, 3, 7]),
    ("dim", &[0, 3, 6]),
    ("aug", &[0, 4, 8]),
    ("sus2", &[0, 2, 7]),
    ("sus4", &[0, 5, 7]),
    ("5", &[0, 7]),
    ("6", &[0, 4, 7, 9]),
    ("m6", &[0, 3, 7, 9]),
    ("69", &[0, 4, 7, 9, 14]),
    ("m69", &[0, 3, 7, 9, 14]),
    ("7", &[0, 4, 7, 10]),
    ("maj7", &[0, 4, 7, 11]),
    ("m7", &[0, 3, 7, 10]),
    ("mMaj7", &[0, 3, 7, 11]),
    ("dim7", &[0, 3, 6, 9]),
    ("m7b5", &[0, 3, 6, 10]),
    ("aug7", &[0, 4, 8, 10]),
    ("augMaj7", &[0, 4, 8, 11]),
    ("7sus4", &[0, 5, 7, 10]),
    ("7b5", &[0, 4, 6, 10]),
    ("7b9", &[0, 4, 7, 10, 13]),
    ("7#9", &[0, 4, 7, 10, 15]),
    ("9", &[0, 4, 7, 10, 14]),
    ("maj9", &[0, 4, 7, 11, 14]),
    ("m9", &[0, 3, 7, 10, 14]),
    ("mMaj9", &[0, 3, 7, 11, 14]),
    ("9sus4", &[0, 5, 7, 10, 14]),
    ("9b5", &[0, 4, 6, 10, 14]),
    ("9#5", &[0, 4, 8, 10, 14]),
    ("9#11", &[0, 4, 7, 10, 14, 18]),
    ("maj9#11", &[0, 4, 7, 11, 14, 18]),
    ("11", &[0, 4, 7, 10, 14, 17]),
    ("maj11", &[0, 4, 7, 11, 14, 17]),
    ("m11", &[0, 3, 7, 10, 14, 17]),
    ("13", &[0, 4, 7, 10, 14, 21]),
    ("maj13", &[0, 4, 7, 11, 14, 21]),
    ("m13", &[0, 3, 7, 10, 14, 21]),
    ("13#11", &[0, 4, 7, 10, 14, 18, 21]),
    ("add9", &[0, 4, 7, 14]),
    ("mAdd9", &[0, 3, 7, 14]),
    ("add11", &[0, 4, 7, 17]),
    ("add13", &[0, 4, 7, 21]),
    ("7b13", &[0, 4, 7, 10, 20]),
    ("m7add11", &[0, 3, 7, 10, 17]),
];

pub fn scale_intervals(name: &str) -> Option<&'static [u8]> {
    let name = match name {
        n if n.eq_ignore_ascii_case("major") => "ionian",
        n if n.eq_ignore_ascii_case("minor") => "aeolian",
        n => n,
    };
    SCALES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, intervals)| *intervals)
}

pub fn chord_intervals(name: &str) -> Option<&'static [u8]> {
    CHORDS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, intervals)| *intervals)
}

/// Parses a note token into a MIDI number. Bare numerals in [0,127]
/// pass through; symbolic tokens are clamped to the MIDI domain after
/// the semitone offset is applied.
pub fn parse_note_token(token: &str) -> Option<u8> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    if token.chars().all(|c| c.is_ascii_digit()) {
        let n: i64 = token.parse().ok()?;
        return (0..=127).contains(&n).then_some(n as u8);
    }

    let mut chars = token.chars();
    let base = letter_semitone(chars.next()?)?;
    let rest = chars.as_str();

    // A trailing `b` is only a flat when octave digits follow it,
    // otherwise `b3` (the note B) would be unparseable.
    let (offset, octave_str) = if let Some(stripped) = rest.strip_prefix("#b")
    {
        (0, stripped)
    } else if let Some(stripped) = rest.strip_prefix('#') {
        (1, stripped)
    } else if rest.len() > 1 && rest.starts_with('b') {
        (-1, &rest[1..])
    } else {
        (0, rest)
    };

    let octave: i32 = octave_str.parse().ok()?;
    let midi = (octave + 1) * 12 + base + offset;
    Some(midi.clamp(0, 127) as u8)
}

/// Canonical (sharp-spelled) token for a MIDI number, e.g. 60 → `c4`.
pub fn note_name(midi: u8) -> String {
    let pitch_class = SHARP_NAMES[(midi % 12) as usize];
    let octave = midi as i32 / 12 - 1;
    format!("{}{}", pitch_class, octave)
}

/// Parses the root portion of a `scale(...)`/`chord(...)` spec, e.g.
/// `c#4` → (1, Some(4)), `eb` → (3, None). Returns (pitch class,
/// octave).
pub fn parse_root(spec: &str) -> Option<(i32, Option<i32>)> {
    let mut chars = spec.chars();
    let base = letter_semitone(chars.next()?)?;
    let mut rest = chars.as_str();

    let mut offset = 0;
    if let Some(stripped) = rest.strip_prefix("#b") {
        rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix('#') {
        offset = 1;
        rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix('b') {
        offset = -1;
        rest = stripped;
    }

    let octave = if rest.is_empty() {
        None
    } else {
        Some(rest.parse().ok()?)
    };

    Some((((base + offset) % 12 + 12) % 12, octave))
}

/// Splits `c#4-maj9` into root and name parts. The separator is the
/// first `-` followed by a letter, so negative octaves like `c-1`
/// remain part of the root.
pub fn split_root_spec(spec: &str) -> Option<(&str, &str)> {
    let bytes = spec.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'-' && i + 1 < bytes.len() {
            let next = bytes[i + 1] as char;
            if next.is_ascii_alphabetic() && parse_root(&spec[..i]).is_some()
            {
                return Some((&spec[..i], &spec[i + 1..]));
            }
        }
    }
    // chord names can start with a digit (`7`, `9`, `13`) but so can a
    // negative octave; only treat the digit as a name once no letter
    // separator exists anywhere in the spec.
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'-'
            && i + 1 < bytes.len()
            && (bytes[i + 1] as char).is_ascii_digit()
            && parse_root(&spec[..i]).is_some()
        {
            return Some((&spec[..i], &spec[i + 1..]));
        }
    }
    None
}

/// The root plus each interval at a fixed octave, clamped to the MIDI
/// domain.
pub fn notes_at_octave(
    root_pc: i32,
    octave: i32,
    intervals: &[u8],
) -> Vec<u8> {
    let root = (octave + 1) * 12 + root_pc;
    let mut out: Vec<u8> = intervals
        .iter()
        .map(|&iv| (root + iv as i32).clamp(0, 127) as u8)
        .collect();
    out.dedup();
    out
}

/// Enumerates scale/chord tones within [lo,hi]: anchors on the octave
/// whose root is nearest lo, walks octave offsets −2..=+2, and keeps
/// only values inside [lo,hi]∩[0,127], deduped and sorted ascending.
pub fn notes_in_range(
    root_pc: i32,
    intervals: &[u8],
    lo: u8,
    hi: u8,
) -> Vec<u8> {
    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };

    let mut anchor = root_pc;
    let mut anchor_distance = (anchor - lo as i32).abs();
    for octave in 1..11 {
        let candidate = root_pc + octave * 12;
        let distance = (candidate - lo as i32).abs();
        if distance < anchor_distance {
            anchor = candidate;
            anchor_distance = distance;
        }
    }

    let mut out = Vec::new();
    for octave_offset in -2i32..=2 {
        for &iv in intervals {
            let v = anchor + octave_offset * 12 + iv as i32;
            if v >= lo as i32 && v <= hi as i32 && (0..=127).contains(&v) {
                out.push(v as u8);
            }
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_sizes() {
        assert_eq!(SCALES.len(), 30);
        assert_eq!(CHORDS.len(), 45);
    }

    #[test]
    fn test_note_token_round_trip() {
        for midi in 0..=127u8 {
            assert_eq!(parse_note_token(&note_name(midi)), Some(midi));
        }
    }

    #[test]
    fn test_parse_note_token() {
        assert_eq!(parse_note_token("c4"), Some(60));
        assert_eq!(parse_note_token("c#3"), Some(49));
        assert_eq!(parse_note_token("eb3"), Some(51));
        assert_eq!(parse_note_token("b3"), Some(59));
        assert_eq!(parse_note_token("bb3"), Some(58));
        assert_eq!(parse_note_token("c#b4"), Some(60));
        assert_eq!(parse_note_token("c-1"), Some(0));
        assert_eq!(parse_note_token("60"), Some(60));
        assert_eq!(parse_note_token("128"), None);
        assert_eq!(parse_note_token("h2"), None);
        assert_eq!(parse_note_token("c"), None);
    }

    #[test]
    fn test_clamped_after_offset() {
        // g9 = 127; g#9 would be 128 and clamps
        assert_eq!(parse_note_token("g9"), Some(127));
        assert_eq!(parse_note_token("g#9"), Some(127));
        assert_eq!(parse_note_token("cb-1"), Some(0));
    }

    #[test]
    fn test_scale_aliases() {
        assert_eq!(scale_intervals("major"), scale_intervals("ionian"));
        assert_eq!(scale_intervals("minor"), scale_intervals("aeolian"));
        assert_eq!(scale_intervals("HarmonicMinor"), scale_intervals("harmonicminor"));
        assert_eq!(scale_intervals("nosuch"), None);
    }

    #[test]
    fn test_split_root_spec() {
        assert_eq!(split_root_spec("c-maj9"), Some(("c", "maj9")));
        assert_eq!(split_root_spec("c#4-maj9"), Some(("c#4", "maj9")));
        assert_eq!(split_root_spec("eb-7"), Some(("eb", "7")));
        assert_eq!(split_root_spec("c-1-maj"), Some(("c-1", "maj")));
        assert_eq!(split_root_spec("c4"), None);
    }

    #[test]
    fn test_notes_at_octave() {
        let maj = chord_intervals("maj").unwrap();
        assert_eq!(notes_at_octave(0, 4, maj), vec![60, 64, 67]);
    }

    #[test]
    fn test_notes_in_range_property() {
        for (name, intervals) in SCALES.iter().chain(CHORDS.iter()) {
            for root_pc in [0, 3, 7, 11] {
                let notes = notes_in_range(root_pc, intervals, 40, 80);
                for &v in &notes {
                    assert!((40..=80).contains(&v), "{} out of range", name);
                    let relative = ((v as i32 - root_pc) % 12 + 12) % 12;
                    assert!(
                        intervals
                            .iter()
                            .any(|&iv| iv as i32 % 12 == relative),
                        "{}: {} not in {:?}",
                        name,
                        v,
                        intervals
                    );
                }
                let mut sorted = notes.clone();
                sorted.sort_unstable();
                sorted.dedup();
                assert_eq!(notes, sorted);
            }
        }
    }

    #[test]
    fn test_notes_in_range_narrow() {
        let maj = chord_intervals("maj").unwrap();
        // only the root octave around 60 fits
        assert_eq!(notes_in_range(0, maj, 60, 67), vec![60, 64, 67]);
        assert!(notes_in_range(0, maj, 61, 63).is_empty());
    }
}
