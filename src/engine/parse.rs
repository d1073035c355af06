//! Program text → [`Plan`]. The grammar is whitespace-insensitive and
//! irregular (scale/chord sugar, nested brackets, per-note array
//! randomizers, weight-based durations), so this is a hand-written
//! scanner over balanced delimiters rather than a single regex.
//!
//! Unparseable atoms are dropped silently; a program with no parseable
//! atoms is a no-op. Out-of-domain values are clamped.

use crate::config;
use crate::prelude::*;

use super::expr::Expr;
use super::easing::Easing;
use super::plan::{
    ArpMode, AutomationAtom, Block, BlockBody, Channels, DurationSource,
    NoteAtom, NoteItem, Plan, Program, Source, TimingMode,
};
use super::theory;

pub fn parse_program(src: &str) -> Option<Program> {
    let dense: String =
        src.chars().filter(|c| !c.is_whitespace()).collect();
    if dense.is_empty() {
        return None;
    }

    if dense.starts_with("t(") {
        return parse_cycle(&dense);
    }

    let plan = parse_plan(&dense);
    if plan.is_empty() {
        None
    } else {
        Some(Program::Track(plan))
    }
}

/// True when the program is a `t(id).stop()` form (any prefix ending in
/// `.stop` counts).
pub fn is_stop(src: &str) -> bool {
    matches!(parse_program(src), Some(Program::Stop { .. }))
}

/// Cycle id parsed from a `t(id)...` program, if present.
pub fn cycle_id(src: &str) -> Option<String> {
    match parse_program(src)? {
        Program::Cycle { id, .. } => id,
        Program::Stop { id } => Some(id),
        Program::Track(_) => None,
    }
}

fn parse_cycle(dense: &str) -> Option<Program> {
    let bytes = dense.as_bytes();
    let close = matching_close(bytes, 1, b'(', b')')?;
    let id = &dense[2..close];
    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return None;
    }

    let (calls, _) = dotted_calls_prefix(&dense[close + 1..]);

    if calls.iter().any(|(name, _)| name == "stop") {
        return Some(Program::Stop { id: id.to_string() });
    }

    let mut tempo = None;
    let mut numerator = None;
    let mut denominator = None;
    let mut plan = None;

    for (name, arg) in &calls {
        match name.as_str() {
            "bpm" => tempo = Expr::parse(arg),
            "sn" => numerator = Expr::parse(arg),
            "sd" => denominator = Expr::parse(arg),
            "play" => plan = Some(parse_plan(arg)),
            _ => debug!("Ignoring unknown cycle call: {}", name),
        }
    }

    let plan = plan?;
    if plan.is_empty() {
        return None;
    }

    Some(Program::Cycle {
        id: Some(id.to_string()),
        plan,
        tempo,
        numerator,
        denominator,
    })
}

pub fn parse_plan(src: &str) -> Plan {
    let dense: String =
        src.chars().filter(|c| !c.is_whitespace()).collect();
    let expanded = expand_standalone(&dense);
    let bytes = expanded.as_bytes();

    let mut blocks = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'[' {
            match matching_close(bytes, i, b'[', b']') {
                Some(close) => {
                    let content = &expanded[i + 1..close];
                    let (mods, consumed) =
                        dotted_calls_prefix(&expanded[close + 1..]);
                    blocks.extend(parse_block_content(content, &mods));
                    i = close + 1 + consumed;
                }
                None => i += 1,
            }
        } else if starts_atom(bytes, i) {
            // bare atoms outside brackets form an implicit block
            let end = expanded[i..]
                .find('[')
                .map(|offset| i + offset)
                .unwrap_or(bytes.len());
            blocks.extend(parse_block_content(&expanded[i..end], &[]));
            i = end;
        } else {
            i += 1;
        }
    }

    Plan { blocks }
}

fn starts_atom(bytes: &[u8], i: usize) -> bool {
    (bytes[i] == b'n' || bytes[i] == b'a')
        && i + 1 < bytes.len()
        && bytes[i + 1] == b'('
}

/// Expands standalone `scale(...)`/`chord(...)` — outside angle
/// brackets, braces, and atom arguments — into space-free runs of
/// `n(midi)` tokens. Inside those delimiters the constructs are left
/// for the chord/array parsers.
fn expand_standalone(src: &str) -> String {
    let bytes = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut paren_depth = 0i32;
    let mut angle_depth = 0i32;
    let mut brace_depth = 0i32;
    let mut i = 0;

    while i < bytes.len() {
        let at_top =
            paren_depth == 0 && angle_depth == 0 && brace_depth == 0;
        let rest = &src[i..];

        if at_top
            && (rest.starts_with("scale(") || rest.starts_with("chord("))
        {
            let is_scale = rest.starts_with("scale(");
            let open = i + 5;
            if let Some(close) = matching_close(bytes, open, b'(', b')') {
                let spec = &src[open + 1..close];
                let mut next = close + 1;
                let mut quality = None;

                if is_scale && src[next..].starts_with(".q(") {
                    if let Some(q_close) =
                        matching_close(bytes, next + 2, b'(', b')')
                    {
                        quality = Some(&src[next + 3..q_close]);
                        next = q_close + 1;
                    }
                }

                if let Some(notes) =
                    expand_spec_tokens(is_scale, spec, quality)
                {
                    for n in notes {
                        out.push_str(&format!("n({})", n));
                    }
                } else {
                    debug!("Dropping unparseable construct: {}", spec);
                }
                i = next;
                continue;
            }
        }

        match bytes[i] {
            b'(' => paren_depth += 1,
            b')' => paren_depth -= 1,
            b'<' => angle_depth += 1,
            b'>' => angle_depth -= 1,
            b'{' => brace_depth += 1,
            b'}' => brace_depth -= 1,
            _ => {}
        }
        out.push(bytes[i] as char);
        i += 1;
    }

    out
}

fn expand_spec_tokens(
    is_scale: bool,
    spec: &str,
    quality: Option<&str>,
) -> Option<Vec<u8>> {
    let (root, name) = theory::split_root_spec(spec)?;
    let (pc, octave) = theory::parse_root(root)?;
    let intervals = if is_scale {
        match quality {
            Some(q) => theory::chord_intervals(q)?,
            None => theory::scale_intervals(name)?,
        }
    } else {
        theory::chord_intervals(name)?
    };
    Some(theory::notes_at_octave(
        pc,
        octave.unwrap_or(config::DEFAULT_ROOT_OCTAVE),
        intervals,
    ))
}

struct AtomChunk {
    kind: u8,
    arg: String,
    calls: Vec<(String, String)>,
}

fn parse_block_content(
    content: &str,
    mods: &[(String, String)],
) -> Vec<Block> {
    let mut notes = Vec::new();
    let mut ramps = Vec::new();

    for chunk in split_atom_chunks(content) {
        match chunk.kind {
            b'n' => match parse_note_atom(&chunk.arg, &chunk.calls) {
                Some(atom) => notes.push(atom),
                None => debug!("Dropping note atom: n({})", chunk.arg),
            },
            _ => match parse_automation_atom(&chunk.arg, &chunk.calls) {
                Some(atom) => ramps.push(atom),
                None => {
                    debug!("Dropping automation atom: a({})", chunk.arg)
                }
            },
        }
    }

    let mut blocks = Vec::new();
    if !notes.is_empty() {
        blocks.push(apply_block_mods(
            Block::new(BlockBody::Notes(notes)),
            mods,
        ));
    }
    if !ramps.is_empty() {
        blocks.push(apply_block_mods(
            Block::new(BlockBody::Automation(ramps)),
            mods,
        ));
    }
    blocks
}

fn apply_block_mods(mut block: Block, mods: &[(String, String)]) -> Block {
    for (name, value) in mods {
        match name.as_str() {
            "t" => {
                if let Some(mode) = TimingMode::from_str(value) {
                    block.timing = mode;
                }
            }
            "c" => block.channels = parse_channel_set(value),
            "co" => block.cutoff = Expr::parse(value),
            "pm" => block.mute_prob = parse_prob(value),
            "pr" => block.remove_prob = parse_prob(value),
            _ => debug!("Ignoring unknown block mod: {}", name),
        }
    }
    block
}

fn split_atom_chunks(content: &str) -> Vec<AtomChunk> {
    let bytes = content.as_bytes();
    let mut chunks = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if !starts_atom(bytes, i) {
            i += 1;
            continue;
        }

        let kind = bytes[i];
        let close = match matching_close(bytes, i + 1, b'(', b')') {
            Some(c) => c,
            None => {
                i += 1;
                continue;
            }
        };
        let arg = content[i + 2..close].to_string();
        let mut j = close + 1;

        let mut repeat = 1usize;
        if j < bytes.len() && bytes[j] == b'^' {
            let start = j + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end > start {
                repeat = content[start..end]
                    .parse::<usize>()
                    .unwrap_or(1)
                    .clamp(1, 1024);
                j = end;
            } else {
                j = start;
            }
        }

        let (calls, consumed) = dotted_calls_prefix(&content[j..]);
        j += consumed;

        for _ in 0..repeat {
            chunks.push(AtomChunk {
                kind,
                arg: arg.clone(),
                calls: calls.clone(),
            });
        }
        i = j;
    }

    chunks
}

/// Reads a run of `.name(arg)` calls (or bare `.name`) from the start
/// of `s`, returning the calls and the number of bytes consumed.
fn dotted_calls_prefix(s: &str) -> (Vec<(String, String)>, usize) {
    let bytes = s.as_bytes();
    let mut calls = Vec::new();
    let mut i = 0;

    while i < bytes.len() && bytes[i] == b'.' {
        let name_start = i + 1;
        let mut name_end = name_start;
        while name_end < bytes.len()
            && bytes[name_end].is_ascii_alphanumeric()
        {
            name_end += 1;
        }
        if name_end == name_start {
            break;
        }
        let name = s[name_start..name_end].to_string();

        if name_end < bytes.len() && bytes[name_end] == b'(' {
            match matching_close(bytes, name_end, b'(', b')') {
                Some(close) => {
                    calls.push((name, s[name_end + 1..close].to_string()));
                    i = close + 1;
                }
                None => break,
            }
        } else {
            calls.push((name, String::new()));
            i = name_end;
        }
    }

    (calls, i)
}

/// Index of the close delimiter matching the opener at `open_idx`.
fn matching_close(
    bytes: &[u8],
    open_idx: usize,
    open: u8,
    close: u8,
) -> Option<usize> {
    if open_idx >= bytes.len() || bytes[open_idx] != open {
        return None;
    }
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate().skip(open_idx) {
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Splits on commas at zero paren/angle/brace depth.
fn split_top_level_commas(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut paren = 0i32;
    let mut angle = 0i32;
    let mut brace = 0i32;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match c {
            '(' => paren += 1,
            ')' => paren -= 1,
            '<' => angle += 1,
            '>' => angle -= 1,
            '{' => brace += 1,
            '}' => brace -= 1,
            ',' if paren == 0 && angle == 0 && brace == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_note_atom(
    arg: &str,
    calls: &[(String, String)],
) -> Option<NoteAtom> {
    // Ranges and arp modes first: array templates resolve against
    // nRange before the note source exists.
    let mut n_range = None;
    let mut v_range = None;
    let mut p_range = None;
    let mut d_range = None;
    let mut pm_range = None;
    let mut pr_range = None;
    let mut arps = [ArpMode::None; 5];

    for (name, value) in calls {
        match name.as_str() {
            "nRange" => n_range = parse_note_range(value),
            "vRange" => v_range = parse_u8_range(value),
            "pRange" => p_range = parse_u8_range(value),
            "dRange" => d_range = parse_expr_range(value),
            "pmRange" => pm_range = parse_prob_range(value),
            "prRange" => pr_range = parse_prob_range(value),
            "nArp" => arps[0] = parse_arp(value),
            "dArp" => arps[1] = parse_arp(value),
            "vArp" => arps[2] = parse_arp(value),
            "pmArp" => arps[3] = parse_arp(value),
            "prArp" => arps[4] = parse_arp(value),
            _ => {}
        }
    }

    let note = parse_note_source(
        arg,
        n_range.unwrap_or(config::DEFAULT_NOTE_RANGE),
    )?;

    let mut atom = NoteAtom::new(note);
    atom.n_range = n_range;
    atom.v_range = v_range;
    atom.p_range = p_range;
    atom.d_range = d_range;
    atom.pm_range = pm_range;
    atom.pr_range = pr_range;
    atom.n_arp = arps[0];
    atom.d_arp = arps[1];
    atom.v_arp = arps[2];
    atom.pm_arp = arps[3];
    atom.pr_arp = arps[4];

    for (name, value) in calls {
        match name.as_str() {
            "d" => atom.duration = parse_duration_source(value),
            "v" => atom.velocity = parse_u8_source(value),
            "c" => atom.channels = parse_channels(value),
            "p" => atom.pan = parse_u8_source(value),
            "pm" => atom.mute_prob = parse_prob_source(value),
            "pr" => atom.remove_prob = parse_prob_source(value),
            "ds" => atom.delay_start = Expr::parse(value),
            "nRange" | "vRange" | "pRange" | "dRange" | "pmRange"
            | "prRange" | "nArp" | "dArp" | "vArp" | "pmArp" | "prArp" => {}
            _ => debug!("Ignoring unknown note param: {}", name),
        }
    }

    Some(atom)
}

fn parse_note_source(
    arg: &str,
    n_range: (u8, u8),
) -> Option<Source<NoteItem>> {
    if arg == "r" {
        return Some(Source::Random);
    }

    if let Some(inner) = array_inner(arg) {
        let mut items = Vec::new();
        for item in split_top_level_commas(inner) {
            items.extend(parse_array_note_item(item, n_range));
        }
        return (!items.is_empty()).then_some(Source::Array(items));
    }

    if arg.starts_with('<') && arg.ends_with('>') {
        let notes = parse_chord_items(&arg[1..arg.len() - 1])?;
        return Some(Source::Literal(NoteItem::Chord(notes)));
    }

    theory::parse_note_token(arg)
        .map(|n| Source::Literal(NoteItem::Single(n)))
}

/// The `…` of `r.o{…}`, if `arg` is an array randomizer.
fn array_inner(arg: &str) -> Option<&str> {
    arg.strip_prefix("r.o{")?.strip_suffix('}')
}

fn parse_array_note_item(item: &str, n_range: (u8, u8)) -> Vec<NoteItem> {
    if let Some((pc, _octave, intervals)) = parse_template(item) {
        let (lo, hi) = n_range;
        return theory::notes_in_range(pc, intervals, lo, hi)
            .into_iter()
            .map(NoteItem::Single)
            .collect();
    }

    if item.starts_with('<') && item.ends_with('>') {
        return match parse_chord_items(&item[1..item.len() - 1]) {
            Some(notes) => vec![NoteItem::Chord(notes)],
            None => Vec::new(),
        };
    }

    match theory::parse_note_token(item) {
        Some(n) => vec![NoteItem::Single(n)],
        None => Vec::new(),
    }
}

fn parse_chord_items(inner: &str) -> Option<Vec<u8>> {
    let mut notes = Vec::new();
    for item in split_top_level_commas(inner) {
        if let Some((pc, octave, intervals)) = parse_template(item) {
            notes.extend(theory::notes_at_octave(
                pc,
                octave.unwrap_or(config::DEFAULT_ROOT_OCTAVE),
                intervals,
            ));
        } else if let Some(n) = theory::parse_note_token(item) {
            notes.push(n);
        }
    }
    notes.sort_unstable();
    notes.dedup();
    (!notes.is_empty()).then_some(notes)
}

/// Parses `chord(spec)` / `scale(spec)` / `scale(spec).q(quality)` into
/// (root pitch class, root octave, intervals).
fn parse_template(
    item: &str,
) -> Option<(i32, Option<i32>, &'static [u8])> {
    let is_scale = item.starts_with("scale(");
    if !is_scale && !item.starts_with("chord(") {
        return None;
    }

    let bytes = item.as_bytes();
    let open = 5;
    let close = matching_close(bytes, open, b'(', b')')?;
    let spec = &item[open + 1..close];
    let after = &item[close + 1..];

    let (root, name) = theory::split_root_spec(spec)?;
    let (pc, octave) = theory::parse_root(root)?;

    let intervals = if is_scale {
        if let Some(rest) = after.strip_prefix(".q(") {
            let quality = rest.strip_suffix(')')?;
            theory::chord_intervals(quality)?
        } else if after.is_empty() {
            theory::scale_intervals(name)?
        } else {
            return None;
        }
    } else if after.is_empty() {
        theory::chord_intervals(name)?
    } else {
        return None;
    };

    Some((pc, octave, intervals))
}

fn parse_duration_source(value: &str) -> DurationSource {
    if let Some(f) = value.strip_prefix('*') {
        return match f.parse::<f64>() {
            Ok(f) if f > 0.0 => DurationSource::Weight(f),
            _ => DurationSource::Unspecified,
        };
    }
    if let Some(f) = value.strip_prefix('/') {
        return match f.parse::<f64>() {
            Ok(f) if f > 0.0 => DurationSource::Weight(1.0 / f),
            _ => DurationSource::Unspecified,
        };
    }
    if value == "r" {
        return DurationSource::Random;
    }
    if let Some(inner) = array_inner(value) {
        let exprs: Vec<Expr> = split_top_level_commas(inner)
            .iter()
            .filter_map(|item| Expr::parse(item))
            .collect();
        if !exprs.is_empty() {
            return DurationSource::Array(exprs);
        }
        return DurationSource::Unspecified;
    }
    match Expr::parse(value) {
        Some(expr) => DurationSource::Expr(expr),
        None => DurationSource::Unspecified,
    }
}

fn parse_u8_source(value: &str) -> Option<Source<u8>> {
    if value == "r" {
        return Some(Source::Random);
    }
    if let Some(inner) = array_inner(value) {
        let items: Vec<u8> = split_top_level_commas(inner)
            .iter()
            .filter_map(|item| parse_u8_clamped(item, 0, 127))
            .collect();
        return (!items.is_empty()).then_some(Source::Array(items));
    }
    parse_u8_clamped(value, 0, 127).map(Source::Literal)
}

fn parse_prob_source(value: &str) -> Option<Source<f64>> {
    if value == "r" {
        return Some(Source::Random);
    }
    if let Some(inner) = array_inner(value) {
        let items: Vec<f64> = split_top_level_commas(inner)
            .iter()
            .filter_map(|item| parse_prob(item))
            .collect();
        return (!items.is_empty()).then_some(Source::Array(items));
    }
    parse_prob(value).map(Source::Literal)
}

fn parse_channels(value: &str) -> Option<Channels> {
    if value == "r" {
        return Some(Channels::Random);
    }
    if value.starts_with('<') && value.ends_with('>') {
        let channels: Vec<u8> =
            split_top_level_commas(&value[1..value.len() - 1])
                .iter()
                .filter_map(|item| parse_u8_clamped(item, 1, 16))
                .collect();
        return (!channels.is_empty()).then_some(Channels::Many(channels));
    }
    parse_u8_clamped(value, 1, 16).map(Channels::One)
}

fn parse_channel_set(value: &str) -> Option<Vec<u8>> {
    match parse_channels(value)? {
        Channels::One(ch) => Some(vec![ch]),
        Channels::Many(chs) => Some(chs),
        Channels::Random => None,
    }
}

fn parse_arp(value: &str) -> ArpMode {
    ArpMode::from_str(value).unwrap_or(ArpMode::None)
}

fn parse_u8_clamped(value: &str, lo: u8, hi: u8) -> Option<u8> {
    let n: f64 = value.trim().parse().ok()?;
    Some((n.round() as i64).clamp(lo as i64, hi as i64) as u8)
}

fn parse_prob(value: &str) -> Option<f64> {
    let p: f64 = value.trim().parse().ok()?;
    Some(p.clamp(0.0, 1.0))
}

fn parse_note_range(value: &str) -> Option<(u8, u8)> {
    let parts = split_top_level_commas(value);
    if parts.len() != 2 {
        return None;
    }
    let a = theory::parse_note_token(parts[0])?;
    let b = theory::parse_note_token(parts[1])?;
    Some((a.min(b), a.max(b)))
}

fn parse_u8_range(value: &str) -> Option<(u8, u8)> {
    let parts = split_top_level_commas(value);
    if parts.len() != 2 {
        return None;
    }
    let a = parse_u8_clamped(parts[0], 0, 127)?;
    let b = parse_u8_clamped(parts[1], 0, 127)?;
    Some((a.min(b), a.max(b)))
}

fn parse_expr_range(value: &str) -> Option<(Expr, Expr)> {
    let parts = split_top_level_commas(value);
    if parts.len() != 2 {
        return None;
    }
    Some((Expr::parse(parts[0])?, Expr::parse(parts[1])?))
}

fn parse_prob_range(value: &str) -> Option<(f64, f64)> {
    let parts = split_top_level_commas(value);
    if parts.len() != 2 {
        return None;
    }
    let a = parse_prob(parts[0])?;
    let b = parse_prob(parts[1])?;
    Some((a.min(b), a.max(b)))
}

fn parse_automation_atom(
    arg: &str,
    calls: &[(String, String)],
) -> Option<AutomationAtom> {
    let controller = parse_u8_clamped(arg, 0, 127)?;
    let mut atom = AutomationAtom::new(controller);

    for (name, value) in calls {
        match name.as_str() {
            "from" => {
                if let Some(v) = parse_u8_clamped(value, 0, 127) {
                    atom.from = v;
                }
            }
            "to" => {
                if let Some(v) = parse_u8_clamped(value, 0, 127) {
                    atom.to = v;
                }
            }
            "d" => atom.duration = Expr::parse(value),
            "e" => {
                if let Some(easing) = Easing::from_str(value) {
                    atom.easing = easing;
                }
            }
            "c" => {
                if let Some(ch) = parse_u8_clamped(value, 1, 16) {
                    atom.channel = Some(ch);
                }
            }
            _ => debug!("Ignoring unknown automation param: {}", name),
        }
    }

    Some(atom)
}
