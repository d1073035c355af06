//! Turns one block plus a clock snapshot into absolutely-timed events
//! within a single bar: weight-based fitting, beat-aligned timing,
//! cutoff truncation, and per-atom delays. Random parameters are
//! resolved here, once per firing.

use rand::Rng;

use super::clock::ClockSnapshot;
use super::easing::Easing;
use super::picker;
use super::plan::{
    ArpMode, AutomationAtom, Block, BlockBody, DurationSource, NoteAtom,
    Plan, TimingMode,
};

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedNote {
    /// Dispatch offset in ms from the firing origin, including `ds`.
    pub offset_ms: f64,
    pub duration_ms: f64,
    /// Chord tones; a single note is a one-element list.
    pub notes: Vec<u8>,
    pub velocity: u8,
    /// The note dispatches on every channel in the set.
    pub channels: Vec<u8>,
    pub pan: Option<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedRamp {
    pub offset_ms: f64,
    pub duration_ms: f64,
    pub controller: u8,
    pub channel: u8,
    pub from: u8,
    pub to: u8,
    pub easing: Easing,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlannedBlock {
    pub notes: Vec<PlannedNote>,
    pub ramps: Vec<PlannedRamp>,
}

pub fn render_plan(
    plan: &Plan,
    clock: &ClockSnapshot,
    rng: &mut impl Rng,
) -> Vec<PlannedBlock> {
    plan.blocks
        .iter()
        .map(|block| render_block(block, clock, rng))
        .collect()
}

pub fn render_block(
    block: &Block,
    clock: &ClockSnapshot,
    rng: &mut impl Rng,
) -> PlannedBlock {
    match &block.body {
        BlockBody::Notes(atoms) => PlannedBlock {
            notes: render_notes(block, atoms, clock, rng),
            ramps: Vec::new(),
        },
        BlockBody::Automation(atoms) => PlannedBlock {
            notes: Vec::new(),
            ramps: render_ramps(block, atoms, clock),
        },
    }
}

fn render_notes(
    block: &Block,
    atoms: &[NoteAtom],
    clock: &ClockSnapshot,
    rng: &mut impl Rng,
) -> Vec<PlannedNote> {
    let bar_ms = clock.bar_ms();
    let bt = clock.beat_ms();

    // Removal runs before weighting so surviving atoms fill the bar.
    let kept: Vec<(usize, &NoteAtom)> = atoms
        .iter()
        .enumerate()
        .filter(|(i, atom)| !is_removed(block, atom, *i, rng))
        .collect();
    if kept.is_empty() {
        return Vec::new();
    }

    // Any explicit or randomized duration contradicts fit's
    // equal-partition semantics, so the block drops to beat timing.
    let mode = if atoms
        .iter()
        .any(|a| a.duration.is_explicit() || a.d_range.is_some())
    {
        TimingMode::Beat
    } else {
        block.timing
    };

    let durations: Vec<f64> = match mode {
        TimingMode::Fit => {
            let weights: Vec<f64> = kept
                .iter()
                .map(|(_, atom)| match atom.duration {
                    DurationSource::Weight(w) if w > 0.0 => w,
                    _ => 1.0,
                })
                .collect();
            let total: f64 = weights.iter().sum();
            let total = if total > 0.0 {
                total
            } else {
                kept.len() as f64
            };
            weights
                .iter()
                .map(|w| (bar_ms * w / total).max(1.0))
                .collect()
        }
        TimingMode::Beat => kept
            .iter()
            .map(|(i, atom)| beat_duration(atom, *i, clock, rng))
            .collect(),
        TimingMode::Bar => {
            if kept.len() == 1 {
                vec![bar_ms]
            } else {
                kept.iter().map(|_| bt).collect()
            }
        }
    };

    let cutoff = block.cutoff.as_ref().map(|e| e.eval(clock));

    let mut out = Vec::new();
    let mut elapsed = 0.0;

    for ((position, atom), mut duration) in
        kept.into_iter().zip(durations)
    {
        let mut truncated = false;
        if let Some(limit) = cutoff {
            if elapsed >= limit {
                break;
            }
            if elapsed + duration > limit {
                duration = (limit - elapsed).max(1.0);
                truncated = true;
            }
        }

        if let Some(planned) = resolve_note(
            block, atom, position, elapsed, duration, clock, rng,
        ) {
            out.push(planned);
        }

        elapsed += duration;
        if truncated {
            break;
        }
    }

    out
}

#[allow(clippy::too_many_arguments)]
fn resolve_note(
    block: &Block,
    atom: &NoteAtom,
    position: usize,
    elapsed: f64,
    duration: f64,
    clock: &ClockSnapshot,
    rng: &mut impl Rng,
) -> Option<PlannedNote> {
    let note = picker::pick_note(atom, position, rng)?;

    let (channels, unspecified) = match &atom.channels {
        Some(source) => {
            (source.resolve(|| rng.gen_range(1..=16)), false)
        }
        None => match &block.channels {
            Some(set) => (set.clone(), false),
            None => (vec![1], true),
        },
    };

    // Mute chances combine independently; an unrouted note is muted but
    // still dispatched so the groove survives.
    let mut muted = unspecified;
    if let Some(p) = picker::pick_prob(
        atom.mute_prob.as_ref(),
        atom.pm_range,
        atom.pm_arp,
        position,
        rng,
    ) {
        muted |= rng.gen_bool(p);
    }
    if let Some(p) = block.mute_prob {
        muted |= rng.gen_bool(p.clamp(0.0, 1.0));
    }

    let velocity = if muted {
        0
    } else {
        picker::pick_velocity(atom, position, rng)
    };

    let delay = atom
        .delay_start
        .as_ref()
        .map(|e| e.eval(clock).max(0.0))
        .unwrap_or(0.0);

    Some(PlannedNote {
        offset_ms: elapsed + delay,
        duration_ms: duration,
        notes: note.tones(),
        velocity,
        channels,
        pan: picker::pick_pan(atom, rng),
    })
}

fn is_removed(
    block: &Block,
    atom: &NoteAtom,
    position: usize,
    rng: &mut impl Rng,
) -> bool {
    if let Some(p) = picker::pick_prob(
        atom.remove_prob.as_ref(),
        atom.pr_range,
        atom.pr_arp,
        position,
        rng,
    ) {
        if rng.gen_bool(p) {
            return true;
        }
    }
    if let Some(p) = block.remove_prob {
        if rng.gen_bool(p.clamp(0.0, 1.0)) {
            return true;
        }
    }
    false
}

fn beat_duration(
    atom: &NoteAtom,
    position: usize,
    clock: &ClockSnapshot,
    rng: &mut impl Rng,
) -> f64 {
    let bt = clock.beat_ms();
    match &atom.duration {
        DurationSource::Expr(e) => e.eval(clock).max(1.0),
        DurationSource::Weight(w) => (bt * w).max(1.0),
        DurationSource::Random => random_duration(atom, clock, rng),
        DurationSource::Array(exprs) => {
            let mut values: Vec<f64> =
                exprs.iter().map(|e| e.eval(clock)).collect();
            if atom.d_arp == ArpMode::None {
                values[rng.gen_range(0..values.len())].max(1.0)
            } else {
                values.sort_by(|a, b| a.total_cmp(b));
                values[picker::arp_index(
                    atom.d_arp,
                    values.len(),
                    position,
                    rng,
                )]
                .max(1.0)
            }
        }
        DurationSource::Unspecified => {
            if atom.d_range.is_some() {
                random_duration(atom, clock, rng)
            } else {
                bt
            }
        }
    }
}

/// Canonical bt divisions/multiplications a randomized duration snaps
/// to.
const CANONICAL_BT_FACTORS: [f64; 11] = [
    1.0 / 8.0,
    1.0 / 6.0,
    1.0 / 4.0,
    1.0 / 3.0,
    1.0 / 2.0,
    3.0 / 4.0,
    1.0,
    3.0 / 2.0,
    2.0,
    3.0,
    4.0,
];

fn random_duration(
    atom: &NoteAtom,
    clock: &ClockSnapshot,
    rng: &mut impl Rng,
) -> f64 {
    let bt = clock.beat_ms();
    let candidates: Vec<f64> = match &atom.d_range {
        Some((lo, hi)) => {
            let (a, b) = (lo.eval(clock), hi.eval(clock));
            let (lo, hi) = (a.min(b), a.max(b));
            let fitting: Vec<f64> = CANONICAL_BT_FACTORS
                .iter()
                .map(|f| bt * f)
                .filter(|ms| *ms >= lo && *ms <= hi)
                .collect();
            if fitting.is_empty() {
                return rng.gen_range(lo..=hi).max(1.0);
            }
            fitting
        }
        None => CANONICAL_BT_FACTORS.iter().map(|f| bt * f).collect(),
    };
    candidates[rng.gen_range(0..candidates.len())].max(1.0)
}

fn render_ramps(
    block: &Block,
    atoms: &[AutomationAtom],
    clock: &ClockSnapshot,
) -> Vec<PlannedRamp> {
    let block_channel = block
        .channels
        .as_ref()
        .and_then(|set| set.first().copied());

    let mut out = Vec::new();
    let mut elapsed = 0.0;
    for atom in atoms {
        let duration = atom
            .duration
            .as_ref()
            .map(|e| e.eval(clock))
            .unwrap_or_else(|| clock.beat_ms())
            .max(1.0);
        out.push(PlannedRamp {
            offset_ms: elapsed,
            duration_ms: duration,
            controller: atom.controller,
            channel: atom.channel.or(block_channel).unwrap_or(1),
            from: atom.from,
            to: atom.to,
            easing: atom.easing,
        });
        elapsed += duration;
    }
    out
}
