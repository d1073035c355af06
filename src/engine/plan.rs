//! The normalized program representation the parser produces and the
//! planner consumes: blocks of note atoms or automation atoms with all
//! parameters resolved, or marked for per-firing resolution.

use super::easing::Easing;
use super::expr::Expr;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimingMode {
    /// Atoms partition one bar by weight.
    #[default]
    Fit,
    /// Atoms default to one beat each, overridable per atom.
    Beat,
    /// A single atom spans one bar.
    Bar,
}

impl TimingMode {
    pub fn from_str(name: &str) -> Option<Self> {
        match name {
            "fit" => Some(Self::Fit),
            "beat" => Some(Self::Beat),
            "bar" => Some(Self::Bar),
            _ => None,
        }
    }
}

/// Deterministic selection order over a value array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArpMode {
    #[default]
    None,
    Up,
    Down,
    UpDown,
    DownUp,
    Random,
}

impl ArpMode {
    pub fn from_str(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::None),
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "up-down" => Some(Self::UpDown),
            "down-up" => Some(Self::DownUp),
            "random" => Some(Self::Random),
            _ => None,
        }
    }
}

/// A single note-source item: one MIDI note or a chord dispatched
/// simultaneously.
#[derive(Clone, Debug, PartialEq)]
pub enum NoteItem {
    Single(u8),
    Chord(Vec<u8>),
}

impl NoteItem {
    /// Ordering key for arpeggiation: chords order by their lowest tone.
    pub fn lowest(&self) -> u8 {
        match self {
            Self::Single(n) => *n,
            Self::Chord(notes) => notes.iter().copied().min().unwrap_or(0),
        }
    }

    pub fn tones(&self) -> Vec<u8> {
        match self {
            Self::Single(n) => vec![*n],
            Self::Chord(notes) => notes.clone(),
        }
    }
}

/// Per-parameter value source. Ranges live beside the source on the
/// atom; the randomizer combines the two per firing.
#[derive(Clone, Debug, PartialEq)]
pub enum Source<T> {
    Literal(T),
    Random,
    Array(Vec<T>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Channels {
    One(u8),
    /// Simultaneous channels; the note is dispatched on every one.
    Many(Vec<u8>),
    Random,
}

impl Channels {
    pub fn resolve(&self, random: impl FnOnce() -> u8) -> Vec<u8> {
        match self {
            Self::One(ch) => vec![*ch],
            Self::Many(chs) => chs.clone(),
            Self::Random => vec![random()],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum DurationSource {
    /// Mode default: bt in beat mode, weight 1 in fit mode.
    #[default]
    Unspecified,
    /// `d(*f)` / `d(/f)`: fit-mode weight, or a bt multiplier in beat
    /// mode.
    Weight(f64),
    Expr(Expr),
    Random,
    Array(Vec<Expr>),
}

impl DurationSource {
    /// An explicit or randomized duration forces the whole block into
    /// beat mode; weights do not.
    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::Expr(_) | Self::Random | Self::Array(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NoteAtom {
    pub note: Source<NoteItem>,
    pub velocity: Option<Source<u8>>,
    pub channels: Option<Channels>,
    pub duration: DurationSource,
    pub pan: Option<Source<u8>>,
    pub mute_prob: Option<Source<f64>>,
    pub remove_prob: Option<Source<f64>>,
    pub delay_start: Option<Expr>,
    pub n_range: Option<(u8, u8)>,
    pub v_range: Option<(u8, u8)>,
    pub p_range: Option<(u8, u8)>,
    pub d_range: Option<(Expr, Expr)>,
    pub pm_range: Option<(f64, f64)>,
    pub pr_range: Option<(f64, f64)>,
    pub n_arp: ArpMode,
    pub d_arp: ArpMode,
    pub v_arp: ArpMode,
    pub pm_arp: ArpMode,
    pub pr_arp: ArpMode,
}

impl NoteAtom {
    pub fn new(note: Source<NoteItem>) -> Self {
        Self {
            note,
            velocity: None,
            channels: None,
            duration: DurationSource::Unspecified,
            pan: None,
            mute_prob: None,
            remove_prob: None,
            delay_start: None,
            n_range: None,
            v_range: None,
            p_range: None,
            d_range: None,
            pm_range: None,
            pr_range: None,
            n_arp: ArpMode::None,
            d_arp: ArpMode::None,
            v_arp: ArpMode::None,
            pm_arp: ArpMode::None,
            pr_arp: ArpMode::None,
        }
    }
}

/// One `a(controller)` CC ramp.
#[derive(Clone, Debug, PartialEq)]
pub struct AutomationAtom {
    pub controller: u8,
    pub from: u8,
    pub to: u8,
    pub duration: Option<Expr>,
    /// Falls back to the block channel override, then channel 1.
    pub channel: Option<u8>,
    pub easing: Easing,
}

impl AutomationAtom {
    pub fn new(controller: u8) -> Self {
        Self {
            controller,
            from: 0,
            to: 127,
            duration: None,
            channel: None,
            easing: Easing::Linear,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BlockBody {
    Notes(Vec<NoteAtom>),
    Automation(Vec<AutomationAtom>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub body: BlockBody,
    pub timing: TimingMode,
    /// Block-level channel override applied to atoms without their own.
    pub channels: Option<Vec<u8>>,
    pub cutoff: Option<Expr>,
    pub mute_prob: Option<f64>,
    pub remove_prob: Option<f64>,
}

impl Block {
    pub fn new(body: BlockBody) -> Self {
        Self {
            body,
            timing: TimingMode::default(),
            channels: None,
            cutoff: None,
            mute_prob: None,
            remove_prob: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Plan {
    pub blocks: Vec<Block>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| match &b.body {
            BlockBody::Notes(atoms) => atoms.is_empty(),
            BlockBody::Automation(atoms) => atoms.is_empty(),
        })
    }
}

/// A parsed client program.
#[derive(Clone, Debug, PartialEq)]
pub enum Program {
    /// One-shot plan.
    Track(Plan),
    /// Named bar-length loop with optional local tempo/signature.
    Cycle {
        id: Option<String>,
        plan: Plan,
        tempo: Option<Expr>,
        numerator: Option<Expr>,
        denominator: Option<Expr>,
    },
    /// `t(id).stop()`.
    Stop { id: String },
}
