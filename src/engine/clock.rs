//! Transport-fed musical clock. The host application broadcasts tempo,
//! time signature, and song position over the control bus; this module
//! folds those messages into bar/beat state and raises bar-boundary and
//! beat-change events that drive the cycle manager and the outbound
//! beat frames.

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TransportMsg {
    Tempo(f64),
    SignatureNumerator(u32),
    SignatureDenominator(u32),
    /// Song position in beats since the origin.
    SongTime(f64),
}

/// Immutable tempo/signature capture. Cycles hold one of these for
/// their whole life so a live tempo change never reshapes a running
/// bar; tracks capture one per firing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClockSnapshot {
    pub tempo: f64,
    pub numerator: u32,
    pub denominator: u32,
}

impl ClockSnapshot {
    pub fn new(tempo: f64, numerator: u32, denominator: u32) -> Self {
        Self {
            tempo: if tempo > 0.0 { tempo } else { 120.0 },
            numerator: numerator.max(1),
            denominator: denominator.max(1),
        }
    }

    /// One bar in ms: 60000/tempo × numerator.
    pub fn bar_ms(&self) -> f64 {
        60_000.0 / self.tempo * self.numerator as f64
    }

    /// One beat in ms.
    pub fn beat_ms(&self) -> f64 {
        self.bar_ms() / self.numerator as f64
    }
}

impl Default for ClockSnapshot {
    fn default() -> Self {
        Self::new(120.0, 4, 4)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClockEvent {
    /// The bar number changed, including the initial None → value
    /// transition. Wakes the cycle manager and drains the queue.
    Bar { bar: i64 },
    /// The beat within the bar changed.
    Beat { bar: i64, beat: i64, absolute: i64 },
    /// Tempo or signature changed.
    TempoOrSignature,
}

/// Live transport state. Single writer (the control-bus callback via
/// the scheduler thread); read by planners between suspension points.
#[derive(Debug, Default)]
pub struct Clock {
    tempo: Option<f64>,
    numerator: Option<u32>,
    denominator: Option<u32>,
    song_beats: f64,
    last_bar: Option<i64>,
    last_beat: Option<i64>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialized once tempo and both signature parts have been
    /// observed. Until then song-time messages are cached but bar/beat
    /// derivation is skipped.
    pub fn initialized(&self) -> bool {
        self.tempo.is_some()
            && self.numerator.is_some()
            && self.denominator.is_some()
    }

    pub fn snapshot(&self) -> Option<ClockSnapshot> {
        Some(ClockSnapshot::new(
            self.tempo?,
            self.numerator?,
            self.denominator?,
        ))
    }

    pub fn song_beats(&self) -> f64 {
        self.song_beats
    }

    /// 1-based bar number, once initialized.
    pub fn bar(&self) -> Option<i64> {
        self.last_bar
    }

    /// 1-based beat within the bar, once initialized.
    pub fn beat(&self) -> Option<i64> {
        self.last_beat
    }

    pub fn apply(&mut self, msg: TransportMsg) -> Vec<ClockEvent> {
        let mut events = Vec::new();

        match msg {
            TransportMsg::Tempo(tempo) => {
                if tempo > 0.0 {
                    self.tempo = Some(tempo);
                    events.push(ClockEvent::TempoOrSignature);
                }
            }
            TransportMsg::SignatureNumerator(n) => {
                if n > 0 {
                    self.numerator = Some(n);
                    events.push(ClockEvent::TempoOrSignature);
                }
            }
            TransportMsg::SignatureDenominator(d) => {
                if d > 0 {
                    self.denominator = Some(d);
                    events.push(ClockEvent::TempoOrSignature);
                }
            }
            TransportMsg::SongTime(beats) => {
                self.song_beats = beats.max(0.0);
                if self.initialized() {
                    self.derive(&mut events);
                }
            }
        }

        events
    }

    fn derive(&mut self, events: &mut Vec<ClockEvent>) {
        let numerator = self.numerator.unwrap_or(4) as f64;
        let bar = (self.song_beats / numerator).floor() as i64 + 1;
        let beat = (self.song_beats % numerator).floor() as i64 + 1;
        let absolute = self.song_beats.floor() as i64 + 1;

        if self.last_bar != Some(bar) {
            self.last_bar = Some(bar);
            events.push(ClockEvent::Bar { bar });
        }

        if self.last_beat != Some(beat) {
            self.last_beat = Some(beat);
            events.push(ClockEvent::Beat {
                bar,
                beat,
                absolute,
            });
        }
    }
}
