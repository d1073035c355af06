//! Multiplicative expressions used for durations, delays, cutoffs, and
//! cycle-local tempo/signature overrides: `base ((*|/) positive)*`,
//! evaluated left-to-right. Bases are `bt` (one beat in ms), `br` (one
//! bar in ms), `tmp`, `sn`, `sd` (live transport values), or a positive
//! number.

use super::clock::ClockSnapshot;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Base {
    BeatTime,
    BarTime,
    Tempo,
    SigNumerator,
    SigDenominator,
    Number(f64),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Op {
    Mul,
    Div,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    base: Base,
    ops: Vec<(Op, f64)>,
}

impl Expr {
    pub fn number(value: f64) -> Self {
        Self {
            base: Base::Number(value),
            ops: Vec::new(),
        }
    }

    pub fn parse(src: &str) -> Option<Self> {
        let src: String =
            src.chars().filter(|c| !c.is_whitespace()).collect();
        if src.is_empty() {
            return None;
        }

        let mut split = src.len();
        for (i, c) in src.char_indices() {
            if c == '*' || c == '/' {
                split = i;
                break;
            }
        }

        let base = parse_base(&src[..split])?;
        let mut ops = Vec::new();
        let mut rest = &src[split..];

        while !rest.is_empty() {
            let op = match rest.as_bytes()[0] {
                b'*' => Op::Mul,
                b'/' => Op::Div,
                _ => return None,
            };
            rest = &rest[1..];

            let end = rest
                .char_indices()
                .find(|(_, c)| *c == '*' || *c == '/')
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            let factor: f64 = rest[..end].parse().ok()?;
            if factor <= 0.0 {
                return None;
            }
            ops.push((op, factor));
            rest = &rest[end..];
        }

        Some(Self { base, ops })
    }

    pub fn eval(&self, clock: &ClockSnapshot) -> f64 {
        let mut value = match self.base {
            Base::BeatTime => clock.beat_ms(),
            Base::BarTime => clock.bar_ms(),
            Base::Tempo => clock.tempo,
            Base::SigNumerator => clock.numerator as f64,
            Base::SigDenominator => clock.denominator as f64,
            Base::Number(n) => n,
        };
        for (op, factor) in &self.ops {
            match op {
                Op::Mul => value *= factor,
                Op::Div => value /= factor,
            }
        }
        value
    }
}

fn parse_base(src: &str) -> Option<Base> {
    match src {
        "bt" => Some(Base::BeatTime),
        "br" => Some(Base::BarTime),
        "tmp" => Some(Base::Tempo),
        "sn" => Some(Base::SigNumerator),
        "sd" => Some(Base::SigDenominator),
        _ => {
            let n: f64 = src.parse().ok()?;
            (n > 0.0).then_some(Base::Number(n))
        }
    }
}
