/// Easing functions for controller ramps, borrowed from
/// [easings.net](https://github.com/ai/easings.net), which in turn come
/// from [Robert Penner](http://robertpenner.com/easing/), the guy who
/// _literally_ wrote the book on easings.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Easing {
    #[default]
    Linear,

    /// Alias for EaseInQuad
    EaseIn,

    /// Alias for EaseOutQuad
    EaseOut,

    /// Alias for EaseInOutQuad
    EaseInOut,

    EaseInQuad,
    EaseOutQuad,
    EaseInOutQuad,
    EaseInCubic,
    EaseOutCubic,
    EaseInOutCubic,
}

impl Easing {
    pub fn apply(&self, t: f64) -> f64 {
        match self {
            Self::Linear => linear(t),
            Self::EaseIn | Self::EaseInQuad => ease_in_quad(t),
            Self::EaseOut | Self::EaseOutQuad => ease_out_quad(t),
            Self::EaseInOut | Self::EaseInOutQuad => ease_in_out_quad(t),
            Self::EaseInCubic => ease_in_cubic(t),
            Self::EaseOutCubic => ease_out_cubic(t),
            Self::EaseInOutCubic => ease_in_out_cubic(t),
        }
    }

    /// Names as they appear in program text, e.g. `a(7).e(easeInOut)`.
    pub fn from_str(name: &str) -> Option<Self> {
        match name {
            "linear" => Some(Self::Linear),
            "easeIn" => Some(Self::EaseIn),
            "easeOut" => Some(Self::EaseOut),
            "easeInOut" => Some(Self::EaseInOut),
            "easeInQuad" => Some(Self::EaseInQuad),
            "easeOutQuad" => Some(Self::EaseOutQuad),
            "easeInOutQuad" => Some(Self::EaseInOutQuad),
            "easeInCubic" => Some(Self::EaseInCubic),
            "easeOutCubic" => Some(Self::EaseOutCubic),
            "easeInOutCubic" => Some(Self::EaseInOutCubic),
            _ => None,
        }
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::EaseIn => "easeIn",
            Self::EaseOut => "easeOut",
            Self::EaseInOut => "easeInOut",
            Self::EaseInQuad => "easeInQuad",
            Self::EaseOutQuad => "easeOutQuad",
            Self::EaseInOutQuad => "easeInOutQuad",
            Self::EaseInCubic => "easeInCubic",
            Self::EaseOutCubic => "easeOutCubic",
            Self::EaseInOutCubic => "easeInOutCubic",
        }
    }
}

pub fn linear(t: f64) -> f64 {
    t
}

pub fn ease_in_quad(t: f64) -> f64 {
    t * t
}

pub fn ease_out_quad(t: f64) -> f64 {
    1.0 - (1.0 - t) * (1.0 - t)
}

pub fn ease_in_out_quad(t: f64) -> f64 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

pub fn ease_in_cubic(t: f64) -> f64 {
    t * t * t
}

pub fn ease_out_cubic(t: f64) -> f64 {
    1.0 - (1.0 - t).powi(3)
}

pub fn ease_in_out_cubic(t: f64) -> f64 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        let easings = [
            Easing::Linear,
            Easing::EaseIn,
            Easing::EaseOut,
            Easing::EaseInOut,
            Easing::EaseInQuad,
            Easing::EaseOutQuad,
            Easing::EaseInOutQuad,
            Easing::EaseInCubic,
            Easing::EaseOutCubic,
            Easing::EaseInOutCubic,
        ];
        for easing in easings {
            assert_eq!(easing.apply(0.0), 0.0, "{:?} at 0", easing);
            assert_eq!(easing.apply(1.0), 1.0, "{:?} at 1", easing);
        }
    }

    #[test]
    fn test_monotonic() {
        let mut prev = 0.0;
        for i in 0..=100 {
            let v = Easing::EaseInOutCubic.apply(i as f64 / 100.0);
            assert!(v >= prev);
            prev = v;
        }
    }

    #[test]
    fn test_from_str_round_trip() {
        for name in [
            "linear",
            "easeIn",
            "easeOut",
            "easeInOut",
            "easeInQuad",
            "easeOutQuad",
            "easeInOutQuad",
            "easeInCubic",
            "easeOutCubic",
            "easeInOutCubic",
        ] {
            let easing = Easing::from_str(name).unwrap();
            assert_eq!(easing.to_str(), name);
        }
        assert_eq!(Easing::from_str("bounce"), None);
    }
}
