//! Continuous controller ramps. Each stream interpolates from a start
//! to an end value over a duration with an easing curve; the scheduler
//! drives ticks at a fixed interval and a terminal tick guarantees the
//! exact end value. Streams are keyed by id so a new ramp on the same
//! controller/channel replaces the running one.

use std::time::Instant;

use rustc_hash::FxHashMap;
use serde::Serialize;

use super::easing::Easing;

#[derive(Clone, Debug)]
pub struct CcStream {
    pub id: String,
    pub controller: u8,
    pub channel: u8,
    pub start_value: u8,
    pub end_value: u8,
    pub duration_ms: f64,
    pub easing: Easing,
    pub started_at: Instant,
    /// Cycle that spawned the stream; stopping the cycle stops it.
    pub owner: Option<String>,
}

impl CcStream {
    pub fn progress(&self, now: Instant) -> f64 {
        if self.duration_ms <= 0.0 {
            return 1.0;
        }
        let elapsed =
            now.saturating_duration_since(self.started_at).as_secs_f64()
                * 1000.0;
        (elapsed / self.duration_ms).clamp(0.0, 1.0)
    }

    pub fn value_at(&self, now: Instant) -> u8 {
        let t = self.easing.apply(self.progress(now));
        let from = self.start_value as f64;
        let to = self.end_value as f64;
        ((from + (to - from) * t).round() as i64).clamp(0, 127) as u8
    }

    pub fn is_complete(&self, now: Instant) -> bool {
        self.progress(now) >= 1.0
    }
}

/// One emitted control-change step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CcTick {
    pub controller: u8,
    pub channel: u8,
    pub value: u8,
    pub done: bool,
}

/// Wire form for the `activeCCStreams` frame.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub id: String,
    pub controller: u8,
    pub channel: u8,
    pub current_value: u8,
    pub progress: f64,
}

#[derive(Debug, Default)]
pub struct AutomationEngine {
    streams: FxHashMap<String, CcStream>,
}

impl AutomationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic id for a controller/channel pair so clients can
    /// stop a stream without tracking generated ids.
    pub fn stream_id(controller: u8, channel: u8) -> String {
        format!("cc{}-ch{}", controller, channel)
    }

    /// Installs a stream, replacing any running one with the same id.
    pub fn start(&mut self, stream: CcStream) -> String {
        let id = stream.id.clone();
        self.streams.insert(id.clone(), stream);
        id
    }

    pub fn stop(&mut self, id: &str) -> bool {
        self.streams.remove(id).is_some()
    }

    pub fn stop_all(&mut self) -> usize {
        let n = self.streams.len();
        self.streams.clear();
        n
    }

    pub fn stop_owned(&mut self, owner: &str) {
        self.streams
            .retain(|_, stream| stream.owner.as_deref() != Some(owner));
    }

    pub fn get(&self, id: &str) -> Option<&CcStream> {
        self.streams.get(id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Advances the stream: returns the value to emit now, or None when
    /// the stream was cancelled. A completed stream emits its exact end
    /// value and is removed.
    pub fn tick(&mut self, id: &str, now: Instant) -> Option<CcTick> {
        let stream = self.streams.get(id)?;
        let done = stream.is_complete(now);
        let tick = CcTick {
            controller: stream.controller,
            channel: stream.channel,
            value: if done {
                stream.end_value
            } else {
                stream.value_at(now)
            },
            done,
        };
        if done {
            self.streams.remove(id);
        }
        Some(tick)
    }

    pub fn active(&self, now: Instant) -> Vec<StreamInfo> {
        let mut infos: Vec<StreamInfo> = self
            .streams
            .values()
            .map(|stream| StreamInfo {
                id: stream.id.clone(),
                controller: stream.controller,
                channel: stream.channel,
                current_value: stream.value_at(now),
                progress: stream.progress(now),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn stream(duration_ms: f64, easing: Easing) -> CcStream {
        CcStream {
            id: AutomationEngine::stream_id(7, 1),
            controller: 7,
            channel: 1,
            start_value: 0,
            end_value: 127,
            duration_ms,
            easing,
            started_at: Instant::now(),
            owner: None,
        }
    }

    #[test]
    fn test_linear_ramp() {
        let s = stream(1000.0, Easing::Linear);
        let t0 = s.started_at;
        assert_eq!(s.value_at(t0), 0);
        assert_eq!(s.value_at(t0 + Duration::from_millis(500)), 64);
        assert_eq!(s.value_at(t0 + Duration::from_millis(1000)), 127);
        assert!(s.is_complete(t0 + Duration::from_millis(1000)));
        assert!(!s.is_complete(t0 + Duration::from_millis(999)));
    }

    #[test]
    fn test_progress_clamps() {
        let s = stream(1000.0, Easing::Linear);
        let t0 = s.started_at;
        assert_eq!(s.progress(t0), 0.0);
        assert_eq!(s.progress(t0 + Duration::from_millis(2000)), 1.0);
    }

    #[test]
    fn test_eased_midpoint() {
        let s = stream(1000.0, Easing::EaseInQuad);
        let t0 = s.started_at;
        // quad easing at t=0.5 → 0.25
        assert_eq!(s.value_at(t0 + Duration::from_millis(500)), 32);
    }

    #[test]
    fn test_downward_ramp() {
        let mut s = stream(1000.0, Easing::Linear);
        s.start_value = 100;
        s.end_value = 0;
        let t0 = s.started_at;
        assert_eq!(s.value_at(t0), 100);
        assert_eq!(s.value_at(t0 + Duration::from_millis(500)), 50);
        assert_eq!(s.value_at(t0 + Duration::from_millis(1000)), 0);
    }

    #[test]
    fn test_tick_emits_exact_end_and_removes() {
        let mut engine = AutomationEngine::new();
        let s = stream(1000.0, Easing::Linear);
        let t0 = s.started_at;
        let id = engine.start(s);

        let mid = engine
            .tick(&id, t0 + Duration::from_millis(250))
            .unwrap();
        assert_eq!(mid.value, 32);
        assert!(!mid.done);

        let end = engine
            .tick(&id, t0 + Duration::from_millis(1500))
            .unwrap();
        assert_eq!(end.value, 127);
        assert!(end.done);
        assert!(engine.is_empty());

        // cancelled stream: tick is a no-op
        assert_eq!(engine.tick(&id, t0), None);
    }

    #[test]
    fn test_replacement_by_id() {
        let mut engine = AutomationEngine::new();
        engine.start(stream(1000.0, Easing::Linear));
        let mut second = stream(500.0, Easing::Linear);
        second.end_value = 64;
        engine.start(second);
        assert_eq!(engine.len(), 1);
        assert_eq!(
            engine
                .get(&AutomationEngine::stream_id(7, 1))
                .unwrap()
                .end_value,
            64
        );
    }

    #[test]
    fn test_stop_owned() {
        let mut engine = AutomationEngine::new();
        let mut owned = stream(1000.0, Easing::Linear);
        owned.id = "a".to_string();
        owned.owner = Some("loopA".to_string());
        let mut free = stream(1000.0, Easing::Linear);
        free.id = "b".to_string();
        engine.start(owned);
        engine.start(free);

        engine.stop_owned("loopA");
        assert_eq!(engine.len(), 1);
        assert!(engine.get("b").is_some());
    }

    #[test]
    fn test_stop_unknown_is_false() {
        let mut engine = AutomationEngine::new();
        assert!(!engine.stop("nope"));
    }
}
