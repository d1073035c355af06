//! Registry of named bar-length loops. Cycles capture their clock at
//! install time, re-fire on every bar tick until stopped, and apply
//! updates only at the next tick so the current bar always plays out
//! unmolested. Stale timers are invalidated by a generation counter
//! rather than cross-thread signalling.

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use super::clock::ClockSnapshot;
use super::plan::Plan;

#[derive(Clone, Debug)]
pub struct PendingUpdate {
    pub plan: Plan,
    pub clock: ClockSnapshot,
}

#[derive(Clone, Debug)]
pub struct CycleEntry {
    pub plan: Plan,
    pub clock: ClockSnapshot,
    pub generation: u64,
    /// Absolute target of the next bar tick. Advancing by the captured
    /// bar duration from the previous target bounds timer drift.
    pub next_fire: Instant,
    pub pending: Option<PendingUpdate>,
}

/// What a bar tick (or an install) should do: fire this plan now and
/// come back at `next_fire` with `generation`.
#[derive(Clone, Debug)]
pub struct Firing {
    pub plan: Plan,
    pub clock: ClockSnapshot,
    pub generation: u64,
    pub next_fire: Instant,
}

#[derive(Debug, Default)]
pub struct CycleManager {
    entries: FxHashMap<String, CycleEntry>,
    generation: u64,
}

impl CycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs (or immediately replaces) the cycle and returns its
    /// first firing. The previous entry's timers die via the generation
    /// bump.
    pub fn install(
        &mut self,
        id: &str,
        plan: Plan,
        clock: ClockSnapshot,
        now: Instant,
    ) -> Firing {
        self.generation += 1;
        let next_fire = now + bar_duration(&clock);
        self.entries.insert(
            id.to_string(),
            CycleEntry {
                plan: plan.clone(),
                clock,
                generation: self.generation,
                next_fire,
                pending: None,
            },
        );
        Firing {
            plan,
            clock,
            generation: self.generation,
            next_fire,
        }
    }

    /// Defers a plan/clock swap to the entry's next bar tick. Unknown
    /// ids are a no-op returning false.
    pub fn set_pending(
        &mut self,
        id: &str,
        plan: Plan,
        clock: ClockSnapshot,
    ) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.pending = Some(PendingUpdate { plan, clock });
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn clear(&mut self) -> Vec<String> {
        let ids: Vec<String> = self.entries.keys().cloned().collect();
        self.entries.clear();
        ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&CycleEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handles a bar tick for (id, generation). Returns the firing to
    /// render, or None when the timer is stale (cycle stopped or
    /// replaced since the tick was scheduled).
    pub fn on_tick(
        &mut self,
        id: &str,
        generation: u64,
        _now: Instant,
    ) -> Option<Firing> {
        let entry = self.entries.get_mut(id)?;
        if entry.generation != generation {
            return None;
        }

        if let Some(update) = entry.pending.take() {
            entry.plan = update.plan;
            entry.clock = update.clock;
        }

        entry.next_fire += bar_duration(&entry.clock);

        Some(Firing {
            plan: entry.plan.clone(),
            clock: entry.clock,
            generation: entry.generation,
            next_fire: entry.next_fire,
        })
    }
}

fn bar_duration(clock: &ClockSnapshot) -> Duration {
    Duration::from_secs_f64(clock.bar_ms() / 1000.0)
}

/// A firing deferred to the next bar boundary. Drained FIFO on each bar
/// change.
#[derive(Clone, Debug)]
pub enum Queued {
    Track {
        plan: Plan,
    },
    Cycle {
        id: String,
        plan: Plan,
        clock: ClockSnapshot,
    },
}
