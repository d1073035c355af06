//! The single logical executor. One thread owns the clock, the cycle
//! registry, the automation streams, and a heap of absolutely-timed
//! tasks; transport datagrams and client requests arrive over a
//! channel, so no engine state needs a lock. The loop sleeps until the
//! earlier of the next task deadline or an incoming command.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::prelude::*;

use super::automation::{AutomationEngine, CcStream};
use super::clock::{Clock, ClockEvent, ClockSnapshot, TransportMsg};
use super::cycles::{CycleManager, Queued};
use super::dispatch::MidiRouter;
use super::expr::Expr;
use super::messages::{
    ClientRequest, ClientSink, ClockOverride, Outbound, StreamRequest,
};
use super::parse;
use super::plan::{Plan, Program};
use super::planner;

pub enum Command {
    Transport(TransportMsg),
    Client(ClientRequest),
    ClientConnected(u64),
    Shutdown,
}

#[derive(Clone)]
pub struct EngineHandle {
    tx: Sender<Command>,
}

impl EngineHandle {
    pub fn send(&self, command: Command) {
        // a dropped engine means we are shutting down; nothing to do
        let _ = self.tx.send(command);
    }
}

/// Spawns the engine thread and returns its command handle.
pub fn spawn(
    router: MidiRouter,
    sink: Arc<dyn ClientSink>,
) -> EngineHandle {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        Engine::new(router, sink, rx).run();
    });
    EngineHandle { tx }
}

#[derive(Debug)]
enum Task {
    NoteOn {
        notes: Vec<u8>,
        velocity: u8,
        channels: Vec<u8>,
        pan: Option<u8>,
    },
    NoteOff {
        notes: Vec<u8>,
        channels: Vec<u8>,
    },
    StartStream {
        spec: RampSpec,
    },
    CcTick {
        id: String,
    },
    CycleTick {
        id: String,
        generation: u64,
    },
}

#[derive(Debug)]
struct RampSpec {
    id: String,
    controller: u8,
    channel: u8,
    from: u8,
    to: u8,
    duration_ms: f64,
    easing: super::easing::Easing,
    owner: Option<String>,
}

struct TimedTask {
    at: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for TimedTask {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for TimedTask {}

impl PartialOrd for TimedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at.cmp(&other.at).then(self.seq.cmp(&other.seq))
    }
}

struct Engine {
    rx: Receiver<Command>,
    router: MidiRouter,
    sink: Arc<dyn ClientSink>,
    clock: Clock,
    cycles: CycleManager,
    automation: AutomationEngine,
    queue: Vec<Queued>,
    heap: BinaryHeap<Reverse<TimedTask>>,
    seq: u64,
    rng: StdRng,
}

impl Engine {
    fn new(
        router: MidiRouter,
        sink: Arc<dyn ClientSink>,
        rx: Receiver<Command>,
    ) -> Self {
        Self {
            rx,
            router,
            sink,
            clock: Clock::new(),
            cycles: CycleManager::new(),
            automation: AutomationEngine::new(),
            queue: Vec::new(),
            heap: BinaryHeap::new(),
            seq: 0,
            rng: StdRng::from_entropy(),
        }
    }

    fn run(&mut self) {
        info!("Engine running");
        loop {
            let now = Instant::now();
            self.run_due(now);

            let timeout = self
                .heap
                .peek()
                .map(|Reverse(t)| t.at.saturating_duration_since(now))
                .unwrap_or(Duration::from_millis(250));

            match self.rx.recv_timeout(timeout) {
                Ok(Command::Shutdown) => {
                    self.flush_note_offs();
                    break;
                }
                Ok(command) => self.handle(command),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("Engine stopped");
    }

    fn schedule(&mut self, at: Instant, task: Task) {
        self.seq += 1;
        self.heap.push(Reverse(TimedTask {
            at,
            seq: self.seq,
            task,
        }));
    }

    fn run_due(&mut self, now: Instant) {
        while let Some(Reverse(next)) = self.heap.peek() {
            if next.at > now {
                break;
            }
            let Reverse(timed) = self.heap.pop().unwrap();
            self.exec(timed.task, timed.at, now);
        }
    }

    fn exec(&mut self, task: Task, target: Instant, now: Instant) {
        match task {
            Task::NoteOn {
                notes,
                velocity,
                channels,
                pan,
            } => {
                self.router.note_on(&notes, velocity, &channels, pan);
            }
            Task::NoteOff { notes, channels } => {
                self.router.note_off(&notes, &channels);
            }
            Task::StartStream { spec } => {
                let stream = CcStream {
                    id: spec.id.clone(),
                    controller: spec.controller,
                    channel: spec.channel,
                    start_value: spec.from,
                    end_value: spec.to,
                    duration_ms: spec.duration_ms,
                    easing: spec.easing,
                    started_at: now,
                    owner: spec.owner,
                };
                self.router.control_change(
                    spec.controller,
                    stream.value_at(now),
                    spec.channel,
                );
                let id = self.automation.start(stream);
                self.schedule(
                    target + cc_interval(),
                    Task::CcTick { id },
                );
            }
            Task::CcTick { id } => {
                if let Some(tick) = self.automation.tick(&id, now) {
                    self.router.control_change(
                        tick.controller,
                        tick.value,
                        tick.channel,
                    );
                    if !tick.done {
                        self.schedule(
                            target + cc_interval(),
                            Task::CcTick { id },
                        );
                    }
                }
            }
            Task::CycleTick { id, generation } => {
                if let Some(firing) =
                    self.cycles.on_tick(&id, generation, now)
                {
                    self.fire_plan(
                        &firing.plan,
                        &firing.clock,
                        Some(&id),
                        target,
                    );
                    self.schedule(
                        firing.next_fire,
                        Task::CycleTick {
                            id,
                            generation: firing.generation,
                        },
                    );
                }
            }
        }
    }

    /// Renders the plan once (resolving random parameters for this
    /// firing) and schedules every resulting event from `origin`.
    fn fire_plan(
        &mut self,
        plan: &Plan,
        clock: &ClockSnapshot,
        owner: Option<&str>,
        origin: Instant,
    ) {
        let blocks = planner::render_plan(plan, clock, &mut self.rng);

        for block in blocks {
            for note in block.notes {
                let at = origin + millis(note.offset_ms);
                let off_delay = if note.duration_ms <= 0.0 {
                    0.0
                } else {
                    (note.duration_ms - config::NOTE_OFF_LEAD_MS).max(0.0)
                };
                self.schedule(
                    at,
                    Task::NoteOn {
                        notes: note.notes.clone(),
                        velocity: note.velocity,
                        channels: note.channels.clone(),
                        pan: note.pan,
                    },
                );
                self.schedule(
                    at + millis(off_delay),
                    Task::NoteOff {
                        notes: note.notes,
                        channels: note.channels,
                    },
                );
            }

            for ramp in block.ramps {
                let spec = RampSpec {
                    id: AutomationEngine::stream_id(
                        ramp.controller,
                        ramp.channel,
                    ),
                    controller: ramp.controller,
                    channel: ramp.channel,
                    from: ramp.from,
                    to: ramp.to,
                    duration_ms: ramp.duration_ms,
                    easing: ramp.easing,
                    owner: owner.map(String::from),
                };
                self.schedule(
                    origin + millis(ramp.offset_ms),
                    Task::StartStream { spec },
                );
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Transport(msg) => {
                for event in self.clock.apply(msg) {
                    self.on_clock_event(event);
                }
            }
            Command::Client(request) => {
                self.handle_client(request, Instant::now())
            }
            Command::ClientConnected(client) => {
                let snapshot =
                    self.clock.snapshot().unwrap_or_default();
                self.sink.send_to(
                    client,
                    &Outbound::TempoAndSignature {
                        tempo: snapshot.tempo,
                        signature_numerator: snapshot.numerator,
                        signature_denominator: snapshot.denominator,
                    },
                );
            }
            Command::Shutdown => unreachable!("handled by run()"),
        }
    }

    fn on_clock_event(&mut self, event: ClockEvent) {
        match event {
            ClockEvent::Bar { bar } => {
                trace!("Bar {}", bar);
                self.drain_queue(Instant::now());
            }
            ClockEvent::Beat {
                bar,
                beat,
                absolute,
            } => {
                self.sink.broadcast(&Outbound::Beat {
                    beat,
                    bar,
                    beat_number: absolute,
                });
            }
            ClockEvent::TempoOrSignature => {
                if let Some(snapshot) = self.clock.snapshot() {
                    self.sink.broadcast(&Outbound::TempoAndSignature {
                        tempo: snapshot.tempo,
                        signature_numerator: snapshot.numerator,
                        signature_denominator: snapshot.denominator,
                    });
                }
            }
        }
    }

    fn drain_queue(&mut self, now: Instant) {
        let queued = std::mem::take(&mut self.queue);
        for entry in queued {
            match entry {
                Queued::Track { plan } => {
                    let clock =
                        self.clock.snapshot().unwrap_or_default();
                    self.fire_plan(&plan, &clock, None, now);
                }
                Queued::Cycle { id, plan, clock } => {
                    self.install_cycle(&id, plan, clock, now);
                }
            }
        }
    }

    fn handle_client(&mut self, request: ClientRequest, now: Instant) {
        match request {
            ClientRequest::PlayTrack { program, clock } => {
                match parse::parse_program(&program) {
                    Some(Program::Track(plan)) => {
                        let clock = self.resolve_clock(&clock);
                        self.fire_plan(&plan, &clock, None, now);
                    }
                    Some(cycle @ Program::Cycle { .. }) => {
                        // explicit t() syntax wins over the action
                        self.play_cycle_program(cycle, None, &clock, now);
                    }
                    Some(Program::Stop { id }) => {
                        self.stop_cycle(&id);
                    }
                    None => debug!("Ignoring empty program"),
                }
            }
            ClientRequest::PlayCycle { program, id, clock } => {
                match parse::parse_program(&program) {
                    Some(Program::Stop { id }) => {
                        self.stop_cycle(&id);
                    }
                    Some(program) => {
                        self.play_cycle_program(program, id, &clock, now)
                    }
                    None => debug!("Ignoring empty program"),
                }
            }
            ClientRequest::QueueTrack { program, clock } => {
                match parse::parse_program(&program) {
                    Some(Program::Track(plan)) => {
                        // a queued track captures the clock at drain
                        // time, not submission time
                        self.queue.push(Queued::Track { plan });
                    }
                    Some(program) => self.queue_cycle_program(
                        program, None, &clock,
                    ),
                    None => debug!("Ignoring empty program"),
                }
            }
            ClientRequest::QueueCycle { program, id, clock } => {
                match parse::parse_program(&program) {
                    Some(Program::Stop { id }) => {
                        self.stop_cycle(&id);
                    }
                    Some(program) => {
                        self.queue_cycle_program(program, id, &clock)
                    }
                    None => debug!("Ignoring empty program"),
                }
            }
            ClientRequest::UpdateCycle { program, id, clock } => {
                match parse::parse_program(&program) {
                    Some(Program::Stop { id }) => {
                        self.stop_cycle(&id);
                    }
                    Some(program) => {
                        let (cycle_id, plan, snapshot) = match self
                            .resolve_cycle_program(program, id, &clock)
                        {
                            Some(resolved) => resolved,
                            None => return,
                        };
                        if !self.cycles.set_pending(
                            &cycle_id, plan, snapshot,
                        ) {
                            debug!(
                                "No cycle {} to update",
                                cycle_id
                            );
                        }
                    }
                    None => debug!("Ignoring empty program"),
                }
            }
            ClientRequest::ClearCycle { id } => {
                self.stop_cycle(&id);
            }
            ClientRequest::ClearAllCycles => {
                for id in self.cycles.clear() {
                    self.automation.stop_owned(&id);
                }
                info!("Cleared all cycles");
            }
            ClientRequest::SendCc {
                controller,
                value,
                channel,
            } => {
                self.router.control_change(controller, value, channel);
            }
            ClientRequest::StreamCc(spec) => {
                self.start_stream(spec, None, now);
            }
            ClientRequest::StreamMultipleCc(specs) => {
                for spec in specs {
                    self.start_stream(spec, None, now);
                }
            }
            ClientRequest::StopCcStream {
                id,
                controller,
                channel,
            } => {
                let id = id.or_else(|| {
                    controller.map(|cc| {
                        AutomationEngine::stream_id(
                            cc,
                            channel.unwrap_or(1),
                        )
                    })
                });
                match id {
                    Some(id) => {
                        if !self.automation.stop(&id) {
                            debug!("No stream {} to stop", id);
                        }
                    }
                    None => debug!("stopCCStream without id"),
                }
            }
            ClientRequest::StopAllCcStreams => {
                let n = self.automation.stop_all();
                info!("Stopped {} CC streams", n);
            }
            ClientRequest::GetActiveCcStreams { client } => {
                let streams = self.automation.active(now);
                self.sink.send_to(
                    client,
                    &Outbound::ActiveCcStreams { streams },
                );
            }
        }
    }

    fn play_cycle_program(
        &mut self,
        program: Program,
        msg_id: Option<String>,
        overrides: &ClockOverride,
        now: Instant,
    ) {
        if let Some((id, plan, clock)) =
            self.resolve_cycle_program(program, msg_id, overrides)
        {
            self.install_cycle(&id, plan, clock, now);
        }
    }

    fn queue_cycle_program(
        &mut self,
        program: Program,
        msg_id: Option<String>,
        overrides: &ClockOverride,
    ) {
        if let Some((id, plan, clock)) =
            self.resolve_cycle_program(program, msg_id, overrides)
        {
            self.queue.push(Queued::Cycle { id, plan, clock });
        }
    }

    /// Resolves (id, plan, clock) for a cycle-ish program. The id comes
    /// from `t(id)` if present, else the message, else it is generated.
    fn resolve_cycle_program(
        &mut self,
        program: Program,
        msg_id: Option<String>,
        overrides: &ClockOverride,
    ) -> Option<(String, Plan, ClockSnapshot)> {
        match program {
            Program::Cycle {
                id,
                plan,
                tempo,
                numerator,
                denominator,
            } => {
                let clock = self.cycle_clock(
                    overrides,
                    &tempo,
                    &numerator,
                    &denominator,
                );
                let id = id
                    .or(msg_id)
                    .unwrap_or_else(|| self.generate_id());
                Some((id, plan, clock))
            }
            Program::Track(plan) => {
                let clock = self.resolve_clock(overrides);
                let id =
                    msg_id.unwrap_or_else(|| self.generate_id());
                Some((id, plan, clock))
            }
            Program::Stop { .. } => None,
        }
    }

    fn install_cycle(
        &mut self,
        id: &str,
        plan: Plan,
        clock: ClockSnapshot,
        now: Instant,
    ) {
        let firing = self.cycles.install(id, plan, clock, now);
        info!(
            "Playing cycle {} at {:.1}bpm {}/{}",
            id, clock.tempo, clock.numerator, clock.denominator
        );
        self.fire_plan(&firing.plan, &firing.clock, Some(id), now);
        self.schedule(
            firing.next_fire,
            Task::CycleTick {
                id: id.to_string(),
                generation: firing.generation,
            },
        );
    }

    fn stop_cycle(&mut self, id: &str) -> bool {
        let removed = self.cycles.remove(id);
        if removed {
            self.automation.stop_owned(id);
            info!("Stopped cycle {}", id);
        } else {
            debug!("No cycle {} to stop", id);
        }
        removed
    }

    fn start_stream(
        &mut self,
        spec: StreamRequest,
        owner: Option<String>,
        now: Instant,
    ) {
        let id = spec.id.unwrap_or_else(|| {
            AutomationEngine::stream_id(spec.controller, spec.channel)
        });
        let stream = CcStream {
            id: id.clone(),
            controller: spec.controller,
            channel: spec.channel,
            start_value: spec.from.unwrap_or(0),
            end_value: spec.to,
            duration_ms: spec.duration_ms,
            easing: spec.easing,
            started_at: now,
            owner,
        };
        self.router.control_change(
            stream.controller,
            stream.value_at(now),
            stream.channel,
        );
        self.automation.start(stream);
        self.schedule(now + cc_interval(), Task::CcTick { id });
    }

    /// Live transport values with the message's overrides applied.
    fn resolve_clock(&self, overrides: &ClockOverride) -> ClockSnapshot {
        let live = self.clock.snapshot().unwrap_or_default();
        ClockSnapshot::new(
            overrides.tempo.unwrap_or(live.tempo),
            overrides.numerator.unwrap_or(live.numerator),
            overrides.denominator.unwrap_or(live.denominator),
        )
    }

    /// Clock for a cycle: live values, message overrides, then the
    /// program's own `.bpm()/.sn()/.sd()` expressions, which may
    /// reference the live values via `tmp`/`sn`/`sd`.
    fn cycle_clock(
        &self,
        overrides: &ClockOverride,
        tempo: &Option<Expr>,
        numerator: &Option<Expr>,
        denominator: &Option<Expr>,
    ) -> ClockSnapshot {
        let live = self.clock.snapshot().unwrap_or_default();
        let mut resolved = self.resolve_clock(overrides);
        if let Some(e) = tempo {
            resolved.tempo = e.eval(&live);
        }
        if let Some(e) = numerator {
            resolved.numerator = e.eval(&live).round().max(1.0) as u32;
        }
        if let Some(e) = denominator {
            resolved.denominator = e.eval(&live).round().max(1.0) as u32;
        }
        ClockSnapshot::new(
            resolved.tempo,
            resolved.numerator,
            resolved.denominator,
        )
    }

    fn generate_id(&mut self) -> String {
        const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let suffix: String = (0..5)
            .map(|_| {
                CHARS[self.rng.gen_range(0..CHARS.len())] as char
            })
            .collect();
        format!("cycle-{}", suffix)
    }

    /// On shutdown, release anything still sounding.
    fn flush_note_offs(&mut self) {
        while let Some(Reverse(timed)) = self.heap.pop() {
            if let Task::NoteOff { notes, channels } = timed.task {
                self.router.note_off(&notes, &channels);
            }
        }
        self.automation.stop_all();
    }
}

fn millis(ms: f64) -> Duration {
    Duration::from_secs_f64(ms.max(0.0) / 1000.0)
}

fn cc_interval() -> Duration {
    Duration::from_millis(config::CC_UPDATE_INTERVAL_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::MidiOut;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct TestSink {
        broadcasts: Mutex<Vec<String>>,
        directs: Mutex<Vec<(u64, String)>>,
    }

    impl ClientSink for TestSink {
        fn broadcast(&self, frame: &Outbound) {
            self.broadcasts
                .lock()
                .push(serde_json::to_string(frame).unwrap());
        }

        fn send_to(&self, client: u64, frame: &Outbound) {
            self.directs
                .lock()
                .push((client, serde_json::to_string(frame).unwrap()));
        }
    }

    fn engine() -> (Engine, Arc<TestSink>, Sender<Command>) {
        let (tx, rx) = mpsc::channel();
        let sink = Arc::new(TestSink::default());
        let router = MidiRouter::new(
            MidiOut::new("seq-test"),
            MidiOut::new("auto-test"),
        );
        (Engine::new(router, sink.clone(), rx), sink, tx)
    }

    fn init_transport(engine: &mut Engine) {
        engine.handle(Command::Transport(TransportMsg::Tempo(120.0)));
        engine.handle(Command::Transport(
            TransportMsg::SignatureNumerator(4),
        ));
        engine.handle(Command::Transport(
            TransportMsg::SignatureDenominator(4),
        ));
    }

    fn play_cycle(engine: &mut Engine, program: &str) {
        engine.handle_client(
            ClientRequest::PlayCycle {
                program: program.to_string(),
                id: None,
                clock: ClockOverride::default(),
            },
            Instant::now(),
        );
    }

    #[test]
    fn test_play_cycle_registers_and_schedules() {
        let (mut engine, _sink, _tx) = engine();
        init_transport(&mut engine);
        play_cycle(&mut engine, "t(loopA).play([n(60)^4].c(1))");

        assert!(engine.cycles.contains("loopA"));
        // 4 note-ons + 4 note-offs + the bar tick
        assert_eq!(engine.heap.len(), 9);
    }

    #[test]
    fn test_stop_syntax_overrides_action() {
        let (mut engine, _sink, _tx) = engine();
        init_transport(&mut engine);
        play_cycle(&mut engine, "t(loopA).play([n(60)^4].c(1))");

        engine.handle_client(
            ClientRequest::PlayTrack {
                program: "t(loopA).stop()".to_string(),
                clock: ClockOverride::default(),
            },
            Instant::now(),
        );
        assert!(!engine.cycles.contains("loopA"));
    }

    #[test]
    fn test_replacement_keeps_single_entry() {
        let (mut engine, _sink, _tx) = engine();
        init_transport(&mut engine);
        play_cycle(&mut engine, "t(loopA).play([n(60)^4].c(1))");
        play_cycle(&mut engine, "t(loopA).play([n(72)^4].c(1))");
        assert_eq!(engine.cycles.len(), 1);
    }

    #[test]
    fn test_update_unknown_cycle_is_noop() {
        let (mut engine, _sink, _tx) = engine();
        init_transport(&mut engine);
        engine.handle_client(
            ClientRequest::UpdateCycle {
                program: "t(ghost).play([n(60)].c(1))".to_string(),
                id: None,
                clock: ClockOverride::default(),
            },
            Instant::now(),
        );
        assert!(engine.cycles.is_empty());
    }

    #[test]
    fn test_queue_drains_on_bar_change() {
        let (mut engine, _sink, _tx) = engine();
        init_transport(&mut engine);
        engine.handle(Command::Transport(TransportMsg::SongTime(0.0)));

        engine.handle_client(
            ClientRequest::QueueTrack {
                program: "[n(60)^2].c(1)".to_string(),
                clock: ClockOverride::default(),
            },
            Instant::now(),
        );
        engine.handle_client(
            ClientRequest::QueueCycle {
                program: "t(q1).play([n(62)].c(1))".to_string(),
                id: None,
                clock: ClockOverride::default(),
            },
            Instant::now(),
        );
        assert_eq!(engine.queue.len(), 2);
        assert!(!engine.cycles.contains("q1"));

        // crossing into bar 2 drains the whole queue FIFO
        engine.handle(Command::Transport(TransportMsg::SongTime(4.0)));
        assert!(engine.queue.is_empty());
        assert!(engine.cycles.contains("q1"));
    }

    #[test]
    fn test_beat_and_tempo_broadcasts() {
        let (mut engine, sink, _tx) = engine();
        init_transport(&mut engine);
        engine.handle(Command::Transport(TransportMsg::SongTime(5.0)));

        let broadcasts = sink.broadcasts.lock();
        assert!(broadcasts
            .iter()
            .any(|f| f.contains(r#""type":"tempoAndSignature""#)));
        assert!(broadcasts.iter().any(|f| f.contains(
            r#""type":"beat","beat":2,"bar":2,"beatNumber":6"#
        )));
    }

    #[test]
    fn test_client_connected_gets_tempo_frame() {
        let (mut engine, sink, _tx) = engine();
        init_transport(&mut engine);
        engine.handle(Command::ClientConnected(3));

        let directs = sink.directs.lock();
        assert_eq!(directs.len(), 1);
        assert_eq!(directs[0].0, 3);
        assert!(directs[0].1.contains("tempoAndSignature"));
    }

    #[test]
    fn test_stream_cc_lifecycle() {
        let (mut engine, sink, _tx) = engine();
        let now = Instant::now();
        engine.handle_client(
            ClientRequest::StreamCc(StreamRequest {
                id: None,
                controller: 7,
                from: Some(0),
                to: 127,
                duration_ms: 100.0,
                channel: 1,
                easing: crate::engine::easing::Easing::Linear,
            }),
            now,
        );
        assert_eq!(engine.automation.len(), 1);

        engine.handle_client(
            ClientRequest::GetActiveCcStreams { client: 1 },
            now,
        );
        assert!(sink.directs.lock()[0]
            .1
            .contains(r#""type":"activeCCStreams""#));

        // run the pending tick far past the duration: the stream emits
        // its exact end value and self-terminates
        engine.run_due(now + Duration::from_secs(5));
        assert!(engine.automation.is_empty());
    }

    #[test]
    fn test_cycle_ramp_is_owned_and_stops_with_cycle() {
        let (mut engine, _sink, _tx) = engine();
        init_transport(&mut engine);
        let now = Instant::now();
        engine.handle_client(
            ClientRequest::PlayCycle {
                program: "t(sweep).play([a(7).from(0).to(127).d(br)])"
                    .to_string(),
                id: None,
                clock: ClockOverride::default(),
            },
            now,
        );
        // the ramp starts once its StartStream task fires
        engine.run_due(now + Duration::from_millis(1));
        assert_eq!(engine.automation.len(), 1);

        engine.handle_client(
            ClientRequest::ClearCycle {
                id: "sweep".to_string(),
            },
            now,
        );
        assert!(engine.automation.is_empty());
    }

    #[test]
    fn test_cycle_local_tempo() {
        let (mut engine, _sink, _tx) = engine();
        init_transport(&mut engine);
        play_cycle(
            &mut engine,
            "t(fast).bpm(tmp*2).play([n(60)^4].c(1))",
        );
        // live 120bpm doubled by the program's own bpm expression
        let entry = engine.cycles.get("fast").unwrap();
        assert_eq!(entry.clock.tempo, 240.0);
        assert_eq!(entry.clock.bar_ms(), 1000.0);
    }

    #[test]
    fn test_message_clock_override() {
        let (mut engine, _sink, _tx) = engine();
        init_transport(&mut engine);
        engine.handle_client(
            ClientRequest::PlayCycle {
                program: "t(waltz).play([n(60)^3].c(1))".to_string(),
                id: None,
                clock: ClockOverride {
                    tempo: Some(90.0),
                    numerator: Some(3),
                    denominator: None,
                },
            },
            Instant::now(),
        );
        let entry = engine.cycles.get("waltz").unwrap();
        assert_eq!(entry.clock.tempo, 90.0);
        assert_eq!(entry.clock.numerator, 3);
    }

    #[test]
    fn test_generated_ids_are_unique_enough() {
        let (mut engine, _sink, _tx) = engine();
        let a = engine.generate_id();
        let b = engine.generate_id();
        assert!(a.starts_with("cycle-"));
        assert_ne!(a, b);
    }
}
