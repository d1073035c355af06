//! Process wiring: MIDI outputs, the engine thread, the control-bus
//! receiver, and the WebSocket server.

use std::error::Error;

use crate::engine::clock::TransportMsg;
use crate::engine::dispatch::MidiRouter;
use crate::engine::scheduler::{self, Command, EngineHandle};
use crate::osc;
use crate::prelude::*;
use crate::runtime::server::{self, ClientHub};

pub fn run() -> Result<(), Box<dyn Error>> {
    init_logger();

    let hub = ClientHub::new();
    let router = MidiRouter::connect();
    let engine = scheduler::spawn(router, hub.clone());

    start_transport_ingress(&engine);

    if let Err(e) = osc::send_initialize() {
        warn!("Failed to send /initialize: {}", e);
    }

    server::serve(config::server_port(), engine, hub)
}

/// Binds the control bus and routes the four transport addresses into
/// the engine. A bind failure leaves the runtime usable for client
/// messages with message-supplied clocks.
fn start_transport_ingress(engine: &EngineHandle) {
    let receiver = osc::Receiver::new();

    let tx = engine.clone();
    receiver.register_callback("/tempo", move |msg| {
        if let Some(v) = osc::first_number(msg) {
            tx.send(Command::Transport(TransportMsg::Tempo(v)));
        }
    });

    let tx = engine.clone();
    receiver.register_callback("/signature_numerator", move |msg| {
        if let Some(v) = osc::first_number(msg) {
            tx.send(Command::Transport(
                TransportMsg::SignatureNumerator(v.max(0.0) as u32),
            ));
        }
    });

    let tx = engine.clone();
    receiver.register_callback("/signature_denominator", move |msg| {
        if let Some(v) = osc::first_number(msg) {
            tx.send(Command::Transport(
                TransportMsg::SignatureDenominator(v.max(0.0) as u32),
            ));
        }
    });

    let tx = engine.clone();
    receiver.register_callback("/current_song_time", move |msg| {
        if let Some(v) = osc::first_number(msg) {
            tx.send(Command::Transport(TransportMsg::SongTime(v)));
        }
    });

    if let Err(e) = receiver.start(config::CONTROL_BUS_PORT) {
        warn!(
            "Control bus unavailable on port {}: {}",
            config::CONTROL_BUS_PORT,
            e
        );
    }
}
