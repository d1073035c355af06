//! The WebSocket client channel: accepts JSON frames from live-coding
//! clients, translates them into engine requests, and pushes beat,
//! tempo, and stream frames back out. One thread per client; the hub
//! holds the write halves so the engine can broadcast from its own
//! thread.
//!
//! # Event Flow
//! ```md
//! Client JSON frame ->
//! ClientMessage (wire form) ->
//! engine::messages::ClientRequest ->
//! scheduler Command
//! ```

use serde::Deserialize;
use std::error::Error;
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use websocket::sender::Writer;
use websocket::sync::Server;
use websocket::OwnedMessage;

use crate::engine::easing::Easing;
use crate::engine::messages::{
    ClientRequest, ClientSink, ClockOverride, Outbound, StreamRequest,
};
use crate::engine::parse;
use crate::engine::scheduler::{Command, EngineHandle};
use crate::prelude::*;

/// Inbound wire frame. Numeric fields are lenient floats so an
/// out-of-domain value clamps instead of rejecting the whole frame.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    pub action: String,
    #[serde(default)]
    pub cycle_str: Option<String>,
    #[serde(default)]
    pub tempo: Option<f64>,
    #[serde(default)]
    pub signature_numerator: Option<u32>,
    #[serde(default)]
    pub signature_denominator: Option<u32>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub controller: Option<f64>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub channel: Option<f64>,
    #[serde(default)]
    pub from: Option<f64>,
    #[serde(default)]
    pub to: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub easing: Option<String>,
    #[serde(default)]
    pub streams: Option<Vec<StreamSpec>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub controller: f64,
    #[serde(default)]
    pub from: Option<f64>,
    #[serde(default)]
    pub to: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub channel: Option<f64>,
    #[serde(default)]
    pub easing: Option<String>,
}

fn clamp_u8(value: f64, lo: u8, hi: u8) -> u8 {
    (value.round() as i64).clamp(lo as i64, hi as i64) as u8
}

fn stream_request(spec: &StreamSpec) -> StreamRequest {
    StreamRequest {
        id: spec.id.clone(),
        controller: clamp_u8(spec.controller, 0, 127),
        from: spec.from.map(|v| clamp_u8(v, 0, 127)),
        to: spec.to.map(|v| clamp_u8(v, 0, 127)).unwrap_or(127),
        duration_ms: spec.duration.unwrap_or(1000.0).max(1.0),
        channel: spec.channel.map(|v| clamp_u8(v, 1, 16)).unwrap_or(1),
        easing: spec
            .easing
            .as_deref()
            .and_then(Easing::from_str)
            .unwrap_or(Easing::Linear),
    }
}

/// Wire frame → engine request. Returns None for frames with nothing to
/// do; those are logged and ignored per the no-surfacing error policy.
pub fn translate(
    msg: &ClientMessage,
    client: u64,
) -> Option<ClientRequest> {
    let program = msg.cycle_str.clone().unwrap_or_default();
    let clock = ClockOverride {
        tempo: msg.tempo,
        numerator: msg.signature_numerator,
        denominator: msg.signature_denominator,
    };

    // a stop program wins regardless of the declared action
    if parse::is_stop(&program) {
        return Some(ClientRequest::ClearCycle {
            id: parse::cycle_id(&program)?,
        });
    }

    match msg.action.as_str() {
        "playTrack" => Some(ClientRequest::PlayTrack { program, clock }),
        "playCycle" => Some(ClientRequest::PlayCycle {
            program,
            id: msg.id.clone(),
            clock,
        }),
        "addTrackToQueue" => {
            Some(ClientRequest::QueueTrack { program, clock })
        }
        "addCycleToQueue" => Some(ClientRequest::QueueCycle {
            program,
            id: msg.id.clone(),
            clock,
        }),
        "updateCycleById" => Some(ClientRequest::UpdateCycle {
            program,
            id: msg.id.clone(),
            clock,
        }),
        "clearCycleById" => Some(ClientRequest::ClearCycle {
            id: msg
                .id
                .clone()
                .or_else(|| parse::cycle_id(&program))?,
        }),
        "clearAllCycles" => Some(ClientRequest::ClearAllCycles),
        "sendCC" => Some(ClientRequest::SendCc {
            controller: clamp_u8(msg.controller?, 0, 127),
            value: clamp_u8(msg.value?, 0, 127),
            channel: msg
                .channel
                .map(|v| clamp_u8(v, 1, 16))
                .unwrap_or(1),
        }),
        "streamCC" => {
            let spec = StreamSpec {
                id: msg.id.clone(),
                controller: msg.controller?,
                from: msg.from,
                to: msg.to,
                duration: msg.duration,
                channel: msg.channel,
                easing: msg.easing.clone(),
            };
            Some(ClientRequest::StreamCc(stream_request(&spec)))
        }
        "streamMultipleCC" => Some(ClientRequest::StreamMultipleCc(
            msg.streams
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(stream_request)
                .collect(),
        )),
        "stopCCStream" => Some(ClientRequest::StopCcStream {
            id: msg.id.clone(),
            controller: msg.controller.map(|v| clamp_u8(v, 0, 127)),
            channel: msg.channel.map(|v| clamp_u8(v, 1, 16)),
        }),
        "stopAllCCStreams" => Some(ClientRequest::StopAllCcStreams),
        "getActiveCCStreams" => {
            Some(ClientRequest::GetActiveCcStreams { client })
        }
        other => {
            warn!("Unknown action: {}", other);
            None
        }
    }
}

/// Write halves of every connected client, shared between the accept
/// loop and the engine thread.
#[derive(Default)]
pub struct ClientHub {
    clients: Mutex<FxHashMap<u64, Writer<TcpStream>>>,
    next_id: AtomicU64,
}

impl ClientHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, writer: Writer<TcpStream>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.clients.lock().insert(id, writer);
        id
    }

    fn unregister(&self, id: u64) {
        self.clients.lock().remove(&id);
    }

    fn pong(&self, id: u64, data: Vec<u8>) {
        if let Some(writer) = self.clients.lock().get_mut(&id) {
            let _ = writer.send_message(&OwnedMessage::Pong(data));
        }
    }

    fn send_text(&self, id: u64, text: &str) {
        let mut clients = self.clients.lock();
        if let Some(writer) = clients.get_mut(&id) {
            if writer
                .send_message(&OwnedMessage::Text(text.to_string()))
                .is_err()
            {
                clients.remove(&id);
            }
        }
    }
}

impl ClientSink for ClientHub {
    fn broadcast(&self, frame: &Outbound) {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed encoding frame: {}", e);
                return;
            }
        };
        let mut clients = self.clients.lock();
        let mut dead = Vec::new();
        for (id, writer) in clients.iter_mut() {
            if writer
                .send_message(&OwnedMessage::Text(text.clone()))
                .is_err()
            {
                dead.push(*id);
            }
        }
        for id in dead {
            clients.remove(&id);
        }
    }

    fn send_to(&self, client: u64, frame: &Outbound) {
        match serde_json::to_string(frame) {
            Ok(text) => self.send_text(client, &text),
            Err(e) => error!("Failed encoding frame: {}", e),
        }
    }
}

/// Accept loop; blocks for the life of the process.
pub fn serve(
    port: u16,
    engine: EngineHandle,
    hub: Arc<ClientHub>,
) -> Result<(), Box<dyn Error>> {
    let server = Server::bind(format!("0.0.0.0:{}", port))?;
    info!("WebSocket server listening on port {}", port);

    for request in server.filter_map(Result::ok) {
        let engine = engine.clone();
        let hub = hub.clone();

        thread::spawn(move || {
            let client = match request.accept() {
                Ok(client) => client,
                Err(_) => return,
            };
            let (mut receiver, sender) = match client.split() {
                Ok(pair) => pair,
                Err(_) => return,
            };

            let id = hub.register(sender);
            info!("Client {} connected", id);
            engine.send(Command::ClientConnected(id));

            for message in receiver.incoming_messages() {
                match message {
                    Ok(OwnedMessage::Text(text)) => {
                        match serde_json::from_str::<ClientMessage>(&text)
                        {
                            Ok(msg) => {
                                if let Some(request) =
                                    translate(&msg, id)
                                {
                                    engine.send(Command::Client(
                                        request,
                                    ));
                                }
                            }
                            Err(e) => {
                                warn!(
                                    "Bad frame from client {}: {}",
                                    id, e
                                );
                            }
                        }
                    }
                    Ok(OwnedMessage::Ping(data)) => hub.pong(id, data),
                    Ok(OwnedMessage::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            hub.unregister(id);
            info!("Client {} disconnected", id);
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_frame(json: &str) -> ClientMessage {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_play_track_frame() {
        let msg = parse_frame(
            r#"{"action":"playTrack","cycleStr":"[n(60)].c(1)","tempo":140}"#,
        );
        match translate(&msg, 1).unwrap() {
            ClientRequest::PlayTrack { program, clock } => {
                assert_eq!(program, "[n(60)].c(1)");
                assert_eq!(clock.tempo, Some(140.0));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_stop_program_wins_over_action() {
        let msg = parse_frame(
            r#"{"action":"playCycle","cycleStr":"t(loopA).stop()"}"#,
        );
        assert_eq!(
            translate(&msg, 1),
            Some(ClientRequest::ClearCycle {
                id: "loopA".to_string()
            })
        );
    }

    #[test]
    fn test_send_cc_clamps() {
        let msg = parse_frame(
            r#"{"action":"sendCC","controller":300,"value":-5,"channel":99}"#,
        );
        assert_eq!(
            translate(&msg, 1),
            Some(ClientRequest::SendCc {
                controller: 127,
                value: 0,
                channel: 16
            })
        );
    }

    #[test]
    fn test_stream_cc_defaults() {
        let msg = parse_frame(
            r#"{"action":"streamCC","controller":7,"to":100}"#,
        );
        match translate(&msg, 1).unwrap() {
            ClientRequest::StreamCc(spec) => {
                assert_eq!(spec.controller, 7);
                assert_eq!(spec.to, 100);
                assert_eq!(spec.channel, 1);
                assert_eq!(spec.easing, Easing::Linear);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_stream_multiple() {
        let msg = parse_frame(
            r#"{"action":"streamMultipleCC","streams":[
                {"controller":7,"to":127,"duration":500},
                {"controller":10,"to":0,"easing":"easeInOutCubic"}
            ]}"#,
        );
        match translate(&msg, 1).unwrap() {
            ClientRequest::StreamMultipleCc(specs) => {
                assert_eq!(specs.len(), 2);
                assert_eq!(specs[0].duration_ms, 500.0);
                assert_eq!(specs[1].easing, Easing::EaseInOutCubic);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_clear_cycle_id_fallback() {
        let msg = parse_frame(
            r#"{"action":"clearCycleById","cycleStr":"t(xyz).play([n(60)])"}"#,
        );
        assert_eq!(
            translate(&msg, 1),
            Some(ClientRequest::ClearCycle {
                id: "xyz".to_string()
            })
        );
    }

    #[test]
    fn test_get_active_streams_carries_client() {
        let msg = parse_frame(r#"{"action":"getActiveCCStreams"}"#);
        assert_eq!(
            translate(&msg, 42),
            Some(ClientRequest::GetActiveCcStreams { client: 42 })
        );
    }

    #[test]
    fn test_unknown_action_ignored() {
        let msg = parse_frame(r#"{"action":"selfDestruct"}"#);
        assert_eq!(translate(&msg, 1), None);
    }

    #[test]
    fn test_missing_fields_ignored() {
        // sendCC without a controller has nothing to do
        let msg = parse_frame(r#"{"action":"sendCC"}"#);
        assert_eq!(translate(&msg, 1), None);
    }
}
