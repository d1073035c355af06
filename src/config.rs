//! Default ports and timing constants. The WebSocket port can be
//! overridden with the `PORT` environment variable; everything else is
//! fixed for the lifetime of the process.

use std::env;

/// UDP port the transport control bus (the DAW side) sends datagrams to.
pub const CONTROL_BUS_PORT: u16 = 4254;

/// UDP port the one-shot `/initialize` datagram is sent to at startup.
/// The host-side transport device listens here.
pub const CONTROL_BUS_REPLY_PORT: u16 = 4255;

pub const DEFAULT_SERVER_PORT: u16 = 4254;

/// The names of the two virtual MIDI output ports.
pub const SEQUENCE_PORT_NAME: &str = "sequence";
pub const AUTOMATION_PORT_NAME: &str = "automation";

/// Update granularity for continuous controller ramps.
pub const CC_UPDATE_INTERVAL_MS: u64 = 10;

/// Note-off is scheduled this many ms before the note's duration elapses
/// so back-to-back repeats of the same pitch retrigger cleanly.
pub const NOTE_OFF_LEAD_MS: f64 = 50.0;

/// MIDI range used when a note randomizer has no explicit nRange.
pub const DEFAULT_NOTE_RANGE: (u8, u8) = (24, 108);

pub const DEFAULT_VELOCITY: u8 = 100;

/// Octave assumed when a scale/chord root token carries no octave digit.
pub const DEFAULT_ROOT_OCTAVE: i32 = 3;

pub fn server_port() -> u16 {
    env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SERVER_PORT)
}
