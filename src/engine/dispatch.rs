//! Routes scheduled events to the two logical MIDI outputs. DSL
//! channels are 1–16 and convert to wire-level 0–15 here; all values
//! clamp to the MIDI domain.

use crate::midi::MidiOut;
use crate::prelude::*;

pub const NOTE_ON: u8 = 0x90;
pub const NOTE_OFF: u8 = 0x80;
pub const CONTROL_CHANGE: u8 = 0xB0;

/// Pan rides the sequence port as CC 10 alongside its note.
pub const PAN_CONTROLLER: u8 = 10;

fn wire_channel(channel: u8) -> u8 {
    channel.clamp(1, 16) - 1
}

pub fn note_on_message(note: u8, velocity: u8, channel: u8) -> [u8; 3] {
    [NOTE_ON | wire_channel(channel), note.min(127), velocity.min(127)]
}

pub fn note_off_message(note: u8, channel: u8) -> [u8; 3] {
    [NOTE_OFF | wire_channel(channel), note.min(127), 0]
}

pub fn control_change_message(
    controller: u8,
    value: u8,
    channel: u8,
) -> [u8; 3] {
    [
        CONTROL_CHANGE | wire_channel(channel),
        controller.min(127),
        value.min(127),
    ]
}

pub struct MidiRouter {
    sequence: MidiOut,
    automation: MidiOut,
}

impl MidiRouter {
    pub fn new(sequence: MidiOut, automation: MidiOut) -> Self {
        Self {
            sequence,
            automation,
        }
    }

    /// Opens both outputs. Failure is downgraded to a warning; events
    /// for an absent port are dropped at send time.
    pub fn connect() -> Self {
        let mut sequence = MidiOut::new(config::SEQUENCE_PORT_NAME);
        let mut automation = MidiOut::new(config::AUTOMATION_PORT_NAME);
        if let Err(e) = sequence.connect() {
            warn!("No {} output: {}", config::SEQUENCE_PORT_NAME, e);
        }
        if let Err(e) = automation.connect() {
            warn!("No {} output: {}", config::AUTOMATION_PORT_NAME, e);
        }
        Self::new(sequence, automation)
    }

    /// Chord tones × channel set dispatch as a cartesian product.
    pub fn note_on(
        &mut self,
        notes: &[u8],
        velocity: u8,
        channels: &[u8],
        pan: Option<u8>,
    ) {
        for &channel in channels {
            if let Some(pan) = pan {
                self.sequence.send(&control_change_message(
                    PAN_CONTROLLER,
                    pan,
                    channel,
                ));
            }
            for &note in notes {
                self.sequence
                    .send(&note_on_message(note, velocity, channel));
            }
        }
    }

    pub fn note_off(&mut self, notes: &[u8], channels: &[u8]) {
        for &channel in channels {
            for &note in notes {
                self.sequence.send(&note_off_message(note, channel));
            }
        }
    }

    pub fn control_change(
        &mut self,
        controller: u8,
        value: u8,
        channel: u8,
    ) {
        self.automation
            .send(&control_change_message(controller, value, channel));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_conversion() {
        assert_eq!(note_on_message(60, 100, 1), [0x90, 60, 100]);
        assert_eq!(note_on_message(60, 100, 16), [0x9F, 60, 100]);
        // out-of-domain channels clamp into 1..=16
        assert_eq!(note_on_message(60, 100, 0)[0], 0x90);
        assert_eq!(note_on_message(60, 100, 20)[0], 0x9F);
    }

    #[test]
    fn test_note_off() {
        assert_eq!(note_off_message(60, 3), [0x82, 60, 0]);
    }

    #[test]
    fn test_control_change() {
        assert_eq!(control_change_message(7, 127, 1), [0xB0, 7, 127]);
        assert_eq!(control_change_message(200, 200, 1), [0xB0, 127, 127]);
    }
}
