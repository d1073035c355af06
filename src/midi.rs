//! MIDI output connections via the system MIDI service. Ports are
//! created as virtual loopback ports where the platform supports it,
//! with a connect-by-name fallback so an existing inter-app driver port
//! also works.

use midir::{MidiOutput, MidiOutputConnection};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::error::Error;
use std::sync::Mutex;

use crate::prelude::*;

const CLIENT_NAME: &str = "ostinato";

/// Ports we have already complained about. A port stays broken for
/// whole bars at a time; one warning per port is enough.
static WARNED_PORTS: Lazy<Mutex<HashSet<String>>> =
    Lazy::new(|| Mutex::new(HashSet::new()));

fn warn_port_once(port: &str, detail: impl std::fmt::Display) {
    if WARNED_PORTS.lock().unwrap().insert(port.to_string()) {
        warn!("MIDI output {}: {}; dropping events", port, detail);
    }
}

pub struct MidiOut {
    name: String,
    connection: Option<MidiOutputConnection>,
}

impl MidiOut {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            connection: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connect(&mut self) -> Result<(), Box<dyn Error>> {
        #[cfg(unix)]
        {
            use midir::os::unix::VirtualOutput;

            let midi_out = MidiOutput::new(CLIENT_NAME)?;
            match midi_out.create_virtual(&self.name) {
                Ok(connection) => {
                    info!("Created virtual MIDI output: {}", self.name);
                    self.connection = Some(connection);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Unable to create virtual port {}: {}",
                        self.name, e
                    );
                }
            }
        }

        self.connect_existing()
    }

    fn connect_existing(&mut self) -> Result<(), Box<dyn Error>> {
        let midi_out = MidiOutput::new(CLIENT_NAME)?;
        let out_ports = midi_out.ports();
        let out_port = out_ports
            .iter()
            .find(|p| {
                midi_out.port_name(p).unwrap_or_default() == self.name
            })
            .ok_or_else(|| {
                format!("Unable to find output port: {}", self.name)
            })?;
        let connection = midi_out.connect(out_port, &self.name)?;
        info!("Connected to MIDI output: {}", self.name);
        self.connection = Some(connection);
        Ok(())
    }

    /// Missing connections drop the message silently after a one-time
    /// warning; a live set must not crash on an unplugged port.
    pub fn send(&mut self, message: &[u8; 3]) {
        match &mut self.connection {
            Some(connection) => {
                if let Err(e) = connection.send(message) {
                    warn_port_once(&self.name, e);
                }
            }
            None => {
                warn_port_once(&self.name, "not connected");
            }
        }
    }
}

pub type PortIndexAndName = (usize, String);

pub fn list_output_ports(
) -> Result<Vec<PortIndexAndName>, Box<dyn Error>> {
    let midi_out = MidiOutput::new(CLIENT_NAME)?;
    let mut ports = vec![];
    for (i, p) in midi_out.ports().iter().enumerate() {
        ports.push((i, midi_out.port_name(p)?))
    }
    Ok(ports)
}
