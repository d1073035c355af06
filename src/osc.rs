//! Control-bus ingress. The host application broadcasts transport
//! datagrams over OSC; callbacks are registered per address and run on
//! the receiver thread. A one-shot `/initialize` datagram announces the
//! runtime to the host-side transport device at startup.

use nannou_osc as osc;
use rustc_hash::FxHashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::prelude::*;

type OscCallback = Box<dyn Fn(&osc::Message) + Send + Sync>;

#[derive(Default)]
pub struct Receiver {
    callbacks: Arc<Mutex<FxHashMap<String, Vec<OscCallback>>>>,
}

impl Receiver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            callbacks: Arc::new(Mutex::new(FxHashMap::default())),
        })
    }

    pub fn register_callback<F>(&self, address: &str, callback: F)
    where
        F: Fn(&osc::Message) + Send + Sync + 'static,
    {
        let mut callbacks = self.callbacks.lock().unwrap();
        let address_callbacks =
            callbacks.entry(address.to_string()).or_default();
        address_callbacks.push(Box::new(callback));
    }

    pub fn start(&self, port: u16) -> Result<(), Box<dyn Error>> {
        let receiver = osc::Receiver::bind(port)?;
        let callbacks = self.callbacks.clone();

        thread::spawn(move || {
            for (packet, _) in receiver.iter() {
                // bundles unpack to their member messages
                for msg in packet.into_msgs() {
                    let callbacks = callbacks.lock().unwrap();

                    if let Some(handlers) = callbacks.get(&msg.addr) {
                        for handler in handlers {
                            handler(&msg);
                        }
                    }
                }
            }
        });

        info!("OSC receiver listening on port {}", port);

        Ok(())
    }
}

/// First numeric argument of a message, if any.
pub fn first_number(msg: &osc::Message) -> Option<f64> {
    match msg.args.first()? {
        osc::Type::Float(v) => Some(*v as f64),
        osc::Type::Int(v) => Some(*v as f64),
        osc::Type::Double(v) => Some(*v),
        _ => None,
    }
}

pub fn send_initialize() -> Result<(), Box<dyn Error>> {
    let sender = osc::sender()?.connect(format!(
        "127.0.0.1:{}",
        config::CONTROL_BUS_REPLY_PORT
    ))?;
    sender.send(("/initialize", vec![osc::Type::Int(0)]))?;
    info!(
        "Sent /initialize to port {}",
        config::CONTROL_BUS_REPLY_PORT
    );
    Ok(())
}
