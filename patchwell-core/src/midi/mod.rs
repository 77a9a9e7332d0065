//! `midir`-backed transport.
//!
//! Every connected input fans its messages out to the shared observer
//! registry, so a transfer sees replies regardless of which port the device
//! answers on. Outputs are keyed by the device identity synths use to
//! address their requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use patchwell_types::MidiMessage;

use crate::error::TransportError;
use crate::transport::{MidiTransport, Observer, ObserverId, ObserverRegistry};

/// Information about an available MIDI port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiPortInfo {
    pub index: usize,
    pub name: String,
}

pub struct MidiController {
    client_name: String,
    registry: Arc<ObserverRegistry>,
    inputs: Mutex<Vec<(String, MidiInputConnection<()>)>>,
    outputs: Mutex<HashMap<String, MidiOutputConnection>>,
}

impl MidiController {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            registry: Arc::new(ObserverRegistry::new()),
            inputs: Mutex::new(Vec::new()),
            outputs: Mutex::new(HashMap::new()),
        }
    }

    pub fn list_input_ports(&self) -> Result<Vec<MidiPortInfo>, TransportError> {
        let midi_in = MidiInput::new(&self.client_name).map_err(|e| TransportError::Port(e.to_string()))?;
        Ok(midi_in
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                midi_in
                    .port_name(port)
                    .ok()
                    .map(|name| MidiPortInfo { index, name })
            })
            .collect())
    }

    pub fn list_output_ports(&self) -> Result<Vec<MidiPortInfo>, TransportError> {
        let midi_out =
            MidiOutput::new(&self.client_name).map_err(|e| TransportError::Port(e.to_string()))?;
        Ok(midi_out
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                midi_out
                    .port_name(port)
                    .ok()
                    .map(|name| MidiPortInfo { index, name })
            })
            .collect())
    }

    /// Listen on an input port. Sysex is let through; it is all we care about.
    pub fn connect_input(&self, port_index: usize) -> Result<String, TransportError> {
        let mut midi_in =
            MidiInput::new(&self.client_name).map_err(|e| TransportError::Port(e.to_string()))?;
        midi_in.ignore(Ignore::None);

        let ports = midi_in.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| TransportError::Port(format!("Invalid input port index: {}", port_index)))?;
        let port_name = midi_in
            .port_name(port)
            .unwrap_or_else(|_| "Unknown".to_string());

        let registry = Arc::clone(&self.registry);
        let connection = midi_in
            .connect(
                port,
                &format!("{}-input", self.client_name),
                move |_timestamp, bytes, _| {
                    registry.dispatch(&MidiMessage::new(bytes.to_vec()));
                },
                (),
            )
            .map_err(|e| TransportError::Port(e.to_string()))?;

        log::info!(target: "midi", "listening on {}", port_name);
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push((port_name.clone(), connection));
        }
        Ok(port_name)
    }

    /// Open an output port and bind it to `device`. Replaces any earlier
    /// binding for the same device.
    pub fn connect_output(&self, port_index: usize, device: &str) -> Result<String, TransportError> {
        let midi_out =
            MidiOutput::new(&self.client_name).map_err(|e| TransportError::Port(e.to_string()))?;
        let ports = midi_out.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| TransportError::Port(format!("Invalid output port index: {}", port_index)))?;
        let port_name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| "Unknown".to_string());

        let connection = midi_out
            .connect(port, &format!("{}-output", self.client_name))
            .map_err(|e| TransportError::Port(e.to_string()))?;

        log::info!(target: "midi", "{} bound to output {}", device, port_name);
        if let Ok(mut outputs) = self.outputs.lock() {
            if let Some(old) = outputs.insert(device.to_string(), connection) {
                old.close();
            }
        }
        Ok(port_name)
    }

    pub fn disconnect_all(&self) {
        if let Ok(mut inputs) = self.inputs.lock() {
            for (_, conn) in inputs.drain(..) {
                conn.close();
            }
        }
        if let Ok(mut outputs) = self.outputs.lock() {
            for (_, conn) in outputs.drain() {
                conn.close();
            }
        }
    }

    /// Observers currently installed; non-zero while a transfer is active.
    pub fn outstanding_observers(&self) -> usize {
        self.registry.outstanding()
    }
}

impl MidiTransport for MidiController {
    fn send(&self, device: &str, messages: &[MidiMessage]) -> Result<(), TransportError> {
        let mut outputs = self
            .outputs
            .lock()
            .map_err(|_| TransportError::Send("output lock poisoned".to_string()))?;
        let conn = outputs
            .get_mut(device)
            .ok_or_else(|| TransportError::NotConnected(device.to_string()))?;
        for message in messages {
            conn.send(message.bytes())
                .map_err(|e| TransportError::Send(e.to_string()))?;
        }
        Ok(())
    }

    fn register_observer(&self, observer: Observer) -> ObserverId {
        self.registry.register(observer)
    }

    fn deregister_observer(&self, id: ObserverId) {
        self.registry.deregister(id);
    }
}

impl Drop for MidiController {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}
