use std::sync::Arc;

use patchwell_types::MidiMessage;

use super::{Driver, DriverEvent, Progress};
use crate::capability::HandshakeState;
use crate::synth::Synth;

/// Drives a device-supplied state machine that may answer every message.
pub struct HandshakeDriver {
    state: Box<dyn HandshakeState>,
    accumulated: Vec<MidiMessage>,
    outbound: Vec<MidiMessage>,
}

impl HandshakeDriver {
    pub fn new(synth: Arc<dyn Synth>) -> Result<Self, String> {
        let handshake = synth
            .handshake_load()
            .ok_or_else(|| format!("{} does not support handshake loading", synth.name()))?;
        let state = handshake
            .create_state()
            .ok_or_else(|| format!("{} could not create a handshake state", synth.name()))?;
        Ok(Self {
            state,
            accumulated: Vec::new(),
            outbound: Vec::new(),
        })
    }
}

impl Driver for HandshakeDriver {
    fn begin(&mut self) -> Vec<MidiMessage> {
        self.accumulated.clear();
        self.state.start()
    }

    fn on_message(&mut self, message: &MidiMessage) -> DriverEvent {
        let mut answer = Vec::new();
        let accepted = self.state.next_message(message, &mut answer);
        if accepted {
            self.accumulated.push(message.clone());
        }

        if self.state.is_finished() {
            // The closing acknowledgement still has to reach the device
            self.outbound = answer;
            return if self.state.was_successful() {
                DriverEvent::Complete(std::mem::take(&mut self.accumulated))
            } else {
                DriverEvent::Aborted("handshake finished unsuccessfully".to_string())
            };
        }

        if !answer.is_empty() {
            DriverEvent::NeedsReply(answer)
        } else if accepted {
            DriverEvent::Accepted
        } else {
            DriverEvent::Ignored
        }
    }

    fn progress(&self) -> Progress {
        Progress::Fraction(self.state.progress().clamp(0.0, 1.0))
    }

    fn take_outbound(&mut self) -> Vec<MidiMessage> {
        std::mem::take(&mut self.outbound)
    }
}
