use std::sync::Arc;

use patchwell_types::{BankNumber, MidiMessage};

use super::{Driver, DriverEvent, Progress};
use crate::synth::Synth;

/// One request, many replies until the device says the bank is through.
/// The request itself is resent by the retry supervisor until the first
/// reply shows up.
pub struct BankDumpDriver {
    synth: Arc<dyn Synth>,
    bank: BankNumber,
    accumulated: Vec<MidiMessage>,
}

impl BankDumpDriver {
    pub fn new(synth: Arc<dyn Synth>, bank: BankNumber) -> Result<Self, String> {
        if synth.bank_dump().is_none() {
            return Err(format!("{} does not support bank dumps", synth.name()));
        }
        Ok(Self {
            synth,
            bank,
            accumulated: Vec::new(),
        })
    }
}

impl Driver for BankDumpDriver {
    fn begin(&mut self) -> Vec<MidiMessage> {
        self.accumulated.clear();
        match self.synth.bank_dump() {
            Some(dump) => dump.request_bank_dump(self.bank),
            None => Vec::new(),
        }
    }

    fn on_message(&mut self, message: &MidiMessage) -> DriverEvent {
        let synth = Arc::clone(&self.synth);
        let Some(dump) = synth.bank_dump() else {
            return DriverEvent::Aborted("bank dump capability disappeared".to_string());
        };
        if !dump.is_bank_dump(message) {
            return DriverEvent::Ignored;
        }
        self.accumulated.push(message.clone());
        if dump.is_bank_dump_finished(&self.accumulated) {
            DriverEvent::Complete(std::mem::take(&mut self.accumulated))
        } else {
            DriverEvent::Accepted
        }
    }

    fn progress(&self) -> Progress {
        Progress::ratio(self.accumulated.len(), self.synth.patches_per_bank(self.bank))
    }
}
