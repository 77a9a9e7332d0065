use std::sync::Arc;

use patchwell_types::{BankNumber, MidiMessage};

use super::{Driver, DriverEvent, Progress};
use crate::synth::Synth;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyMode {
    /// `request_patch(n)` per program.
    ProgramDump,
    /// Program change, then an edit buffer request, per program.
    EditBuffer,
    /// A single edit buffer request, no program change.
    CurrentEditBuffer,
}

/// Request-one-item-at-a-time loop over a bank's absolute program range.
pub struct LegacyLoopDriver {
    synth: Arc<dyn Synth>,
    mode: LegacyMode,
    start: usize,
    end: usize,
    current: usize,
    item: Vec<MidiMessage>,
    accumulated: Vec<MidiMessage>,
}

impl LegacyLoopDriver {
    /// Loop over every program of `bank`. Prefers program dumps over the
    /// edit buffer when a device offers both.
    pub fn bank(synth: Arc<dyn Synth>, bank: BankNumber) -> Result<Self, String> {
        let mode = if synth.program_dump().is_some() {
            LegacyMode::ProgramDump
        } else if synth.edit_buffer().is_some() {
            LegacyMode::EditBuffer
        } else {
            return Err(format!(
                "{} supports neither program dumps nor edit buffer dumps",
                synth.name()
            ));
        };
        let count = synth.patches_per_bank(bank);
        let start = bank.first_program(count);
        Ok(Self::with_range(synth, mode, start, start + count))
    }

    /// Fetch whatever currently sits in the edit buffer.
    pub fn edit_buffer(synth: Arc<dyn Synth>) -> Result<Self, String> {
        if synth.edit_buffer().is_none() {
            return Err(format!("{} has no edit buffer capability", synth.name()));
        }
        Ok(Self::with_range(synth, LegacyMode::CurrentEditBuffer, 0, 1))
    }

    fn with_range(synth: Arc<dyn Synth>, mode: LegacyMode, start: usize, end: usize) -> Self {
        Self {
            synth,
            mode,
            start,
            end,
            current: start,
            item: Vec::new(),
            accumulated: Vec::new(),
        }
    }

    pub fn mode(&self) -> LegacyMode {
        self.mode
    }

    fn request(&self, program: usize) -> Vec<MidiMessage> {
        match self.mode {
            LegacyMode::ProgramDump => self
                .synth
                .program_dump()
                .map(|dump| dump.request_patch(program))
                .unwrap_or_default(),
            LegacyMode::EditBuffer => {
                let Some(edit) = self.synth.edit_buffer() else {
                    return Vec::new();
                };
                // Program change only addresses 0..=127 within the selected bank
                let in_bank = program & 0x7F;
                let mut messages = match self.synth.sends_program_change() {
                    Some(pc) => pc.program_change_messages(self.synth.channel(), in_bank),
                    None => vec![MidiMessage::program_change(self.synth.channel(), in_bank as u32)],
                };
                messages.extend(edit.request_edit_buffer_dump());
                messages
            }
            LegacyMode::CurrentEditBuffer => self
                .synth
                .edit_buffer()
                .map(|edit| edit.request_edit_buffer_dump())
                .unwrap_or_default(),
        }
    }

    /// Feed one message into the current item. `None` means not ours,
    /// `Some(false)` part of an unfinished item, `Some(true)` item complete.
    fn absorb(&mut self, message: &MidiMessage) -> Option<bool> {
        let synth = Arc::clone(&self.synth);
        match self.mode {
            LegacyMode::ProgramDump => {
                let dump = synth.program_dump()?;
                if !dump.is_message_part_of_program_dump(message) {
                    return None;
                }
                self.item.push(message.clone());
                Some(dump.is_single_program_dump(&self.item))
            }
            LegacyMode::EditBuffer | LegacyMode::CurrentEditBuffer => {
                let edit = synth.edit_buffer()?;
                if !edit.is_edit_buffer_dump(message) {
                    return None;
                }
                self.item.push(message.clone());
                if self.mode == LegacyMode::EditBuffer {
                    if let Some(store) = edit.save_edit_buffer_to_program(self.current) {
                        self.item.push(store);
                    }
                }
                Some(true)
            }
        }
    }
}

impl Driver for LegacyLoopDriver {
    fn begin(&mut self) -> Vec<MidiMessage> {
        self.current = self.start;
        self.item.clear();
        self.accumulated.clear();
        if self.is_done() {
            return Vec::new();
        }
        self.request(self.current)
    }

    fn on_message(&mut self, message: &MidiMessage) -> DriverEvent {
        match self.absorb(message) {
            None => DriverEvent::Ignored,
            Some(false) => DriverEvent::Accepted,
            Some(true) => {
                self.accumulated.append(&mut self.item);
                self.current += 1;
                if self.current >= self.end {
                    DriverEvent::Complete(std::mem::take(&mut self.accumulated))
                } else {
                    DriverEvent::AdvanceSequence(self.request(self.current))
                }
            }
        }
    }

    fn progress(&self) -> Progress {
        Progress::ratio(self.current - self.start, self.end - self.start)
    }

    fn is_done(&self) -> bool {
        self.current >= self.end
    }
}
