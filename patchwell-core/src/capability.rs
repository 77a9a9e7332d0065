//! Capabilities a device may or may not support.
//!
//! A synth exposes each capability through an accessor on [`Synth`] that
//! returns `None` by default. [`probe`] answers "does this device support
//! X?" as a closed tagged union, so callers branch without downcasting.

use patchwell_types::{BankNumber, MidiChannel, MidiMessage, ProgramNumber};

use crate::synth::Synth;

/// Device streams a series of messages after one (or one-per-chunk) request.
pub trait StreamLoadCapability: Send + Sync {
    /// Request for stream element `index`. Index 0 starts the stream.
    fn request_stream_element(&self, index: usize) -> Vec<MidiMessage>;
    fn is_message_part_of_stream(&self, message: &MidiMessage) -> bool;
    fn is_stream_complete(&self, messages: &[MidiMessage]) -> bool;
    /// Whether the next element has to be requested explicitly now.
    fn should_stream_advance(&self, messages: &[MidiMessage]) -> bool;
    /// Number of stream messages the device announced, if it does.
    fn expected_message_count(&self, _messages: &[MidiMessage]) -> Option<usize> {
        None
    }
}

/// Per-transfer protocol state for devices that need acknowledgements.
pub trait HandshakeState: Send {
    /// Messages that open the exchange.
    fn start(&mut self) -> Vec<MidiMessage>;
    /// Consume one inbound message. Returns whether it belongs to the data
    /// being transferred, and pushes any replies into `answer`.
    fn next_message(&mut self, message: &MidiMessage, answer: &mut Vec<MidiMessage>) -> bool;
    fn is_finished(&self) -> bool;
    fn was_successful(&self) -> bool;
    fn progress(&self) -> f64;
}

pub trait HandshakeLoadCapability: Send + Sync {
    /// Fresh protocol state, or `None` when the device cannot start one.
    fn create_state(&self) -> Option<Box<dyn HandshakeState>>;
}

pub trait BankDumpCapability: Send + Sync {
    fn request_bank_dump(&self, bank: BankNumber) -> Vec<MidiMessage>;
    fn is_bank_dump(&self, message: &MidiMessage) -> bool;
    fn is_bank_dump_finished(&self, messages: &[MidiMessage]) -> bool;
}

pub trait EditBufferCapability: Send + Sync {
    fn request_edit_buffer_dump(&self) -> Vec<MidiMessage>;
    fn is_edit_buffer_dump(&self, message: &MidiMessage) -> bool;
    /// Message that stores the edit buffer into `program`, appended after a
    /// received edit buffer so saved dumps reload into any sysex tool.
    fn save_edit_buffer_to_program(&self, _program: usize) -> Option<MidiMessage> {
        None
    }
}

pub trait ProgramDumpCapability: Send + Sync {
    /// Request for absolute program number `program`.
    fn request_patch(&self, program: usize) -> Vec<MidiMessage>;
    fn is_message_part_of_program_dump(&self, message: &MidiMessage) -> bool;
    /// Whether `messages` form one complete program.
    fn is_single_program_dump(&self, messages: &[MidiMessage]) -> bool;
}

/// Device announces program changes made on its front panel.
pub trait SendsProgramChangeCapability: Send + Sync {
    fn got_program_change(&self, program: ProgramNumber);
    fn last_program_change(&self) -> Option<ProgramNumber>;
    /// Messages that select `program` on `channel`.
    fn program_change_messages(&self, channel: MidiChannel, program: usize) -> Vec<MidiMessage> {
        vec![MidiMessage::program_change(channel, program as u32)]
    }
}

pub trait HasBanksCapability: Send + Sync {
    fn number_of_banks(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    StreamLoad,
    HandshakeLoad,
    BankDump,
    EditBufferDump,
    ProgramDump,
    SendsProgramChange,
    HasBanks,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 7] = [
        CapabilityKind::StreamLoad,
        CapabilityKind::HandshakeLoad,
        CapabilityKind::BankDump,
        CapabilityKind::EditBufferDump,
        CapabilityKind::ProgramDump,
        CapabilityKind::SendsProgramChange,
        CapabilityKind::HasBanks,
    ];
}

/// Borrowed handle to one capability of a device.
#[derive(Clone, Copy)]
pub enum CapabilityRef<'a> {
    StreamLoad(&'a dyn StreamLoadCapability),
    HandshakeLoad(&'a dyn HandshakeLoadCapability),
    BankDump(&'a dyn BankDumpCapability),
    EditBufferDump(&'a dyn EditBufferCapability),
    ProgramDump(&'a dyn ProgramDumpCapability),
    SendsProgramChange(&'a dyn SendsProgramChangeCapability),
    HasBanks(&'a dyn HasBanksCapability),
}

impl CapabilityRef<'_> {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            CapabilityRef::StreamLoad(_) => CapabilityKind::StreamLoad,
            CapabilityRef::HandshakeLoad(_) => CapabilityKind::HandshakeLoad,
            CapabilityRef::BankDump(_) => CapabilityKind::BankDump,
            CapabilityRef::EditBufferDump(_) => CapabilityKind::EditBufferDump,
            CapabilityRef::ProgramDump(_) => CapabilityKind::ProgramDump,
            CapabilityRef::SendsProgramChange(_) => CapabilityKind::SendsProgramChange,
            CapabilityRef::HasBanks(_) => CapabilityKind::HasBanks,
        }
    }
}

/// Look up one capability. Absence is not an error.
pub fn probe(synth: &dyn Synth, kind: CapabilityKind) -> Option<CapabilityRef<'_>> {
    match kind {
        CapabilityKind::StreamLoad => synth.stream_load().map(CapabilityRef::StreamLoad),
        CapabilityKind::HandshakeLoad => synth.handshake_load().map(CapabilityRef::HandshakeLoad),
        CapabilityKind::BankDump => synth.bank_dump().map(CapabilityRef::BankDump),
        CapabilityKind::EditBufferDump => synth.edit_buffer().map(CapabilityRef::EditBufferDump),
        CapabilityKind::ProgramDump => synth.program_dump().map(CapabilityRef::ProgramDump),
        CapabilityKind::SendsProgramChange => synth
            .sends_program_change()
            .map(CapabilityRef::SendsProgramChange),
        CapabilityKind::HasBanks => synth.has_banks().map(CapabilityRef::HasBanks),
    }
}

pub fn supports(synth: &dyn Synth, kind: CapabilityKind) -> bool {
    probe(synth, kind).is_some()
}

/// All capabilities the device currently exposes.
pub fn capabilities(synth: &dyn Synth) -> Vec<CapabilityKind> {
    CapabilityKind::ALL
        .into_iter()
        .filter(|kind| supports(synth, *kind))
        .collect()
}
