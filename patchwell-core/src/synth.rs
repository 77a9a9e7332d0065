//! The device contract the engine talks to.

use std::collections::BTreeSet;

use patchwell_types::{BankNumber, MidiChannel, MidiMessage, Patch, PatchRecord};

use crate::capability::{
    BankDumpCapability, EditBufferCapability, HandshakeLoadCapability, HasBanksCapability,
    ProgramDumpCapability, SendsProgramChangeCapability, StreamLoadCapability,
};

/// A MIDI device the librarian can download patches from.
///
/// Capability accessors default to `None`; an implementation overrides the
/// ones it supports, usually with `Some(self)`.
pub trait Synth: Send + Sync {
    /// Device identity, also used to address outbound messages.
    fn name(&self) -> &str;

    fn channel(&self) -> MidiChannel {
        MidiChannel::default()
    }

    /// Turn accumulated messages into patches. Unrecognized messages are
    /// skipped, so an empty result is possible.
    fn decode(&self, messages: &[MidiMessage]) -> Vec<Patch>;

    fn friendly_bank_name(&self, bank: BankNumber) -> String {
        format!("Bank {}", bank.zero_based() + 1)
    }

    fn patches_per_bank(&self, bank: BankNumber) -> usize;

    /// Bytes that identify the sound, with names and other cosmetic data
    /// stripped. Drives duplicate detection.
    fn filter_voice_relevant_data(&self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }

    /// Whether this message was produced by (or addressed to) this device.
    fn is_own_sysex(&self, _message: &MidiMessage) -> bool {
        false
    }

    fn stream_load(&self) -> Option<&dyn StreamLoadCapability> {
        None
    }

    fn handshake_load(&self) -> Option<&dyn HandshakeLoadCapability> {
        None
    }

    fn bank_dump(&self) -> Option<&dyn BankDumpCapability> {
        None
    }

    fn edit_buffer(&self) -> Option<&dyn EditBufferCapability> {
        None
    }

    fn program_dump(&self) -> Option<&dyn ProgramDumpCapability> {
        None
    }

    fn sends_program_change(&self) -> Option<&dyn SendsProgramChangeCapability> {
        None
    }

    fn has_banks(&self) -> Option<&dyn HasBanksCapability> {
        None
    }
}

/// Pre-populates category tags on freshly tagged records.
pub trait Categorizer: Send + Sync {
    fn categorize(&self, record: &PatchRecord) -> Result<BTreeSet<String>, String>;
}
