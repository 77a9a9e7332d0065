//! # patchwell-types
//!
//! Shared data model for the patchwell librarian: raw MIDI messages,
//! bank/program addressing, provenance tags, patch records and the
//! bank containers the transfer engine fills.

pub mod midi;
pub mod patch;
pub mod patch_list;
pub mod program;
pub mod provenance;
pub mod synth_bank;

pub use midi::{split_sysex, MidiChannel, MidiMessage};
pub use patch::{Favorite, Patch, PatchRecord};
pub use patch_list::PatchList;
pub use program::{BankNumber, ProgramNumber};
pub use provenance::Provenance;
pub use synth_bank::{BankError, SynthBank};
