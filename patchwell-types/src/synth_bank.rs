//! A device bank: fixed number of slots, all belonging to one synth and
//! one bank number.
//!
//! Every mutation validates its input first and leaves the bank untouched
//! when rejected. Slots written after the initial population are tracked as
//! dirty until the caller clears them (typically after sending the bank back
//! to the device).

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::patch::PatchRecord;
use crate::patch_list::PatchList;
use crate::program::{BankNumber, ProgramNumber};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BankError {
    WrongSynth { expected: String, found: String },
    WrongBank { expected: BankNumber, found: Option<BankNumber> },
    PositionOutOfRange { position: usize, len: usize },
    TooManyPatches { count: usize, capacity: usize },
}

impl fmt::Display for BankError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongSynth { expected, found } => {
                write!(f, "patch for synth {} does not belong in a {} bank", found, expected)
            }
            Self::WrongBank { expected, found } => match found {
                Some(found) => write!(f, "patch for bank {} does not belong in bank {}", found, expected),
                None => write!(f, "patch without bank does not belong in bank {}", expected),
            },
            Self::PositionOutOfRange { position, len } => {
                write!(f, "position {} out of range for bank of {} patches", position, len)
            }
            Self::TooManyPatches { count, capacity } => {
                write!(f, "{} patches do not fit a bank of {} slots", count, capacity)
            }
        }
    }
}

impl std::error::Error for BankError {}

#[derive(Debug, Clone)]
pub struct SynthBank {
    list: PatchList,
    synth_name: String,
    bank: BankNumber,
    capacity: usize,
    dirty: BTreeSet<usize>,
    last_synced: Option<DateTime<Utc>>,
}

impl SynthBank {
    pub fn new(
        synth_name: impl Into<String>,
        bank: BankNumber,
        friendly_name: impl Into<String>,
        capacity: usize,
    ) -> Self {
        let synth_name = synth_name.into();
        Self {
            list: PatchList::new(Self::make_id(&synth_name, bank), friendly_name),
            synth_name,
            bank,
            capacity,
            dirty: BTreeSet::new(),
            last_synced: None,
        }
    }

    /// Stable id of a bank: `"<synth>-bank-<n>"`.
    pub fn make_id(synth_name: &str, bank: BankNumber) -> String {
        format!("{}-bank-{}", synth_name, bank.zero_based())
    }

    pub fn id(&self) -> &str {
        self.list.id()
    }

    pub fn name(&self) -> &str {
        self.list.name()
    }

    pub fn synth_name(&self) -> &str {
        &self.synth_name
    }

    pub fn bank(&self) -> BankNumber {
        self.bank
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn patches(&self) -> &[PatchRecord] {
        self.list.patches()
    }

    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.last_synced
    }

    /// The bank now matches the device: forget pending edits and remember
    /// when that was.
    pub fn mark_synced(&mut self, when: DateTime<Utc>) {
        self.dirty.clear();
        self.last_synced = Some(when);
    }

    /// Replace all slots. Each record is renumbered to its slot and moved
    /// into this bank; records of a different synth are rejected.
    pub fn set_patches(&mut self, mut patches: Vec<PatchRecord>) -> Result<(), BankError> {
        if patches.len() > self.capacity {
            return self.reject(BankError::TooManyPatches {
                count: patches.len(),
                capacity: self.capacity,
            });
        }
        for patch in &patches {
            self.check_synth(patch)?;
        }
        for (slot, patch) in patches.iter_mut().enumerate() {
            patch.set_bank(self.bank);
            patch.set_program(ProgramNumber::in_bank(self.bank, slot as u32));
        }
        for patch in &patches {
            self.validate(patch)?;
        }
        self.list.set_patches(patches);
        Ok(())
    }

    /// Append one record. It must already be addressed to this bank.
    pub fn add_patch(&mut self, patch: PatchRecord) -> Result<(), BankError> {
        if self.list.len() >= self.capacity {
            return self.reject(BankError::TooManyPatches {
                count: self.list.len() + 1,
                capacity: self.capacity,
            });
        }
        self.validate(&patch)?;
        self.list.add_patch(patch);
        Ok(())
    }

    /// Replace a single slot. Dropping a patch onto an identical one is a
    /// no-op and returns `Ok(false)`.
    pub fn change_patch_at_position(
        &mut self,
        position: usize,
        patch: PatchRecord,
    ) -> Result<bool, BankError> {
        let len = self.list.len();
        if position >= len {
            return self.reject(BankError::PositionOutOfRange { position, len });
        }
        self.check_synth(&patch)?;
        if self.list.patches()[position].content_hash() == patch.content_hash() {
            return Ok(false);
        }

        let mut current = self.list.patches().to_vec();
        current[position] = patch;
        self.set_patches(current)?;
        self.dirty.insert(position);
        Ok(true)
    }

    /// Copy as many records from `source` as fit, starting at `start`.
    /// Records of another synth are skipped (and logged) without taking a
    /// slot. Returns how many slots were written.
    pub fn copy_list_to_position(
        &mut self,
        start: usize,
        source: &[PatchRecord],
    ) -> Result<usize, BankError> {
        let len = self.list.len();
        if start >= len {
            return self.reject(BankError::PositionOutOfRange { position: start, len });
        }

        let mut current = self.list.patches().to_vec();
        let mut written = Vec::new();
        let mut write_pos = start;
        for record in source {
            if write_pos >= len {
                break;
            }
            if record.synth_name() != self.synth_name {
                log::warn!(
                    target: "bank",
                    "skipping {} patch while copying into {}",
                    record.synth_name(),
                    self.id()
                );
                continue;
            }
            current[write_pos] = record.clone();
            written.push(write_pos);
            write_pos += 1;
        }

        self.set_patches(current)?;
        self.dirty.extend(written.iter().copied());
        Ok(written.len())
    }

    pub fn is_position_dirty(&self, position: usize) -> bool {
        self.dirty.contains(&position)
    }

    pub fn dirty_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.dirty.iter().copied()
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    fn check_synth(&self, patch: &PatchRecord) -> Result<(), BankError> {
        if patch.synth_name() != self.synth_name {
            return self.reject(BankError::WrongSynth {
                expected: self.synth_name.clone(),
                found: patch.synth_name().to_string(),
            });
        }
        Ok(())
    }

    fn validate(&self, patch: &PatchRecord) -> Result<(), BankError> {
        self.check_synth(patch)?;
        if patch.bank() != Some(self.bank) {
            return self.reject(BankError::WrongBank {
                expected: self.bank,
                found: patch.bank(),
            });
        }
        if let Some(program_bank) = patch.program().and_then(|p| p.bank) {
            if program_bank != self.bank {
                return self.reject(BankError::WrongBank {
                    expected: self.bank,
                    found: Some(program_bank),
                });
            }
        }
        Ok(())
    }

    fn reject<T>(&self, err: BankError) -> Result<T, BankError> {
        log::error!(target: "bank", "{}: rejected change: {}", self.id(), err);
        Err(err)
    }
}
