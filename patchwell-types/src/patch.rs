//! Decoded patches and the records the librarian hands to callers.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::program::{BankNumber, ProgramNumber};
use crate::provenance::Provenance;

/// A patch as produced by a synth's decode step, before tagging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub name: Option<String>,
    pub data: Vec<u8>,
    /// Position the device reported inside the dump, if any.
    pub program: Option<ProgramNumber>,
}

impl Patch {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            name: None,
            data,
            program: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_program(mut self, program: ProgramNumber) -> Self {
        self.program = Some(program);
        self
    }
}

/// User's favorite decision. `Unknown` until someone says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Favorite {
    #[default]
    Unknown,
    No,
    Yes,
}

impl Favorite {
    /// Decode the stored integer form (-1, 0, 1). Anything else is `Unknown`.
    pub fn from_stored(value: i32) -> Self {
        match value {
            0 => Favorite::No,
            1 => Favorite::Yes,
            _ => Favorite::Unknown,
        }
    }

    pub fn to_stored(self) -> i32 {
        match self {
            Favorite::Unknown => -1,
            Favorite::No => 0,
            Favorite::Yes => 1,
        }
    }
}

/// A patch tagged with its synth, place and provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRecord {
    synth_name: String,
    name: Option<String>,
    data: Vec<u8>,
    bank: Option<BankNumber>,
    program: Option<ProgramNumber>,
    provenance: Option<Provenance>,
    content_hash: String,
    pub favorite: Favorite,
    pub hidden: bool,
    pub categories: BTreeSet<String>,
}

impl PatchRecord {
    /// Build a record. `relevant_data` is the synth-filtered part of the
    /// payload that identifies the sound (names and other cosmetic bytes
    /// stripped); the content hash is taken over it.
    pub fn new(
        synth_name: impl Into<String>,
        patch: Patch,
        relevant_data: &[u8],
        provenance: Option<Provenance>,
    ) -> Self {
        Self {
            synth_name: synth_name.into(),
            name: patch.name,
            bank: patch.program.and_then(|p| p.bank),
            program: patch.program,
            data: patch.data,
            provenance,
            content_hash: content_hash(relevant_data),
            favorite: Favorite::Unknown,
            hidden: false,
            categories: BTreeSet::new(),
        }
    }

    /// Record whose hash covers the full payload.
    pub fn unfiltered(synth_name: impl Into<String>, patch: Patch, provenance: Option<Provenance>) -> Self {
        let data = patch.data.clone();
        Self::new(synth_name, patch, &data, provenance)
    }

    pub fn synth_name(&self) -> &str {
        &self.synth_name
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn bank(&self) -> Option<BankNumber> {
        self.bank
    }

    pub fn program(&self) -> Option<ProgramNumber> {
        self.program
    }

    pub fn provenance(&self) -> Option<&Provenance> {
        self.provenance.as_ref()
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn set_bank(&mut self, bank: BankNumber) {
        self.bank = Some(bank);
    }

    pub fn set_program(&mut self, program: ProgramNumber) {
        self.program = Some(program);
    }

    pub fn set_provenance(&mut self, provenance: Option<Provenance>) {
        self.provenance = provenance;
    }

    pub fn is_favorite(&self) -> bool {
        self.favorite == Favorite::Yes
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.contains(category)
    }

    pub fn set_category(&mut self, category: &str, has_it: bool) {
        if has_it {
            self.categories.insert(category.to_string());
        } else {
            self.categories.remove(category);
        }
    }
}

fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}
