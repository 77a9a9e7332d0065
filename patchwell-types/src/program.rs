//! Bank and program addressing.

use serde::{Deserialize, Serialize};

/// Zero-based bank number on a device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BankNumber(u32);

impl BankNumber {
    pub fn new(zero_based: u32) -> Self {
        Self(zero_based)
    }

    pub fn zero_based(self) -> u32 {
        self.0
    }

    /// Absolute program number of the first slot in this bank.
    pub fn first_program(self, patches_per_bank: usize) -> usize {
        self.0 as usize * patches_per_bank
    }
}

impl std::fmt::Display for BankNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A program slot. When the bank is known, `index` is the position inside
/// that bank; otherwise it is whatever number the device reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramNumber {
    pub bank: Option<BankNumber>,
    pub index: u32,
}

impl ProgramNumber {
    pub fn new(index: u32) -> Self {
        Self { bank: None, index }
    }

    pub fn in_bank(bank: BankNumber, index: u32) -> Self {
        Self {
            bank: Some(bank),
            index,
        }
    }

    pub fn is_bank_known(&self) -> bool {
        self.bank.is_some()
    }
}

impl std::fmt::Display for ProgramNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.bank {
            Some(bank) => write!(f, "{}:{:03}", bank, self.index),
            None => write!(f, "{:03}", self.index),
        }
    }
}
