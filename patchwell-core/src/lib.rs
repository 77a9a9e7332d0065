//! # patchwell-core
//!
//! Patch transfer engine for MIDI synthesizers: pulls banks of patches off
//! a device over whatever download protocol it speaks, and turns them into
//! tagged records.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use patchwell_core::config::Config;
//! use patchwell_core::librarian::{Librarian, TransferRequest};
//! use patchwell_core::midi::MidiController;
//! use patchwell_core::progress::SharedProgress;
//! use patchwell_types::BankNumber;
//!
//! let config = Config::load();
//! let midi = Arc::new(MidiController::new(config.client_name()));
//! midi.connect_input(0)?;
//! midi.connect_output(0, synth.name())?;
//!
//! let librarian = Librarian::new(midi, &config);
//! librarian.start_download(
//!     synth,
//!     TransferRequest::banks([BankNumber::new(0), BankNumber::new(1)]),
//!     Arc::new(SharedProgress::new()),
//!     Box::new(|result| println!("{:?}", result.map(|r| r.len()))),
//! )?;
//! ```
//!
//! ## Module Overview
//!
//! - [`librarian`]: orchestrator with one active transfer, driver
//!   selection, decoding and provenance tagging, multi-bank chaining
//! - [`driver`]: stream, handshake, bank-dump and request-per-item loops
//! - [`capability`]: what a device can do, probed without downcasting
//! - [`synth`]: the device contract (`Synth`) and the `Categorizer` hook
//! - [`retry`]: retry supervisor for requests a device may drop
//! - [`transport`]: transport contract, scoped observers, throttled sender
//! - [`midi`]: `midir`-backed transport
//! - [`import`]: `.syx` file loading and bulk import
//! - [`config`]: embedded defaults plus user overrides

pub mod capability;
pub mod config;
pub mod driver;
pub mod error;
pub mod import;
pub mod librarian;
pub mod midi;
pub mod progress;
pub mod retry;
pub mod synth;
pub mod transport;

pub use error::{ImportError, StartError, TransferOutcome, TransportError};
pub use librarian::{Librarian, TransferRequest, TransferState, TransferTarget};
pub use progress::{ProgressHandler, SharedProgress};
pub use synth::{Categorizer, Synth};
