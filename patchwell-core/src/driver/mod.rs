//! Protocol drivers: request framing and completion detection for each way
//! a device can hand over its patches.
//!
//! A driver never touches the transport. It returns the messages it wants
//! sent and the librarian sends them through its throttled sender.

mod bank_dump;
mod handshake;
mod legacy;
mod stream;

pub use bank_dump::BankDumpDriver;
pub use handshake::HandshakeDriver;
pub use legacy::{LegacyLoopDriver, LegacyMode};
pub use stream::StreamDumpDriver;

use std::sync::Arc;

use patchwell_types::{BankNumber, MidiMessage};

use crate::capability::{supports, CapabilityKind};
use crate::synth::Synth;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    StreamDump,
    HandshakeDump,
    BankDump,
    LegacyLoop,
}

/// Highest first. Self-terminating protocols win over the bank dump, which
/// needs a supervised kickoff; the request-per-item loop comes last.
pub const DRIVER_PRECEDENCE: [DriverKind; 4] = [
    DriverKind::StreamDump,
    DriverKind::HandshakeDump,
    DriverKind::BankDump,
    DriverKind::LegacyLoop,
];

impl DriverKind {
    pub fn is_supported_by(self, synth: &dyn Synth) -> bool {
        match self {
            DriverKind::StreamDump => supports(synth, CapabilityKind::StreamLoad),
            DriverKind::HandshakeDump => supports(synth, CapabilityKind::HandshakeLoad),
            DriverKind::BankDump => supports(synth, CapabilityKind::BankDump),
            DriverKind::LegacyLoop => {
                supports(synth, CapabilityKind::ProgramDump)
                    || supports(synth, CapabilityKind::EditBufferDump)
            }
        }
    }

    /// Whether the first request has to be retried until the device answers.
    pub fn needs_supervised_kickoff(self) -> bool {
        self == DriverKind::BankDump
    }
}

/// Pick exactly one driver for a bank download, or `None` when the device
/// supports no download protocol at all.
pub fn select_driver(synth: &dyn Synth) -> Option<DriverKind> {
    DRIVER_PRECEDENCE
        .into_iter()
        .find(|kind| kind.is_supported_by(synth))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    Fraction(f64),
    Unknown,
}

impl Progress {
    pub(crate) fn ratio(done: usize, total: usize) -> Self {
        if total == 0 {
            Progress::Unknown
        } else {
            Progress::Fraction((done as f64 / total as f64).clamp(0.0, 1.0))
        }
    }
}

/// Classification of one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// Not ours; excluded from accumulation.
    Ignored,
    Accepted,
    /// Accepted, and the device expects these replies.
    NeedsReply(Vec<MidiMessage>),
    /// Item finished; send this request for the next one.
    AdvanceSequence(Vec<MidiMessage>),
    /// Transfer complete; everything accumulated, in arrival order.
    Complete(Vec<MidiMessage>),
    /// The device left the protocol. Carries a reason for the log.
    Aborted(String),
}

pub trait Driver: Send {
    /// Outbound messages that open the transfer.
    fn begin(&mut self) -> Vec<MidiMessage>;
    fn on_message(&mut self, message: &MidiMessage) -> DriverEvent;
    fn progress(&self) -> Progress;
    /// Nothing (left) to fetch. A driver that is done right after `begin`
    /// sends nothing and its part finishes empty.
    fn is_done(&self) -> bool {
        false
    }
    /// Replies that must go out before a terminal event is acted upon.
    fn take_outbound(&mut self) -> Vec<MidiMessage> {
        Vec::new()
    }
}

/// What one driver instance is asked to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverTarget {
    Bank(BankNumber),
    EditBuffer,
}

/// Build the driver for `kind`. Errors when the device does not actually
/// provide what the driver needs.
pub fn create_driver(
    kind: DriverKind,
    synth: Arc<dyn Synth>,
    target: DriverTarget,
) -> Result<Box<dyn Driver>, String> {
    let bank = match target {
        DriverTarget::Bank(bank) => bank,
        DriverTarget::EditBuffer => {
            return Ok(Box::new(LegacyLoopDriver::edit_buffer(synth)?));
        }
    };
    match kind {
        DriverKind::StreamDump => Ok(Box::new(StreamDumpDriver::new(synth, bank)?)),
        DriverKind::HandshakeDump => Ok(Box::new(HandshakeDriver::new(synth)?)),
        DriverKind::BankDump => Ok(Box::new(BankDumpDriver::new(synth, bank)?)),
        DriverKind::LegacyLoop => Ok(Box::new(LegacyLoopDriver::bank(synth, bank)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{
        BankDumpCapability, EditBufferCapability, HandshakeLoadCapability, HandshakeState,
        StreamLoadCapability,
    };
    use patchwell_types::Patch;

    /// A synth whose capability set is chosen per test.
    #[derive(Default)]
    struct Caps {
        stream: bool,
        handshake: bool,
        bank: bool,
        edit: bool,
    }

    impl StreamLoadCapability for Caps {
        fn request_stream_element(&self, _index: usize) -> Vec<MidiMessage> {
            Vec::new()
        }
        fn is_message_part_of_stream(&self, _message: &MidiMessage) -> bool {
            true
        }
        fn is_stream_complete(&self, _messages: &[MidiMessage]) -> bool {
            false
        }
        fn should_stream_advance(&self, _messages: &[MidiMessage]) -> bool {
            false
        }
    }

    impl HandshakeLoadCapability for Caps {
        fn create_state(&self) -> Option<Box<dyn HandshakeState>> {
            None
        }
    }

    impl BankDumpCapability for Caps {
        fn request_bank_dump(&self, _bank: BankNumber) -> Vec<MidiMessage> {
            Vec::new()
        }
        fn is_bank_dump(&self, _message: &MidiMessage) -> bool {
            true
        }
        fn is_bank_dump_finished(&self, _messages: &[MidiMessage]) -> bool {
            true
        }
    }

    impl EditBufferCapability for Caps {
        fn request_edit_buffer_dump(&self) -> Vec<MidiMessage> {
            Vec::new()
        }
        fn is_edit_buffer_dump(&self, _message: &MidiMessage) -> bool {
            true
        }
    }

    impl Synth for Caps {
        fn name(&self) -> &str {
            "Caps"
        }
        fn decode(&self, _messages: &[MidiMessage]) -> Vec<Patch> {
            Vec::new()
        }
        fn patches_per_bank(&self, _bank: BankNumber) -> usize {
            4
        }
        fn stream_load(&self) -> Option<&dyn StreamLoadCapability> {
            self.stream.then_some(self as &dyn StreamLoadCapability)
        }
        fn handshake_load(&self) -> Option<&dyn HandshakeLoadCapability> {
            self.handshake.then_some(self as &dyn HandshakeLoadCapability)
        }
        fn bank_dump(&self) -> Option<&dyn BankDumpCapability> {
            self.bank.then_some(self as &dyn BankDumpCapability)
        }
        fn edit_buffer(&self) -> Option<&dyn EditBufferCapability> {
            self.edit.then_some(self as &dyn EditBufferCapability)
        }
    }

    #[test]
    fn test_single_capability_selects_matching_driver() {
        let cases = [
            (Caps { stream: true, ..Default::default() }, Some(DriverKind::StreamDump)),
            (Caps { handshake: true, ..Default::default() }, Some(DriverKind::HandshakeDump)),
            (Caps { bank: true, ..Default::default() }, Some(DriverKind::BankDump)),
            (Caps { edit: true, ..Default::default() }, Some(DriverKind::LegacyLoop)),
            (Caps::default(), None),
        ];
        for (synth, expected) in cases {
            assert_eq!(select_driver(&synth), expected);
        }
    }

    #[test]
    fn test_precedence_when_several_present() {
        let all = Caps { stream: true, handshake: true, bank: true, edit: true };
        assert_eq!(select_driver(&all), Some(DriverKind::StreamDump));

        let no_stream = Caps { handshake: true, bank: true, edit: true, ..Default::default() };
        assert_eq!(select_driver(&no_stream), Some(DriverKind::HandshakeDump));

        let bank_and_edit = Caps { bank: true, edit: true, ..Default::default() };
        assert_eq!(select_driver(&bank_and_edit), Some(DriverKind::BankDump));
    }

    #[test]
    fn test_only_bank_dump_needs_supervision() {
        for kind in DRIVER_PRECEDENCE {
            assert_eq!(kind.needs_supervised_kickoff(), kind == DriverKind::BankDump);
        }
    }

    #[test]
    fn test_handshake_without_state_fails_to_build() {
        let synth: Arc<dyn Synth> = Arc::new(Caps { handshake: true, ..Default::default() });
        let result = create_driver(
            DriverKind::HandshakeDump,
            synth,
            DriverTarget::Bank(BankNumber::new(0)),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_progress_ratio() {
        assert_eq!(Progress::ratio(1, 4), Progress::Fraction(0.25));
        assert_eq!(Progress::ratio(9, 4), Progress::Fraction(1.0));
        assert_eq!(Progress::ratio(1, 0), Progress::Unknown);
    }
}
