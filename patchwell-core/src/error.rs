use std::fmt;

use patchwell_types::BankNumber;

/// Failure talking to the MIDI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No output is connected for this device identity.
    NotConnected(String),
    Send(String),
    Port(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected(device) => write!(f, "no MIDI output connected for {}", device),
            Self::Send(e) => write!(f, "MIDI send failed: {}", e),
            Self::Port(e) => write!(f, "MIDI port error: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

/// Why a transfer could not be started. Reported synchronously; no
/// observer is left installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    /// The device supports none of the download protocols.
    CapabilityAbsent { synth: String },
    /// The selected protocol could not be set up (e.g. no handshake state).
    DriverUnavailable(String),
    /// Another transfer is still running on this librarian.
    TransferActive,
    NoBanksRequested,
    BankOutOfRange { bank: BankNumber, banks: usize },
    Transport(TransportError),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapabilityAbsent { synth } => {
                write!(f, "{} does not support any way of downloading patches", synth)
            }
            Self::DriverUnavailable(reason) => write!(f, "cannot start download: {}", reason),
            Self::TransferActive => write!(f, "a transfer is already running"),
            Self::NoBanksRequested => write!(f, "no banks requested"),
            Self::BankOutOfRange { bank, banks } => {
                write!(f, "bank {} requested, device has {} banks", bank, banks)
            }
            Self::Transport(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for StartError {}

impl From<TransportError> for StartError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// Terminal non-success of a transfer, delivered through the completion
/// callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Cancelled,
    /// The retry supervisor never saw a first response. Carries its label.
    Exhausted(String),
    /// The device stopped behaving like the protocol it advertised.
    ProtocolMismatch(String),
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "transfer cancelled"),
            Self::Exhausted(label) => write!(f, "{}: device did not respond", label),
            Self::ProtocolMismatch(reason) => write!(f, "protocol mismatch: {}", reason),
        }
    }
}

impl std::error::Error for TransferOutcome {}

/// Failure loading sysex data from disk.
#[derive(Debug)]
pub enum ImportError {
    Io(std::io::Error),
    /// The file contained no complete sysex message.
    NoSysex(String),
}

impl From<std::io::Error> for ImportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::NoSysex(path) => write!(f, "no sysex data in {}", path),
        }
    }
}

impl std::error::Error for ImportError {}
