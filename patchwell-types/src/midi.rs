//! Raw MIDI messages as they travel between the engine and a device.
//!
//! The transport hands over complete messages (one sysex dump, one program
//! change, ...). Nothing here validates vendor payloads; that is the job of
//! the synth implementation classifying them.

use serde::{Deserialize, Serialize};

const SYSEX_START: u8 = 0xF0;
const SYSEX_END: u8 = 0xF7;

/// MIDI channel, zero-based (0..=15).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct MidiChannel(u8);

impl MidiChannel {
    /// Create a channel from a zero-based number. Values above 15 are masked.
    pub fn new(zero_based: u8) -> Self {
        Self(zero_based & 0x0F)
    }

    pub fn from_one_based(one_based: u8) -> Self {
        Self::new(one_based.saturating_sub(1))
    }

    pub fn zero_based(self) -> u8 {
        self.0
    }
}

/// One complete MIDI message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MidiMessage(Vec<u8>);

impl MidiMessage {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Build a sysex message, adding the F0/F7 framing around `payload`.
    pub fn sysex(payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(payload.len() + 2);
        bytes.push(SYSEX_START);
        bytes.extend_from_slice(payload);
        bytes.push(SYSEX_END);
        Self(bytes)
    }

    /// Program change. Program numbers wrap at 128 like on the wire.
    pub fn program_change(channel: MidiChannel, program: u32) -> Self {
        Self(vec![0xC0 | channel.zero_based(), (program & 0x7F) as u8])
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_sysex(&self) -> bool {
        self.0.first() == Some(&SYSEX_START) && self.0.last() == Some(&SYSEX_END)
    }

    /// The bytes between F0 and F7, or `None` for non-sysex messages.
    pub fn sysex_data(&self) -> Option<&[u8]> {
        if self.is_sysex() && self.0.len() >= 2 {
            Some(&self.0[1..self.0.len() - 1])
        } else {
            None
        }
    }

    /// Program number if this is a program change message.
    pub fn as_program_change(&self) -> Option<(MidiChannel, u8)> {
        match self.0.as_slice() {
            [status, program, ..] if status & 0xF0 == 0xC0 => {
                Some((MidiChannel::new(status & 0x0F), *program))
            }
            _ => None,
        }
    }
}

impl From<Vec<u8>> for MidiMessage {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Split a raw byte stream (e.g. the contents of a `.syx` file) into sysex
/// messages. Bytes outside F0..F7 frames are dropped, as is a trailing frame
/// that never terminates.
pub fn split_sysex(data: &[u8]) -> Vec<MidiMessage> {
    let mut messages = Vec::new();
    let mut current: Option<Vec<u8>> = None;

    for &byte in data {
        match byte {
            SYSEX_START => {
                // A new start inside a frame means the previous one was truncated
                current = Some(vec![SYSEX_START]);
            }
            SYSEX_END => {
                if let Some(mut frame) = current.take() {
                    frame.push(SYSEX_END);
                    messages.push(MidiMessage(frame));
                }
            }
            _ => {
                if let Some(frame) = current.as_mut() {
                    frame.push(byte);
                }
            }
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_change_masks_to_seven_bits() {
        let msg = MidiMessage::program_change(MidiChannel::new(2), 130);
        assert_eq!(msg.bytes(), &[0xC2, 2]);
        assert_eq!(msg.as_program_change(), Some((MidiChannel::new(2), 2)));
    }

    #[test]
    fn test_sysex_framing() {
        let msg = MidiMessage::sysex(&[0x41, 0x10]);
        assert!(msg.is_sysex());
        assert_eq!(msg.sysex_data(), Some(&[0x41, 0x10][..]));
        assert!(MidiMessage::new(vec![0x90, 60, 100]).sysex_data().is_none());
    }

    #[test]
    fn test_split_sysex_stream() {
        let data = [0xF0, 1, 2, 0xF7, 0x00, 0xF0, 3, 0xF7, 0xF0, 4];
        let messages = split_sysex(&data);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].bytes(), &[0xF0, 1, 2, 0xF7]);
        assert_eq!(messages[1].bytes(), &[0xF0, 3, 0xF7]);
    }

    #[test]
    fn test_split_sysex_restarts_on_truncated_frame() {
        let data = [0xF0, 1, 0xF0, 2, 0xF7];
        let messages = split_sysex(&data);
        assert_eq!(messages, vec![MidiMessage::new(vec![0xF0, 2, 0xF7])]);
    }

    #[test]
    fn test_channel_one_based() {
        assert_eq!(MidiChannel::from_one_based(1).zero_based(), 0);
        assert_eq!(MidiChannel::from_one_based(0).zero_based(), 0);
        assert_eq!(MidiChannel::new(17).zero_based(), 1);
    }
}
