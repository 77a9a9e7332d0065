use std::sync::Arc;

use patchwell_types::{BankNumber, MidiMessage};

use super::{Driver, DriverEvent, Progress};
use crate::synth::Synth;

/// Device streams a bank on request, possibly prompting the host to ask for
/// the next element once a chunk is through.
pub struct StreamDumpDriver {
    synth: Arc<dyn Synth>,
    bank: BankNumber,
    accumulated: Vec<MidiMessage>,
    element: usize,
}

impl StreamDumpDriver {
    pub fn new(synth: Arc<dyn Synth>, bank: BankNumber) -> Result<Self, String> {
        if synth.stream_load().is_none() {
            return Err(format!("{} does not support stream loading", synth.name()));
        }
        Ok(Self {
            synth,
            bank,
            accumulated: Vec::new(),
            element: 0,
        })
    }
}

impl Driver for StreamDumpDriver {
    fn begin(&mut self) -> Vec<MidiMessage> {
        self.accumulated.clear();
        self.element = 0;
        match self.synth.stream_load() {
            Some(stream) => stream.request_stream_element(0),
            None => Vec::new(),
        }
    }

    fn on_message(&mut self, message: &MidiMessage) -> DriverEvent {
        let synth = Arc::clone(&self.synth);
        let Some(stream) = synth.stream_load() else {
            return DriverEvent::Aborted("stream capability disappeared".to_string());
        };
        if !stream.is_message_part_of_stream(message) {
            return DriverEvent::Ignored;
        }
        self.accumulated.push(message.clone());

        if stream.is_stream_complete(&self.accumulated) {
            return DriverEvent::Complete(std::mem::take(&mut self.accumulated));
        }
        if stream.should_stream_advance(&self.accumulated) {
            self.element += 1;
            return DriverEvent::AdvanceSequence(stream.request_stream_element(self.element));
        }
        DriverEvent::Accepted
    }

    fn progress(&self) -> Progress {
        let expected = self
            .synth
            .stream_load()
            .and_then(|s| s.expected_message_count(&self.accumulated));
        match expected {
            Some(total) => Progress::ratio(self.accumulated.len(), total),
            None => Progress::ratio(self.element, self.synth.patches_per_bank(self.bank)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::StreamLoadCapability;
    use patchwell_types::Patch;

    /// Streams 5 messages; asks for the next element after the 3rd.
    struct Streamer;

    impl StreamLoadCapability for Streamer {
        fn request_stream_element(&self, index: usize) -> Vec<MidiMessage> {
            vec![MidiMessage::sysex(&[0x10, index as u8])]
        }
        fn is_message_part_of_stream(&self, message: &MidiMessage) -> bool {
            message.sysex_data().is_some_and(|d| d.first() == Some(&0x20))
        }
        fn is_stream_complete(&self, messages: &[MidiMessage]) -> bool {
            messages.len() == 5
        }
        fn should_stream_advance(&self, messages: &[MidiMessage]) -> bool {
            messages.len() == 3
        }
    }

    impl Synth for Streamer {
        fn name(&self) -> &str {
            "Streamer"
        }
        fn decode(&self, _messages: &[MidiMessage]) -> Vec<Patch> {
            Vec::new()
        }
        fn patches_per_bank(&self, _bank: BankNumber) -> usize {
            5
        }
        fn stream_load(&self) -> Option<&dyn StreamLoadCapability> {
            Some(self)
        }
    }

    #[test]
    fn test_advances_once_then_completes() {
        let mut driver = StreamDumpDriver::new(Arc::new(Streamer), BankNumber::new(0)).unwrap();
        assert_eq!(driver.begin(), vec![MidiMessage::sysex(&[0x10, 0])]);

        let member = MidiMessage::sysex(&[0x20]);
        let mut advances = Vec::new();
        for i in 1..=5 {
            match driver.on_message(&member) {
                DriverEvent::AdvanceSequence(next) => advances.push((i, next)),
                DriverEvent::Complete(all) => {
                    assert_eq!(i, 5);
                    assert_eq!(all.len(), 5);
                }
                DriverEvent::Accepted => {}
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(advances, vec![(3, vec![MidiMessage::sysex(&[0x10, 1])])]);
    }

    #[test]
    fn test_foreign_messages_are_ignored() {
        let mut driver = StreamDumpDriver::new(Arc::new(Streamer), BankNumber::new(0)).unwrap();
        driver.begin();
        assert_eq!(driver.on_message(&MidiMessage::sysex(&[0x7E])), DriverEvent::Ignored);
        assert_eq!(driver.progress(), Progress::Fraction(0.0));
    }
}
