#![allow(dead_code)]
//! Test harness utilities for patchwell-core integration tests.
//!
//! Fake synths speak a toy protocol where the first sysex payload byte is
//! the opcode. Device responders plug into `TestTransport` and answer the
//! way a cooperative device would; tests drive delivery with `pump`.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};

use patchwell_core::capability::{
    BankDumpCapability, EditBufferCapability, HandshakeLoadCapability, HandshakeState,
    HasBanksCapability, SendsProgramChangeCapability, StreamLoadCapability,
};
use patchwell_core::librarian::{FinishedHandler, TransferResult};
use patchwell_core::retry::RetryPolicy;
use patchwell_core::transport::{MidiTransport, Observer, ObserverId, ObserverRegistry, TestTransport};
use patchwell_core::{Categorizer, ProgressHandler, Synth, TransportError};
use patchwell_types::{BankNumber, MidiMessage, Patch, PatchRecord, ProgramNumber};

pub const HANDSHAKE_START: u8 = 0x01;
pub const STREAM_REQUEST: u8 = 0x10;
pub const STREAM_MEMBER: u8 = 0x20;
pub const BANK_REQUEST: u8 = 0x30;
pub const BANK_PART: u8 = 0x31;
pub const HANDSHAKE_PACKET: u8 = 0x40;
pub const EDIT_REQUEST: u8 = 0x50;
pub const EDIT_DUMP: u8 = 0x51;
pub const ACK: u8 = 0x7F;

pub fn opcode(message: &MidiMessage) -> Option<u8> {
    message.sysex_data().and_then(|d| d.first().copied())
}

pub fn is_op(message: &MidiMessage, op: u8) -> bool {
    opcode(message) == Some(op)
}

/// One patch per sysex message; the payload is the patch data.
fn decode_each(messages: &[MidiMessage], op: u8) -> Vec<Patch> {
    messages
        .iter()
        .filter(|m| is_op(m, op))
        .filter_map(|m| m.sysex_data())
        .map(|d| Patch::new(d.to_vec()))
        .collect()
}

pub fn fast_policy(max_attempts: u32, retry_ms: u64) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        retry_interval: Duration::from_millis(retry_ms),
        poll_interval: Duration::from_millis(1),
        backoff_factor: 1.0,
    }
}

// ---------------------------------------------------------------------------
// Fake synths
// ---------------------------------------------------------------------------

/// Supports nothing.
pub struct InertSynth;

impl Synth for InertSynth {
    fn name(&self) -> &str {
        "Inert"
    }
    fn decode(&self, _messages: &[MidiMessage]) -> Vec<Patch> {
        Vec::new()
    }
    fn patches_per_bank(&self, _bank: BankNumber) -> usize {
        0
    }
}

/// Streams five members per bank and asks for the next element after the
/// third.
pub struct StreamSynth;

impl StreamLoadCapability for StreamSynth {
    fn request_stream_element(&self, index: usize) -> Vec<MidiMessage> {
        vec![MidiMessage::sysex(&[STREAM_REQUEST, index as u8])]
    }
    fn is_message_part_of_stream(&self, message: &MidiMessage) -> bool {
        is_op(message, STREAM_MEMBER)
    }
    fn is_stream_complete(&self, messages: &[MidiMessage]) -> bool {
        messages.len() == 5
    }
    fn should_stream_advance(&self, messages: &[MidiMessage]) -> bool {
        messages.len() == 3
    }
}

impl Synth for StreamSynth {
    fn name(&self) -> &str {
        "Streamer"
    }
    fn decode(&self, messages: &[MidiMessage]) -> Vec<Patch> {
        decode_each(messages, STREAM_MEMBER)
    }
    fn patches_per_bank(&self, _bank: BankNumber) -> usize {
        5
    }
    fn stream_load(&self) -> Option<&dyn StreamLoadCapability> {
        Some(self)
    }
}

/// Two packets, each acknowledged.
#[derive(Default)]
pub struct AckState {
    packets: usize,
}

impl HandshakeState for AckState {
    fn start(&mut self) -> Vec<MidiMessage> {
        vec![MidiMessage::sysex(&[HANDSHAKE_START])]
    }
    fn next_message(&mut self, message: &MidiMessage, answer: &mut Vec<MidiMessage>) -> bool {
        if !is_op(message, HANDSHAKE_PACKET) {
            return false;
        }
        self.packets += 1;
        answer.push(MidiMessage::sysex(&[ACK]));
        true
    }
    fn is_finished(&self) -> bool {
        self.packets == 2
    }
    fn was_successful(&self) -> bool {
        true
    }
    fn progress(&self) -> f64 {
        self.packets as f64 / 2.0
    }
}

pub struct HandshakeSynth;

impl HandshakeLoadCapability for HandshakeSynth {
    fn create_state(&self) -> Option<Box<dyn HandshakeState>> {
        Some(Box::new(AckState::default()))
    }
}

impl Synth for HandshakeSynth {
    fn name(&self) -> &str {
        "Shaker"
    }
    fn decode(&self, messages: &[MidiMessage]) -> Vec<Patch> {
        decode_each(messages, HANDSHAKE_PACKET)
    }
    fn patches_per_bank(&self, _bank: BankNumber) -> usize {
        2
    }
    fn handshake_load(&self) -> Option<&dyn HandshakeLoadCapability> {
        Some(self)
    }
}

/// Gives up after acknowledging the first packet.
#[derive(Default)]
pub struct GiveUpState {
    packets: usize,
}

impl HandshakeState for GiveUpState {
    fn start(&mut self) -> Vec<MidiMessage> {
        vec![MidiMessage::sysex(&[HANDSHAKE_START])]
    }
    fn next_message(&mut self, message: &MidiMessage, answer: &mut Vec<MidiMessage>) -> bool {
        if !is_op(message, HANDSHAKE_PACKET) {
            return false;
        }
        self.packets += 1;
        answer.push(MidiMessage::sysex(&[ACK]));
        true
    }
    fn is_finished(&self) -> bool {
        self.packets == 1
    }
    fn was_successful(&self) -> bool {
        false
    }
    fn progress(&self) -> f64 {
        0.0
    }
}

pub struct GiveUpSynth;

impl HandshakeLoadCapability for GiveUpSynth {
    fn create_state(&self) -> Option<Box<dyn HandshakeState>> {
        Some(Box::new(GiveUpState::default()))
    }
}

impl Synth for GiveUpSynth {
    fn name(&self) -> &str {
        "Quitter"
    }
    fn decode(&self, messages: &[MidiMessage]) -> Vec<Patch> {
        decode_each(messages, HANDSHAKE_PACKET)
    }
    fn patches_per_bank(&self, _bank: BankNumber) -> usize {
        2
    }
    fn handshake_load(&self) -> Option<&dyn HandshakeLoadCapability> {
        Some(self)
    }
}

/// Bank dump device with a fixed number of banks.
pub struct BankDumpSynth {
    pub banks: usize,
    pub per_bank: usize,
}

impl BankDumpCapability for BankDumpSynth {
    fn request_bank_dump(&self, bank: BankNumber) -> Vec<MidiMessage> {
        vec![MidiMessage::sysex(&[BANK_REQUEST, bank.zero_based() as u8])]
    }
    fn is_bank_dump(&self, message: &MidiMessage) -> bool {
        is_op(message, BANK_PART)
    }
    fn is_bank_dump_finished(&self, messages: &[MidiMessage]) -> bool {
        messages.len() >= self.per_bank
    }
}

impl HasBanksCapability for BankDumpSynth {
    fn number_of_banks(&self) -> usize {
        self.banks
    }
}

impl Synth for BankDumpSynth {
    fn name(&self) -> &str {
        "Dumper"
    }
    fn decode(&self, messages: &[MidiMessage]) -> Vec<Patch> {
        decode_each(messages, BANK_PART)
    }
    fn patches_per_bank(&self, _bank: BankNumber) -> usize {
        self.per_bank
    }
    fn bank_dump(&self) -> Option<&dyn BankDumpCapability> {
        Some(self)
    }
    fn has_banks(&self) -> Option<&dyn HasBanksCapability> {
        Some(self)
    }
}

/// Edit buffer only; remembers program changes it is told about.
pub struct EditBufferSynth {
    pub per_bank: usize,
    /// Decoding yields nothing, whatever arrives.
    pub undecodable: bool,
    last_program: Mutex<Option<ProgramNumber>>,
}

impl EditBufferSynth {
    pub fn new(per_bank: usize) -> Self {
        Self {
            per_bank,
            undecodable: false,
            last_program: Mutex::new(None),
        }
    }

    pub fn undecodable(per_bank: usize) -> Self {
        Self {
            undecodable: true,
            ..Self::new(per_bank)
        }
    }
}

impl EditBufferCapability for EditBufferSynth {
    fn request_edit_buffer_dump(&self) -> Vec<MidiMessage> {
        vec![MidiMessage::sysex(&[EDIT_REQUEST])]
    }
    fn is_edit_buffer_dump(&self, message: &MidiMessage) -> bool {
        is_op(message, EDIT_DUMP)
    }
}

impl SendsProgramChangeCapability for EditBufferSynth {
    fn got_program_change(&self, program: ProgramNumber) {
        *self.last_program.lock().unwrap() = Some(program);
    }
    fn last_program_change(&self) -> Option<ProgramNumber> {
        *self.last_program.lock().unwrap()
    }
}

impl Synth for EditBufferSynth {
    fn name(&self) -> &str {
        "Editor"
    }
    fn decode(&self, messages: &[MidiMessage]) -> Vec<Patch> {
        if self.undecodable {
            return Vec::new();
        }
        decode_each(messages, EDIT_DUMP)
    }
    fn patches_per_bank(&self, _bank: BankNumber) -> usize {
        self.per_bank
    }
    fn edit_buffer(&self) -> Option<&dyn EditBufferCapability> {
        Some(self)
    }
    fn sends_program_change(&self) -> Option<&dyn SendsProgramChangeCapability> {
        Some(self)
    }
}

// ---------------------------------------------------------------------------
// Fake devices
// ---------------------------------------------------------------------------

/// Answers stream requests: element 0 yields three members, element 1 two.
pub fn stream_device() -> TestTransport {
    TestTransport::with_responder(|_device, msg| match msg.sysex_data() {
        Some([STREAM_REQUEST, 0]) => (0..3).map(|i| MidiMessage::sysex(&[STREAM_MEMBER, i])).collect(),
        Some([STREAM_REQUEST, 1]) => (3..5).map(|i| MidiMessage::sysex(&[STREAM_MEMBER, i])).collect(),
        _ => Vec::new(),
    })
}

/// Sends a packet on start and after the first acknowledgement.
pub fn handshake_device() -> TestTransport {
    let mut acks = 0;
    TestTransport::with_responder(move |_device, msg| {
        if is_op(msg, HANDSHAKE_START) {
            return vec![MidiMessage::sysex(&[HANDSHAKE_PACKET, 0])];
        }
        if is_op(msg, ACK) {
            acks += 1;
            if acks == 1 {
                return vec![MidiMessage::sysex(&[HANDSHAKE_PACKET, 1])];
            }
        }
        Vec::new()
    })
}

/// Answers a bank request with `per_bank` parts tagged with bank and slot.
pub fn bank_dump_device(per_bank: u8) -> TestTransport {
    TestTransport::with_responder(move |_device, msg| match msg.sysex_data() {
        Some([BANK_REQUEST, bank]) => {
            let bank = *bank;
            (0..per_bank)
                .map(|slot| MidiMessage::sysex(&[BANK_PART, bank, slot]))
                .collect()
        }
        _ => Vec::new(),
    })
}

/// Like `bank_dump_device`, but the first `dropped` requests go unanswered.
pub fn flaky_bank_dump_device(per_bank: u8, dropped: usize) -> TestTransport {
    let mut requests = 0;
    TestTransport::with_responder(move |_device, msg| match msg.sysex_data() {
        Some([BANK_REQUEST, bank]) => {
            requests += 1;
            if requests <= dropped {
                return Vec::new();
            }
            let bank = *bank;
            (0..per_bank)
                .map(|slot| MidiMessage::sysex(&[BANK_PART, bank, slot]))
                .collect()
        }
        _ => Vec::new(),
    })
}

/// Tracks program changes and answers edit buffer requests with the
/// current program number.
pub fn edit_buffer_responder() -> impl FnMut(&str, &MidiMessage) -> Vec<MidiMessage> + Send + 'static {
    let mut current = 0u8;
    move |_device, msg| {
        if let Some((_, program)) = msg.as_program_change() {
            current = program;
            return Vec::new();
        }
        if is_op(msg, EDIT_REQUEST) {
            return vec![MidiMessage::sysex(&[EDIT_DUMP, current])];
        }
        Vec::new()
    }
}

pub fn edit_buffer_device() -> TestTransport {
    TestTransport::with_responder(edit_buffer_responder())
}

type Responder = Box<dyn FnMut(&str, &MidiMessage) -> Vec<MidiMessage> + Send>;

/// A device that answers from inside `send`, the way a software synth on
/// the same thread would. With no responder every send fails as if no
/// output were connected.
pub struct LoopbackTransport {
    registry: ObserverRegistry,
    sent: Mutex<Vec<MidiMessage>>,
    responder: Option<Mutex<Responder>>,
}

impl LoopbackTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&str, &MidiMessage) -> Vec<MidiMessage> + Send + 'static,
    {
        Self {
            registry: ObserverRegistry::new(),
            sent: Mutex::new(Vec::new()),
            responder: Some(Mutex::new(Box::new(responder))),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            registry: ObserverRegistry::new(),
            sent: Mutex::new(Vec::new()),
            responder: None,
        }
    }

    pub fn sent(&self) -> Vec<MidiMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn registry(&self) -> &ObserverRegistry {
        &self.registry
    }
}

impl MidiTransport for LoopbackTransport {
    fn send(&self, device: &str, messages: &[MidiMessage]) -> Result<(), TransportError> {
        let Some(responder) = &self.responder else {
            return Err(TransportError::NotConnected(device.to_string()));
        };
        for message in messages {
            self.sent.lock().unwrap().push(message.clone());
            let replies = (responder.lock().unwrap())(device, message);
            for reply in replies {
                self.registry.dispatch(&reply);
            }
        }
        Ok(())
    }

    fn register_observer(&self, observer: Observer) -> ObserverId {
        self.registry.register(observer)
    }

    fn deregister_observer(&self, id: ObserverId) {
        self.registry.deregister(id);
    }
}

// ---------------------------------------------------------------------------
// Progress, completion and categorizing helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingProgress {
    pub fractions: Mutex<Vec<f64>>,
    pub abort: AtomicBool,
    pub successes: AtomicUsize,
    pub cancels: AtomicUsize,
}

impl RecordingProgress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn last_fraction(&self) -> Option<f64> {
        self.fractions.lock().unwrap().last().copied()
    }
}

impl ProgressHandler for RecordingProgress {
    fn set_progress(&self, fraction: f64) {
        self.fractions.lock().unwrap().push(fraction);
    }
    fn should_abort(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
    fn on_success(&self) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }
    fn on_cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Completion handler that forwards the result to a channel.
pub fn collector() -> (FinishedHandler, Receiver<TransferResult>) {
    let (tx, rx) = unbounded();
    let handler: FinishedHandler = Box::new(move |result| {
        let _ = tx.send(result);
    });
    (handler, rx)
}

/// Pump the transport until the transfer reports, or panic on timeout.
pub fn pump_until_finished(
    transport: &TestTransport,
    results: &Receiver<TransferResult>,
    timeout: Duration,
) -> TransferResult {
    let start = Instant::now();
    loop {
        transport.pump();
        if let Ok(result) = results.try_recv() {
            return result;
        }
        if start.elapsed() > timeout {
            panic!("Timed out waiting for transfer to finish");
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Tags everything "Lead", or fails when told to.
pub struct FixedCategorizer {
    pub fail: bool,
}

impl Categorizer for FixedCategorizer {
    fn categorize(&self, _record: &PatchRecord) -> Result<BTreeSet<String>, String> {
        if self.fail {
            Err("rules not loaded".to_string())
        } else {
            Ok(BTreeSet::from(["Lead".to_string()]))
        }
    }
}
