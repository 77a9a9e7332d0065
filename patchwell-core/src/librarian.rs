//! Download orchestration.
//!
//! A `Librarian` runs at most one transfer at a time. `start_download`
//! selects a protocol driver, installs a scoped observer on the transport
//! and sends the opening request (bank dumps additionally get a retry
//! supervisor). From then on everything happens on the thread that
//! delivers MIDI input: each inbound message is classified by the driver,
//! replies and follow-up requests go out through the throttled sender,
//! cancellation is polled, and a completed bank is decoded, tagged and
//! either chained to the next bank or handed to the completion callback.
//!
//! Decisions are made under the librarian's lock; sends and the completion
//! callback happen after it is released. A device that answers from inside
//! `send` therefore cannot deadlock the transfer, and the callback may
//! start the next one. The callback fires exactly once per accepted
//! transfer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::Utc;

use patchwell_types::{BankNumber, MidiMessage, PatchRecord, ProgramNumber, Provenance};

use crate::config::Config;
use crate::driver::{
    create_driver, select_driver, Driver, DriverEvent, DriverKind, DriverTarget, Progress,
};
use crate::error::{StartError, TransferOutcome, TransportError};
use crate::progress::ProgressHandler;
use crate::retry::{RetryPolicy, SupervisorError};
use crate::synth::{Categorizer, Synth};
use crate::transport::{MessageSender, MidiTransport, Observer, ObserverGuard};

pub type TransferResult = Result<Vec<PatchRecord>, TransferOutcome>;
pub type FinishedHandler = Box<dyn FnOnce(TransferResult) + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferTarget {
    /// Whole banks, downloaded in the given order.
    Banks(Vec<BankNumber>),
    /// Whatever sits in the device's edit buffer right now.
    EditBuffer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub target: TransferTarget,
}

impl TransferRequest {
    pub fn bank(bank: BankNumber) -> Self {
        Self::banks([bank])
    }

    pub fn banks(banks: impl IntoIterator<Item = BankNumber>) -> Self {
        Self {
            target: TransferTarget::Banks(banks.into_iter().collect()),
        }
    }

    pub fn edit_buffer() -> Self {
        Self {
            target: TransferTarget::EditBuffer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    #[default]
    Idle,
    AwaitingFirstResponse,
    Accumulating,
    Decoding,
    Completed,
    Cancelled,
    Failed,
}

/// Per-transfer bookkeeping. Owned by the librarian's slot; observers and
/// the retry supervisor only reach it through the slot, by id and phase.
struct TransferContext {
    id: u64,
    synth: Arc<dyn Synth>,
    transport: Arc<dyn MidiTransport>,
    sender: MessageSender,
    retry: RetryPolicy,
    progress: Arc<dyn ProgressHandler>,
    categorizer: Option<Arc<dyn Categorizer>>,
    on_finished: FinishedHandler,
    kind: DriverKind,
    targets: Vec<DriverTarget>,
    /// Index into `targets`.
    phase: usize,
    driver: Box<dyn Driver>,
    state: TransferState,
    /// Set once the current phase has seen its first reply (or is over);
    /// stops the retry supervisor.
    kickoff_done: Arc<AtomicBool>,
    records: Vec<PatchRecord>,
    observer: Option<ObserverGuard>,
}

impl TransferContext {
    fn mark_responding(&mut self) {
        if self.state == TransferState::AwaitingFirstResponse {
            self.state = TransferState::Accumulating;
            self.kickoff_done.store(true, Ordering::SeqCst);
        }
    }

    fn phase_label(&self) -> String {
        match self.targets[self.phase] {
            DriverTarget::Bank(bank) => format!(
                "{} {} dump request",
                self.synth.name(),
                self.synth.friendly_bank_name(bank)
            ),
            DriverTarget::EditBuffer => format!("{} edit buffer request", self.synth.name()),
        }
    }

    /// Overall progress across banks.
    fn overall(&self, phase_fraction: f64) -> f64 {
        (self.phase as f64 + phase_fraction) / self.targets.len() as f64
    }
}

#[derive(Default)]
struct Slot {
    active: Option<TransferContext>,
    last: TransferState,
}

fn lock_slot(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Librarian {
    transport: Arc<dyn MidiTransport>,
    retry: RetryPolicy,
    throttle: Duration,
    categorizer: Option<Arc<dyn Categorizer>>,
    slot: Arc<Mutex<Slot>>,
    next_id: AtomicU64,
}

impl Librarian {
    pub fn new(transport: Arc<dyn MidiTransport>, config: &Config) -> Self {
        Self::with_policy(transport, config.retry(), config.throttle())
    }

    pub fn with_policy(transport: Arc<dyn MidiTransport>, retry: RetryPolicy, throttle: Duration) -> Self {
        Self {
            transport,
            retry,
            throttle,
            categorizer: None,
            slot: Arc::new(Mutex::new(Slot::default())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn set_categorizer(&mut self, categorizer: Arc<dyn Categorizer>) {
        self.categorizer = Some(categorizer);
    }

    pub fn is_active(&self) -> bool {
        lock_slot(&self.slot).active.is_some()
    }

    /// State of the running transfer, or the terminal state of the last one.
    pub fn state(&self) -> TransferState {
        let slot = lock_slot(&self.slot);
        slot.active.as_ref().map(|ctx| ctx.state).unwrap_or(slot.last)
    }

    /// Begin downloading from `synth`. Returns once the opening request is
    /// out; `on_finished` reports the result later, exactly once. On `Err`
    /// nothing was started and `on_finished` is dropped uncalled.
    pub fn start_download(
        &self,
        synth: Arc<dyn Synth>,
        request: TransferRequest,
        progress: Arc<dyn ProgressHandler>,
        on_finished: FinishedHandler,
    ) -> Result<(), StartError> {
        let pending = {
            let mut slot = lock_slot(&self.slot);
            if slot.active.is_some() {
                log::error!(target: "librarian", "{}: download requested while a transfer is running", synth.name());
                return Err(StartError::TransferActive);
            }

            let (kind, targets) = plan(synth.as_ref(), &request.target)?;
            let driver = create_driver(kind, Arc::clone(&synth), targets[0])
                .map_err(StartError::DriverUnavailable)?;

            let ctx = TransferContext {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                sender: MessageSender::new(Arc::clone(&self.transport), synth.name(), self.throttle),
                synth,
                transport: Arc::clone(&self.transport),
                retry: self.retry.clone(),
                progress,
                categorizer: self.categorizer.clone(),
                on_finished,
                kind,
                targets,
                phase: 0,
                driver,
                state: TransferState::Idle,
                kickoff_done: Arc::new(AtomicBool::new(false)),
                records: Vec::new(),
                observer: None,
            };
            log::info!(
                target: "librarian",
                "{}: starting {:?} download of {} part(s)",
                ctx.synth.name(),
                kind,
                ctx.targets.len()
            );

            let mut pending = Pending::new(ctx.sender.clone());
            let ctx = slot.active.insert(ctx);
            if let Step::Finish(result) = start_phase(&self.slot, ctx, &mut pending) {
                pending.finished = take_finished(&mut slot, result);
            }
            pending
        };

        let Err(failed) = pending.flush(&self.slot) else {
            return Ok(());
        };
        if abandon(&self.slot, failed.id, failed.phase) {
            return Err(StartError::Transport(failed.error));
        }
        // The device already answered part of the opening; the transfer runs on
        log::warn!(target: "librarian", "opening request partly failed: {}", failed.error);
        Ok(())
    }

    pub fn download_edit_buffer(
        &self,
        synth: Arc<dyn Synth>,
        progress: Arc<dyn ProgressHandler>,
        on_finished: FinishedHandler,
    ) -> Result<(), StartError> {
        self.start_download(synth, TransferRequest::edit_buffer(), progress, on_finished)
    }

    /// Keep `synth`'s notion of its current program up to date while the
    /// returned guard lives. `None` if the device does not announce program
    /// changes.
    pub fn track_program_changes(&self, synth: Arc<dyn Synth>) -> Option<ObserverGuard> {
        synth.sends_program_change()?;
        let observer: Observer = Box::new(move |message| {
            let Some((channel, program)) = message.as_program_change() else {
                return;
            };
            if channel != synth.channel() {
                return;
            }
            if let Some(pc) = synth.sends_program_change() {
                pc.got_program_change(ProgramNumber::new(u32::from(program)));
            }
        });
        Some(ObserverGuard::install(&self.transport, observer))
    }
}

impl Drop for Librarian {
    fn drop(&mut self) {
        let finished = {
            let mut slot = lock_slot(&self.slot);
            if slot.active.is_none() {
                return;
            }
            log::warn!(target: "librarian", "librarian dropped with a transfer running");
            take_finished(&mut slot, Err(TransferOutcome::Cancelled))
        };
        if let Some(finished) = finished {
            finished.deliver();
        }
    }
}

/// Pick the driver and the list of parts for a request.
fn plan(
    synth: &dyn Synth,
    target: &TransferTarget,
) -> Result<(DriverKind, Vec<DriverTarget>), StartError> {
    let absent = || StartError::CapabilityAbsent {
        synth: synth.name().to_string(),
    };
    match target {
        TransferTarget::EditBuffer => {
            if synth.edit_buffer().is_none() {
                return Err(absent());
            }
            Ok((DriverKind::LegacyLoop, vec![DriverTarget::EditBuffer]))
        }
        TransferTarget::Banks(banks) => {
            let kind = select_driver(synth).ok_or_else(absent)?;
            if banks.is_empty() {
                return Err(StartError::NoBanksRequested);
            }
            if let Some(has_banks) = synth.has_banks() {
                let count = has_banks.number_of_banks();
                if let Some(&bank) = banks.iter().find(|b| b.zero_based() as usize >= count) {
                    return Err(StartError::BankOutOfRange { bank, banks: count });
                }
            }
            Ok((kind, banks.iter().map(|&b| DriverTarget::Bank(b)).collect()))
        }
    }
}

/// Open the current phase: fresh observer, fresh kickoff flag, opening
/// request queued on `pending`. A part with nothing to fetch finishes at
/// once and the transfer moves on.
fn start_phase(slot: &Arc<Mutex<Slot>>, ctx: &mut TransferContext, pending: &mut Pending) -> Step {
    // Previous phase's observer goes first; it may be the one running us
    ctx.observer = None;
    ctx.kickoff_done = Arc::new(AtomicBool::new(false));

    let request = ctx.driver.begin();
    if ctx.driver.is_done() {
        log::debug!(
            target: "librarian",
            "{}: part {}/{} is empty",
            ctx.synth.name(),
            ctx.phase + 1,
            ctx.targets.len()
        );
        return finish_phase(slot, ctx, Vec::new(), pending);
    }

    ctx.observer = Some(ObserverGuard::install(
        &ctx.transport,
        phase_observer(slot, ctx.id, ctx.phase),
    ));
    let kickoff = if ctx.kind.needs_supervised_kickoff() {
        ctx.state = TransferState::AwaitingFirstResponse;
        Some(Kickoff {
            id: ctx.id,
            phase: ctx.phase,
            label: ctx.phase_label(),
            policy: ctx.retry.clone(),
            done: Arc::clone(&ctx.kickoff_done),
            progress: Arc::clone(&ctx.progress),
        })
    } else {
        ctx.state = TransferState::Accumulating;
        None
    };
    pending.opening = Some(Opening {
        id: ctx.id,
        phase: ctx.phase,
        request,
        kickoff,
    });
    Step::Continue
}

fn phase_observer(slot: &Arc<Mutex<Slot>>, id: u64, phase: usize) -> Observer {
    let slot = Arc::downgrade(slot);
    Box::new(move |message| {
        if let Some(slot) = slot.upgrade() {
            handle_message(&slot, id, phase, message);
        }
    })
}

/// Re-send an unanswered opening request until the device responds.
///
/// Re-sends leave from the supervisor's own thread, not the one delivering
/// MIDI input. Only bank dumps are supervised and they never send replies
/// while accumulating, so the two threads never both write to the device.
fn spawn_supervisor(slot: &Arc<Mutex<Slot>>, sender: MessageSender, request: Vec<MidiMessage>, kickoff: Kickoff) {
    let slot = Arc::downgrade(slot);
    thread::spawn(move || {
        let Kickoff {
            id,
            phase,
            label,
            policy,
            done,
            progress,
        } = kickoff;
        let result = policy.run_resends(
            &label,
            || sender.send_logged(&request),
            || done.load(Ordering::SeqCst),
            || progress.should_abort(),
        );
        let outcome = match result {
            Ok(()) => return,
            Err(SupervisorError::Aborted) => TransferOutcome::Cancelled,
            Err(SupervisorError::Exhausted { label, .. }) => TransferOutcome::Exhausted(label),
        };
        if let Some(slot) = slot.upgrade() {
            fail_phase(&slot, id, phase, outcome, |state| {
                state == TransferState::AwaitingFirstResponse
            });
        }
    });
}

/// End transfer `id` with `outcome`, provided it is still in `phase` and
/// its state passes `applies`.
fn fail_phase(
    slot: &Arc<Mutex<Slot>>,
    id: u64,
    phase: usize,
    outcome: TransferOutcome,
    applies: impl Fn(TransferState) -> bool,
) {
    let finished = {
        let mut slot = lock_slot(slot);
        let current = slot
            .active
            .as_ref()
            .is_some_and(|ctx| ctx.id == id && ctx.phase == phase && applies(ctx.state));
        if !current {
            return;
        }
        take_finished(&mut slot, Err(outcome))
    };
    if let Some(finished) = finished {
        finished.deliver();
    }
}

/// Undo a start whose opening request could not be sent. The completion
/// callback is dropped uncalled. False if the transfer has moved on.
fn abandon(slot: &Arc<Mutex<Slot>>, id: u64, phase: usize) -> bool {
    let ctx = {
        let mut slot = lock_slot(slot);
        let current = slot
            .active
            .as_ref()
            .is_some_and(|ctx| ctx.id == id && ctx.phase == phase);
        if !current {
            return false;
        }
        slot.active.take()
    };
    if let Some(ctx) = ctx {
        log::warn!(target: "librarian", "{}: opening request not sent, download not started", ctx.synth.name());
        ctx.kickoff_done.store(true, Ordering::SeqCst);
    }
    true
}

enum Step {
    Continue,
    Finish(TransferResult),
}

fn handle_message(slot: &Arc<Mutex<Slot>>, id: u64, phase: usize, message: &MidiMessage) {
    let pending = {
        let mut state = lock_slot(slot);
        let Some(ctx) = state.active.as_mut() else {
            return;
        };
        if ctx.id != id || ctx.phase != phase {
            return;
        }
        let mut pending = Pending::new(ctx.sender.clone());
        if let Step::Finish(result) = step(slot, ctx, message, &mut pending) {
            pending.finished = take_finished(&mut state, result);
        }
        pending
    };
    if let Err(failed) = pending.flush(slot) {
        log::warn!(target: "librarian", "could not request next part: {}", failed.error);
        let reason = failed.error.to_string();
        fail_phase(slot, failed.id, failed.phase, TransferOutcome::ProtocolMismatch(reason), |_| true);
    }
}

fn step(
    slot: &Arc<Mutex<Slot>>,
    ctx: &mut TransferContext,
    message: &MidiMessage,
    pending: &mut Pending,
) -> Step {
    let event = ctx.driver.on_message(message);
    pending.replies.extend(ctx.driver.take_outbound());

    match event {
        DriverEvent::Ignored => {}
        DriverEvent::Accepted => ctx.mark_responding(),
        DriverEvent::NeedsReply(messages) | DriverEvent::AdvanceSequence(messages) => {
            ctx.mark_responding();
            if ctx.progress.should_abort() {
                log::info!(target: "librarian", "{}: download cancelled", ctx.synth.name());
                return Step::Finish(Err(TransferOutcome::Cancelled));
            }
            pending.replies.extend(messages);
        }
        DriverEvent::Complete(messages) => {
            ctx.mark_responding();
            return finish_phase(slot, ctx, messages, pending);
        }
        DriverEvent::Aborted(reason) => {
            log::warn!(target: "librarian", "{}: {}", ctx.synth.name(), reason);
            return Step::Finish(Err(TransferOutcome::ProtocolMismatch(reason)));
        }
    }

    if ctx.progress.should_abort() {
        log::info!(target: "librarian", "{}: download cancelled", ctx.synth.name());
        return Step::Finish(Err(TransferOutcome::Cancelled));
    }
    if let Progress::Fraction(fraction) = ctx.driver.progress() {
        ctx.progress.set_progress(ctx.overall(fraction));
    }
    Step::Continue
}

/// Decode and tag one finished part, then chain to the next or finish.
fn finish_phase(
    slot: &Arc<Mutex<Slot>>,
    ctx: &mut TransferContext,
    messages: Vec<MidiMessage>,
    pending: &mut Pending,
) -> Step {
    ctx.state = TransferState::Decoding;
    let records = tag_records(ctx, ctx.targets[ctx.phase], &messages);
    log::debug!(
        target: "librarian",
        "{}: part {}/{} gave {} patches",
        ctx.synth.name(),
        ctx.phase + 1,
        ctx.targets.len(),
        records.len()
    );
    ctx.records.extend(records);

    if ctx.phase + 1 >= ctx.targets.len() {
        let mut records = std::mem::take(&mut ctx.records);
        if ctx.targets.len() > 1 {
            wrap_bulk(&mut records);
        }
        ctx.progress.set_progress(1.0);
        return Step::Finish(Ok(records));
    }

    ctx.phase += 1;
    ctx.progress.set_progress(ctx.overall(0.0));
    if ctx.progress.should_abort() {
        return Step::Finish(Err(TransferOutcome::Cancelled));
    }
    match create_driver(ctx.kind, Arc::clone(&ctx.synth), ctx.targets[ctx.phase]) {
        Ok(driver) => ctx.driver = driver,
        Err(reason) => return Step::Finish(Err(TransferOutcome::ProtocolMismatch(reason))),
    }
    start_phase(slot, ctx, pending)
}

fn tag_records(ctx: &TransferContext, target: DriverTarget, messages: &[MidiMessage]) -> Vec<PatchRecord> {
    let synth = ctx.synth.as_ref();
    if messages.is_empty() {
        return Vec::new();
    }
    let patches = synth.decode(messages);
    if patches.is_empty() {
        log::warn!(
            target: "librarian",
            "{}: no patches decoded from {} messages",
            synth.name(),
            messages.len()
        );
    }

    let bank = match target {
        DriverTarget::Bank(bank) => Some(bank),
        DriverTarget::EditBuffer => None,
    };
    let now = Utc::now();

    patches
        .into_iter()
        .enumerate()
        .map(|(position, mut patch)| {
            match bank {
                Some(bank) => {
                    if !patch.program.is_some_and(|p| p.is_bank_known()) {
                        patch.program = Some(ProgramNumber::in_bank(bank, position as u32));
                    }
                }
                None => {
                    if patch.program.is_none() {
                        patch.program = synth
                            .sends_program_change()
                            .and_then(|pc| pc.last_program_change());
                    }
                }
            }
            let relevant = synth.filter_voice_relevant_data(&patch.data);
            let provenance = Provenance::FromSynth {
                timestamp: Some(now),
                bank,
            };
            let mut record = PatchRecord::new(synth.name(), patch, &relevant, Some(provenance));
            if let Some(categorizer) = &ctx.categorizer {
                match categorizer.categorize(&record) {
                    Ok(categories) => record.categories = categories,
                    Err(e) => log::warn!(
                        target: "librarian",
                        "{}: categorizing {} failed: {}",
                        synth.name(),
                        record.name().unwrap_or("unnamed patch"),
                        e
                    ),
                }
            }
            record
        })
        .collect()
}

/// Multi-bank results share one import event.
fn wrap_bulk(records: &mut [PatchRecord]) {
    let now = Utc::now();
    for record in records {
        let individual = record.provenance().cloned();
        record.set_provenance(Some(Provenance::bulk(now, individual)));
    }
}

/// Everything decided under the slot lock that has to happen after it is
/// released, in order: replies, the next opening request, the callback.
struct Pending {
    sender: MessageSender,
    replies: Vec<MidiMessage>,
    opening: Option<Opening>,
    finished: Option<Finished>,
}

struct Opening {
    id: u64,
    phase: usize,
    request: Vec<MidiMessage>,
    kickoff: Option<Kickoff>,
}

/// Retry supervision for an opening request the device may drop.
struct Kickoff {
    id: u64,
    phase: usize,
    label: String,
    policy: RetryPolicy,
    done: Arc<AtomicBool>,
    progress: Arc<dyn ProgressHandler>,
}

struct OpeningFailed {
    id: u64,
    phase: usize,
    error: TransportError,
}

impl Pending {
    fn new(sender: MessageSender) -> Self {
        Self {
            sender,
            replies: Vec::new(),
            opening: None,
            finished: None,
        }
    }

    /// Reply failures are only logged; a failed opening request is handed
    /// back so the caller decides how the transfer ends.
    fn flush(self, slot: &Arc<Mutex<Slot>>) -> Result<(), OpeningFailed> {
        self.sender.send_logged(&self.replies);

        let mut result = Ok(());
        if let Some(opening) = self.opening {
            match self.sender.send(&opening.request) {
                Ok(()) => {
                    if let Some(kickoff) = opening.kickoff {
                        spawn_supervisor(slot, self.sender.clone(), opening.request, kickoff);
                    }
                }
                Err(error) => {
                    result = Err(OpeningFailed {
                        id: opening.id,
                        phase: opening.phase,
                        error,
                    })
                }
            }
        }

        if let Some(finished) = self.finished {
            finished.deliver();
        }
        result
    }
}

struct Finished {
    on_finished: FinishedHandler,
    progress: Arc<dyn ProgressHandler>,
    result: TransferResult,
}

impl Finished {
    fn deliver(self) {
        if self.result.is_ok() {
            self.progress.on_success();
        } else {
            self.progress.on_cancel();
        }
        (self.on_finished)(self.result);
    }
}

/// Retire the active transfer. Drops its observer and stops its supervisor.
fn take_finished(slot: &mut Slot, result: TransferResult) -> Option<Finished> {
    let ctx = slot.active.take()?;
    ctx.kickoff_done.store(true, Ordering::SeqCst);

    slot.last = match &result {
        Ok(records) => {
            log::info!(target: "librarian", "{}: download complete, {} patches", ctx.synth.name(), records.len());
            TransferState::Completed
        }
        Err(TransferOutcome::Cancelled) => {
            log::info!(target: "librarian", "{}: download cancelled", ctx.synth.name());
            TransferState::Cancelled
        }
        Err(e) => {
            log::warn!(target: "librarian", "{}: download failed: {}", ctx.synth.name(), e);
            TransferState::Failed
        }
    };

    let TransferContext {
        on_finished,
        progress,
        observer,
        ..
    } = ctx;
    drop(observer);
    Some(Finished {
        on_finished,
        progress,
        result,
    })
}
