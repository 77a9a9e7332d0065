use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Caller-side view of a running transfer or import.
///
/// `should_abort` is polled by the engine; it is how cancellation is
/// requested. Implementations are called from MIDI and worker threads.
pub trait ProgressHandler: Send + Sync {
    fn set_progress(&self, fraction: f64);
    fn should_abort(&self) -> bool;
    fn on_success(&self);
    fn on_cancel(&self);
}

/// Lock-free handler that just remembers what happened. Enough for a CLI or
/// a headless caller that wants to cancel from another thread.
#[derive(Debug, Default)]
pub struct SharedProgress {
    fraction_bits: AtomicU64,
    abort: AtomicBool,
    succeeded: AtomicBool,
    cancelled: AtomicBool,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn fraction(&self) -> f64 {
        f64::from_bits(self.fraction_bits.load(Ordering::Relaxed))
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl ProgressHandler for SharedProgress {
    fn set_progress(&self, fraction: f64) {
        self.fraction_bits
            .store(fraction.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn should_abort(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    fn on_success(&self) {
        self.succeeded.store(true, Ordering::SeqCst);
    }

    fn on_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}
