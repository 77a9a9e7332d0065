//! Transport contract between the engine and the MIDI layer.
//!
//! `MidiTransport` is a semantic-level seam: send messages to a device and
//! observe everything that comes back. `MidiController` implements it on
//! top of real ports; `TestTransport` records traffic for unit tests.
//!
//! Observers are installed through [`ObserverGuard`], which deregisters on
//! drop so no exit path can leak a permanently firing callback.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use patchwell_types::MidiMessage;

use crate::error::TransportError;

/// Registration token for an inbound-message observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub type Observer = Box<dyn FnMut(&MidiMessage) + Send>;

pub trait MidiTransport: Send + Sync {
    /// Send `messages` to the device identified by `device`, in order.
    fn send(&self, device: &str, messages: &[MidiMessage]) -> Result<(), TransportError>;
    fn register_observer(&self, observer: Observer) -> ObserverId;
    fn deregister_observer(&self, id: ObserverId);
}

/// Ordered set of observers with in-order fan-out.
///
/// Observers may register or deregister (themselves included) from inside
/// a callback: the list lock is released before any observer runs.
///
/// Only one dispatch round runs at a time. A message dispatched while a
/// round is running (from another thread, or from inside an observer whose
/// send made the device answer synchronously) is queued and delivered by
/// the running round once the current message has reached every observer.
#[derive(Default)]
pub struct ObserverRegistry {
    next_id: AtomicU64,
    observers: Mutex<Vec<(ObserverId, Arc<Mutex<Observer>>)>>,
    delivery: Mutex<Delivery>,
    registered: AtomicUsize,
    deregistered: AtomicUsize,
}

#[derive(Default)]
struct Delivery {
    running: bool,
    queue: VecDeque<MidiMessage>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Observer) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut observers) = self.observers.lock() {
            observers.push((id, Arc::new(Mutex::new(observer))));
            self.registered.fetch_add(1, Ordering::Relaxed);
        }
        id
    }

    /// Returns false if the id was not (or no longer) registered.
    pub fn deregister(&self, id: ObserverId) -> bool {
        let Ok(mut observers) = self.observers.lock() else {
            return false;
        };
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        let removed = observers.len() != before;
        if removed {
            self.deregistered.fetch_add(1, Ordering::Relaxed);
        } else {
            log::warn!(target: "midi", "deregistering unknown observer {:?}", id);
        }
        removed
    }

    pub fn dispatch(&self, message: &MidiMessage) {
        {
            let Ok(mut delivery) = self.delivery.lock() else {
                return;
            };
            delivery.queue.push_back(message.clone());
            if delivery.running {
                return;
            }
            delivery.running = true;
        }
        loop {
            let next = match self.delivery.lock() {
                Ok(mut delivery) => {
                    let next = delivery.queue.pop_front();
                    if next.is_none() {
                        delivery.running = false;
                    }
                    next
                }
                Err(_) => return,
            };
            match next {
                Some(message) => self.deliver(&message),
                None => return,
            }
        }
    }

    fn deliver(&self, message: &MidiMessage) {
        let snapshot: Vec<_> = match self.observers.lock() {
            Ok(observers) => observers.iter().map(|(id, o)| (*id, Arc::clone(o))).collect(),
            Err(_) => return,
        };
        for (id, observer) in snapshot {
            // An earlier observer in this round may have removed this one
            if !self.is_registered(id) {
                continue;
            }
            if let Ok(mut observer) = observer.lock() {
                (observer)(message);
            }
        }
    }

    pub fn is_registered(&self, id: ObserverId) -> bool {
        self.observers
            .lock()
            .map(|observers| observers.iter().any(|(oid, _)| *oid == id))
            .unwrap_or(false)
    }

    /// Observers currently installed.
    pub fn outstanding(&self) -> usize {
        self.observers.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn total_registered(&self) -> usize {
        self.registered.load(Ordering::Relaxed)
    }

    pub fn total_deregistered(&self) -> usize {
        self.deregistered.load(Ordering::Relaxed)
    }
}

/// Installed observer; deregisters itself when dropped.
pub struct ObserverGuard {
    transport: Arc<dyn MidiTransport>,
    id: ObserverId,
}

impl ObserverGuard {
    pub fn install(transport: &Arc<dyn MidiTransport>, observer: Observer) -> Self {
        let id = transport.register_observer(observer);
        Self {
            transport: Arc::clone(transport),
            id,
        }
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.transport.deregister_observer(self.id);
    }
}

/// The only way drivers' requests reach the wire. Applies the configured
/// pause between consecutive messages.
#[derive(Clone)]
pub struct MessageSender {
    transport: Arc<dyn MidiTransport>,
    device: String,
    throttle: Duration,
}

impl MessageSender {
    pub fn new(transport: Arc<dyn MidiTransport>, device: impl Into<String>, throttle: Duration) -> Self {
        Self {
            transport,
            device: device.into(),
            throttle,
        }
    }

    pub fn send(&self, messages: &[MidiMessage]) -> Result<(), TransportError> {
        if messages.is_empty() {
            return Ok(());
        }
        if self.throttle.is_zero() {
            return self.transport.send(&self.device, messages);
        }
        for (i, message) in messages.iter().enumerate() {
            if i > 0 {
                thread::sleep(self.throttle);
            }
            self.transport.send(&self.device, std::slice::from_ref(message))?;
        }
        Ok(())
    }

    /// Fire-and-forget: log instead of failing. Used from observer
    /// callbacks, where there is nobody to return an error to.
    pub fn send_logged(&self, messages: &[MidiMessage]) {
        if let Err(e) = self.send(messages) {
            log::warn!(target: "midi", "send to {} failed: {}", self.device, e);
        }
    }
}

type Responder = Box<dyn FnMut(&str, &MidiMessage) -> Vec<MidiMessage> + Send>;

/// A transport that records all outbound traffic and queues inbound
/// messages until the test pumps them. An optional responder plays the
/// device: it sees every sent message and returns the replies to queue.
#[derive(Default)]
pub struct TestTransport {
    registry: ObserverRegistry,
    sent: Mutex<Vec<(String, MidiMessage)>>,
    inbound: Mutex<VecDeque<MidiMessage>>,
    responder: Mutex<Option<Responder>>,
}

impl TestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&str, &MidiMessage) -> Vec<MidiMessage> + Send + 'static,
    {
        let transport = Self::new();
        *transport.responder.lock().unwrap() = Some(Box::new(responder));
        transport
    }

    /// Queue a message as if the device had sent it.
    pub fn inject(&self, message: MidiMessage) {
        self.inbound.lock().unwrap().push_back(message);
    }

    /// Deliver queued messages (including replies produced while
    /// delivering) until the queue is empty. Returns how many were delivered.
    pub fn pump(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = self.inbound.lock().unwrap().pop_front();
            match next {
                Some(message) => {
                    self.registry.dispatch(&message);
                    delivered += 1;
                }
                None => return delivered,
            }
        }
    }

    pub fn sent(&self) -> Vec<MidiMessage> {
        self.sent.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn sent_to(&self, device: &str) -> Vec<MidiMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == device)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn registry(&self) -> &ObserverRegistry {
        &self.registry
    }
}

impl MidiTransport for TestTransport {
    fn send(&self, device: &str, messages: &[MidiMessage]) -> Result<(), TransportError> {
        let mut replies = Vec::new();
        {
            let mut sent = self.sent.lock().unwrap();
            let mut responder = self.responder.lock().unwrap();
            for message in messages {
                sent.push((device.to_string(), message.clone()));
                if let Some(respond) = responder.as_mut() {
                    replies.extend(respond(device, message));
                }
            }
        }
        self.inbound.lock().unwrap().extend(replies);
        Ok(())
    }

    fn register_observer(&self, observer: Observer) -> ObserverId {
        self.registry.register(observer)
    }

    fn deregister_observer(&self, id: ObserverId) {
        self.registry.deregister(id);
    }
}
