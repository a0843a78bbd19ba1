//! Owned sources of native input events.
//!
//! Components never register OS hooks themselves. They subscribe to an
//! [`InputSource`] and read events off a channel, so the same code runs
//! against the real hook ([`RdevSource`]) or against synthetic events
//! ([`ChannelSource`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use rdev::EventType;
use tracing::{debug, error, info, trace};

use crate::{MacroRecorderError, Result};

/// A native key together with the character it typed, if any
#[derive(Debug, Clone, PartialEq)]
pub struct NativeKey {
    pub key: rdev::Key,
    pub name: Option<String>,
}

impl NativeKey {
    pub fn new(key: rdev::Key, name: Option<String>) -> Self {
        Self { key, name }
    }

    /// A key that typed the given character
    pub fn char(key: rdev::Key, ch: char) -> Self {
        Self::new(key, Some(ch.to_string()))
    }

    /// A key that typed nothing (modifiers, navigation keys)
    pub fn named(key: rdev::Key) -> Self {
        Self::new(key, None)
    }
}

/// What happened in a native input event
#[derive(Debug, Clone, PartialEq)]
pub enum InputEventKind {
    KeyPress(NativeKey),
    KeyRelease(NativeKey),
    ButtonPress { button: rdev::Button, x: i32, y: i32 },
    ButtonRelease { button: rdev::Button, x: i32, y: i32 },
    Wheel { x: i32, y: i32, dx: i32, dy: i32 },
    MouseMove { x: i32, y: i32 },
}

impl InputEventKind {
    pub fn is_keyboard(&self) -> bool {
        matches!(
            self,
            InputEventKind::KeyPress(_) | InputEventKind::KeyRelease(_)
        )
    }
}

/// A native input event stamped with the time it was captured
#[derive(Debug, Clone, PartialEq)]
pub struct InputEvent {
    pub time: SystemTime,
    pub kind: InputEventKind,
}

impl InputEvent {
    pub fn new(time: SystemTime, kind: InputEventKind) -> Self {
        Self { time, kind }
    }

    /// An event stamped with the current time
    pub fn now(kind: InputEventKind) -> Self {
        Self::new(SystemTime::now(), kind)
    }
}

/// Which events a subscription receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFilter {
    Keyboard,
    Pointer,
    All,
}

impl InputFilter {
    pub fn accepts(&self, kind: &InputEventKind) -> bool {
        match self {
            InputFilter::Keyboard => kind.is_keyboard(),
            InputFilter::Pointer => !kind.is_keyboard(),
            InputFilter::All => true,
        }
    }
}

/// Anything components can subscribe to for native input events
pub trait InputSource: Send + Sync {
    /// Open a new subscription receiving the events accepted by `filter`
    fn subscribe(&self, filter: InputFilter) -> Result<Subscription>;
}

struct Subscriber {
    filter: InputFilter,
    tx: Sender<InputEvent>,
}

/// Live subscriptions of one source, keyed by subscription id
#[derive(Default)]
struct SubscriberRegistry {
    next_id: AtomicU64,
    subscribers: DashMap<u64, Subscriber>,
}

impl SubscriberRegistry {
    fn subscribe(self: &Arc<Self>, filter: InputFilter) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        self.subscribers.insert(id, Subscriber { filter, tx });
        trace!(id, ?filter, "Subscription opened");

        Subscription {
            rx,
            closer: SubscriptionCloser {
                id,
                registry: Arc::clone(self),
            },
        }
    }

    fn dispatch(&self, event: &InputEvent) {
        let mut dead = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.filter.accepts(&event.kind) && entry.tx.send(event.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.subscribers.remove(&id);
        }
    }

    fn remove(&self, id: u64) {
        if self.subscribers.remove(&id).is_some() {
            trace!(id, "Subscription closed");
        }
    }

    fn close_all(&self) {
        self.subscribers.clear();
    }

    fn len(&self) -> usize {
        self.subscribers.len()
    }
}

/// Detaches a subscription from its source from any thread
#[derive(Clone)]
pub struct SubscriptionCloser {
    id: u64,
    registry: Arc<SubscriberRegistry>,
}

impl SubscriptionCloser {
    /// Stop delivering new events. Events already queued are still received,
    /// after which the subscription reports disconnection.
    pub fn close(&self) {
        self.registry.remove(self.id);
    }
}

/// The receiving end of an input subscription
pub struct Subscription {
    rx: Receiver<InputEvent>,
    closer: SubscriptionCloser,
}

impl Subscription {
    /// Block until the next event, or `None` once closed and drained
    pub fn recv(&self) -> Option<InputEvent> {
        self.rx.recv().ok()
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// Returns `Timeout` if nothing arrived and `Disconnected` once the
    /// subscription is closed and drained.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<InputEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn close(&self) {
        self.closer.close();
    }

    /// A handle that can close this subscription after it moved to another thread
    pub fn closer(&self) -> SubscriptionCloser {
        self.closer.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.closer.close();
    }
}

/// In-process source fed by [`ChannelSource::emit`].
///
/// Used by tests and headless drivers in place of the OS hook.
#[derive(Clone, Default)]
pub struct ChannelSource {
    registry: Arc<SubscriberRegistry>,
}

impl ChannelSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event on every live subscription whose filter accepts it
    pub fn emit(&self, event: InputEvent) {
        self.registry.dispatch(&event);
    }

    pub fn emit_kind(&self, kind: InputEventKind) {
        self.emit(InputEvent::now(kind));
    }

    pub fn press(&self, key: NativeKey) {
        self.emit_kind(InputEventKind::KeyPress(key));
    }

    pub fn release(&self, key: NativeKey) {
        self.emit_kind(InputEventKind::KeyRelease(key));
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Block until at least `count` subscriptions are live or `timeout` passes.
    ///
    /// Returns whether the count was reached.
    pub fn wait_for_subscribers(&self, count: usize, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while self.subscriber_count() < count {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        true
    }
}

impl InputSource for ChannelSource {
    fn subscribe(&self, filter: InputFilter) -> Result<Subscription> {
        Ok(self.registry.subscribe(filter))
    }
}

struct RdevHub {
    registry: Arc<SubscriberRegistry>,
    failure: Arc<Mutex<Option<String>>>,
}

static RDEV_HUB: OnceLock<RdevHub> = OnceLock::new();

/// Source backed by the process-wide `rdev` hook.
///
/// The hook thread starts on the first subscription and lives for the rest
/// of the process, since `rdev::listen` cannot be unregistered.
#[derive(Debug, Clone, Copy, Default)]
pub struct RdevSource;

impl RdevSource {
    pub fn new() -> Self {
        Self
    }

    fn hub() -> &'static RdevHub {
        RDEV_HUB.get_or_init(|| {
            let registry = Arc::new(SubscriberRegistry::default());
            let failure = Arc::new(Mutex::new(None));
            let hook_registry = Arc::clone(&registry);
            let hook_failure = Arc::clone(&failure);

            match std::thread::Builder::new()
                .name("rdev-hook".to_string())
                .spawn(move || run_hook(hook_registry, hook_failure))
            {
                Ok(_) => info!("Global input hook thread started"),
                Err(e) => {
                    error!("Failed to spawn rdev hook thread: {}", e);
                    *failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(e.to_string());
                }
            }
            RdevHub { registry, failure }
        })
    }
}

impl InputSource for RdevSource {
    fn subscribe(&self, filter: InputFilter) -> Result<Subscription> {
        let hub = Self::hub();
        let failure = hub
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(reason) = failure {
            return Err(MacroRecorderError::ListenerError(reason));
        }
        Ok(hub.registry.subscribe(filter))
    }
}

fn run_hook(registry: Arc<SubscriberRegistry>, failure: Arc<Mutex<Option<String>>>) {
    let hook_registry = Arc::clone(&registry);
    let mut state = HookState::default();

    if let Err(err) = rdev::listen(move |event| {
        if let Some(converted) = state.convert(event) {
            hook_registry.dispatch(&converted);
        }
    }) {
        error!("Failed to listen for input events: {:?}", err);
        *failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(format!("{err:?}"));
        registry.close_all();
    }
    debug!("rdev hook thread finished");
}

/// What the hook remembers between rdev callbacks
#[derive(Default)]
struct HookState {
    /// Last pointer position, for button and wheel events
    last_pos: (i32, i32),

    /// Character each held key typed on press. rdev only names presses.
    typed: HashMap<rdev::Key, String>,
}

impl HookState {
    fn convert(&mut self, event: rdev::Event) -> Option<InputEvent> {
        let (x, y) = self.last_pos;
        let kind = match event.event_type {
            EventType::KeyPress(key) => {
                match &event.name {
                    Some(name) => {
                        self.typed.insert(key, name.clone());
                    }
                    None => {
                        self.typed.remove(&key);
                    }
                }
                InputEventKind::KeyPress(NativeKey::new(key, event.name))
            }
            EventType::KeyRelease(key) => {
                let typed = self.typed.remove(&key);
                InputEventKind::KeyRelease(NativeKey::new(key, event.name.or(typed)))
            }
            EventType::ButtonPress(button) => InputEventKind::ButtonPress { button, x, y },
            EventType::ButtonRelease(button) => InputEventKind::ButtonRelease { button, x, y },
            EventType::MouseMove { x, y } => {
                let pos = (x as i32, y as i32);
                self.last_pos = pos;
                InputEventKind::MouseMove { x: pos.0, y: pos.1 }
            }
            EventType::Wheel { delta_x, delta_y } => InputEventKind::Wheel {
                x,
                y,
                dx: i32::try_from(delta_x).ok()?,
                dy: i32::try_from(delta_y).ok()?,
            },
        };
        Some(InputEvent::new(event.time, kind))
    }
}
