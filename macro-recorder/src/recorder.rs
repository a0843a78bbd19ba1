use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::SystemTime;

use tracing::{debug, info, trace, warn};

use crate::events::{ClickAction, MacroEvent, MacroEventKind};
use crate::input::{
    InputEvent, InputEventKind, InputFilter, InputSource, Subscription, SubscriptionCloser,
};
use crate::labels::{
    button_to_label, chord_set, key_to_label, normalize_chord, normalize_label,
    pressed_matches_chord,
};
use crate::{Result, StatusFn};

/// Whether the recorder is currently capturing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
}

/// Everything the listener threads share while recording
struct CaptureState {
    state: RecorderState,

    /// Ignored chords as sets of normalized labels
    ignored: Vec<HashSet<String>>,

    /// Normalized labels of the keys currently held down
    pressed: HashSet<String>,

    events: Vec<MacroEvent>,

    /// Timestamp of the last recorded event
    last_time: SystemTime,
}

impl CaptureState {
    fn new() -> Self {
        Self {
            state: RecorderState::Idle,
            ignored: Vec::new(),
            pressed: HashSet::new(),
            events: Vec::new(),
            last_time: SystemTime::now(),
        }
    }

    fn reset(&mut self, ignored: Vec<HashSet<String>>) {
        self.ignored = ignored;
        self.pressed.clear();
        self.events.clear();
        self.last_time = SystemTime::now();
        self.state = RecorderState::Recording;
    }

    fn suppressed(&self) -> bool {
        pressed_matches_chord(&self.pressed, &self.ignored)
    }

    fn handle(&mut self, event: &InputEvent) {
        if self.state != RecorderState::Recording {
            return;
        }

        match &event.kind {
            InputEventKind::KeyPress(key) => {
                let label = key_to_label(key);
                self.pressed.insert(normalize_label(&label));
                if self.suppressed() {
                    trace!(key = %label, "Key press suppressed by ignored chord");
                    return;
                }
                self.push(event.time, MacroEventKind::KeyDown { key: label });
            }
            InputEventKind::KeyRelease(key) => {
                let label = key_to_label(key);
                let normalized = normalize_label(&label);
                // Suppression is decided on the pressed set before this key leaves it
                if self.suppressed() {
                    trace!(key = %label, "Key release suppressed by ignored chord");
                } else {
                    self.push(event.time, MacroEventKind::KeyUp { key: label });
                }
                self.pressed.remove(&normalized);
            }
            InputEventKind::ButtonPress { button, x, y } => {
                self.push_pointer(event.time, MacroEventKind::MouseClick {
                    x: *x,
                    y: *y,
                    button: button_to_label(button),
                    action: ClickAction::Press,
                });
            }
            InputEventKind::ButtonRelease { button, x, y } => {
                self.push_pointer(event.time, MacroEventKind::MouseClick {
                    x: *x,
                    y: *y,
                    button: button_to_label(button),
                    action: ClickAction::Release,
                });
            }
            InputEventKind::Wheel { x, y, dx, dy } => {
                self.push_pointer(event.time, MacroEventKind::MouseScroll {
                    x: *x,
                    y: *y,
                    dx: *dx,
                    dy: *dy,
                });
            }
            InputEventKind::MouseMove { x, y } => {
                self.push_pointer(event.time, MacroEventKind::MouseMove { x: *x, y: *y });
            }
        }
    }

    fn push_pointer(&mut self, time: SystemTime, kind: MacroEventKind) {
        if self.suppressed() {
            trace!(event = kind.name(), "Pointer event suppressed by ignored chord");
            return;
        }
        self.push(time, kind);
    }

    fn push(&mut self, time: SystemTime, kind: MacroEventKind) {
        let delay_ms = if self.events.is_empty() {
            0
        } else {
            time.duration_since(self.last_time)
                .map(|gap| u64::try_from(gap.as_millis()).unwrap_or(u64::MAX))
                .unwrap_or(0)
        };
        self.last_time = time;
        trace!(event = kind.name(), delay_ms, "Recorded event");
        self.events.push(MacroEvent::new(kind, delay_ms));
    }
}

struct ListenerThread {
    closer: SubscriptionCloser,
    handle: JoinHandle<()>,
}

/// Captures keyboard and pointer input into a timed event sequence.
///
/// Two listener threads (keyboard, pointer) feed one shared capture state.
/// Events completing or held under an ignored chord are left out, so the
/// hotkeys that start and stop a recording do not end up in it.
pub struct Recorder {
    source: Arc<dyn InputSource>,
    capture: Arc<Mutex<CaptureState>>,
    listeners: Vec<ListenerThread>,
    status: Option<StatusFn>,
}

impl Recorder {
    pub fn new(source: Arc<dyn InputSource>) -> Self {
        Self {
            source,
            capture: Arc::new(Mutex::new(CaptureState::new())),
            listeners: Vec::new(),
            status: None,
        }
    }

    /// Report state changes to `status` as well as the log
    pub fn with_status(mut self, status: StatusFn) -> Self {
        self.status = Some(status);
        self
    }

    pub fn state(&self) -> RecorderState {
        self.lock().state
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecorderState::Recording
    }

    /// Start recording, leaving out input that satisfies any of the
    /// `ignored_chords`. Chords with fewer than two labels are not applied.
    ///
    /// Does nothing if already recording.
    pub fn start<S: AsRef<str>>(&mut self, ignored_chords: &[Vec<S>]) -> Result<()> {
        if self.is_recording() {
            debug!("Recorder already running; start ignored");
            return Ok(());
        }

        let keyboard = self.source.subscribe(InputFilter::Keyboard)?;
        let pointer = self.source.subscribe(InputFilter::Pointer)?;

        let ignored: Vec<HashSet<String>> = ignored_chords
            .iter()
            .filter(|chord| chord.len() >= 2)
            .map(|chord| chord_set(&normalize_chord(&chord[..])))
            .collect();
        let ignored_count = ignored.len();
        self.lock().reset(ignored);

        let listeners = [("recorder-keyboard", keyboard), ("recorder-pointer", pointer)];
        for (name, subscription) in listeners {
            match self.spawn_listener(name, subscription) {
                Ok(listener) => self.listeners.push(listener),
                Err(e) => {
                    self.shutdown_listeners();
                    self.lock().state = RecorderState::Idle;
                    return Err(e);
                }
            }
        }

        info!(ignored_chords = ignored_count, "Recording started");
        self.notify("Recording started");
        Ok(())
    }

    /// Stop recording and return the captured events.
    ///
    /// Events already delivered to the listeners are still recorded before
    /// the state goes back to idle. Returns nothing if not recording.
    pub fn stop(&mut self) -> Vec<MacroEvent> {
        if !self.is_recording() {
            return Vec::new();
        }

        self.shutdown_listeners();

        let events = {
            let mut capture = self.lock();
            capture.state = RecorderState::Idle;
            capture.pressed.clear();
            std::mem::take(&mut capture.events)
        };

        info!(events = events.len(), "Recording stopped");
        self.notify(&format!("Recording stopped ({} events)", events.len()));
        events
    }

    fn spawn_listener(&self, name: &str, subscription: Subscription) -> Result<ListenerThread> {
        let closer = subscription.closer();
        let capture = Arc::clone(&self.capture);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(event) = subscription.recv() {
                    capture
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .handle(&event);
                }
            })?;
        Ok(ListenerThread { closer, handle })
    }

    fn shutdown_listeners(&mut self) {
        for listener in &self.listeners {
            listener.closer.close();
        }
        for listener in self.listeners.drain(..) {
            if listener.handle.join().is_err() {
                warn!("Recorder listener thread panicked");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.capture.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, message: &str) {
        if let Some(status) = &self.status {
            status(message);
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.shutdown_listeners();
    }
}
