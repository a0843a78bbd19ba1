//! Global chord hotkeys.
//!
//! [`HotkeyManager`] keeps one chord listener alive for the current
//! action-to-chord mapping and swaps it wholesale whenever the mapping
//! changes.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use tracing::{debug, info, trace, warn};

use crate::config::HotkeyMapping;
use crate::input::{InputEventKind, InputFilter, InputSource, SubscriptionCloser};
use crate::labels::{format_chord, is_legal_chord, key_to_label, normalize_chord, normalize_label};
use crate::Result;

/// Receives the action name bound to a chord when that chord fires.
///
/// Runs on the listener thread; hand long work off elsewhere.
pub type Dispatcher = Arc<dyn Fn(&str) + Send + Sync>;

type Thunk = Arc<dyn Fn() + Send + Sync>;

/// Formatted chord strings mapped to the thunk each one fires
#[derive(Clone, Default)]
pub struct ChordTable {
    entries: BTreeMap<String, ChordEntry>,
}

#[derive(Clone)]
struct ChordEntry {
    keys: HashSet<String>,
    thunk: Thunk,
}

impl ChordTable {
    /// Build the table for `mapping`.
    ///
    /// Bindings shorter than two labels, or that do not form a legal chord
    /// once normalized, are left out.
    pub fn build(mapping: &HotkeyMapping, dispatcher: &Dispatcher) -> Self {
        let mut entries = BTreeMap::new();

        for (action, chord) in mapping {
            if chord.len() < 2 {
                debug!(action = %action, "Skipping hotkey with fewer than two keys");
                continue;
            }
            let normalized = normalize_chord(&chord[..]);
            let formatted = format_chord(&normalized);
            if !is_legal_chord(&formatted) {
                debug!(action = %action, chord = %formatted, "Skipping illegal hotkey chord");
                continue;
            }

            let action = action.clone();
            let dispatcher = Arc::clone(dispatcher);
            let thunk: Thunk = Arc::new(move || dispatcher(&action));
            entries.insert(
                formatted,
                ChordEntry {
                    keys: normalized.into_iter().collect(),
                    thunk,
                },
            );
        }

        Self { entries }
    }

    pub fn chords(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fire the thunk bound to `chord`. Returns whether one was bound.
    #[cfg(test)]
    fn fire(&self, chord: &str) -> bool {
        match self.entries.get(chord) {
            Some(entry) => {
                (entry.thunk)();
                true
            }
            None => false,
        }
    }
}

/// Per-binding press state, fired once each time the whole chord is held
struct ChordMatcher {
    chord: String,
    keys: HashSet<String>,
    held: HashSet<String>,
    thunk: Thunk,
}

impl ChordMatcher {
    fn press(&mut self, label: &str) -> bool {
        if self.keys.contains(label) && self.held.insert(label.to_string()) {
            return self.held.len() == self.keys.len();
        }
        false
    }

    fn release(&mut self, label: &str) {
        self.held.remove(label);
    }
}

struct ChordListener {
    closer: SubscriptionCloser,
    handle: Option<JoinHandle<()>>,
}

impl ChordListener {
    fn spawn(source: &dyn InputSource, table: &ChordTable) -> Result<Self> {
        let subscription = source.subscribe(InputFilter::Keyboard)?;
        let closer = subscription.closer();
        let mut matchers: Vec<ChordMatcher> = table
            .entries
            .iter()
            .map(|(chord, entry)| ChordMatcher {
                chord: chord.clone(),
                keys: entry.keys.clone(),
                held: HashSet::new(),
                thunk: Arc::clone(&entry.thunk),
            })
            .collect();

        let handle = std::thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                while let Some(event) = subscription.recv() {
                    match &event.kind {
                        InputEventKind::KeyPress(key) => {
                            let label = normalize_label(&key_to_label(key));
                            let fired: Vec<Thunk> = matchers
                                .iter_mut()
                                .filter_map(|m| {
                                    m.press(&label).then(|| {
                                        debug!(chord = %m.chord, "Hotkey fired");
                                        Arc::clone(&m.thunk)
                                    })
                                })
                                .collect();
                            for thunk in fired {
                                thunk();
                            }
                        }
                        InputEventKind::KeyRelease(key) => {
                            let label = normalize_label(&key_to_label(key));
                            for matcher in &mut matchers {
                                matcher.release(&label);
                            }
                        }
                        _ => {}
                    }
                }
                trace!("Hotkey listener thread finished");
            })?;

        Ok(Self {
            closer,
            handle: Some(handle),
        })
    }

    fn stop(mut self) {
        self.closer.close();
        if let Some(handle) = self.handle.take() {
            // A dispatcher may rebind from the listener thread itself
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Hotkey listener thread panicked");
            }
        }
    }
}

struct ManagerState {
    mapping: HotkeyMapping,
    table: ChordTable,
    listener: Option<ChordListener>,
}

/// Owns the global chord listener for an action-to-chord mapping.
///
/// `start`, `stop` and `update` all run under one lock, so the old listener
/// is always gone before a new one subscribes.
pub struct HotkeyManager {
    source: Arc<dyn InputSource>,
    dispatcher: Dispatcher,
    state: Mutex<ManagerState>,
}

impl HotkeyManager {
    pub fn new(
        source: Arc<dyn InputSource>,
        mapping: HotkeyMapping,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            source,
            dispatcher,
            state: Mutex::new(ManagerState {
                mapping,
                table: ChordTable::default(),
                listener: None,
            }),
        }
    }

    /// (Re)start listening for the current mapping
    pub fn start(&self) -> Result<()> {
        let mut state = self.lock();
        self.restart(&mut state)
    }

    /// Stop listening. Does nothing if no listener is active.
    pub fn stop(&self) {
        let mut state = self.lock();
        if let Some(listener) = state.listener.take() {
            listener.stop();
            info!("Hotkey listener stopped");
        }
        state.table = ChordTable::default();
    }

    /// Replace the mapping and restart the listener for it
    pub fn update(&self, mapping: HotkeyMapping) -> Result<()> {
        let mut state = self.lock();
        state.mapping = mapping;
        self.restart(&mut state)
    }

    pub fn mapping(&self) -> HotkeyMapping {
        self.lock().mapping.clone()
    }

    /// Formatted chords the active listener responds to
    pub fn active_chords(&self) -> Vec<String> {
        self.lock().table.chords()
    }

    pub fn is_listening(&self) -> bool {
        self.lock().listener.is_some()
    }

    fn restart(&self, state: &mut ManagerState) -> Result<()> {
        if let Some(listener) = state.listener.take() {
            listener.stop();
        }

        state.table = ChordTable::build(&state.mapping, &self.dispatcher);
        if state.table.is_empty() {
            info!("No valid hotkeys bound; listener not started");
            return Ok(());
        }

        match ChordListener::spawn(self.source.as_ref(), &state.table) {
            Ok(listener) => {
                state.listener = Some(listener);
                info!(chords = state.table.len(), "Hotkey listener started");
                Ok(())
            }
            Err(e) => {
                state.table = ChordTable::default();
                Err(e)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for HotkeyManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{ChannelSource, NativeKey};
    use std::sync::mpsc::{self, Receiver};
    use std::sync::{OnceLock, Weak};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);
    const QUIET: Duration = Duration::from_millis(150);

    fn mapping(entries: Vec<(&str, Vec<&str>)>) -> HotkeyMapping {
        entries
            .into_iter()
            .map(|(action, chord)| {
                (
                    action.to_string(),
                    chord.into_iter().map(str::to_string).collect(),
                )
            })
            .collect()
    }

    fn channel_dispatcher() -> (Dispatcher, Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let dispatcher: Dispatcher = Arc::new(move |action: &str| {
            let _ = tx.lock().unwrap().send(action.to_string());
        });
        (dispatcher, rx)
    }

    fn ctrl() -> NativeKey {
        NativeKey::named(rdev::Key::ControlLeft)
    }

    fn letter(key: rdev::Key, ch: char) -> NativeKey {
        NativeKey::char(key, ch)
    }

    #[test]
    fn test_table_keeps_only_legal_bindings() {
        let (dispatcher, rx) = channel_dispatcher();
        let table = ChordTable::build(
            &mapping(vec![
                ("start", vec!["<ctrl>", "r"]),
                ("bad", vec!["x"]),
                ("invalid", vec!["<bad>", "xx"]),
            ]),
            &dispatcher,
        );

        assert_eq!(table.chords(), vec!["<ctrl>+r".to_string()]);
        assert!(table.fire("<ctrl>+r"));
        assert_eq!(rx.try_recv().unwrap(), "start");
        assert!(!table.fire("x"));
    }

    #[test]
    fn test_each_thunk_dispatches_its_own_action() {
        let (dispatcher, rx) = channel_dispatcher();
        let table = ChordTable::build(
            &mapping(vec![
                ("first", vec!["<ctrl>", "1"]),
                ("second", vec!["<ctrl>", "2"]),
                ("third", vec!["<ctrl>", "3"]),
            ]),
            &dispatcher,
        );

        table.fire("<ctrl>+2");
        table.fire("<ctrl>+1");
        table.fire("<ctrl>+3");

        let fired: Vec<String> = rx.try_iter().collect();
        assert_eq!(fired, vec!["second", "first", "third"]);
    }

    #[test]
    fn test_table_normalizes_bindings() {
        let (dispatcher, _rx) = channel_dispatcher();
        let table = ChordTable::build(
            &mapping(vec![("go", vec!["<CTRL>", "<vk_65>"])]),
            &dispatcher,
        );
        assert_eq!(table.chords(), vec!["<ctrl>+a".to_string()]);
    }

    #[test]
    fn test_chord_fires_once_per_press() {
        let source = ChannelSource::new();
        let (dispatcher, rx) = channel_dispatcher();
        let manager = HotkeyManager::new(
            Arc::new(source.clone()),
            mapping(vec![("start", vec!["<ctrl>", "r"])]),
            dispatcher,
        );
        manager.start().unwrap();

        let r = letter(rdev::Key::KeyR, 'r');
        source.press(ctrl());
        source.press(r.clone());
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "start");

        // Auto-repeat while held does not fire again
        source.press(r.clone());
        assert!(rx.recv_timeout(QUIET).is_err());

        source.release(r.clone());
        source.press(r);
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "start");
    }

    #[test]
    fn test_chord_order_does_not_matter() {
        let source = ChannelSource::new();
        let (dispatcher, rx) = channel_dispatcher();
        let manager = HotkeyManager::new(
            Arc::new(source.clone()),
            mapping(vec![("go", vec!["<ctrl>", "<alt>", "r"])]),
            dispatcher,
        );
        manager.start().unwrap();

        source.press(letter(rdev::Key::KeyR, 'r'));
        source.press(NativeKey::named(rdev::Key::Alt));
        source.press(ctrl());

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "go");
    }

    #[test]
    fn test_update_swaps_listener() {
        let source = ChannelSource::new();
        let (dispatcher, rx) = channel_dispatcher();
        let manager = HotkeyManager::new(
            Arc::new(source.clone()),
            mapping(vec![("old", vec!["<ctrl>", "o"])]),
            dispatcher,
        );
        manager.start().unwrap();
        assert_eq!(source.subscriber_count(), 1);

        manager.update(mapping(vec![("new", vec!["<ctrl>", "n"])])).unwrap();
        assert_eq!(source.subscriber_count(), 1);
        assert_eq!(manager.active_chords(), vec!["<ctrl>+n".to_string()]);

        source.press(ctrl());
        source.press(letter(rdev::Key::KeyO, 'o'));
        source.press(letter(rdev::Key::KeyN, 'n'));

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "new");
        assert!(rx.recv_timeout(QUIET).is_err());
    }

    #[test]
    fn test_no_listener_without_valid_bindings() {
        let source = ChannelSource::new();
        let (dispatcher, _rx) = channel_dispatcher();
        let manager = HotkeyManager::new(
            Arc::new(source.clone()),
            mapping(vec![("short", vec!["x"])]),
            dispatcher,
        );

        manager.start().unwrap();
        assert!(!manager.is_listening());
        assert_eq!(source.subscriber_count(), 0);
        // Invalid bindings stay in the mapping for editing
        assert!(manager.mapping().contains_key("short"));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let source = ChannelSource::new();
        let (dispatcher, rx) = channel_dispatcher();
        let manager = HotkeyManager::new(
            Arc::new(source.clone()),
            mapping(vec![("start", vec!["<ctrl>", "r"])]),
            dispatcher,
        );
        manager.start().unwrap();

        manager.stop();
        manager.stop();
        assert!(!manager.is_listening());
        assert_eq!(source.subscriber_count(), 0);

        source.press(ctrl());
        source.press(letter(rdev::Key::KeyR, 'r'));
        assert!(rx.recv_timeout(QUIET).is_err());
    }

    #[test]
    fn test_restart_after_stop() {
        let source = ChannelSource::new();
        let (dispatcher, rx) = channel_dispatcher();
        let manager = HotkeyManager::new(
            Arc::new(source.clone()),
            mapping(vec![("start", vec!["<ctrl>", "r"])]),
            dispatcher,
        );

        manager.start().unwrap();
        manager.stop();
        manager.start().unwrap();
        manager.start().unwrap();
        assert_eq!(source.subscriber_count(), 1);

        source.press(ctrl());
        source.press(letter(rdev::Key::KeyR, 'r'));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "start");
    }

    #[test]
    fn test_dispatcher_can_rebind_from_listener_thread() {
        let source = ChannelSource::new();
        let (tx, rx) = mpsc::channel::<String>();
        let tx = Mutex::new(tx);
        let manager_slot: Arc<OnceLock<Weak<HotkeyManager>>> = Arc::new(OnceLock::new());
        let slot = Arc::clone(&manager_slot);

        let dispatcher: Dispatcher = Arc::new(move |action: &str| {
            if action == "rebind" {
                if let Some(manager) = slot.get().and_then(Weak::upgrade) {
                    let result = manager.update(mapping(vec![("moved", vec!["<ctrl>", "m"])]));
                    assert!(result.is_ok());
                }
            }
            let _ = tx.lock().unwrap().send(action.to_string());
        });

        let manager = Arc::new(HotkeyManager::new(
            Arc::new(source.clone()),
            mapping(vec![("rebind", vec!["<ctrl>", "r"])]),
            dispatcher,
        ));
        assert!(manager_slot.set(Arc::downgrade(&manager)).is_ok());
        manager.start().unwrap();

        source.press(ctrl());
        source.press(letter(rdev::Key::KeyR, 'r'));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "rebind");

        assert_eq!(manager.active_chords(), vec!["<ctrl>+m".to_string()]);
        assert!(manager.is_listening());
        assert!(source.wait_for_subscribers(1, WAIT));
        assert_eq!(source.subscriber_count(), 1);

        source.release(ctrl());
        source.press(ctrl());
        source.press(letter(rdev::Key::KeyM, 'm'));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "moved");

        manager.stop();
        assert_eq!(source.subscriber_count(), 0);
    }
}
