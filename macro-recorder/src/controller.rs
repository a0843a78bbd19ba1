use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument};

use crate::capture::capture_chord;
use crate::config::{
    HotkeyConfig, MacroRecorderConfig, LOAD_MACRO, SAVE_MACRO, START_MACRO, START_RECORD,
    STOP_MACRO, STOP_RECORD,
};
use crate::events::Macro;
use crate::hotkeys::{Dispatcher, HotkeyManager};
use crate::input::InputSource;
use crate::output::InputSink;
use crate::player::Player;
use crate::recorder::Recorder;
use crate::{Result, StatusFn};

/// Name given to every freshly recorded macro
pub const RECORDED_MACRO_NAME: &str = "macro";

/// Where macros (and optionally hotkey bindings) are persisted
pub trait MacroStore: Send {
    fn save(&mut self, recorded: &Macro) -> Result<()>;

    /// Load a macro, or `None` if there is nothing to load
    fn load(&mut self) -> Result<Option<Macro>>;

    /// Persist rebound hotkeys. Stores that do not keep settings ignore this.
    fn save_hotkeys(&mut self, _hotkeys: &HotkeyConfig) -> Result<()> {
        Ok(())
    }
}

/// Headless wiring of recorder, player and hotkeys.
///
/// Hotkeys only queue action names; [`Controller::next_action`] and
/// [`Controller::run_until_exit`] pull them off the queue and run them on
/// the caller's thread.
pub struct Controller {
    source: Arc<dyn InputSource>,
    sink: Arc<dyn InputSink>,
    config: MacroRecorderConfig,
    recorder: Recorder,
    player: Player,
    hotkeys: HotkeyManager,
    current: Option<Arc<Macro>>,
    store: Option<Box<dyn MacroStore>>,
    action_tx: Sender<String>,
    actions: Receiver<String>,
}

impl Controller {
    pub fn new(
        source: Arc<dyn InputSource>,
        sink: Arc<dyn InputSink>,
        config: MacroRecorderConfig,
    ) -> Self {
        let (action_tx, actions) = mpsc::channel();
        let dispatcher = forwarding_dispatcher(action_tx.clone());

        Self {
            recorder: Recorder::new(Arc::clone(&source)),
            player: Player::new(Arc::clone(&sink), config.player.clone()),
            hotkeys: HotkeyManager::new(
                Arc::clone(&source),
                config.hotkeys.hotkeys.clone(),
                dispatcher,
            ),
            source,
            sink,
            config,
            current: None,
            store: None,
            action_tx,
            actions,
        }
    }

    /// Report recorder and player status messages to `status`
    pub fn with_status(mut self, status: StatusFn) -> Self {
        self.recorder = Recorder::new(Arc::clone(&self.source)).with_status(Arc::clone(&status));
        self.player =
            Player::new(Arc::clone(&self.sink), self.config.player.clone()).with_status(status);
        self
    }

    pub fn with_store(mut self, store: Box<dyn MacroStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// A dispatcher that queues action names for this controller
    pub fn dispatcher(&self) -> Dispatcher {
        forwarding_dispatcher(self.action_tx.clone())
    }

    /// Start listening for hotkeys
    pub fn start(&self) -> Result<()> {
        self.hotkeys.start()
    }

    pub fn hotkeys(&self) -> &HotkeyManager {
        &self.hotkeys
    }

    pub fn config(&self) -> &MacroRecorderConfig {
        &self.config
    }

    pub fn current_macro(&self) -> Option<Arc<Macro>> {
        self.current.clone()
    }

    pub fn set_current_macro(&mut self, recorded: Option<Macro>) {
        self.current = recorded.map(Arc::new);
    }

    /// Delete events from the current macro. A running playback keeps
    /// replaying the events it started with.
    pub fn delete_events(&mut self, indexes: &[usize]) -> usize {
        let Some(current) = self.current.as_mut() else {
            info!("No macro to edit");
            return 0;
        };
        let removed = Arc::make_mut(current).delete_events(indexes);
        if current.is_empty() {
            info!("All events deleted from macro");
        } else {
            info!(removed, "Deleted events from macro");
        }
        removed
    }

    pub fn set_repeats(&mut self, repeats: u32) {
        self.config.repeats = repeats;
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn is_playing(&self) -> bool {
        self.player.is_running()
    }

    /// Wait up to `timeout` for the next queued action
    pub fn next_action(&self, timeout: Duration) -> Option<String> {
        self.actions.recv_timeout(timeout).ok()
    }

    /// Run queued actions until `exit` is set, then shut everything down
    pub fn run_until_exit(&mut self, exit: &AtomicBool) {
        while !exit.load(Ordering::SeqCst) {
            if let Some(action) = self.next_action(Duration::from_millis(100)) {
                if let Err(e) = self.handle_action(&action) {
                    error!(action = %action, "Action failed: {}", e);
                }
            }
        }
        self.shutdown();
    }

    /// Run the action bound to `action`
    #[instrument(skip(self))]
    pub fn handle_action(&mut self, action: &str) -> Result<()> {
        match action {
            START_RECORD => self.start_recording(),
            STOP_RECORD => {
                self.stop_recording();
                Ok(())
            }
            START_MACRO => self.start_playback(),
            STOP_MACRO => {
                self.player.stop();
                Ok(())
            }
            SAVE_MACRO => self.save_macro(),
            LOAD_MACRO => self.load_macro(),
            other => {
                debug!(action = %other, "Ignoring unknown action");
                Ok(())
            }
        }
    }

    pub fn start_recording(&mut self) -> Result<()> {
        self.recorder.start(&self.config.hotkeys.ignored_chords())
    }

    /// Stop recording and make the result the current macro
    pub fn stop_recording(&mut self) {
        let events = self.recorder.stop();
        self.current = if events.is_empty() {
            None
        } else {
            Some(Arc::new(Macro::new(RECORDED_MACRO_NAME, events)))
        };
    }

    pub fn start_playback(&mut self) -> Result<()> {
        match &self.current {
            Some(current) if !current.is_empty() => {
                self.player.play(Arc::clone(current), self.config.repeats)
            }
            _ => {
                info!("No macro loaded");
                Ok(())
            }
        }
    }

    pub fn stop_playback(&mut self) {
        self.player.stop();
    }

    pub fn save_macro(&mut self) -> Result<()> {
        let Some(store) = self.store.as_mut() else {
            info!("No macro store configured; save ignored");
            return Ok(());
        };
        match &self.current {
            Some(current) if !current.is_empty() => {
                store.save(current)?;
                info!(name = %current.name, events = current.len(), "Macro saved");
            }
            _ => info!("No macro to save"),
        }
        Ok(())
    }

    pub fn load_macro(&mut self) -> Result<()> {
        let Some(store) = self.store.as_mut() else {
            info!("No macro store configured; load ignored");
            return Ok(());
        };
        match store.load()? {
            Some(loaded) => {
                info!(name = %loaded.name, events = loaded.len(), "Macro loaded");
                self.current = Some(Arc::new(loaded));
            }
            None => info!("No macro loaded"),
        }
        Ok(())
    }

    /// Let the user press a new chord for `action`.
    ///
    /// Hotkeys are paused while capturing and restarted afterwards, with
    /// the new binding if one was captured.
    pub fn rebind(&mut self, action: &str) -> Result<Option<Vec<String>>> {
        info!(action = %action, "Capturing hotkey");
        self.hotkeys.stop();

        let captured = match capture_chord(self.source.as_ref(), &self.config.capture) {
            Ok(captured) => captured,
            Err(e) => {
                self.hotkeys.start()?;
                return Err(e);
            }
        };

        match &captured {
            Some(chord) => {
                self.config
                    .hotkeys
                    .hotkeys
                    .insert(action.to_string(), chord.clone());
                if let Some(store) = self.store.as_mut() {
                    if let Err(e) = store.save_hotkeys(&self.config.hotkeys) {
                        error!("Failed to save hotkeys: {}", e);
                    }
                }
                self.hotkeys.update(self.config.hotkeys.hotkeys.clone())?;
                info!(action = %action, chord = %chord.join("+"), "Hotkey updated");
            }
            None => {
                info!(
                    min_keys = self.config.capture.min_keys,
                    "Hotkey ignored (not enough keys)"
                );
                self.hotkeys.start()?;
            }
        }
        Ok(captured)
    }

    /// Stop hotkeys, playback and recording
    pub fn shutdown(&mut self) {
        self.hotkeys.stop();
        if self.player.is_running() {
            self.player.stop();
        }
        if self.recorder.is_recording() {
            self.recorder.stop();
        }
    }
}

fn forwarding_dispatcher(tx: Sender<String>) -> Dispatcher {
    Arc::new(move |action: &str| {
        if tx.send(action.to_string()).is_err() {
            debug!(action = %action, "Controller gone; hotkey dropped");
        }
    })
}
