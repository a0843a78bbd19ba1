use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::config::PlayerConfig;
use crate::events::{ClickAction, Macro, MacroEvent, MacroEventKind};
use crate::labels::{button_from_label, key_from_label};
use crate::output::InputSink;
use crate::{Result, StatusFn};

/// Called once when a playback finishes every pass without being stopped
pub type CompletionFn = Arc<dyn Fn() + Send + Sync>;

struct Worker {
    handle: JoinHandle<()>,
    /// Disconnects (or yields) when the worker loop has exited
    done: Receiver<()>,
}

/// Replays macros on a dedicated worker thread.
///
/// Cancellation is cooperative: it is checked before every pass and every
/// event, but never interrupts the delay currently being slept.
pub struct Player {
    sink: Arc<dyn InputSink>,
    config: PlayerConfig,
    cancel: Arc<AtomicBool>,
    worker: Option<Worker>,
    status: Option<StatusFn>,
    on_completion: Option<CompletionFn>,
}

impl Player {
    pub fn new(sink: Arc<dyn InputSink>, config: PlayerConfig) -> Self {
        Self {
            sink,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            worker: None,
            status: None,
            on_completion: None,
        }
    }

    pub fn with_status(mut self, status: StatusFn) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_completion(mut self, on_completion: CompletionFn) -> Self {
        self.on_completion = Some(on_completion);
        self
    }

    /// Whether the worker thread is still alive
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Start replaying `recorded` for `repeats` passes (`0` repeats forever).
    ///
    /// Does nothing if a playback is already running. An empty macro
    /// completes at once, unless it is asked to repeat forever.
    pub fn play(&mut self, recorded: Arc<Macro>, repeats: u32) -> Result<()> {
        if self.is_running() {
            debug!("Playback already running; play ignored");
            return Ok(());
        }
        if recorded.is_empty() && repeats == 0 {
            debug!(name = %recorded.name, "Empty macro cannot repeat forever; play ignored");
            return Ok(());
        }
        self.reap();

        self.cancel.store(false, Ordering::SeqCst);

        let name = recorded.name.clone();
        let run = PlaybackRun {
            recorded,
            repeats,
            sink: Arc::clone(&self.sink),
            cancel: Arc::clone(&self.cancel),
        };
        let status = self.status.clone();
        let on_completion = self.on_completion.clone();
        let (done_tx, done_rx) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("macro-player".to_string())
            .spawn(move || {
                if run.run() {
                    info!("Playback completed");
                    if let Some(on_completion) = on_completion {
                        on_completion();
                    }
                    if let Some(status) = status {
                        status("Playback completed");
                    }
                }
                let _ = done_tx.send(());
            })?;
        self.worker = Some(Worker {
            handle,
            done: done_rx,
        });

        let repeats_label = if repeats == 0 {
            "infinite".to_string()
        } else {
            repeats.to_string()
        };
        info!(name = %name, repeats = %repeats_label, "Playback started");
        self.notify(&format!("Playing macro '{}' (repeats: {})", name, repeats_label));
        Ok(())
    }

    /// Request cancellation and wait up to the configured join timeout for
    /// the worker to exit. Safe to call when nothing is playing.
    pub fn stop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);

        if let Some(worker) = self.worker.take() {
            match worker.done.recv_timeout(self.config.join_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.handle.join().is_err() {
                        warn!("Playback worker panicked");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        timeout_ms = self.config.join_timeout.as_millis() as u64,
                        "Playback worker still sleeping; it will exit at the next event"
                    );
                    self.worker = Some(worker);
                }
            }
        }

        info!("Playback stopped");
        self.notify("Playback stopped");
    }

    /// Join a worker that already finished on its own
    fn reap(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.handle.join().is_err() {
                warn!("Playback worker panicked");
            }
        }
    }

    fn notify(&self, message: &str) {
        if let Some(status) = &self.status {
            status(message);
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

/// One playback, owned by the worker thread
struct PlaybackRun {
    recorded: Arc<Macro>,
    repeats: u32,
    sink: Arc<dyn InputSink>,
    cancel: Arc<AtomicBool>,
}

impl PlaybackRun {
    /// Replay every pass. Returns `true` only if playback ran to the end
    /// without being cancelled. The cancel flag is cleared on exit.
    fn run(&self) -> bool {
        let mut pass: u32 = 0;

        'passes: while self.repeats == 0 || pass < self.repeats {
            if self.cancelled() {
                break;
            }
            for event in &self.recorded.events {
                if self.cancelled() {
                    break 'passes;
                }
                if event.delay_ms > 0 {
                    std::thread::sleep(Duration::from_millis(event.delay_ms));
                }
                self.apply(event);
            }
            pass = pass.saturating_add(1);
            trace!(pass, "Playback pass finished");
        }

        !self.cancel.swap(false, Ordering::SeqCst)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn apply(&self, event: &MacroEvent) {
        if let Err(e) = self.apply_kind(&event.kind) {
            warn!(event = event.kind.name(), "Failed to replay event: {}", e);
        }
    }

    fn apply_kind(&self, kind: &MacroEventKind) -> Result<()> {
        match kind {
            MacroEventKind::KeyDown { key } => self.sink.key_down(&key_from_label(key)),
            MacroEventKind::KeyUp { key } => self.sink.key_up(&key_from_label(key)),
            MacroEventKind::MouseClick { x, y, button, action } => {
                self.sink.move_to(*x, *y)?;
                let button = button_from_label(button);
                match action {
                    ClickAction::Press => self.sink.button_down(button),
                    ClickAction::Release => self.sink.button_up(button),
                }
            }
            MacroEventKind::MouseScroll { x, y, dx, dy } => {
                self.sink.move_to(*x, *y)?;
                self.sink.scroll(*dx, *dy)
            }
            MacroEventKind::MouseMove { x, y } => self.sink.move_to(*x, *y),
        }
    }
}
