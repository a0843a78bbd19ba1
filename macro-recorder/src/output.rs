//! Sinks that apply replayed input to the system.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use tracing::{debug, trace};

use crate::{MacroRecorderError, Result};

/// Something that can press keys and drive the pointer
pub trait InputSink: Send + Sync {
    fn key_down(&self, key: &Key) -> Result<()>;

    fn key_up(&self, key: &Key) -> Result<()>;

    /// Move the pointer to absolute screen coordinates
    fn move_to(&self, x: i32, y: i32) -> Result<()>;

    fn button_down(&self, button: Button) -> Result<()>;

    fn button_up(&self, button: Button) -> Result<()>;

    /// Scroll by wheel notches; positive `dy` is up, positive `dx` is right
    fn scroll(&self, dx: i32, dy: i32) -> Result<()>;
}

/// One side effect requested from a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCall {
    KeyDown(Key),
    KeyUp(Key),
    MoveTo { x: i32, y: i32 },
    ButtonDown(Button),
    ButtonUp(Button),
    Scroll { dx: i32, dy: i32 },
}

/// Sink that only records what it was asked to do
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: SinkCall) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        Ok(())
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn pressed_keys(&self) -> Vec<Key> {
        self.filter(|call| match call {
            SinkCall::KeyDown(key) => Some(*key),
            _ => None,
        })
    }

    pub fn released_keys(&self) -> Vec<Key> {
        self.filter(|call| match call {
            SinkCall::KeyUp(key) => Some(*key),
            _ => None,
        })
    }

    pub fn moves(&self) -> Vec<(i32, i32)> {
        self.filter(|call| match call {
            SinkCall::MoveTo { x, y } => Some((*x, *y)),
            _ => None,
        })
    }

    /// Button presses and releases as `(button, is_press)`
    pub fn clicks(&self) -> Vec<(Button, bool)> {
        self.filter(|call| match call {
            SinkCall::ButtonDown(button) => Some((*button, true)),
            SinkCall::ButtonUp(button) => Some((*button, false)),
            _ => None,
        })
    }

    pub fn scrolls(&self) -> Vec<(i32, i32)> {
        self.filter(|call| match call {
            SinkCall::Scroll { dx, dy } => Some((*dx, *dy)),
            _ => None,
        })
    }

    pub fn clear(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn filter<T>(&self, f: impl Fn(&SinkCall) -> Option<T>) -> Vec<T> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(f)
            .collect()
    }
}

impl InputSink for RecordingSink {
    fn key_down(&self, key: &Key) -> Result<()> {
        self.push(SinkCall::KeyDown(*key))
    }

    fn key_up(&self, key: &Key) -> Result<()> {
        self.push(SinkCall::KeyUp(*key))
    }

    fn move_to(&self, x: i32, y: i32) -> Result<()> {
        self.push(SinkCall::MoveTo { x, y })
    }

    fn button_down(&self, button: Button) -> Result<()> {
        self.push(SinkCall::ButtonDown(button))
    }

    fn button_up(&self, button: Button) -> Result<()> {
        self.push(SinkCall::ButtonUp(button))
    }

    fn scroll(&self, dx: i32, dy: i32) -> Result<()> {
        self.push(SinkCall::Scroll { dx, dy })
    }
}

type SinkRequest = (SinkCall, Sender<Result<()>>);

/// Sink that drives the OS through `enigo`.
///
/// The `Enigo` handle lives on its own thread, since it is not `Send` on
/// every platform; calls are forwarded to it and answered synchronously.
pub struct EnigoSink {
    requests: Option<Sender<SinkRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl EnigoSink {
    /// Connect to the OS input system
    pub fn new() -> Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<SinkRequest>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let worker = std::thread::Builder::new()
            .name("enigo-sink".to_string())
            .spawn(move || {
                let mut enigo = match Enigo::new(&Settings::default()) {
                    Ok(enigo) => {
                        let _ = ready_tx.send(Ok(()));
                        enigo
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(MacroRecorderError::InitializationError(
                            format!("Failed to create input simulator: {}", e),
                        )));
                        return;
                    }
                };

                while let Ok((call, reply)) = request_rx.recv() {
                    trace!(?call, "Applying sink call");
                    let _ = reply.send(apply(&mut enigo, call));
                }
                debug!("enigo sink thread finished");
            })?;

        ready_rx
            .recv()
            .map_err(|_| MacroRecorderError::ChannelClosed)??;

        Ok(Self {
            requests: Some(request_tx),
            worker: Some(worker),
        })
    }

    fn call(&self, call: SinkCall) -> Result<()> {
        let requests = self
            .requests
            .as_ref()
            .ok_or(MacroRecorderError::ChannelClosed)?;
        let (reply_tx, reply_rx) = mpsc::channel();
        requests
            .send((call, reply_tx))
            .map_err(|_| MacroRecorderError::ChannelClosed)?;
        reply_rx
            .recv()
            .map_err(|_| MacroRecorderError::ChannelClosed)?
    }
}

impl Drop for EnigoSink {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl InputSink for EnigoSink {
    fn key_down(&self, key: &Key) -> Result<()> {
        self.call(SinkCall::KeyDown(*key))
    }

    fn key_up(&self, key: &Key) -> Result<()> {
        self.call(SinkCall::KeyUp(*key))
    }

    fn move_to(&self, x: i32, y: i32) -> Result<()> {
        self.call(SinkCall::MoveTo { x, y })
    }

    fn button_down(&self, button: Button) -> Result<()> {
        self.call(SinkCall::ButtonDown(button))
    }

    fn button_up(&self, button: Button) -> Result<()> {
        self.call(SinkCall::ButtonUp(button))
    }

    fn scroll(&self, dx: i32, dy: i32) -> Result<()> {
        self.call(SinkCall::Scroll { dx, dy })
    }
}

fn apply(enigo: &mut Enigo, call: SinkCall) -> Result<()> {
    let result = match call {
        SinkCall::KeyDown(key) => enigo.key(key, Direction::Press),
        SinkCall::KeyUp(key) => enigo.key(key, Direction::Release),
        SinkCall::MoveTo { x, y } => enigo.move_mouse(x, y, Coordinate::Abs),
        SinkCall::ButtonDown(button) => enigo.button(button, Direction::Press),
        SinkCall::ButtonUp(button) => enigo.button(button, Direction::Release),
        SinkCall::Scroll { dx, dy } => {
            // enigo scrolls down and right for positive lengths
            let vertical = if dy != 0 {
                enigo.scroll(-dy, Axis::Vertical)
            } else {
                Ok(())
            };
            vertical.and_then(|_| {
                if dx != 0 {
                    enigo.scroll(dx, Axis::Horizontal)
                } else {
                    Ok(())
                }
            })
        }
    };
    result.map_err(|e| MacroRecorderError::PlaybackError(format!("{:?}: {}", call, e)))
}
