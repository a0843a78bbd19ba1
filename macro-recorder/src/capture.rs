use std::sync::mpsc::RecvTimeoutError;
use std::time::Instant;

use tracing::{debug, info};

use crate::config::CaptureConfig;
use crate::input::{InputEventKind, InputFilter, InputSource};
use crate::labels::{key_to_label, normalize_label};
use crate::Result;

/// Block until the user presses and releases a chord, or until the timeout.
///
/// Every distinct key pressed is appended in order. The first release after
/// `min_keys` distinct keys are down ends the capture. Returns the
/// normalized labels, or `None` if too few keys were pressed in time.
///
/// Stop the [`HotkeyManager`](crate::HotkeyManager) first so both listeners
/// do not compete for the same input.
pub fn capture_chord(
    source: &dyn InputSource,
    config: &CaptureConfig,
) -> Result<Option<Vec<String>>> {
    let subscription = source.subscribe(InputFilter::Keyboard)?;
    let deadline = Instant::now() + config.timeout;
    let mut chord: Vec<String> = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!("Chord capture timed out");
            break;
        }

        match subscription.recv_timeout(remaining) {
            Ok(event) => match event.kind {
                InputEventKind::KeyPress(key) => {
                    let label = normalize_label(&key_to_label(&key));
                    if !chord.contains(&label) {
                        debug!(key = %label, "Captured key");
                        chord.push(label);
                    }
                }
                InputEventKind::KeyRelease(_) if chord.len() >= config.min_keys => break,
                _ => {}
            },
            Err(RecvTimeoutError::Timeout) => {
                debug!("Chord capture timed out");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    subscription.close();

    if chord.len() >= config.min_keys {
        info!(chord = %chord.join("+"), "Chord captured");
        Ok(Some(chord))
    } else {
        Ok(None)
    }
}
