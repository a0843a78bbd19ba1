use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Action name to chord labels, e.g. `"start_record" -> ["<ctrl>", "<alt>", "r"]`
pub type HotkeyMapping = BTreeMap<String, Vec<String>>;

pub const START_RECORD: &str = "start_record";
pub const STOP_RECORD: &str = "stop_record";
pub const START_MACRO: &str = "start_macro";
pub const STOP_MACRO: &str = "stop_macro";
pub const SAVE_MACRO: &str = "save_macro";
pub const LOAD_MACRO: &str = "load_macro";

/// Global hotkey bindings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotkeyConfig {
    pub hotkeys: HotkeyMapping,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        let binding = |key: &str| vec!["<ctrl>".to_string(), "<alt>".to_string(), key.to_string()];
        let hotkeys = [
            (START_RECORD, "r"),
            (STOP_RECORD, "s"),
            (START_MACRO, "p"),
            (STOP_MACRO, "o"),
            (SAVE_MACRO, "e"),
            (LOAD_MACRO, "l"),
        ]
        .into_iter()
        .map(|(action, key)| (action.to_string(), binding(key)))
        .collect();
        Self { hotkeys }
    }
}

impl HotkeyConfig {
    /// Default bindings with `overrides` layered on top
    pub fn merged(overrides: HotkeyMapping) -> Self {
        let mut config = Self::default();
        config.hotkeys.extend(overrides);
        config
    }

    /// Parse `{"hotkeys": {...}}`, keeping defaults for actions it leaves out
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Stored {
            #[serde(default)]
            hotkeys: HotkeyMapping,
        }

        let stored: Stored = serde_json::from_str(json)?;
        Ok(Self::merged(stored.hotkeys))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Every bound chord, which the recorder leaves out of recordings
    pub fn ignored_chords(&self) -> Vec<Vec<String>> {
        self.hotkeys.values().cloned().collect()
    }
}

/// Configuration for the player
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// How long `stop` waits for the worker thread to exit
    pub join_timeout: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(1),
        }
    }
}

/// Configuration for interactive chord capture
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Distinct keys required before a release completes the capture
    pub min_keys: usize,

    /// How long to wait for the user
    pub timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            min_keys: 2,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Everything the controller needs
#[derive(Debug, Clone)]
pub struct MacroRecorderConfig {
    pub hotkeys: HotkeyConfig,

    /// Passes per playback; `0` repeats until stopped
    pub repeats: u32,

    pub player: PlayerConfig,

    pub capture: CaptureConfig,
}

impl Default for MacroRecorderConfig {
    fn default() -> Self {
        Self {
            hotkeys: HotkeyConfig::default(),
            repeats: 1,
            player: PlayerConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bindings() {
        let config = HotkeyConfig::default();
        assert_eq!(config.hotkeys.len(), 6);
        assert_eq!(config.hotkeys[START_RECORD], vec!["<ctrl>", "<alt>", "r"]);
        assert_eq!(config.hotkeys[LOAD_MACRO], vec!["<ctrl>", "<alt>", "l"]);
    }

    #[test]
    fn test_merged_keeps_missing_defaults() {
        let mut overrides = HotkeyMapping::new();
        overrides.insert(STOP_MACRO.to_string(), vec!["<f9>".into(), "<shift>".into()]);

        let config = HotkeyConfig::merged(overrides);
        assert_eq!(config.hotkeys[STOP_MACRO], vec!["<f9>", "<shift>"]);
        assert_eq!(config.hotkeys[START_MACRO], vec!["<ctrl>", "<alt>", "p"]);
    }

    #[test]
    fn test_from_json_merges_over_defaults() {
        let config =
            HotkeyConfig::from_json(r#"{"hotkeys": {"start_record": ["<cmd>", "1"]}}"#).unwrap();
        assert_eq!(config.hotkeys[START_RECORD], vec!["<cmd>", "1"]);
        assert_eq!(config.hotkeys.len(), 6);

        let empty = HotkeyConfig::from_json("{}").unwrap();
        assert_eq!(empty, HotkeyConfig::default());
    }

    #[test]
    fn test_json_round_trip_shape() {
        let json = HotkeyConfig::default().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value["hotkeys"]["save_macro"],
            serde_json::json!(["<ctrl>", "<alt>", "e"])
        );
    }

    #[test]
    fn test_ignored_chords_lists_every_binding() {
        assert_eq!(HotkeyConfig::default().ignored_chords().len(), 6);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(PlayerConfig::default().join_timeout, Duration::from_secs(1));
        let capture = CaptureConfig::default();
        assert_eq!(capture.min_keys, 2);
        assert_eq!(capture.timeout, Duration::from_secs(10));
        assert_eq!(MacroRecorderConfig::default().repeats, 1);
    }
}
