use serde::{Deserialize, Serialize};

/// Whether a mouse button went down or came back up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClickAction {
    Press,
    Release,
}

/// The kind of a macro event together with the fields that kind carries.
///
/// Serializes adjacently tagged, so a key press becomes
/// `{"event_type": "key_down", "payload": {"key": "a"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload", rename_all = "snake_case")]
pub enum MacroEventKind {
    /// A key went down
    KeyDown { key: String },

    /// A key came back up
    KeyUp { key: String },

    /// A mouse button was pressed or released at a screen position
    MouseClick {
        x: i32,
        y: i32,
        button: String,
        action: ClickAction,
    },

    /// The wheel moved while the pointer was at a screen position
    MouseScroll { x: i32, y: i32, dx: i32, dy: i32 },

    /// The pointer moved to a screen position
    MouseMove { x: i32, y: i32 },
}

impl MacroEventKind {
    /// The wire name of this kind (`key_down`, `mouse_click`, ...)
    pub fn name(&self) -> &'static str {
        match self {
            MacroEventKind::KeyDown { .. } => "key_down",
            MacroEventKind::KeyUp { .. } => "key_up",
            MacroEventKind::MouseClick { .. } => "mouse_click",
            MacroEventKind::MouseScroll { .. } => "mouse_scroll",
            MacroEventKind::MouseMove { .. } => "mouse_move",
        }
    }
}

/// A single recorded input event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroEvent {
    /// What happened
    #[serde(flatten)]
    pub kind: MacroEventKind,

    /// Milliseconds to wait after the previous event before replaying this one
    pub delay_ms: u64,
}

impl MacroEvent {
    pub fn new(kind: MacroEventKind, delay_ms: u64) -> Self {
        Self { kind, delay_ms }
    }
}

/// A named, ordered sequence of macro events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Macro {
    /// Display name of the macro
    pub name: String,

    /// The recorded events, in replay order
    #[serde(default)]
    pub events: Vec<MacroEvent>,
}

impl Macro {
    /// Create a macro from a name and an event sequence
    pub fn new(name: impl Into<String>, events: Vec<MacroEvent>) -> Self {
        Self {
            name: name.into(),
            events,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Remove the events at the given indexes.
    ///
    /// Indexes may be unsorted or repeated, and out-of-range indexes are
    /// skipped. Returns how many events were actually removed.
    pub fn delete_events(&mut self, indexes: &[usize]) -> usize {
        let mut sorted = indexes.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();

        let mut removed = 0;
        for idx in sorted {
            if idx < self.events.len() {
                self.events.remove(idx);
                removed += 1;
            }
        }
        removed
    }

    /// Serialize the macro to a pretty-printed JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize a macro from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
