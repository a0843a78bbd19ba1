//! Canonical string labels for keys and mouse buttons.
//!
//! A label is either one printable character (`a`, `A`, `;`) or a
//! bracket-wrapped name (`<ctrl>`, `<enter>`, `<vk_65>`). Labels are what the
//! recorder stores, what chords are written in, and what playback turns back
//! into synthetic input.

use std::collections::HashSet;

use crate::input::NativeKey;

/// Label used for the space key and as the replay fallback for empty labels
const SPACE: char = ' ';

/// Map a native key to its canonical label.
///
/// Named keys (modifiers, navigation, function keys) always produce
/// `<name>`. Other keys produce the character they typed when the OS reported
/// a printable one, otherwise `<vk_N>` with the Windows virtual-key code,
/// otherwise `<name>` built from the key identifier.
pub fn key_to_label(native: &NativeKey) -> String {
    if let Some(name) = named_key(&native.key) {
        return format!("<{name}>");
    }

    if let Some(ch) = printable_char(native.name.as_deref()) {
        return ch.to_string();
    }

    if let Some(vk) = virtual_key_code(&native.key) {
        return format!("<vk_{vk}>");
    }

    format!("<{}>", format!("{:?}", native.key).to_lowercase())
}

/// Map a native mouse button to its label (`left`, `right`, `middle`, or the
/// raw button number).
pub fn button_to_label(button: &rdev::Button) -> String {
    match button {
        rdev::Button::Left => "left".to_string(),
        rdev::Button::Right => "right".to_string(),
        rdev::Button::Middle => "middle".to_string(),
        rdev::Button::Unknown(n) => n.to_string(),
    }
}

/// Normalize a label for comparison.
///
/// Single characters and bracketed names are lowercased. `<vk_N>` codes in
/// the ASCII digit and uppercase-letter ranges become the character they stand
/// for. A `<vk_...>` whose code does not parse is returned unchanged.
pub fn normalize_label(label: &str) -> String {
    if let Some(inner) = bracket_inner(label) {
        if let Some(code) = inner.strip_prefix("vk_") {
            let Ok(vk) = code.parse::<i64>() else {
                return label.to_string();
            };
            match vk {
                0x30..=0x39 => return char::from(vk as u8).to_string(),
                0x41..=0x5A => return char::from(vk as u8).to_ascii_lowercase().to_string(),
                _ => {}
            }
        }
        return format!("<{}>", inner.to_lowercase());
    }

    if label.chars().count() == 1 {
        return label.to_lowercase();
    }

    label.to_string()
}

/// Normalize every label of a chord, preserving order
pub fn normalize_chord<S: AsRef<str>>(labels: &[S]) -> Vec<String> {
    labels.iter().map(|l| normalize_label(l.as_ref())).collect()
}

/// Join chord labels into the `a+b+c` form
pub fn format_chord<S: AsRef<str>>(labels: &[S]) -> String {
    labels
        .iter()
        .map(|l| l.as_ref())
        .collect::<Vec<_>>()
        .join("+")
}

/// Whether a formatted chord string is well formed.
///
/// Every `+`-separated token must be a bracketed non-empty name or exactly
/// one character, and no token may appear twice.
pub fn is_legal_chord(formatted: &str) -> bool {
    if formatted.is_empty() {
        return false;
    }

    let mut seen = HashSet::new();
    for token in formatted.split('+') {
        let well_formed = match bracket_inner(token) {
            Some(inner) => !inner.is_empty(),
            None => token.chars().count() == 1,
        };
        if !well_formed || !seen.insert(token) {
            return false;
        }
    }
    true
}

/// Turn a label back into a key enigo can press.
///
/// Never fails:
/// - empty label gives a space
/// - `<vk_N>` gives the raw key code, or a space if `N` does not parse
/// - `<name>` gives the named key, or the first character of the name
/// - a single character gives that character
/// - anything else gives its first character
pub fn key_from_label(label: &str) -> enigo::Key {
    let Some(first) = label.chars().next() else {
        return enigo::Key::Unicode(SPACE);
    };

    if let Some(name) = bracket_inner(label) {
        if let Some(code) = name.strip_prefix("vk_") {
            return match code.parse::<u32>() {
                Ok(vk) => enigo::Key::Other(vk),
                Err(_) => enigo::Key::Unicode(SPACE),
            };
        }
        if let Some(key) = enigo_named_key(name) {
            return key;
        }
        return enigo::Key::Unicode(name.chars().next().unwrap_or(SPACE));
    }

    enigo::Key::Unicode(first)
}

/// Turn a button label back into an enigo button.
///
/// Symbolic names and X11-style numbers map directly; anything else is the
/// left button.
pub fn button_from_label(label: &str) -> enigo::Button {
    match label {
        "left" | "1" => enigo::Button::Left,
        "middle" | "2" => enigo::Button::Middle,
        "right" | "3" => enigo::Button::Right,
        "back" | "8" => enigo::Button::Back,
        "forward" | "9" => enigo::Button::Forward,
        _ => enigo::Button::Left,
    }
}

/// Build the unordered set used to match a chord
pub fn chord_set<S: AsRef<str>>(labels: &[S]) -> HashSet<String> {
    labels.iter().map(|l| l.as_ref().to_string()).collect()
}

/// Whether the pressed set satisfies any of the chords
pub fn pressed_matches_chord(pressed: &HashSet<String>, chords: &[HashSet<String>]) -> bool {
    chords.iter().any(|chord| chord.is_subset(pressed))
}

fn bracket_inner(label: &str) -> Option<&str> {
    if label.len() >= 2 {
        label.strip_prefix('<')?.strip_suffix('>')
    } else {
        None
    }
}

fn printable_char(name: Option<&str>) -> Option<char> {
    let mut chars = name?.chars();
    let ch = chars.next()?;
    if chars.next().is_some() || ch.is_control() || ch.is_whitespace() {
        return None;
    }
    Some(ch)
}

fn named_key(key: &rdev::Key) -> Option<&'static str> {
    use rdev::Key;

    let name = match key {
        Key::ControlLeft => "ctrl",
        Key::ControlRight => "ctrl_r",
        Key::ShiftLeft => "shift",
        Key::ShiftRight => "shift_r",
        Key::Alt => "alt",
        Key::AltGr => "alt_gr",
        Key::MetaLeft => "cmd",
        Key::MetaRight => "cmd_r",
        Key::Return | Key::KpReturn => "enter",
        Key::Escape => "esc",
        Key::Space => "space",
        Key::Tab => "tab",
        Key::Backspace => "backspace",
        Key::Delete => "delete",
        Key::Insert => "insert",
        Key::UpArrow => "up",
        Key::DownArrow => "down",
        Key::LeftArrow => "left",
        Key::RightArrow => "right",
        Key::Home => "home",
        Key::End => "end",
        Key::PageUp => "page_up",
        Key::PageDown => "page_down",
        Key::CapsLock => "caps_lock",
        Key::PrintScreen => "print_screen",
        Key::ScrollLock => "scroll_lock",
        Key::Pause => "pause",
        Key::NumLock => "num_lock",
        Key::F1 => "f1",
        Key::F2 => "f2",
        Key::F3 => "f3",
        Key::F4 => "f4",
        Key::F5 => "f5",
        Key::F6 => "f6",
        Key::F7 => "f7",
        Key::F8 => "f8",
        Key::F9 => "f9",
        Key::F10 => "f10",
        Key::F11 => "f11",
        Key::F12 => "f12",
        _ => return None,
    };
    Some(name)
}

fn enigo_named_key(name: &str) -> Option<enigo::Key> {
    use enigo::Key;

    let key = match name {
        "ctrl" | "ctrl_l" | "ctrl_r" => Key::Control,
        "shift" | "shift_l" | "shift_r" => Key::Shift,
        "alt" | "alt_l" | "alt_r" => Key::Alt,
        "cmd" | "cmd_l" | "cmd_r" => Key::Meta,
        "enter" => Key::Return,
        "esc" => Key::Escape,
        "space" => Key::Space,
        "tab" => Key::Tab,
        "backspace" => Key::Backspace,
        "delete" => Key::Delete,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "page_up" => Key::PageUp,
        "page_down" => Key::PageDown,
        "caps_lock" => Key::CapsLock,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        _ => return None,
    };
    Some(key)
}

/// Windows virtual-key code for keys that can type a character
fn virtual_key_code(key: &rdev::Key) -> Option<u32> {
    use rdev::Key;

    let vk = match key {
        Key::KeyA => 0x41,
        Key::KeyB => 0x42,
        Key::KeyC => 0x43,
        Key::KeyD => 0x44,
        Key::KeyE => 0x45,
        Key::KeyF => 0x46,
        Key::KeyG => 0x47,
        Key::KeyH => 0x48,
        Key::KeyI => 0x49,
        Key::KeyJ => 0x4A,
        Key::KeyK => 0x4B,
        Key::KeyL => 0x4C,
        Key::KeyM => 0x4D,
        Key::KeyN => 0x4E,
        Key::KeyO => 0x4F,
        Key::KeyP => 0x50,
        Key::KeyQ => 0x51,
        Key::KeyR => 0x52,
        Key::KeyS => 0x53,
        Key::KeyT => 0x54,
        Key::KeyU => 0x55,
        Key::KeyV => 0x56,
        Key::KeyW => 0x57,
        Key::KeyX => 0x58,
        Key::KeyY => 0x59,
        Key::KeyZ => 0x5A,
        Key::Num0 => 0x30,
        Key::Num1 => 0x31,
        Key::Num2 => 0x32,
        Key::Num3 => 0x33,
        Key::Num4 => 0x34,
        Key::Num5 => 0x35,
        Key::Num6 => 0x36,
        Key::Num7 => 0x37,
        Key::Num8 => 0x38,
        Key::Num9 => 0x39,
        Key::Kp0 => 0x60,
        Key::Kp1 => 0x61,
        Key::Kp2 => 0x62,
        Key::Kp3 => 0x63,
        Key::Kp4 => 0x64,
        Key::Kp5 => 0x65,
        Key::Kp6 => 0x66,
        Key::Kp7 => 0x67,
        Key::Kp8 => 0x68,
        Key::Kp9 => 0x69,
        Key::KpMultiply => 0x6A,
        Key::KpPlus => 0x6B,
        Key::KpMinus => 0x6D,
        Key::KpDelete => 0x6E,
        Key::KpDivide => 0x6F,
        Key::SemiColon => 0xBA,
        Key::Equal => 0xBB,
        Key::Comma => 0xBC,
        Key::Minus => 0xBD,
        Key::Dot => 0xBE,
        Key::Slash => 0xBF,
        Key::BackQuote => 0xC0,
        Key::LeftBracket => 0xDB,
        Key::BackSlash => 0xDC,
        Key::RightBracket => 0xDD,
        Key::Quote => 0xDE,
        Key::IntlBackslash => 0xE2,
        Key::Unknown(code) => *code,
        _ => return None,
    };
    Some(vk)
}
