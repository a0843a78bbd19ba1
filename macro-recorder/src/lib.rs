//! Keyboard and mouse macro recorder
//!
//! This crate records timed sequences of keyboard and mouse input, replays
//! them with their recorded pacing, and runs global chord hotkeys that drive
//! recording and playback. Chords bound to hotkeys are kept out of the
//! recordings they control.
//!
//! Input arrives through an [`InputSource`] (the OS hook via [`RdevSource`],
//! or [`ChannelSource`] for tests) and replay goes out through an
//! [`InputSink`] ([`EnigoSink`] or [`RecordingSink`]).

use std::sync::Arc;

pub mod capture;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod hotkeys;
pub mod input;
pub mod labels;
pub mod output;
pub mod player;
pub mod recorder;

pub use capture::*;
pub use config::*;
pub use controller::*;
pub use error::*;
pub use events::*;
pub use hotkeys::*;
pub use input::*;
pub use output::*;
pub use player::*;
pub use recorder::*;

/// Receives human-readable status messages ("Recording started", ...)
pub type StatusFn = Arc<dyn Fn(&str) + Send + Sync>;
