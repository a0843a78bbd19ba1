use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use macro_recorder::{
    Controller, EnigoSink, HotkeyConfig, Macro, MacroRecorderConfig, MacroStore, RdevSource,
    StatusFn,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const MACRO_FILE: &str = "macro.json";
const CONFIG_FILE: &str = "config.json";

/// Keeps the last saved macro and the hotkey bindings as JSON files in one directory
struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn load_hotkeys(&self) -> HotkeyConfig {
        let path = self.dir.join(CONFIG_FILE);
        let Ok(json) = fs::read_to_string(&path) else {
            return HotkeyConfig::default();
        };
        HotkeyConfig::from_json(&json).unwrap_or_else(|e| {
            warn!("Ignoring unreadable {:?}: {}", path, e);
            HotkeyConfig::default()
        })
    }
}

impl MacroStore for JsonFileStore {
    fn save(&mut self, recorded: &Macro) -> macro_recorder::Result<()> {
        let path = self.dir.join(MACRO_FILE);
        fs::write(&path, recorded.to_json()?)?;
        info!("Macro written to {:?}", path);
        Ok(())
    }

    fn load(&mut self) -> macro_recorder::Result<Option<Macro>> {
        let path = self.dir.join(MACRO_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        Ok(Some(Macro::from_json(&json)?))
    }

    fn save_hotkeys(&mut self, hotkeys: &HotkeyConfig) -> macro_recorder::Result<()> {
        fs::write(self.dir.join(CONFIG_FILE), hotkeys.to_json()?)?;
        Ok(())
    }
}

fn describe_bindings(hotkeys: &HotkeyConfig) {
    for (action, chord) in &hotkeys.hotkeys {
        info!("  {:<13} {}", action, chord.join("+"));
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let data_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new("macros").to_path_buf());
    let store = JsonFileStore::new(&data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

    let config = MacroRecorderConfig {
        hotkeys: store.load_hotkeys(),
        ..MacroRecorderConfig::default()
    };
    info!("Hotkeys:");
    describe_bindings(&config.hotkeys);

    let sink = EnigoSink::new().context("Failed to connect to the input system")?;
    let status: StatusFn = Arc::new(|message: &str| println!("{}", message));
    let mut controller = Controller::new(Arc::new(RdevSource::new()), Arc::new(sink), config)
        .with_status(status)
        .with_store(Box::new(store));
    controller.start().context("Failed to start hotkeys")?;

    let exit = Arc::new(AtomicBool::new(false));
    let exit_flag = Arc::clone(&exit);
    ctrlc::set_handler(move || exit_flag.store(true, Ordering::SeqCst))
        .context("Failed to install Ctrl-C handler")?;

    info!("Macros are kept in {:?}. Press Ctrl-C to quit.", data_dir);
    controller.run_until_exit(&exit);
    info!("Bye");
    Ok(())
}
