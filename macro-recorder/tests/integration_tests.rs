use macro_recorder::*;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);

fn ctrl() -> NativeKey {
    NativeKey::named(rdev::Key::ControlLeft)
}

fn alt() -> NativeKey {
    NativeKey::named(rdev::Key::Alt)
}

fn letter(key: rdev::Key, ch: char) -> NativeKey {
    NativeKey::char(key, ch)
}

fn press_chord(source: &ChannelSource, keys: &[NativeKey]) {
    for key in keys {
        source.press(key.clone());
    }
}

fn release_chord(source: &ChannelSource, keys: &[NativeKey]) {
    for key in keys.iter().rev() {
        source.release(key.clone());
    }
}

fn wait_until_idle(controller: &Controller) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while controller.is_playing() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[derive(Clone, Default)]
struct MemoryStore {
    saved: Arc<Mutex<Option<Macro>>>,
    hotkeys: Arc<Mutex<Option<HotkeyConfig>>>,
}

impl MacroStore for MemoryStore {
    fn save(&mut self, recorded: &Macro) -> Result<()> {
        *self.saved.lock().unwrap() = Some(recorded.clone());
        Ok(())
    }

    fn load(&mut self) -> Result<Option<Macro>> {
        Ok(self.saved.lock().unwrap().clone())
    }

    fn save_hotkeys(&mut self, hotkeys: &HotkeyConfig) -> Result<()> {
        *self.hotkeys.lock().unwrap() = Some(hotkeys.clone());
        Ok(())
    }
}

#[test]
fn test_hotkey_driven_record_and_replay() {
    let source = ChannelSource::new();
    let sink = RecordingSink::new();
    let store = MemoryStore::default();
    let mut controller = Controller::new(
        Arc::new(source.clone()),
        Arc::new(sink.clone()),
        MacroRecorderConfig::default(),
    )
    .with_store(Box::new(store.clone()));
    controller.start().unwrap();
    assert!(controller.hotkeys().is_listening());

    let start_chord = [ctrl(), alt(), letter(rdev::Key::KeyR, 'r')];
    let stop_chord = [ctrl(), alt(), letter(rdev::Key::KeyS, 's')];
    let h = letter(rdev::Key::KeyH, 'h');

    press_chord(&source, &start_chord);
    release_chord(&source, &start_chord);
    let action = controller.next_action(WAIT).unwrap();
    assert_eq!(action, START_RECORD);
    controller.handle_action(&action).unwrap();
    assert!(controller.is_recording());

    source.press(h.clone());
    source.release(h);
    press_chord(&source, &stop_chord);
    let action = controller.next_action(WAIT).unwrap();
    assert_eq!(action, STOP_RECORD);
    controller.handle_action(&action).unwrap();
    release_chord(&source, &stop_chord);
    assert!(!controller.is_recording());

    // The stop chord's trigger key never reaches the recording
    let recorded = controller.current_macro().unwrap();
    assert_eq!(recorded.name, RECORDED_MACRO_NAME);
    let kinds: Vec<MacroEventKind> = recorded.events.iter().map(|e| e.kind.clone()).collect();
    assert_eq!(
        kinds,
        vec![
            MacroEventKind::KeyDown { key: "h".into() },
            MacroEventKind::KeyUp { key: "h".into() },
            MacroEventKind::KeyDown { key: "<ctrl>".into() },
            MacroEventKind::KeyDown { key: "<alt>".into() },
        ]
    );
    assert_eq!(recorded.events[0].delay_ms, 0);

    controller.handle_action(SAVE_MACRO).unwrap();
    assert_eq!(store.saved.lock().unwrap().as_ref().map(Macro::len), Some(4));

    controller.handle_action(START_MACRO).unwrap();
    wait_until_idle(&controller);
    assert_eq!(
        sink.pressed_keys(),
        vec![enigo::Key::Unicode('h'), enigo::Key::Control, enigo::Key::Alt]
    );
    assert_eq!(sink.released_keys(), vec![enigo::Key::Unicode('h')]);

    controller.set_current_macro(None);
    controller.handle_action(LOAD_MACRO).unwrap();
    assert_eq!(controller.current_macro().map(|m| m.len()), Some(4));

    // The loaded macro replays the same keys
    sink.clear();
    controller.handle_action(START_MACRO).unwrap();
    wait_until_idle(&controller);
    assert_eq!(
        sink.pressed_keys(),
        vec![enigo::Key::Unicode('h'), enigo::Key::Control, enigo::Key::Alt]
    );

    controller.shutdown();
    assert!(!controller.hotkeys().is_listening());
    assert_eq!(source.subscriber_count(), 0);
}

#[test]
fn test_rebind_captures_new_chord() {
    let source = ChannelSource::new();
    let store = MemoryStore::default();
    let mut controller = Controller::new(
        Arc::new(source.clone()),
        Arc::new(RecordingSink::new()),
        MacroRecorderConfig::default(),
    )
    .with_store(Box::new(store.clone()));

    let rebinding = std::thread::spawn(move || {
        let captured = controller.rebind(STOP_MACRO).unwrap();
        (controller, captured)
    });

    assert!(source.wait_for_subscribers(1, WAIT));
    let chord = [NativeKey::named(rdev::Key::ShiftLeft), NativeKey::named(rdev::Key::F9)];
    press_chord(&source, &chord);
    release_chord(&source, &chord);

    let (controller, captured) = rebinding.join().unwrap();
    assert_eq!(captured, Some(vec!["<shift>".to_string(), "<f9>".to_string()]));
    assert_eq!(
        controller.hotkeys().mapping()[STOP_MACRO],
        vec!["<shift>".to_string(), "<f9>".to_string()]
    );
    assert!(controller.hotkeys().active_chords().contains(&"<shift>+<f9>".to_string()));
    assert!(controller.hotkeys().is_listening());

    let persisted = store.hotkeys.lock().unwrap().clone().unwrap();
    assert_eq!(persisted.hotkeys[STOP_MACRO], vec!["<shift>", "<f9>"]);

    // The new chord dispatches its action
    press_chord(&source, &chord);
    assert_eq!(controller.next_action(WAIT).as_deref(), Some(STOP_MACRO));
}

#[test]
fn test_rebind_timeout_keeps_old_binding() {
    let source = ChannelSource::new();
    let config = MacroRecorderConfig {
        capture: CaptureConfig {
            min_keys: 2,
            timeout: Duration::from_millis(50),
        },
        ..MacroRecorderConfig::default()
    };
    let mut controller = Controller::new(
        Arc::new(source.clone()),
        Arc::new(RecordingSink::new()),
        config,
    );
    controller.start().unwrap();

    assert_eq!(controller.rebind(START_RECORD).unwrap(), None);
    assert_eq!(
        controller.hotkeys().mapping()[START_RECORD],
        vec!["<ctrl>", "<alt>", "r"]
    );
    assert!(controller.hotkeys().is_listening());
    assert_eq!(source.subscriber_count(), 1);
}

#[test]
fn test_infinite_repeat_until_stop_action() {
    let source = ChannelSource::new();
    let sink = RecordingSink::new();
    let mut controller = Controller::new(
        Arc::new(source.clone()),
        Arc::new(sink.clone()),
        MacroRecorderConfig::default(),
    );
    controller.set_repeats(0);
    controller.set_current_macro(Some(Macro::new(
        "loop",
        vec![
            MacroEvent::new(MacroEventKind::MouseMove { x: 1, y: 1 }, 0),
            MacroEvent::new(MacroEventKind::MouseMove { x: 2, y: 2 }, 5),
        ],
    )));

    controller.handle_action(START_MACRO).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert!(controller.is_playing());

    controller.handle_action(STOP_MACRO).unwrap();
    assert!(!controller.is_playing());
    assert!(sink.moves().len() > 2);
}
