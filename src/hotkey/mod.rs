//! Global hotkey that triggers a publish
//!
//! The configured combo (e.g. `["ctrl", "shift", "x"]`) is registered with
//! `global-hotkey` on a dedicated thread. Each press is forwarded as a `()`
//! signal on an mpsc channel; the sync engine turns signals into publishes.
//!
//! The registering thread owns the manager for its whole life. On Windows the
//! manager's hidden window belongs to that thread and `WM_HOTKEY` only reaches
//! it while the thread pumps its message queue. X11 needs no pump. macOS only
//! delivers hotkeys to the main thread's event loop, so registration is
//! refused there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use global_hotkey::hotkey::HotKey;
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Hotkey errors
#[derive(Debug, Error)]
pub enum HotkeyError {
    /// Combo has no non-modifier key
    #[error("Hotkey `{0}` needs exactly one non-modifier key")]
    MissingKey(String),

    /// Combo names more than one non-modifier key
    #[error("Hotkey `{combo}` has more than one key: {keys}")]
    MultipleKeys { combo: String, keys: String },

    /// Key name not understood by the hotkey backend
    #[error("Invalid hotkey `{combo}`: {message}")]
    Parse { combo: String, message: String },

    /// OS refused the registration
    #[error("Failed to register hotkey: {0}")]
    Register(String),

    /// Global hotkeys cannot be delivered on this platform
    #[error("Global hotkeys are not supported here: {0}")]
    Unsupported(String),
}

const MODIFIERS: &[(&[&str], &str)] = &[
    (&["ctrl", "control", "lctrl", "rctrl"], "ctrl"),
    (&["shift", "lshift", "rshift"], "shift"),
    (&["alt", "option", "lalt", "ralt"], "alt"),
    (&["super", "cmd", "command", "meta", "win", "windows"], "super"),
];

fn modifier_name(key: &str) -> Option<&'static str> {
    MODIFIERS
        .iter()
        .find(|(aliases, _)| aliases.contains(&key))
        .map(|(_, name)| *name)
}

/// Turn a key list into an accelerator string such as `ctrl+shift+x`
///
/// Modifiers may appear in any position; exactly one other key is required.
pub fn combo_to_accelerator(keys: &[String]) -> Result<String, HotkeyError> {
    let combo = keys.join(",");
    let mut modifiers: Vec<&'static str> = Vec::new();
    let mut main_keys: Vec<String> = Vec::new();

    for key in keys {
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            continue;
        }
        match modifier_name(&key) {
            Some(modifier) if !modifiers.contains(&modifier) => modifiers.push(modifier),
            Some(_) => {}
            None => main_keys.push(key),
        }
    }

    match main_keys.len() {
        0 => Err(HotkeyError::MissingKey(combo)),
        1 => {
            let mut parts: Vec<String> = modifiers.iter().map(|m| m.to_string()).collect();
            parts.push(main_keys.remove(0));
            Ok(parts.join("+"))
        }
        _ => Err(HotkeyError::MultipleKeys {
            combo,
            keys: main_keys.join(", "),
        }),
    }
}

/// Parse a key list into a registrable hotkey
pub fn parse_combo(keys: &[String]) -> Result<HotKey, HotkeyError> {
    let accelerator = combo_to_accelerator(keys)?;
    accelerator
        .parse::<HotKey>()
        .map_err(|e| HotkeyError::Parse {
            combo: accelerator.clone(),
            message: e.to_string(),
        })
}

/// Global hotkey registered on its own thread
///
/// Dropping the listener unregisters the hotkey and stops the thread.
pub struct HotkeyListener {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HotkeyListener {
    /// Register `keys` and forward each press into the returned channel
    ///
    /// Returns once the OS accepted or refused the registration.
    pub fn spawn(keys: &[String]) -> Result<(Self, mpsc::Receiver<()>), HotkeyError> {
        let hotkey = parse_combo(keys)?;
        ensure_supported()?;

        let (tx, rx) = mpsc::channel(8);
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("cloudclip-hotkey".to_string())
            .spawn(move || hotkey_thread(hotkey, tx, thread_stop, ready_tx))
            .map_err(|e| HotkeyError::Register(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(HotkeyError::Register(
                    "hotkey thread exited during registration".to_string(),
                ))
            }
        }

        info!("Registered publish hotkey {}", keys.join("+"));
        Ok((
            Self {
                stop,
                thread: Some(thread),
            },
            rx,
        ))
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Hotkey thread panicked");
            }
        }
    }
}

#[cfg(target_os = "macos")]
fn ensure_supported() -> Result<(), HotkeyError> {
    Err(HotkeyError::Unsupported(
        "macOS delivers hotkey events only to the main thread's event loop; \
         use `cloudclip publish` instead"
            .to_string(),
    ))
}

#[cfg(not(target_os = "macos"))]
fn ensure_supported() -> Result<(), HotkeyError> {
    Ok(())
}

fn hotkey_thread(
    hotkey: HotKey,
    tx: mpsc::Sender<()>,
    stop: Arc<AtomicBool>,
    ready: std_mpsc::SyncSender<Result<(), HotkeyError>>,
) {
    let manager = match GlobalHotKeyManager::new() {
        Ok(manager) => manager,
        Err(e) => {
            let _ = ready.send(Err(HotkeyError::Register(e.to_string())));
            return;
        }
    };
    if let Err(e) = manager.register(hotkey) {
        let _ = ready.send(Err(HotkeyError::Register(e.to_string())));
        return;
    }
    let _ = ready.send(Ok(()));

    let events = GlobalHotKeyEvent::receiver();
    'poll: loop {
        pump_messages();

        while let Ok(event) = events.try_recv() {
            if event.id != hotkey.id() || event.state != HotKeyState::Pressed {
                continue;
            }
            debug!("Publish hotkey pressed");
            match tx.try_send(()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(())) => {
                    warn!("Publish already queued, ignoring hotkey press")
                }
                Err(mpsc::error::TrySendError::Closed(())) => break 'poll,
            }
        }

        if stop.load(Ordering::SeqCst) || tx.is_closed() {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    if let Err(e) = manager.unregister(hotkey) {
        warn!("Failed to unregister hotkey: {}", e);
    }
}

/// Dispatch every queued window message of the current thread
#[cfg(target_os = "windows")]
fn pump_messages() {
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        DispatchMessageW, PeekMessageW, TranslateMessage, MSG, PM_REMOVE,
    };

    unsafe {
        let mut msg: MSG = std::mem::zeroed();
        while PeekMessageW(&mut msg, std::ptr::null_mut(), 0, 0, PM_REMOVE) != 0 {
            TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
}

#[cfg(not(target_os = "windows"))]
fn pump_messages() {}
