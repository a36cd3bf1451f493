//! Crossterm display surface for running a session in the local terminal.

use std::{
    io::{self, Write},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal,
};
use remote_terminal_core::{Dimensions, DisplaySurface};
use tokio::sync::mpsc;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Listeners {
    input: Vec<mpsc::UnboundedSender<String>>,
    resize: Vec<mpsc::UnboundedSender<Dimensions>>,
}

/// Display surface rendering to stdout and reading keys from stdin.
#[derive(Default)]
pub struct CrosstermSurface {
    listeners: Arc<Mutex<Listeners>>,
    reader_started: AtomicBool,
    /// Stop flag of the current reader thread; replaced on dispose.
    stop: Mutex<Arc<AtomicBool>>,
    raw_mode: AtomicBool,
}

impl CrosstermSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream of local terminal resizes.
    pub fn resize_events(&self) -> mpsc::UnboundedReceiver<Dimensions> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock_listeners().resize.push(tx);
        self.ensure_reader();
        rx
    }

    /// Convert a crossterm key event to input data.
    #[must_use]
    pub fn key_to_input(key: &KeyEvent) -> Option<String> {
        let seq = match key.code {
            KeyCode::Char(c) => {
                if key.modifiers.contains(KeyModifiers::CONTROL) && c.is_ascii_alphabetic() {
                    // Ctrl+A through Ctrl+Z
                    let ctrl_char = (c.to_ascii_lowercase() as u8) - b'a' + 1;
                    return Some(char::from(ctrl_char).to_string());
                }
                let mut s = String::new();
                if key.modifiers.contains(KeyModifiers::ALT) {
                    s.push('\x1b');
                }
                s.push(c);
                return Some(s);
            }
            KeyCode::Enter => "\r",
            KeyCode::Backspace => "\x7f",
            KeyCode::Tab => "\t",
            KeyCode::BackTab => "\x1b[Z",
            KeyCode::Esc => "\x1b",
            KeyCode::Up => "\x1b[A",
            KeyCode::Down => "\x1b[B",
            KeyCode::Right => "\x1b[C",
            KeyCode::Left => "\x1b[D",
            KeyCode::Home => "\x1b[H",
            KeyCode::End => "\x1b[F",
            KeyCode::PageUp => "\x1b[5~",
            KeyCode::PageDown => "\x1b[6~",
            KeyCode::Delete => "\x1b[3~",
            KeyCode::Insert => "\x1b[2~",
            KeyCode::F(n) => match n {
                1 => "\x1bOP",
                2 => "\x1bOQ",
                3 => "\x1bOR",
                4 => "\x1bOS",
                5 => "\x1b[15~",
                6 => "\x1b[17~",
                7 => "\x1b[18~",
                8 => "\x1b[19~",
                9 => "\x1b[20~",
                10 => "\x1b[21~",
                11 => "\x1b[23~",
                12 => "\x1b[24~",
                _ => return None,
            },
            _ => return None,
        };
        Some(seq.to_string())
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_stop(&self) -> std::sync::MutexGuard<'_, Arc<AtomicBool>> {
        self.stop.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_reader(&self) {
        if self.reader_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let listeners = Arc::clone(&self.listeners);
        let stop = Arc::clone(&self.lock_stop());
        thread::spawn(move || read_events(&listeners, &stop));
    }

    /// Stop the reader thread and let the next subscriber start a new one.
    fn stop_reader(&self) {
        let stop = std::mem::take(&mut *self.lock_stop());
        stop.store(true, Ordering::SeqCst);
        self.reader_started.store(false, Ordering::SeqCst);
    }
}

fn read_events(listeners: &Mutex<Listeners>, stop: &AtomicBool) {
    while !stop.load(Ordering::SeqCst) {
        match event::poll(POLL_INTERVAL) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Terminal event poll failed");
                break;
            }
        }
        let event = match event::read() {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Terminal event read failed");
                break;
            }
        };
        let mut listeners = listeners.lock().unwrap_or_else(PoisonError::into_inner);
        match event {
            Event::Key(key) if key.kind != KeyEventKind::Release => {
                if let Some(data) = CrosstermSurface::key_to_input(&key) {
                    listeners.input.retain(|tx| tx.send(data.clone()).is_ok());
                }
            }
            Event::Paste(text) => {
                listeners.input.retain(|tx| tx.send(text.clone()).is_ok());
            }
            Event::Resize(cols, rows) => {
                let dims = Dimensions { rows, cols };
                listeners.resize.retain(|tx| tx.send(dims).is_ok());
            }
            _ => {}
        }
    }
}

impl DisplaySurface for CrosstermSurface {
    fn open(&self, target: &str) {
        if target != "stdout" {
            tracing::warn!(requested = target, "Crossterm surface only renders to stdout");
        }
        if !self.raw_mode.swap(true, Ordering::SeqCst) {
            if let Err(e) = terminal::enable_raw_mode() {
                tracing::warn!(error = %e, "Failed to enable raw mode");
                self.raw_mode.store(false, Ordering::SeqCst);
            }
        }
    }

    fn fit(&self) {}

    fn focus(&self) {}

    fn propose_dimensions(&self) -> Option<Dimensions> {
        match terminal::size() {
            Ok((cols, rows)) if cols > 0 && rows > 0 => Some(Dimensions { rows, cols }),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "No terminal size available");
                None
            }
        }
    }

    fn write(&self, data: &[u8]) {
        let mut stdout = io::stdout().lock();
        if let Err(e) = stdout.write_all(data).and_then(|()| stdout.flush()) {
            tracing::warn!(error = %e, "Failed to write terminal output");
        }
    }

    fn on_input_data(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock_listeners().input.push(tx);
        self.ensure_reader();
        rx
    }

    fn dispose(&self) {
        self.stop_reader();
        {
            let mut listeners = self.lock_listeners();
            listeners.input.clear();
            listeners.resize.clear();
        }
        if self.raw_mode.swap(false, Ordering::SeqCst) {
            if let Err(e) = terminal::disable_raw_mode() {
                tracing::warn!(error = %e, "Failed to restore terminal mode");
            }
        }
    }
}
