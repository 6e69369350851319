use crossterm::event::{poll, read, Event, KeyCode};
use crossterm::terminal;
use std::collections::HashMap;
use std::io;
use std::time::{Duration, Instant};
use tracing::trace;

// A chip-8 keypad is a 16 key square, one key per hex digit:
//   1 2 3 C
//   4 5 6 D
//   7 8 9 E
//   A 0 B F
// laid over the left-hand side of a qwerty keyboard:
//   1 2 3 4
//   q w e r
//   a s d f
//   z x b c
// (v has no keypad key)
const CHIP8_CONVENTIONAL_KEYMAP: [(&str, u8); 16] = [
    ("x", 0x00),
    ("1", 0x01),
    ("2", 0x02),
    ("3", 0x03),
    ("q", 0x04),
    ("w", 0x05),
    ("e", 0x06),
    ("a", 0x07),
    ("s", 0x08),
    ("d", 0x09),
    ("z", 0x0a),
    ("b", 0x0b),
    ("4", 0x0c),
    ("r", 0x0d),
    ("f", 0x0e),
    ("c", 0x0f),
];

/// Map a host key identifier onto the keypad. Most keys have no equivalent,
/// which is `None` rather than an error.
pub fn keypad_code(key: &str) -> Option<u8> {
    CHIP8_CONVENTIONAL_KEYMAP
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, code)| *code)
}

/// What the terminal front end asks of the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Key { key: String, is_down: bool },
    TogglePause,
    DebugStep,
    Quit,
}

/// Terminals report presses but not releases, so a key counts as held until
/// it has gone `hold` without a repeat.
pub struct KeyLatch {
    held: HashMap<String, Instant>,
    hold: Duration,
}

impl KeyLatch {
    pub fn new(hold: Duration) -> Self {
        KeyLatch {
            held: HashMap::new(),
            hold,
        }
    }

    /// record a press; only the first press of a hold is an edge
    pub fn press(&mut self, key: &str, now: Instant) -> Option<HostEvent> {
        match self.held.insert(key.to_string(), now) {
            Some(_) => None,
            None => Some(HostEvent::Key {
                key: key.to_string(),
                is_down: true,
            }),
        }
    }

    /// release every key that has gone quiet
    pub fn expire(&mut self, now: Instant) -> Vec<HostEvent> {
        let hold = self.hold;
        let mut released = Vec::new();
        self.held.retain(|key, pressed| {
            if now.duration_since(*pressed) >= hold {
                released.push(HostEvent::Key {
                    key: key.clone(),
                    is_down: false,
                });
                false
            } else {
                true
            }
        });
        released
    }
}

const TERMINAL_KEY_HOLD: Duration = Duration::from_millis(250);

/// simple key source using the terminal in raw mode
pub struct TerminalInput {
    latch: KeyLatch,
}

impl TerminalInput {
    pub fn new() -> Result<Self, io::Error> {
        terminal::enable_raw_mode()?;
        Ok(TerminalInput {
            latch: KeyLatch::new(TERMINAL_KEY_HOLD),
        })
    }

    /// drain pending terminal events without blocking
    pub fn poll(&mut self, now: Instant) -> Result<Vec<HostEvent>, io::Error> {
        let mut events = Vec::new();
        while poll(Duration::from_millis(0))? {
            match read()? {
                Event::Key(evt) => match evt.code {
                    KeyCode::Esc => events.push(HostEvent::Quit),
                    KeyCode::Char(' ') => events.push(HostEvent::TogglePause),
                    KeyCode::Char('n') => events.push(HostEvent::DebugStep),
                    KeyCode::Char(c) => {
                        let key = c.to_lowercase().to_string();
                        events.extend(self.latch.press(&key, now));
                    }
                    other => trace!(?other, "ignoring key"),
                },
                other => trace!(?other, "ignoring terminal event"),
            }
        }
        events.extend(self.latch.expire(now));
        Ok(events)
    }
}

impl Drop for TerminalInput {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}
