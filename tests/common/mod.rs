#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use retype::inject::{InjectError, KeystrokeInjector, NamedKey};

/// One delivered keystroke, as a test double saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keystroke {
    Char(char),
    Key(NamedKey),
}

/// Shared handle to a double's delivery log. The injector itself moves into
/// the engine, so tests keep this handle to inspect what went out.
pub type KeystrokeLog = Arc<Mutex<Vec<Keystroke>>>;

pub fn logged(log: &KeystrokeLog) -> Vec<Keystroke> {
    log.lock().unwrap().clone()
}

/// Reassemble the delivered keystrokes as the text a focused editor would
/// have received.
pub fn typed_text(log: &KeystrokeLog) -> String {
    logged(log)
        .iter()
        .map(|stroke| match stroke {
            Keystroke::Char(c) => *c,
            Keystroke::Key(NamedKey::Enter) => '\n',
            Keystroke::Key(NamedKey::Tab) => '\t',
            Keystroke::Key(NamedKey::Char(c)) => *c,
        })
        .collect()
}

/// Records every keystroke and always succeeds.
#[derive(Default)]
pub struct RecordingInjector {
    log: KeystrokeLog,
}

impl RecordingInjector {
    pub fn log(&self) -> KeystrokeLog {
        Arc::clone(&self.log)
    }
}

impl KeystrokeInjector for RecordingInjector {
    fn inject_char(&mut self, c: char) -> Result<(), InjectError> {
        self.log.lock().unwrap().push(Keystroke::Char(c));
        Ok(())
    }

    fn inject_key(&mut self, key: NamedKey) -> Result<(), InjectError> {
        self.log.lock().unwrap().push(Keystroke::Key(key));
        Ok(())
    }
}

/// Fails scripted characters: `failing_text` makes the whole-string path
/// fail, `failing_both` makes the named-key fallback fail for them too.
pub struct ScriptedInjector {
    log: KeystrokeLog,
    fail_char: HashSet<char>,
    fail_key: HashSet<char>,
}

impl ScriptedInjector {
    pub fn failing_text(chars: impl IntoIterator<Item = char>) -> Self {
        Self {
            log: KeystrokeLog::default(),
            fail_char: chars.into_iter().collect(),
            fail_key: HashSet::new(),
        }
    }

    pub fn failing_both(chars: impl IntoIterator<Item = char>) -> Self {
        let chars: HashSet<char> = chars.into_iter().collect();
        Self {
            log: KeystrokeLog::default(),
            fail_char: chars.clone(),
            fail_key: chars,
        }
    }

    pub fn log(&self) -> KeystrokeLog {
        Arc::clone(&self.log)
    }
}

impl KeystrokeInjector for ScriptedInjector {
    fn inject_char(&mut self, c: char) -> Result<(), InjectError> {
        if self.fail_char.contains(&c) {
            return Err(InjectError::Char(c));
        }
        self.log.lock().unwrap().push(Keystroke::Char(c));
        Ok(())
    }

    fn inject_key(&mut self, key: NamedKey) -> Result<(), InjectError> {
        if let NamedKey::Char(c) = key {
            if self.fail_key.contains(&c) {
                return Err(InjectError::Char(c));
            }
        }
        self.log.lock().unwrap().push(Keystroke::Key(key));
        Ok(())
    }
}

/// Delivers `healthy` keystrokes, then reports a backend loss on every call.
pub struct DyingBackendInjector {
    log: KeystrokeLog,
    healthy: usize,
}

impl DyingBackendInjector {
    pub fn new(healthy: usize) -> Self {
        Self {
            log: KeystrokeLog::default(),
            healthy,
        }
    }

    pub fn log(&self) -> KeystrokeLog {
        Arc::clone(&self.log)
    }

    fn deliver(&mut self, stroke: Keystroke) -> Result<(), InjectError> {
        if self.healthy == 0 {
            return Err(InjectError::Backend(
                "display server connection lost".to_string(),
            ));
        }
        self.healthy -= 1;
        self.log.lock().unwrap().push(stroke);
        Ok(())
    }
}

impl KeystrokeInjector for DyingBackendInjector {
    fn inject_char(&mut self, c: char) -> Result<(), InjectError> {
        self.deliver(Keystroke::Char(c))
    }

    fn inject_key(&mut self, key: NamedKey) -> Result<(), InjectError> {
        self.deliver(Keystroke::Key(key))
    }
}

/// Records like `RecordingInjector` and signals after each delivery, so a
/// test thread can act at a known point inside a running session.
pub struct SignallingInjector {
    log: KeystrokeLog,
    notify: Sender<()>,
}

impl SignallingInjector {
    pub fn new(notify: Sender<()>) -> Self {
        Self {
            log: KeystrokeLog::default(),
            notify,
        }
    }

    pub fn log(&self) -> KeystrokeLog {
        Arc::clone(&self.log)
    }

    fn deliver(&mut self, stroke: Keystroke) -> Result<(), InjectError> {
        self.log.lock().unwrap().push(stroke);
        let _ = self.notify.send(());
        Ok(())
    }
}

impl KeystrokeInjector for SignallingInjector {
    fn inject_char(&mut self, c: char) -> Result<(), InjectError> {
        self.deliver(Keystroke::Char(c))
    }

    fn inject_key(&mut self, key: NamedKey) -> Result<(), InjectError> {
        self.deliver(Keystroke::Key(key))
    }
}
