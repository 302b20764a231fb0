use enigo::{Direction::Click, Enigo, Key, Keyboard, Settings};
use thiserror::Error;
use tracing::{debug, warn};

/// Built-in delay the backend applies between keystrokes, kept minimal so the
/// engine's own cadence is what the target application sees.
const BACKEND_KEY_DELAY_MS: u32 = 2;

/// Key events the engine requests beyond plain character text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedKey {
    Enter,
    Tab,
    /// Fallback form: tap the key for this character directly.
    Char(char),
}

#[derive(Debug, Error)]
pub enum InjectError {
    /// One character could not be delivered; the session continues without it.
    #[error("could not inject {0:?}")]
    Char(char),
    /// The injector lost its channel to the OS; no further events can be
    /// delivered and the session must stop.
    #[error("keystroke backend failure: {0}")]
    Backend(String),
    #[error("failed to initialize keystroke backend: {0}")]
    Init(String),
}

/// How a single character made it out, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    /// Delivered by whole-string injection on the first attempt.
    Injected,
    /// First attempt failed; delivered as a named-key tap instead.
    Fallback,
    /// Every attempt failed; the character was dropped.
    Skipped,
}

pub trait KeystrokeInjector {
    fn inject_char(&mut self, c: char) -> Result<(), InjectError>;
    fn inject_key(&mut self, key: NamedKey) -> Result<(), InjectError>;
}

/// Two-attempt delivery for one ordinary character: whole-string injection
/// first, then a named-key tap of the same character. One bad character never
/// stops the run; only a backend failure propagates.
pub fn inject_with_fallback<I: KeystrokeInjector>(
    injector: &mut I,
    c: char,
) -> Result<InjectOutcome, InjectError> {
    match injector.inject_char(c) {
        Ok(()) => return Ok(InjectOutcome::Injected),
        Err(InjectError::Char(_)) => {}
        Err(err) => return Err(err),
    }

    match injector.inject_key(NamedKey::Char(c)) {
        Ok(()) => Ok(InjectOutcome::Fallback),
        Err(InjectError::Char(_)) => {
            warn!("skipping {c:?}: both injection attempts failed");
            Ok(InjectOutcome::Skipped)
        }
        Err(err) => Err(err),
    }
}

/// Single-attempt delivery for a dedicated key (Enter/Tab). A skippable
/// failure drops the keystroke; only a backend failure propagates.
pub fn inject_named_key<I: KeystrokeInjector>(
    injector: &mut I,
    key: NamedKey,
) -> Result<InjectOutcome, InjectError> {
    match injector.inject_key(key) {
        Ok(()) => Ok(InjectOutcome::Injected),
        Err(InjectError::Char(c)) => {
            warn!("skipping {c:?}: named-key injection failed");
            Ok(InjectOutcome::Skipped)
        }
        Err(err) => Err(err),
    }
}

/// Production injector backed by `enigo`, which picks the right display
/// protocol for the running session.
pub struct EnigoInjector {
    enigo: Enigo,
}

impl EnigoInjector {
    pub fn new() -> Result<Self, InjectError> {
        let mut settings = Settings::default();
        settings.linux_delay = BACKEND_KEY_DELAY_MS;

        let enigo =
            Enigo::new(&settings).map_err(|err| InjectError::Init(err.to_string()))?;
        Ok(Self { enigo })
    }
}

impl KeystrokeInjector for EnigoInjector {
    fn inject_char(&mut self, c: char) -> Result<(), InjectError> {
        let mut buf = [0u8; 4];
        self.enigo
            .text(c.encode_utf8(&mut buf))
            .map_err(|err| classify(c, err))
    }

    fn inject_key(&mut self, key: NamedKey) -> Result<(), InjectError> {
        let (key, c) = match key {
            NamedKey::Enter => (Key::Return, '\n'),
            NamedKey::Tab => (Key::Tab, '\t'),
            NamedKey::Char(c) => (Key::Unicode(c), c),
        };
        self.enigo.key(key, Click).map_err(|err| classify(c, err))
    }
}

fn classify(c: char, err: enigo::InputError) -> InjectError {
    match err {
        // Simulate means the event could not reach the display server; that
        // is not specific to this character and will not get better.
        enigo::InputError::Simulate(reason) => InjectError::Backend(reason.to_string()),
        other => {
            debug!("injection attempt for {c:?} failed: {other}");
            InjectError::Char(c)
        }
    }
}
