use std::time::Duration;

use anyhow::{ensure, Result};
use rand::Rng;

/// Fixed pause before the first keystroke of a session, giving the OS time to
/// finish moving focus to the target window.
pub const SETTLE_DELAY_MS: u64 = 200;

/// An extra hesitation lands after every `RHYTHM_STRIDE`-th character.
pub const RHYTHM_STRIDE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CadenceConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 8,
            max_delay_ms: 28,
        }
    }
}

impl CadenceConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.min_delay_ms <= self.max_delay_ms,
            "min_delay_ms must be <= max_delay_ms"
        );
        Ok(())
    }
}

/// Bucket that selects a character's post-keystroke pause range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayClass {
    Punctuation,
    Space,
    Newline,
    Tab,
    Ordinary,
}

impl DelayClass {
    pub fn of(c: char) -> Self {
        match c {
            ',' | '.' | ';' | ':' | '!' | '?' => DelayClass::Punctuation,
            ' ' => DelayClass::Space,
            '\n' => DelayClass::Newline,
            '\t' => DelayClass::Tab,
            _ => DelayClass::Ordinary,
        }
    }
}

fn base_delay_ms(class: DelayClass, cfg: &CadenceConfig, rng: &mut impl Rng) -> u64 {
    match class {
        DelayClass::Punctuation => rng.gen_range(80..200),
        DelayClass::Space => rng.gen_range(20..50),
        // Enter and Tab go out as dedicated key events with no extra cadence.
        DelayClass::Newline | DelayClass::Tab => 0,
        DelayClass::Ordinary => rng.gen_range(cfg.min_delay_ms..=cfg.max_delay_ms),
    }
}

fn rhythm_pause_ms(index: usize, rng: &mut impl Rng) -> u64 {
    if index > 0 && index % RHYTHM_STRIDE == 0 {
        rng.gen_range(50..150)
    } else {
        0
    }
}

/// Pause to apply after injecting `c`, the `index`-th character of the text.
///
/// Pure in `(c, index, cfg, rng)`; a seeded RNG reproduces the exact same
/// cadence.
pub fn delay_after(c: char, index: usize, cfg: &CadenceConfig, rng: &mut impl Rng) -> Duration {
    let ms = base_delay_ms(DelayClass::of(c), cfg, rng) + rhythm_pause_ms(index, rng);
    Duration::from_millis(ms)
}
