use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::debug;

use crate::cadence::{self, CadenceConfig, SETTLE_DELAY_MS};
use crate::inject::{
    inject_named_key, inject_with_fallback, InjectOutcome, KeystrokeInjector, NamedKey,
};
use crate::llm::SolutionSource;
use crate::normalize::{normalize_code, normalize_prose};

pub const DEFAULT_COUNTDOWN_SECS: u32 = 3;

/// Where a session is in its life. Transitions only move forward: from
/// `Idle` through `CountingDown` and `Injecting` to one of the terminal
/// phases, with `CountingDown` skipped on the direct path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    CountingDown,
    Injecting,
    Finished,
    Cancelled,
}

/// Lifecycle notification pushed to subscribers, shaped for forwarding to a
/// presentation layer as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Countdown { seconds_left: u32 },
    Started,
    Finished,
    Cancelled,
}

/// What a start request amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartOutcome {
    /// Every character went out; `typed` equals the text length.
    Completed { typed: usize },
    /// Stopped early; `typed` characters went out before the stop.
    Cancelled { typed: usize },
    /// Another session was active; this request was dropped, not queued.
    Busy,
    /// The resolved text was empty; no session was created.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopEnd {
    Completed,
    Cancelled,
}

/// Cancellation token shared between the typing loop and whoever calls
/// `cancel_typing`. Doubles as the loop's sleep timer so a cancel wakes a
/// pending delay immediately instead of letting it run out.
#[derive(Default)]
struct CancelToken {
    flag: Mutex<bool>,
    wake: Condvar,
}

impl CancelToken {
    fn arm(&self) {
        *self.lock() = false;
    }

    fn cancel(&self) {
        *self.lock() = true;
        self.wake.notify_all();
    }

    fn is_cancelled(&self) -> bool {
        *self.lock()
    }

    /// Sleep for `dur`, waking early on cancel. Returns true when the full
    /// duration elapsed uncancelled.
    fn sleep(&self, dur: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, dur, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        !*guard
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        // A bool cannot be left inconsistent by a panicking holder.
        self.flag.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the single-flight guard when the session frame ends, including
/// by panic, so a blown-up injector cannot leave the engine busy forever.
struct ActiveGuard<'a> {
    active: &'a AtomicBool,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// The typing engine: owns the one active session, its phase transitions,
/// the injection loop, and cancellation.
///
/// All methods take `&self`; share a `Typist` across threads with `Arc` and
/// call `cancel_typing` from wherever the stop request originates.
pub struct Typist<I> {
    injector: Mutex<I>,
    active: AtomicBool,
    cancel: CancelToken,
    phase: Mutex<Phase>,
    cursor: AtomicUsize,
    listeners: Mutex<Vec<Sender<SessionEvent>>>,
    cadence: CadenceConfig,
    countdown_secs: u32,
    seed: Option<u64>,
}

impl<I: KeystrokeInjector> Typist<I> {
    pub fn new(injector: I) -> Self {
        Self {
            injector: Mutex::new(injector),
            active: AtomicBool::new(false),
            cancel: CancelToken::default(),
            phase: Mutex::new(Phase::Idle),
            cursor: AtomicUsize::new(0),
            listeners: Mutex::new(Vec::new()),
            cadence: CadenceConfig::default(),
            countdown_secs: DEFAULT_COUNTDOWN_SECS,
            seed: None,
        }
    }

    /// Cadence used by the countdown path and the convenience wrappers.
    pub fn with_cadence(mut self, cadence: CadenceConfig) -> Self {
        self.cadence = cadence;
        self
    }

    /// Countdown used by the convenience wrappers.
    pub fn with_countdown_secs(mut self, secs: u32) -> Self {
        self.countdown_secs = secs;
        self
    }

    /// Pin the cadence RNG for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Register a lifecycle listener. Events arrive in emission order;
    /// dropped receivers are pruned on the next emission.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        self.lock_listeners().push(tx);
        rx
    }

    /// True while a session is counting down or injecting.
    pub fn is_typing(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Index of the next character the active (or last) session would inject.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Ask the active session to stop at its next checkpoint. Safe to call
    /// from any thread, repeatedly, and with no session active; always emits
    /// `Cancelled`. A pending cadence or countdown sleep is woken immediately,
    /// so the stop lands well before the current delay would have elapsed.
    pub fn cancel_typing(&self) {
        debug!("cancel requested");
        self.cancel.cancel();
        self.emit(SessionEvent::Cancelled);
    }

    /// Type `text` into the focused window, no countdown. Blocks the calling
    /// thread until the session reaches a terminal phase.
    ///
    /// Characters go out strictly in order: newline as an Enter key event,
    /// tab as a Tab key event, everything else through the two-attempt
    /// character path. Each keystroke is followed by the cadence delay, and
    /// the gap between any two keystrokes is a cancellation checkpoint.
    pub fn start_typing(&self, text: &str, cadence: CadenceConfig) -> Result<StartOutcome> {
        cadence.validate()?;
        if !self.try_acquire() {
            debug!("typing request dropped: a session is already active");
            return Ok(StartOutcome::Busy);
        }
        let _active = ActiveGuard {
            active: &self.active,
        };

        let chars: Vec<char> = text.chars().collect();
        self.begin_session(Phase::Injecting, chars.len());
        let run = self.inject_all(&chars, &cadence);
        self.finish_session(run)
    }

    /// Count down `countdown_secs` whole seconds, emitting one tick
    /// notification per second with the remaining count, then type `text`
    /// with the engine's cadence. A cancel during the countdown stops the
    /// session before any character is injected.
    pub fn start_typing_with_countdown(
        &self,
        text: &str,
        countdown_secs: u32,
    ) -> Result<StartOutcome> {
        self.cadence.validate()?;
        if !self.try_acquire() {
            debug!("typing request dropped: a session is already active");
            return Ok(StartOutcome::Busy);
        }
        let _active = ActiveGuard {
            active: &self.active,
        };

        let chars: Vec<char> = text.chars().collect();
        self.begin_session(Phase::CountingDown, chars.len());
        let run = self.countdown_then_inject(&chars, countdown_secs);
        self.finish_session(run)
    }

    /// Type a previously stored model response: prose cleanup, then the
    /// standard countdown. An empty response is a no-op; there is nothing
    /// to type.
    pub fn type_stored_response(&self, text: &str) -> Result<StartOutcome> {
        let cleaned = normalize_prose(text);
        if cleaned.is_empty() {
            debug!("no response available to type");
            return Ok(StartOutcome::Empty);
        }
        self.start_typing_with_countdown(&cleaned, self.countdown_secs)
    }

    /// Fetch solution code from `source` and type it: code cleanup, then the
    /// standard countdown. An absent solution is a no-op; a provider failure
    /// propagates and no session starts.
    pub fn type_current_solution<S: SolutionSource>(&self, source: &S) -> Result<StartOutcome> {
        let text = source
            .solution_text()
            .context("failed to obtain solution text")?;
        let cleaned = match text {
            Some(text) => normalize_code(&text),
            None => String::new(),
        };
        if cleaned.is_empty() {
            debug!("no solution available to type");
            return Ok(StartOutcome::Empty);
        }
        self.start_typing_with_countdown(&cleaned, self.countdown_secs)
    }

    fn try_acquire(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn begin_session(&self, phase: Phase, len: usize) {
        // Re-arming here means a cancel that arrived between sessions cannot
        // kill this one.
        self.cancel.arm();
        self.cursor.store(0, Ordering::SeqCst);
        self.set_phase(phase);
        debug!("session started: {len} characters");
    }

    /// Map how the loop ended onto the terminal phase and emit the terminal
    /// notification. The caller's `ActiveGuard` releases the single-flight
    /// guard after this returns, so a new request cannot slip in while the
    /// notification is still going out.
    fn finish_session(&self, run: Result<LoopEnd>) -> Result<StartOutcome> {
        let typed = self.cursor.load(Ordering::SeqCst);
        match run {
            Ok(LoopEnd::Completed) => {
                self.set_phase(Phase::Finished);
                self.emit(SessionEvent::Finished);
                debug!("session finished: {typed} characters");
                Ok(StartOutcome::Completed { typed })
            }
            Ok(LoopEnd::Cancelled) => {
                // The cancellation notification went out when the request was
                // made; emitting again here would double it up.
                self.set_phase(Phase::Cancelled);
                debug!("session cancelled: {typed} characters typed");
                Ok(StartOutcome::Cancelled { typed })
            }
            Err(err) => {
                self.set_phase(Phase::Cancelled);
                self.emit(SessionEvent::Cancelled);
                Err(err)
            }
        }
    }

    fn countdown_then_inject(&self, chars: &[char], countdown_secs: u32) -> Result<LoopEnd> {
        for remaining in (1..=countdown_secs).rev() {
            self.emit(SessionEvent::Countdown {
                seconds_left: remaining,
            });
            self.cancel.sleep(Duration::from_secs(1));
            if self.cancel.is_cancelled() {
                debug!("cancelled during countdown with {remaining}s remaining");
                return Ok(LoopEnd::Cancelled);
            }
        }
        if self.cancel.is_cancelled() {
            return Ok(LoopEnd::Cancelled);
        }

        self.set_phase(Phase::Injecting);
        self.emit(SessionEvent::Started);
        self.inject_all(chars, &self.cadence)
    }

    fn inject_all(&self, chars: &[char], cadence: &CadenceConfig) -> Result<LoopEnd> {
        let mut injector = self.injector.lock().map_err(|_| {
            anyhow!("keystroke injector is unusable after a panic in an earlier session")
        })?;
        let mut rng = rng_from_seed(self.seed);

        self.cancel.sleep(Duration::from_millis(SETTLE_DELAY_MS));

        for (index, &c) in chars.iter().enumerate() {
            if self.cancel.is_cancelled() {
                debug!("cancelled after {index} characters");
                return Ok(LoopEnd::Cancelled);
            }

            let outcome = match c {
                '\n' => inject_named_key(&mut *injector, NamedKey::Enter)?,
                '\t' => inject_named_key(&mut *injector, NamedKey::Tab)?,
                _ => inject_with_fallback(&mut *injector, c)?,
            };
            if outcome == InjectOutcome::Fallback {
                debug!("{c:?} delivered via named-key fallback");
            }
            self.cursor.store(index + 1, Ordering::SeqCst);

            let delay = cadence::delay_after(c, index, cadence, &mut rng);
            if !delay.is_zero() {
                // Interruption is picked up by the checkpoint above; a cancel
                // landing after the final character does not demote the run.
                self.cancel.sleep(delay);
            }
        }

        Ok(LoopEnd::Completed)
    }

    fn emit(&self, event: SessionEvent) {
        self.lock_listeners().retain(|tx| tx.send(event).is_ok());
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<Sender<SessionEvent>>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }
}

fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
