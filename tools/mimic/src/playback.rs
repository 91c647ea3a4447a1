//! Timed dispatch of atomic events against absolute deadlines.

use crate::errors::MimicError;
use crate::event::{Event, Expander, MovePolicy};
use crate::logging::{emit, JsonlLogger};
use crate::runtime::{Clock, MonotonicClock};
use crate::sequence::Sequence;
use rand::RngCore;
use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

pub const DEFAULT_CANCEL_POLL: Duration = Duration::from_millis(50);

/// Injects atomic events into the target. Dispatch is fire-and-forget: no
/// acknowledgement beyond the returned error.
pub trait Backend: Send {
    fn dispatch(&mut self, event: &Event) -> Result<(), MimicError>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn dispatch(&mut self, event: &Event) -> Result<(), MimicError> {
        (**self).dispatch(event)
    }
}

/// Keeps every dispatched event in memory.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    dispatched: Vec<Event>,
    fail_at: Option<usize>,
    cancel_at: Option<(usize, CancelToken)>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The dispatch with this zero-based index fails.
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Raises `token` right after the dispatch with this index.
    pub fn cancelling_at(mut self, index: usize, token: CancelToken) -> Self {
        self.cancel_at = Some((index, token));
        self
    }

    pub fn dispatched(&self) -> &[Event] {
        &self.dispatched
    }
}

impl Backend for RecordingBackend {
    fn dispatch(&mut self, event: &Event) -> Result<(), MimicError> {
        let index = self.dispatched.len();
        if self.fail_at == Some(index) {
            return Err(MimicError::Backend(format!(
                "injected failure at event {index}"
            )));
        }
        self.dispatched.push(event.clone());
        if let Some((at, token)) = &self.cancel_at {
            if *at == index {
                token.cancel();
            }
        }
        Ok(())
    }
}

/// Writes each dispatched event as one JSON line, for dry runs or for
/// piping into an external injector.
pub struct JsonlBackend<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonlBackend<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> Backend for JsonlBackend<W> {
    fn dispatch(&mut self, event: &Event) -> Result<(), MimicError> {
        let line = serde_json::to_string(event).map_err(|e| MimicError::Backend(e.to_string()))?;
        writeln!(self.writer, "{line}")
            .and_then(|()| self.writer.flush())
            .map_err(|e| MimicError::Backend(e.to_string()))
    }
}

/// Shared cancellation flag polled by the player at each wait boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide token, e.g. for a cancel hotkey or signal handler.
    pub fn global() -> &'static CancelToken {
        static GLOBAL: OnceLock<CancelToken> = OnceLock::new();
        GLOBAL.get_or_init(CancelToken::new)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Admits one playback at a time across every player sharing it.
#[derive(Debug, Clone, Default)]
pub struct PlaybackLock {
    held: Arc<AtomicBool>,
}

impl PlaybackLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide lock every player uses unless told otherwise.
    pub fn global() -> &'static PlaybackLock {
        static GLOBAL: OnceLock<PlaybackLock> = OnceLock::new();
        GLOBAL.get_or_init(PlaybackLock::new)
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> Result<ActiveGuard<'_>, MimicError> {
        if self.held.swap(true, Ordering::SeqCst) {
            return Err(MimicError::PlaybackActive);
        }
        Ok(ActiveGuard(&self.held))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackStatus {
    Completed,
    Cancelled,
    BackendFailed { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackOutcome {
    /// Every event that reached the backend, in order, with its scheduled
    /// delta. Replaying it verbatim reproduces the playback.
    pub realized: Sequence,
    pub status: PlaybackStatus,
}

impl PlaybackOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == PlaybackStatus::Completed
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackOptions {
    pub policy: MovePolicy,
    pub cancel_poll: Duration,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            policy: MovePolicy::default(),
            cancel_poll: DEFAULT_CANCEL_POLL,
        }
    }
}

pub struct Player<B: Backend> {
    backend: Mutex<B>,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
    options: PlaybackOptions,
    logger: Option<JsonlLogger>,
    lock: PlaybackLock,
}

struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<B: Backend> Player<B> {
    /// A player on the monotonic clock, listening to the global cancel token
    /// and holding the global playback lock while it plays.
    pub fn new(backend: B) -> Self {
        Self {
            backend: Mutex::new(backend),
            clock: Arc::new(MonotonicClock),
            cancel: CancelToken::global().clone(),
            options: PlaybackOptions::default(),
            logger: None,
            lock: PlaybackLock::global().clone(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_lock(mut self, lock: PlaybackLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_options(mut self, options: PlaybackOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_logger(mut self, logger: Option<JsonlLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn options(&self) -> &PlaybackOptions {
        &self.options
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn logger(&self) -> Option<&JsonlLogger> {
        self.logger.as_ref()
    }

    /// True while any player sharing this player's lock is playing.
    pub fn is_playing(&self) -> bool {
        self.lock.is_held()
    }

    pub fn backend(&self) -> MutexGuard<'_, B> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn into_backend(self) -> B {
        self.backend
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Expands `events` (with `policy` or the player's own) and dispatches
    /// them. Expansion finishes before the first dispatch, so malformed
    /// input fails without side effects.
    pub fn play(
        &self,
        events: &[Event],
        policy: Option<&MovePolicy>,
        rng: &mut dyn RngCore,
    ) -> Result<PlaybackOutcome, MimicError> {
        let _guard = self.lock.acquire()?;
        let policy = policy.unwrap_or(&self.options.policy).clone();
        policy.validate()?;
        let timeline = Expander::new(policy, rng).expand_all(events)?;
        self.run(&timeline)
    }

    /// Plays an already-atomic sequence verbatim, with no transforms.
    pub fn replay(&self, realized: &Sequence) -> Result<PlaybackOutcome, MimicError> {
        let _guard = self.lock.acquire()?;
        if let Some(event) = realized.iter().find(|event| !event.is_atomic()) {
            return Err(MimicError::InvalidParameter(format!(
                "replay needs atomic events, found {}",
                event.tag().as_str()
            )));
        }
        self.run(realized.events())
    }

    fn run(&self, timeline: &[Event]) -> Result<PlaybackOutcome, MimicError> {
        let logger = self.logger.as_ref();
        let total_ns = timeline
            .iter()
            .fold(0u64, |acc, event| acc.saturating_add(event.delta_ns));
        emit(
            logger,
            "info",
            "playback.start",
            json!({"events": timeline.len(), "duration_ns": total_ns}),
        );

        let mut backend = self.backend();
        let anchor = self.clock.now();
        let mut offset_ns = 0u64;
        let mut realized = Vec::with_capacity(timeline.len());
        let mut status = PlaybackStatus::Completed;

        for event in timeline {
            offset_ns = offset_ns.saturating_add(event.delta_ns);
            let deadline = anchor + Duration::from_nanos(offset_ns);
            if !self.wait_until(deadline)? || self.cancel.is_cancelled() {
                status = PlaybackStatus::Cancelled;
                break;
            }
            if let Err(err) = backend.dispatch(event) {
                status = PlaybackStatus::BackendFailed {
                    message: err.to_string(),
                };
                break;
            }
            realized.push(event.clone());
        }

        match &status {
            PlaybackStatus::Completed => emit(
                logger,
                "info",
                "playback.complete",
                json!({"dispatched": realized.len()}),
            ),
            PlaybackStatus::Cancelled => emit(
                logger,
                "warn",
                "playback.cancelled",
                json!({"dispatched": realized.len(), "remaining": timeline.len() - realized.len()}),
            ),
            PlaybackStatus::BackendFailed { message } => emit(
                logger,
                "error",
                "playback.backend_failed",
                json!({"dispatched": realized.len(), "error": message}),
            ),
        }

        Ok(PlaybackOutcome {
            realized: Sequence::from_events(realized),
            status,
        })
    }

    /// Sleeps toward `deadline` in slices no longer than the cancel poll.
    /// Returns false if cancellation was observed first.
    fn wait_until(&self, deadline: Instant) -> Result<bool, MimicError> {
        let poll = self.options.cancel_poll.max(Duration::from_millis(1));
        loop {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }
            let now = self.clock.now();
            if now >= deadline {
                return Ok(true);
            }
            self.clock.sleep_until(deadline.min(now + poll))?;
        }
    }
}
