//! Recording sessions fed by an asynchronous capture producer.
//!
//! Hook callbacks hold a [`CaptureProducer`] and push into an unbounded
//! channel from any thread. The session is the single consumer: `pump`
//! drains the channel into its buffer, and `stop` re-abstracts the buffer
//! into a [`Sequence`].

use crate::errors::MimicError;
use crate::event::{EventKind, Key};
use crate::hotkeys::{describe_chord, normalize, ChordSignal, ChordTracker};
use crate::logging::{emit, JsonlLogger};
use crate::sequence::{Reabstraction, Sequence, TimedEvent};
use serde_json::json;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq)]
pub enum Capture {
    Event { timestamp_ns: u64, kind: EventKind },
    /// Start when idle, stop when active.
    Toggle,
}

/// Cloneable, `Send` handle for hook callbacks.
#[derive(Debug, Clone)]
pub struct CaptureProducer {
    tx: UnboundedSender<Capture>,
}

impl CaptureProducer {
    /// Returns false once the session is gone.
    pub fn send(&self, capture: Capture) -> bool {
        self.tx.send(capture).is_ok()
    }

    pub fn event(&self, timestamp_ns: u64, kind: EventKind) -> bool {
        self.send(Capture::Event { timestamp_ns, kind })
    }

    pub fn toggle(&self) -> bool {
        self.send(Capture::Toggle)
    }
}

#[derive(Debug)]
enum SessionState {
    Idle,
    Active {
        origin_ns: Option<u64>,
        buffer: Vec<TimedEvent>,
    },
}

#[derive(Debug)]
pub struct RecordingSession {
    tx: UnboundedSender<Capture>,
    rx: UnboundedReceiver<Capture>,
    state: SessionState,
    chord: ChordTracker,
    reabstraction: Reabstraction,
    completed: Vec<Sequence>,
    logger: Option<JsonlLogger>,
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new(Reabstraction::default())
    }
}

impl RecordingSession {
    pub fn new(reabstraction: Reabstraction) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            state: SessionState::Idle,
            chord: ChordTracker::default(),
            reabstraction,
            completed: Vec::new(),
            logger: None,
        }
    }

    pub fn with_chord(mut self, chord: ChordTracker) -> Self {
        self.chord = chord;
        self
    }

    pub fn with_logger(mut self, logger: Option<JsonlLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// The process-wide session.
    pub fn global() -> MutexGuard<'static, RecordingSession> {
        static GLOBAL: OnceLock<Mutex<RecordingSession>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Mutex::new(RecordingSession::default()))
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn producer(&self) -> CaptureProducer {
        CaptureProducer {
            tx: self.tx.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active { .. })
    }

    pub fn start(&mut self) -> Result<(), MimicError> {
        self.pump();
        self.begin(None)
    }

    /// Stops the active session and returns what it captured.
    /// A queued toggle that already ended the session still hands back its
    /// sequence.
    pub fn stop(&mut self) -> Result<Sequence, MimicError> {
        self.pump();
        if self.is_active() {
            self.finish()?;
        }
        self.completed
            .pop()
            .ok_or_else(|| MimicError::InvalidParameter("no active recording session".to_string()))
    }

    /// Sequences finished by a toggle signal since the last call.
    pub fn take_completed(&mut self) -> Vec<Sequence> {
        std::mem::take(&mut self.completed)
    }

    /// Drains pending captures. Events arriving while idle are discarded.
    pub fn pump(&mut self) -> usize {
        let mut drained = 0;
        while let Ok(capture) = self.rx.try_recv() {
            drained += 1;
            match capture {
                Capture::Toggle => self.toggle(None),
                Capture::Event { timestamp_ns, kind } => self.capture(timestamp_ns, kind),
            }
        }
        drained
    }

    fn capture(&mut self, timestamp_ns: u64, kind: EventKind) {
        match self.chord.observe(&kind) {
            ChordSignal::Swallow => {}
            ChordSignal::Completed => {
                if let EventKind::KeyPress { key } = kind {
                    self.strip_chord_presses(normalize(key));
                }
                self.toggle(Some(timestamp_ns));
            }
            ChordSignal::Pass => {
                if let SessionState::Active { origin_ns, buffer } = &mut self.state {
                    let origin = *origin_ns.get_or_insert(timestamp_ns);
                    buffer.push(TimedEvent {
                        timestamp_ns: timestamp_ns.saturating_sub(origin),
                        kind,
                    });
                }
            }
        }
    }

    /// Removes the chord's leading presses, already buffered by the time
    /// `completing` finishes it. A key whose latest buffered event is a
    /// release was not held for the chord and keeps its history.
    fn strip_chord_presses(&mut self, completing: Key) {
        let SessionState::Active { buffer, .. } = &mut self.state else {
            return;
        };
        for key in self.chord.keys().filter(|key| *key != completing) {
            let latest = buffer.iter().rposition(|event| match event.kind {
                EventKind::KeyPress { key: seen } | EventKind::KeyRelease { key: seen } => {
                    normalize(seen) == key
                }
                _ => false,
            });
            if let Some(position) = latest {
                if matches!(buffer[position].kind, EventKind::KeyPress { .. }) {
                    buffer.remove(position);
                }
            }
        }
    }

    fn toggle(&mut self, at_ns: Option<u64>) {
        if self.is_active() {
            let _ = self.finish();
        } else {
            let _ = self.begin(at_ns);
        }
    }

    fn begin(&mut self, origin_ns: Option<u64>) -> Result<(), MimicError> {
        if self.is_active() {
            return Err(MimicError::SessionAlreadyActive);
        }
        self.state = SessionState::Active {
            origin_ns,
            buffer: Vec::new(),
        };
        emit(
            self.logger.as_ref(),
            "info",
            "recording.start",
            json!({"hotkey": describe_chord(self.chord.keys())}),
        );
        Ok(())
    }

    fn finish(&mut self) -> Result<(), MimicError> {
        let state = std::mem::replace(&mut self.state, SessionState::Idle);
        let SessionState::Active { buffer, .. } = state else {
            return Err(MimicError::InvalidParameter(
                "no active recording session".to_string(),
            ));
        };
        let sequence = Sequence::from_recording(&buffer, &self.reabstraction);
        emit(
            self.logger.as_ref(),
            "info",
            "recording.stop",
            json!({"captured": buffer.len(), "events": sequence.len()}),
        );
        self.completed.push(sequence);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Button, Event, EventTag, NamedKey};

    #[test]
    fn second_start_fails_while_active() {
        let mut session = RecordingSession::default();
        session.start().expect("start");
        assert_eq!(session.start(), Err(MimicError::SessionAlreadyActive));
        session.stop().expect("stop");
        session.start().expect("restart");
    }

    #[test]
    fn stop_without_start_is_an_error() {
        let mut session = RecordingSession::default();
        assert!(session.stop().is_err());
    }

    #[test]
    fn idle_events_are_discarded() {
        let mut session = RecordingSession::default();
        let producer = session.producer();
        producer.event(5, EventKind::KeyPress { key: Key::Char('x') });
        assert_eq!(session.pump(), 1);
        session.start().expect("start");
        producer.event(10, EventKind::KeyPress { key: Key::Char('y') });
        producer.event(30, EventKind::KeyRelease { key: Key::Char('y') });
        let seq = session.stop().expect("stop");
        assert_eq!(
            seq.events(),
            &[
                Event::key_press(0, Key::Char('y')),
                Event::key_release(20, Key::Char('y')),
            ]
        );
    }

    #[test]
    fn producers_work_from_other_threads() {
        let mut session = RecordingSession::default();
        session.start().expect("start");
        let handles = (0..4u64)
            .map(|i| {
                let producer = session.producer();
                std::thread::spawn(move || {
                    producer.event(i * 10, EventKind::PointerPress { button: Button::Left })
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            assert!(handle.join().expect("join"));
        }
        let seq = session.stop().expect("stop");
        assert_eq!(seq.len(), 4);
    }

    #[test]
    fn hotkey_chord_toggles_and_is_stripped() {
        let mut session = RecordingSession::default();
        let producer = session.producer();
        let ctrl = Key::Named(NamedKey::CtrlLeft);
        let alt = Key::Named(NamedKey::AltLeft);
        let chord = |producer: &CaptureProducer, at: u64| {
            producer.event(at, EventKind::KeyPress { key: ctrl });
            producer.event(at + 1, EventKind::KeyPress { key: alt });
            producer.event(at + 2, EventKind::KeyPress { key: Key::Char('r') });
            producer.event(at + 3, EventKind::KeyRelease { key: Key::Char('r') });
            producer.event(at + 4, EventKind::KeyRelease { key: alt });
            producer.event(at + 5, EventKind::KeyRelease { key: ctrl });
        };

        chord(&producer, 0);
        session.pump();
        assert!(session.is_active());

        producer.event(100, EventKind::PointerPress { button: Button::Left });
        producer.event(150, EventKind::PointerRelease { button: Button::Left });
        chord(&producer, 1_000);
        session.pump();
        assert!(!session.is_active());

        let completed = session.take_completed();
        assert_eq!(completed.len(), 1);
        let tags = completed[0].iter().map(Event::tag).collect::<Vec<_>>();
        assert_eq!(tags, vec![EventTag::PointerPress, EventTag::PointerRelease]);
        assert_eq!(completed[0].get(0).map(|e| e.delta_ns), Some(98));
    }

    #[test]
    fn explicit_toggle_signals_drive_the_lifecycle() {
        let mut session = RecordingSession::default();
        let producer = session.producer();
        producer.toggle();
        producer.event(7, EventKind::PointerMoveTo { x: 1, y: 1 });
        producer.toggle();
        session.pump();
        let completed = session.take_completed();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].len(), 2);
        assert!(!session.is_active());
    }

    #[test]
    fn chord_key_pressed_earlier_by_the_user_survives_the_strip() {
        let mut session = RecordingSession::default();
        let producer = session.producer();
        session.start().expect("start");
        producer.event(0, EventKind::KeyPress { key: Key::Char('r') });
        producer.event(10, EventKind::KeyRelease { key: Key::Char('r') });
        producer.event(20, EventKind::KeyPress { key: Key::Named(NamedKey::CtrlLeft) });
        producer.event(21, EventKind::KeyPress { key: Key::Named(NamedKey::AltRight) });
        producer.event(22, EventKind::KeyPress { key: Key::Char('r') });
        session.pump();
        assert!(!session.is_active());

        let completed = session.take_completed();
        assert_eq!(completed.len(), 1);
        assert_eq!(
            completed[0].events(),
            &[
                Event::key_press(0, Key::Char('r')),
                Event::key_release(10, Key::Char('r')),
            ]
        );
    }

    #[test]
    fn stop_returns_a_session_already_ended_by_a_queued_toggle() {
        let mut session = RecordingSession::default();
        let producer = session.producer();
        session.start().expect("start");
        producer.event(3, EventKind::PointerPress { button: Button::Left });
        producer.toggle();
        let seq = session.stop().expect("stop");
        assert_eq!(seq.len(), 1);
        assert!(!session.is_active());
        assert!(session.take_completed().is_empty());
    }
}
