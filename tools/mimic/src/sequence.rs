//! Ordered, editable event sequences with relative timing.

use crate::errors::MimicError;
use crate::event::{Event, EventKind, Point};
use crate::transform::{self, Transform, TransformSpec};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// An ordered list of events plus the transforms scheduled to run on it at
/// every playback assembly. Scheduled transforms never touch `events`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    events: Vec<Event>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    scheduled: Vec<TransformSpec>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: Vec<Event>) -> Self {
        Self {
            events,
            scheduled: Vec::new(),
        }
    }

    /// Builds a sequence from captured, timestamped events, collapsing
    /// pointer travel into start/stop markers.
    pub fn from_recording(captured: &[TimedEvent], policy: &Reabstraction) -> Self {
        let mut timed = captured.to_vec();
        timed.sort_by_key(|event| event.timestamp_ns);
        Self::from_events(collapse_moves(timed, policy))
    }

    /// Re-abstracts an already-relative (typically realized) event list.
    pub fn reabstract(events: &[Event], policy: &Reabstraction) -> Self {
        let mut now = 0u64;
        let timed = events
            .iter()
            .map(|event| {
                now = now.saturating_add(event.delta_ns);
                TimedEvent {
                    timestamp_ns: now,
                    kind: event.kind.clone(),
                }
            })
            .collect::<Vec<_>>();
        Self::from_events(collapse_moves(timed, policy))
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Event> {
        self.events.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Event> {
        self.events.get_mut(index)
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) {
        self.events.extend(events);
    }

    pub fn pop(&mut self, index: usize) -> Result<Event, MimicError> {
        if index >= self.events.len() {
            return Err(MimicError::InvalidParameter(format!(
                "cannot pop index {index} from a sequence of {} events",
                self.events.len()
            )));
        }
        Ok(self.events.remove(index))
    }

    pub fn pop_last(&mut self) -> Result<Event, MimicError> {
        self.events
            .pop()
            .ok_or_else(|| MimicError::InvalidParameter("empty event sequence".to_string()))
    }

    pub fn slice(&self, range: Range<usize>) -> Result<Sequence, MimicError> {
        self.check_range(&range)?;
        Ok(Self::from_events(self.events[range].to_vec()))
    }

    /// Replaces `range` with the events of `replacement` and returns the
    /// removed span. The replacement's scheduled transforms are not carried.
    pub fn splice(&mut self, range: Range<usize>, replacement: Sequence) -> Result<Sequence, MimicError> {
        self.check_range(&range)?;
        let removed = self
            .events
            .splice(range, replacement.events)
            .collect::<Vec<_>>();
        Ok(Self::from_events(removed))
    }

    /// Delta-chains `other` after `self`: `other`'s first delta is relative
    /// to this sequence's last event and no delta changes.
    pub fn concat(&self, other: &Sequence) -> Sequence {
        let mut events = Vec::with_capacity(self.events.len() + other.events.len());
        events.extend_from_slice(&self.events);
        events.extend_from_slice(&other.events);
        Self {
            events,
            scheduled: self.scheduled.clone(),
        }
    }

    pub fn total_duration_ns(&self) -> u64 {
        self.events
            .iter()
            .fold(0u64, |acc, event| acc.saturating_add(event.delta_ns))
    }

    /// Offset of every event from the start of the sequence.
    pub fn absolute_offsets_ns(&self) -> Vec<u64> {
        let mut now = 0u64;
        self.events
            .iter()
            .map(|event| {
                now = now.saturating_add(event.delta_ns);
                now
            })
            .collect()
    }

    pub fn is_atomic(&self) -> bool {
        self.events.iter().all(Event::is_atomic)
    }

    pub fn apply_transform(
        &self,
        transform: &dyn Transform,
        rng: &mut dyn RngCore,
    ) -> Result<Sequence, MimicError> {
        Ok(Self {
            events: transform::apply(transform, &self.events, rng)?,
            scheduled: self.scheduled.clone(),
        })
    }

    pub fn schedule_transform(&mut self, spec: TransformSpec) -> Result<(), MimicError> {
        spec.validate()?;
        self.scheduled.push(spec);
        Ok(())
    }

    pub fn cancel_transform(&mut self) -> Result<TransformSpec, MimicError> {
        self.scheduled
            .pop()
            .ok_or_else(|| MimicError::InvalidParameter("no scheduled transforms".to_string()))
    }

    pub fn scheduled_transforms(&self) -> &[TransformSpec] {
        &self.scheduled
    }

    pub fn clear_scheduled(&mut self) {
        self.scheduled.clear();
    }

    fn check_range(&self, range: &Range<usize>) -> Result<(), MimicError> {
        if range.start > range.end || range.end > self.events.len() {
            return Err(MimicError::InvalidParameter(format!(
                "range {}..{} is outside a sequence of {} events",
                range.start,
                range.end,
                self.events.len()
            )));
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Sequence {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl From<Vec<Event>> for Sequence {
    fn from(events: Vec<Event>) -> Self {
        Self::from_events(events)
    }
}

/// A captured event stamped with nanoseconds since the recording origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub timestamp_ns: u64,
    pub kind: EventKind,
}

/// Thresholds for collapsing pointer-move runs back into travel markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reabstraction {
    /// A gap at least this long between two moves ends a run.
    pub inactivity_ns: u64,
    /// Runs longer than this are split into consecutive stop/start pairs.
    pub max_span_ns: u64,
}

impl Default for Reabstraction {
    fn default() -> Self {
        Self {
            inactivity_ns: 100_000_000,
            max_span_ns: 3_000_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MoveRun {
    started_at: u64,
    last_at: u64,
    last: Point,
    marked: bool,
}

fn collapse_moves(timed: Vec<TimedEvent>, policy: &Reabstraction) -> Vec<Event> {
    let mut out: Vec<(u64, EventKind)> = Vec::with_capacity(timed.len());
    let mut run: Option<MoveRun> = None;

    let close = |run: &mut Option<MoveRun>, out: &mut Vec<(u64, EventKind)>| {
        if let Some(open) = run.take() {
            out.push((
                open.last_at,
                EventKind::PointerMoveStop {
                    x: open.last.x,
                    y: open.last.y,
                },
            ));
        }
    };

    for TimedEvent { timestamp_ns: t, kind } in timed {
        match kind {
            EventKind::PointerMoveTo { x, y } => {
                let point = Point::new(x, y);
                let fresh = MoveRun {
                    started_at: t,
                    last_at: t,
                    last: point,
                    marked: false,
                };
                run = Some(match run {
                    None => {
                        out.push((t, EventKind::PointerMoveStart { x, y }));
                        fresh
                    }
                    Some(open) if open.marked => MoveRun {
                        last_at: t,
                        last: point,
                        ..open
                    },
                    Some(open) if t.saturating_sub(open.last_at) >= policy.inactivity_ns => {
                        let last = open.last;
                        out.push((open.last_at, EventKind::PointerMoveStop { x: last.x, y: last.y }));
                        out.push((t, EventKind::PointerMoveStart { x, y }));
                        fresh
                    }
                    Some(open) if t.saturating_sub(open.started_at) > policy.max_span_ns => {
                        let (at, last) = (open.last_at, open.last);
                        out.push((at, EventKind::PointerMoveStop { x: last.x, y: last.y }));
                        out.push((at, EventKind::PointerMoveStart { x: last.x, y: last.y }));
                        MoveRun {
                            started_at: at,
                            last_at: t,
                            last: point,
                            marked: false,
                        }
                    }
                    Some(open) => MoveRun {
                        last_at: t,
                        last: point,
                        ..open
                    },
                });
            }
            EventKind::PointerMoveStart { x, y } => {
                close(&mut run, &mut out);
                out.push((t, EventKind::PointerMoveStart { x, y }));
                run = Some(MoveRun {
                    started_at: t,
                    last_at: t,
                    last: Point::new(x, y),
                    marked: true,
                });
            }
            EventKind::PointerMoveStop { x, y } => {
                run = None;
                out.push((t, EventKind::PointerMoveStop { x, y }));
            }
            EventKind::KeyPress { .. } | EventKind::KeyRelease { .. } => {
                if let Some(open) = run {
                    if !open.marked && t.saturating_sub(open.last_at) >= policy.inactivity_ns {
                        close(&mut run, &mut out);
                    }
                }
                out.push((t, kind));
            }
            other => {
                close(&mut run, &mut out);
                out.push((t, other));
            }
        }
    }
    close(&mut run, &mut out);

    out.sort_by_key(|(t, _)| *t);
    let mut previous = 0u64;
    out.into_iter()
        .map(|(t, kind)| {
            let delta = t.saturating_sub(previous);
            previous = previous.max(t);
            Event::new(delta, kind)
        })
        .collect()
}
