//! Event model: atomic pointer/keyboard primitives, abstract composites, and
//! the expansion from one to the other.

use crate::errors::MimicError;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Button {
    Left,
    Right,
    Middle,
    Other(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedKey {
    Enter,
    Tab,
    Space,
    Backspace,
    Delete,
    Insert,
    Escape,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    CapsLock,
    ShiftLeft,
    ShiftRight,
    CtrlLeft,
    CtrlRight,
    AltLeft,
    AltRight,
    Meta,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Char(char),
    Named(NamedKey),
    /// Raw virtual-key code for keys the backend knows but `NamedKey` does not.
    Code(u32),
}

impl Key {
    pub fn from_char(c: char) -> Self {
        match c {
            '\n' | '\r' => Self::Named(NamedKey::Enter),
            '\t' => Self::Named(NamedKey::Tab),
            ' ' => Self::Named(NamedKey::Space),
            other => Self::Char(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Where a click lands: a fixed point, or a point drawn uniformly inside a
/// region each time the click is expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Point(Point),
    RandomIn(Region),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOrder {
    Same,
    #[default]
    Inverse,
    Random,
}

/// A key combination: every key is pressed in order, then all are released
/// in `release_order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotkey {
    pub keys: Vec<Key>,
    #[serde(default)]
    pub release_order: ReleaseOrder,
}

impl Hotkey {
    pub fn new(keys: Vec<Key>) -> Self {
        Self {
            keys,
            release_order: ReleaseOrder::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    Literal(String),
    Keys(Vec<Key>),
    Chord(Hotkey),
    /// One word drawn uniformly per expansion, typed as a literal.
    RandomWord(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    PointerMoveBy {
        dx: i32,
        dy: i32,
    },
    PointerMoveTo {
        x: i32,
        y: i32,
    },
    PointerPress {
        button: Button,
    },
    PointerRelease {
        button: Button,
    },
    PointerScroll {
        dx: i32,
        dy: i32,
    },
    KeyPress {
        key: Key,
    },
    KeyRelease {
        key: Key,
    },
    /// The pointer left `(x, y)` after a period of rest.
    PointerMoveStart {
        x: i32,
        y: i32,
    },
    /// The pointer came to rest at `(x, y)`; the event delta is the travel time.
    PointerMoveStop {
        x: i32,
        y: i32,
    },
    PointerClickTo {
        move_duration_ns: u64,
        click_delay_ns: u64,
        target: Target,
        button: Button,
        clicks: u32,
    },
    /// The event delta is the wait before the first key; `rate` is in
    /// characters per second.
    TextEntry {
        text: TextSource,
        rate: f64,
    },
}

/// Fieldless discriminant of [`EventKind`], used to filter by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTag {
    PointerMoveBy,
    PointerMoveTo,
    PointerPress,
    PointerRelease,
    PointerScroll,
    KeyPress,
    KeyRelease,
    PointerMoveStart,
    PointerMoveStop,
    PointerClickTo,
    TextEntry,
}

impl EventTag {
    pub fn is_atomic(self) -> bool {
        !matches!(
            self,
            Self::PointerMoveStart | Self::PointerMoveStop | Self::PointerClickTo | Self::TextEntry
        )
    }

    pub fn is_keyboard(self) -> bool {
        matches!(self, Self::KeyPress | Self::KeyRelease | Self::TextEntry)
    }

    pub fn is_pointer(self) -> bool {
        !self.is_keyboard()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PointerMoveBy => "pointer_move_by",
            Self::PointerMoveTo => "pointer_move_to",
            Self::PointerPress => "pointer_press",
            Self::PointerRelease => "pointer_release",
            Self::PointerScroll => "pointer_scroll",
            Self::KeyPress => "key_press",
            Self::KeyRelease => "key_release",
            Self::PointerMoveStart => "pointer_move_start",
            Self::PointerMoveStop => "pointer_move_stop",
            Self::PointerClickTo => "pointer_click_to",
            Self::TextEntry => "text_entry",
        }
    }
}

impl EventKind {
    pub fn tag(&self) -> EventTag {
        match self {
            Self::PointerMoveBy { .. } => EventTag::PointerMoveBy,
            Self::PointerMoveTo { .. } => EventTag::PointerMoveTo,
            Self::PointerPress { .. } => EventTag::PointerPress,
            Self::PointerRelease { .. } => EventTag::PointerRelease,
            Self::PointerScroll { .. } => EventTag::PointerScroll,
            Self::KeyPress { .. } => EventTag::KeyPress,
            Self::KeyRelease { .. } => EventTag::KeyRelease,
            Self::PointerMoveStart { .. } => EventTag::PointerMoveStart,
            Self::PointerMoveStop { .. } => EventTag::PointerMoveStop,
            Self::PointerClickTo { .. } => EventTag::PointerClickTo,
            Self::TextEntry { .. } => EventTag::TextEntry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Nanoseconds since the previous event of the sequence.
    pub delta_ns: u64,
    pub kind: EventKind,
}

impl Event {
    pub fn new(delta_ns: u64, kind: EventKind) -> Self {
        Self { delta_ns, kind }
    }

    pub fn move_to(delta_ns: u64, x: i32, y: i32) -> Self {
        Self::new(delta_ns, EventKind::PointerMoveTo { x, y })
    }

    pub fn move_by(delta_ns: u64, dx: i32, dy: i32) -> Self {
        Self::new(delta_ns, EventKind::PointerMoveBy { dx, dy })
    }

    pub fn press(delta_ns: u64, button: Button) -> Self {
        Self::new(delta_ns, EventKind::PointerPress { button })
    }

    pub fn release(delta_ns: u64, button: Button) -> Self {
        Self::new(delta_ns, EventKind::PointerRelease { button })
    }

    pub fn key_press(delta_ns: u64, key: Key) -> Self {
        Self::new(delta_ns, EventKind::KeyPress { key })
    }

    pub fn key_release(delta_ns: u64, key: Key) -> Self {
        Self::new(delta_ns, EventKind::KeyRelease { key })
    }

    pub fn move_start(delta_ns: u64, x: i32, y: i32) -> Self {
        Self::new(delta_ns, EventKind::PointerMoveStart { x, y })
    }

    pub fn move_stop(delta_ns: u64, x: i32, y: i32) -> Self {
        Self::new(delta_ns, EventKind::PointerMoveStop { x, y })
    }

    pub fn click_to(
        delta_ns: u64,
        move_duration_ns: u64,
        click_delay_ns: u64,
        target: Target,
        button: Button,
    ) -> Self {
        Self::new(
            delta_ns,
            EventKind::PointerClickTo {
                move_duration_ns,
                click_delay_ns,
                target,
                button,
                clicks: 1,
            },
        )
    }

    pub fn text_entry(wait_ns: u64, text: impl Into<String>, rate: f64) -> Self {
        Self::new(
            wait_ns,
            EventKind::TextEntry {
                text: TextSource::Literal(text.into()),
                rate,
            },
        )
    }

    pub fn tag(&self) -> EventTag {
        self.kind.tag()
    }

    pub fn is_atomic(&self) -> bool {
        self.tag().is_atomic()
    }

    /// Pointer position this event leaves the cursor at, when it names one.
    pub fn position(&self) -> Option<Point> {
        match &self.kind {
            EventKind::PointerMoveTo { x, y }
            | EventKind::PointerMoveStart { x, y }
            | EventKind::PointerMoveStop { x, y } => Some(Point::new(*x, *y)),
            EventKind::PointerClickTo {
                target: Target::Point(point),
                ..
            } => Some(*point),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), MimicError> {
        match &self.kind {
            EventKind::PointerClickTo {
                target: Target::RandomIn(region),
                ..
            } if region.width == 0 || region.height == 0 => Err(MimicError::MalformedEvent(
                "pointer_click_to target region must have a non-zero area".to_string(),
            )),
            EventKind::TextEntry { rate, .. } if !rate.is_finite() || *rate <= 0.0 => {
                Err(MimicError::MalformedEvent(format!(
                    "text_entry rate must be a positive number of characters per second, got {rate}"
                )))
            }
            EventKind::TextEntry {
                text: TextSource::Chord(hotkey),
                ..
            } if hotkey.keys.is_empty() => Err(MimicError::MalformedEvent(
                "text_entry chord has no keys".to_string(),
            )),
            EventKind::TextEntry {
                text: TextSource::RandomWord(words),
                ..
            } if words.is_empty() => Err(MimicError::MalformedEvent(
                "text_entry random word list is empty".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Curve {
    Linear,
    /// Quadratic Bezier through a random control point inside a disc of
    /// radius `spread * half_distance` centred on the midpoint.
    QuadraticBezier { spread: f64 },
}

/// Resampling policy for abstract pointer travel.
///
/// The default emits one step per 10 ms of travel, never shorter than
/// 100 µs, along a randomly bowed quadratic Bezier curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovePolicy {
    pub step_interval_ns: u64,
    pub min_step_ns: u64,
    pub max_steps: u32,
    pub curve: Curve,
    pub smooth: bool,
}

impl Default for MovePolicy {
    fn default() -> Self {
        Self {
            step_interval_ns: 10_000_000,
            min_step_ns: 100_000,
            max_steps: 1000,
            curve: Curve::QuadraticBezier { spread: 1.2 },
            smooth: true,
        }
    }
}

impl MovePolicy {
    pub fn validate(&self) -> Result<(), MimicError> {
        if self.step_interval_ns == 0 {
            return Err(MimicError::InvalidParameter(
                "move policy step_interval_ns must be greater than zero".to_string(),
            ));
        }
        if self.max_steps == 0 {
            return Err(MimicError::InvalidParameter(
                "move policy max_steps must be greater than zero".to_string(),
            ));
        }
        if let Curve::QuadraticBezier { spread } = self.curve {
            if !spread.is_finite() || spread < 0.0 {
                return Err(MimicError::InvalidParameter(format!(
                    "bezier spread must be a non-negative number, got {spread}"
                )));
            }
        }
        Ok(())
    }

    pub fn step_count(&self, duration_ns: u64) -> u64 {
        let interval = self.step_interval_ns.max(1);
        let mut steps = (duration_ns / interval).clamp(1, u64::from(self.max_steps.max(1)));
        if self.min_step_ns > 0 {
            steps = steps.min((duration_ns / self.min_step_ns).max(1));
        }
        steps
    }
}

/// Expands abstract events into atomic ones while tracking where the
/// pointer is, so consecutive travel segments join up.
pub struct Expander<'r> {
    policy: MovePolicy,
    cursor: Option<Point>,
    rng: &'r mut dyn RngCore,
}

impl<'r> Expander<'r> {
    pub fn new(policy: MovePolicy, rng: &'r mut dyn RngCore) -> Self {
        Self {
            policy,
            cursor: None,
            rng,
        }
    }

    pub fn with_cursor(mut self, cursor: Point) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn cursor(&self) -> Option<Point> {
        self.cursor
    }

    pub fn expand_all(&mut self, events: &[Event]) -> Result<Vec<Event>, MimicError> {
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            out.extend(self.expand(event)?);
        }
        Ok(out)
    }

    pub fn expand(&mut self, event: &Event) -> Result<Vec<Event>, MimicError> {
        event.validate()?;
        let expanded = match &event.kind {
            EventKind::PointerMoveTo { x, y } => {
                self.cursor = Some(Point::new(*x, *y));
                vec![event.clone()]
            }
            EventKind::PointerMoveBy { dx, dy } => {
                if let Some(cursor) = self.cursor {
                    self.cursor = Some(Point::new(
                        cursor.x.saturating_add(*dx),
                        cursor.y.saturating_add(*dy),
                    ));
                }
                vec![event.clone()]
            }
            EventKind::PointerPress { .. }
            | EventKind::PointerRelease { .. }
            | EventKind::PointerScroll { .. }
            | EventKind::KeyPress { .. }
            | EventKind::KeyRelease { .. } => vec![event.clone()],
            EventKind::PointerMoveStart { x, y } => {
                self.cursor = Some(Point::new(*x, *y));
                vec![Event::move_to(event.delta_ns, *x, *y)]
            }
            EventKind::PointerMoveStop { x, y } => {
                self.travel(Point::new(*x, *y), event.delta_ns, 0)
            }
            EventKind::PointerClickTo {
                move_duration_ns,
                click_delay_ns,
                target,
                button,
                clicks,
            } => {
                let point = self.resolve_target(target);
                let mut out = self.travel(point, *move_duration_ns, event.delta_ns);
                for click in 0..*clicks {
                    let press_delta = if click == 0 { 0 } else { *click_delay_ns };
                    out.push(Event::press(press_delta, *button));
                    out.push(Event::release(*click_delay_ns, *button));
                }
                out
            }
            EventKind::TextEntry { text, rate } => self.type_text(event.delta_ns, text, *rate),
        };
        Ok(expanded)
    }

    fn resolve_target(&mut self, target: &Target) -> Point {
        match target {
            Target::Point(point) => *point,
            Target::RandomIn(region) => {
                let dx = self.rng.random_range(0..region.width);
                let dy = self.rng.random_range(0..region.height);
                Point::new(
                    region.x.saturating_add(i32::try_from(dx).unwrap_or(i32::MAX)),
                    region.y.saturating_add(i32::try_from(dy).unwrap_or(i32::MAX)),
                )
            }
        }
    }

    /// Travel from the current cursor to `to` over `duration_ns`. The step
    /// deltas sum to `duration_ns`; `lead_ns` is added to the first step.
    fn travel(&mut self, to: Point, duration_ns: u64, lead_ns: u64) -> Vec<Event> {
        let from = self.cursor.unwrap_or(to);
        self.cursor = Some(to);
        if !self.policy.smooth {
            return vec![Event::move_to(lead_ns.saturating_add(duration_ns), to.x, to.y)];
        }

        let steps = self.policy.step_count(duration_ns);
        let base = duration_ns / steps;
        let remainder = duration_ns % steps;
        let control = match self.policy.curve {
            Curve::Linear => None,
            Curve::QuadraticBezier { spread } => Some(random_control_point(from, to, spread, self.rng)),
        };

        let mut out = Vec::with_capacity(steps as usize);
        for i in 1..=steps {
            let mut delta = base + u64::from(i <= remainder);
            if i == 1 {
                delta = delta.saturating_add(lead_ns);
            }
            let point = if i == steps {
                to
            } else {
                let t = i as f64 / steps as f64;
                match control {
                    Some(control) => quadratic_bezier(from, control, to, t),
                    None => lerp(from, to, t),
                }
            };
            out.push(Event::move_to(delta, point.x, point.y));
        }
        out
    }

    fn type_text(&mut self, wait_ns: u64, text: &TextSource, rate: f64) -> Vec<Event> {
        let half = (NANOS_PER_SECOND as f64 / rate / 2.0).round() as u64;
        let mut out = match text {
            TextSource::Literal(text) => key_pairs(text.chars().map(Key::from_char), half),
            TextSource::Keys(keys) => key_pairs(keys.iter().copied(), half),
            TextSource::RandomWord(words) => match words.choose(&mut *self.rng) {
                Some(word) => key_pairs(word.chars().map(Key::from_char), half),
                None => Vec::new(),
            },
            TextSource::Chord(hotkey) => {
                let mut out = hotkey
                    .keys
                    .iter()
                    .map(|key| Event::key_press(half.saturating_mul(2), *key))
                    .collect::<Vec<_>>();
                let mut releases = hotkey.keys.clone();
                match hotkey.release_order {
                    ReleaseOrder::Same => {}
                    ReleaseOrder::Inverse => releases.reverse(),
                    ReleaseOrder::Random => releases.shuffle(&mut *self.rng),
                }
                for (idx, key) in releases.into_iter().enumerate() {
                    let delta = if idx == 0 { half.saturating_mul(4) } else { half };
                    out.push(Event::key_release(delta, key));
                }
                out
            }
        };
        if let Some(first) = out.first_mut() {
            first.delta_ns = wait_ns;
        }
        out
    }
}

/// Expands one event with a fresh expander (unknown cursor position).
pub fn expand(
    event: &Event,
    policy: &MovePolicy,
    rng: &mut dyn RngCore,
) -> Result<Vec<Event>, MimicError> {
    Expander::new(policy.clone(), rng).expand(event)
}

fn key_pairs(keys: impl Iterator<Item = Key>, half: u64) -> Vec<Event> {
    keys.flat_map(|key| [Event::key_press(half, key), Event::key_release(half, key)])
        .collect()
}

fn lerp(from: Point, to: Point, t: f64) -> Point {
    Point::new(
        (f64::from(from.x) + (f64::from(to.x) - f64::from(from.x)) * t).round() as i32,
        (f64::from(from.y) + (f64::from(to.y) - f64::from(from.y)) * t).round() as i32,
    )
}

fn quadratic_bezier(p0: Point, p1: Point, p2: Point, t: f64) -> Point {
    let u = 1.0 - t;
    let coord = |a: i32, b: i32, c: i32| {
        let (a, b, c) = (f64::from(a), f64::from(b), f64::from(c));
        (b + u * u * (a - b) + t * t * (c - b)).round() as i32
    };
    Point::new(coord(p0.x, p1.x, p2.x), coord(p0.y, p1.y, p2.y))
}

fn random_control_point(from: Point, to: Point, spread: f64, rng: &mut dyn RngCore) -> Point {
    let half_x = (f64::from(to.x) - f64::from(from.x)) / 2.0;
    let half_y = (f64::from(to.y) - f64::from(from.y)) / 2.0;
    let angle = (rng.random::<f64>() - 0.5) * 2.0 * std::f64::consts::PI;
    let radius = rng.random::<f64>() * spread;
    let (sin, cos) = angle.sin_cos();
    let mid_x = (f64::from(from.x) + f64::from(to.x)) / 2.0;
    let mid_y = (f64::from(from.y) + f64::from(to.y)) / 2.0;
    Point::new(
        (mid_x + (half_x * cos - half_y * sin) * radius).round() as i32,
        (mid_y + (half_x * sin + half_y * cos) * radius).round() as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(7)
    }

    fn atomic_samples() -> Vec<Event> {
        vec![
            Event::move_to(5, 10, 20),
            Event::move_by(0, -3, 4),
            Event::press(12, Button::Left),
            Event::release(3, Button::Other(4)),
            Event::new(9, EventKind::PointerScroll { dx: 0, dy: -2 }),
            Event::key_press(1, Key::Char('a')),
            Event::key_release(1, Key::Named(NamedKey::Enter)),
        ]
    }

    #[test]
    fn expansion_is_identity_on_atomic_events() {
        let mut rng = rng();
        for event in atomic_samples() {
            let out = expand(&event, &MovePolicy::default(), &mut rng).expect("expand");
            assert_eq!(out, vec![event]);
        }
    }

    #[test]
    fn move_stop_steps_sum_to_travel_time_and_land_on_target() {
        let mut rng = rng();
        let policy = MovePolicy::default();
        let mut expander = Expander::new(policy, &mut rng).with_cursor(Point::new(0, 0));
        let out = expander
            .expand(&Event::move_stop(95_000_003, 300, 150))
            .expect("expand");

        assert_eq!(out.len(), 9);
        assert_eq!(out.iter().map(|e| e.delta_ns).sum::<u64>(), 95_000_003);
        assert!(out.iter().all(Event::is_atomic));
        assert_eq!(out.last().and_then(Event::position), Some(Point::new(300, 150)));
        assert_eq!(expander.cursor(), Some(Point::new(300, 150)));
    }

    #[test]
    fn rough_policy_collapses_travel_into_one_jump() {
        let mut rng = rng();
        let policy = MovePolicy {
            smooth: false,
            ..MovePolicy::default()
        };
        let out = expand(&Event::move_stop(40_000_000, 8, 9), &policy, &mut rng).expect("expand");
        assert_eq!(out, vec![Event::move_to(40_000_000, 8, 9)]);
    }

    #[test]
    fn move_start_anchors_path_with_its_own_delta() {
        let mut rng = rng();
        let out = expand(&Event::move_start(77, 1, 2), &MovePolicy::default(), &mut rng)
            .expect("expand");
        assert_eq!(out, vec![Event::move_to(77, 1, 2)]);
    }

    #[test]
    fn click_to_moves_then_presses_and_releases() {
        let mut rng = rng();
        let policy = MovePolicy {
            curve: Curve::Linear,
            ..MovePolicy::default()
        };
        let mut expander = Expander::new(policy, &mut rng).with_cursor(Point::new(0, 0));
        let event = Event::click_to(
            1_000,
            20_000_000,
            50_000_000,
            Target::Point(Point::new(100, 0)),
            Button::Left,
        );
        let out = expander.expand(&event).expect("expand");

        let (moves, clicks) = out.split_at(out.len() - 2);
        assert_eq!(moves.len(), 2);
        assert_eq!(moves[0], Event::move_to(10_001_000, 50, 0));
        assert_eq!(moves[1], Event::move_to(10_000_000, 100, 0));
        assert_eq!(clicks[0], Event::press(0, Button::Left));
        assert_eq!(clicks[1], Event::release(50_000_000, Button::Left));
        let total: u64 = out.iter().map(|e| e.delta_ns).sum();
        assert_eq!(total, 1_000 + 20_000_000 + 50_000_000);
    }

    #[test]
    fn double_click_separates_clicks_by_delay() {
        let mut rng = rng();
        let event = Event::new(
            0,
            EventKind::PointerClickTo {
                move_duration_ns: 0,
                click_delay_ns: 30,
                target: Target::Point(Point::new(4, 4)),
                button: Button::Right,
                clicks: 2,
            },
        );
        let out = expand(&event, &MovePolicy::default(), &mut rng).expect("expand");
        let deltas = out.iter().map(|e| e.delta_ns).collect::<Vec<_>>();
        assert_eq!(deltas, vec![0, 0, 30, 30, 30]);
    }

    #[test]
    fn random_region_target_stays_inside_region() {
        let mut rng = rng();
        let region = Region {
            x: 10,
            y: 20,
            width: 5,
            height: 3,
        };
        for _ in 0..50 {
            let event = Event::click_to(0, 0, 0, Target::RandomIn(region), Button::Left);
            let out = expand(&event, &MovePolicy::default(), &mut rng).expect("expand");
            let point = out[0].position().expect("position");
            assert!((10..15).contains(&point.x));
            assert!((20..23).contains(&point.y));
        }
    }

    #[test]
    fn text_entry_paces_keys_at_rate_after_wait() {
        let mut rng = rng();
        let out = expand(
            &Event::text_entry(500, "hi\n", 10.0),
            &MovePolicy::default(),
            &mut rng,
        )
        .expect("expand");

        assert_eq!(out.len(), 6);
        assert_eq!(out[0], Event::key_press(500, Key::Char('h')));
        assert_eq!(out[1], Event::key_release(50_000_000, Key::Char('h')));
        assert_eq!(out[4], Event::key_press(50_000_000, Key::Named(NamedKey::Enter)));
    }

    #[test]
    fn chord_releases_in_inverse_order_by_default() {
        let mut rng = rng();
        let ctrl = Key::Named(NamedKey::CtrlLeft);
        let c = Key::Char('c');
        let event = Event::new(
            3,
            EventKind::TextEntry {
                text: TextSource::Chord(Hotkey::new(vec![ctrl, c])),
                rate: 10.0,
            },
        );
        let out = expand(&event, &MovePolicy::default(), &mut rng).expect("expand");
        assert_eq!(
            out,
            vec![
                Event::key_press(3, ctrl),
                Event::key_press(100_000_000, c),
                Event::key_release(200_000_000, c),
                Event::key_release(50_000_000, ctrl),
            ]
        );
    }

    #[test]
    fn glacial_rates_saturate_instead_of_overflowing() {
        let mut rng = rng();
        let event = Event::new(
            0,
            EventKind::TextEntry {
                text: TextSource::Chord(Hotkey::new(vec![Key::Char('a'), Key::Char('b')])),
                rate: 1e-10,
            },
        );
        let out = expand(&event, &MovePolicy::default(), &mut rng).expect("expand");
        assert_eq!(out.len(), 4);
        assert!(out[1].delta_ns > out[3].delta_ns);
        assert_eq!(out[2].delta_ns, u64::MAX);
    }

    #[test]
    fn huge_regions_clamp_instead_of_wrapping() {
        let mut rng = rng();
        let region = Region {
            x: 10,
            y: -5,
            width: u32::MAX,
            height: u32::MAX,
        };
        for _ in 0..50 {
            let event = Event::click_to(0, 0, 0, Target::RandomIn(region), Button::Left);
            let out = expand(&event, &MovePolicy::default(), &mut rng).expect("expand");
            let point = out[0].position().expect("position");
            assert!(point.x >= 10);
            assert!(point.y >= -5);
        }
    }

    #[test]
    fn random_word_types_one_of_the_words() {
        let mut rng = rng();
        let event = Event::new(
            0,
            EventKind::TextEntry {
                text: TextSource::RandomWord(vec!["ab".to_string(), "cd".to_string()]),
                rate: 5.0,
            },
        );
        let out = expand(&event, &MovePolicy::default(), &mut rng).expect("expand");
        assert_eq!(out.len(), 4);
        assert!(matches!(
            out[0].kind,
            EventKind::KeyPress { key: Key::Char('a') } | EventKind::KeyPress { key: Key::Char('c') }
        ));
    }

    #[test]
    fn malformed_abstract_events_are_rejected() {
        let mut rng = rng();
        let bad_rate = Event::text_entry(0, "x", 0.0);
        let err = expand(&bad_rate, &MovePolicy::default(), &mut rng).expect_err("rate");
        assert!(matches!(err, MimicError::MalformedEvent(_)));

        let empty_region = Event::click_to(
            0,
            0,
            0,
            Target::RandomIn(Region {
                x: 0,
                y: 0,
                width: 0,
                height: 10,
            }),
            Button::Left,
        );
        let err = expand(&empty_region, &MovePolicy::default(), &mut rng).expect_err("region");
        assert!(matches!(err, MimicError::MalformedEvent(_)));
    }

    #[test]
    fn step_count_respects_bounds() {
        let policy = MovePolicy::default();
        assert_eq!(policy.step_count(0), 1);
        assert_eq!(policy.step_count(25_000_000), 2);
        assert_eq!(policy.step_count(60 * NANOS_PER_SECOND), 1000);
        let fine = MovePolicy {
            step_interval_ns: 1,
            ..MovePolicy::default()
        };
        assert_eq!(fine.step_count(300_000), 3);
    }

    #[test]
    fn event_serializes_with_snake_case_tag() {
        let json = serde_json::to_value(Event::key_press(4, Key::Char('q'))).expect("json");
        assert_eq!(json["delta_ns"], 4);
        assert_eq!(json["kind"]["type"], "key_press");
        assert_eq!(json["kind"]["key"]["char"], "q");
    }
}
