//! Event rewrites. A transform maps one event to zero, one, or many events;
//! applying it to a sequence concatenates the per-event outputs in order.

use crate::errors::MimicError;
use crate::event::{Event, EventKind, EventTag};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub trait Transform: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, event: &Event, rng: &mut dyn RngCore) -> Result<Vec<Event>, MimicError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventMatcher {
    Tag(EventTag),
    Pointer,
    Keyboard,
    Atomic,
    Abstract,
}

impl EventMatcher {
    pub fn matches(self, event: &Event) -> bool {
        let tag = event.tag();
        match self {
            Self::Tag(expected) => tag == expected,
            Self::Pointer => tag.is_pointer(),
            Self::Keyboard => tag.is_keyboard(),
            Self::Atomic => tag.is_atomic(),
            Self::Abstract => !tag.is_atomic(),
        }
    }
}

/// Keeps the events matching any of `matchers` (or drops them when
/// `inverse`). Surviving events keep their own deltas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterEvents {
    matchers: Vec<EventMatcher>,
    inverse: bool,
}

impl FilterEvents {
    pub fn new(matchers: Vec<EventMatcher>, inverse: bool) -> Self {
        Self { matchers, inverse }
    }

    pub fn kinds(tags: &[EventTag]) -> Self {
        Self::new(tags.iter().copied().map(EventMatcher::Tag).collect(), false)
    }

    pub fn inverted(mut self) -> Self {
        self.inverse = !self.inverse;
        self
    }
}

impl Transform for FilterEvents {
    fn name(&self) -> &str {
        "filter_events"
    }

    fn apply(&self, event: &Event, _rng: &mut dyn RngCore) -> Result<Vec<Event>, MimicError> {
        let matched = self.matchers.iter().any(|m| m.matches(event));
        if matched != self.inverse {
            Ok(vec![event.clone()])
        } else {
            Ok(Vec::new())
        }
    }
}

pub struct FilterWhere<F> {
    predicate: F,
    inverse: bool,
}

impl<F> FilterWhere<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    pub fn new(predicate: F, inverse: bool) -> Self {
        Self { predicate, inverse }
    }
}

impl<F> Transform for FilterWhere<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        "filter_where"
    }

    fn apply(&self, event: &Event, _rng: &mut dyn RngCore) -> Result<Vec<Event>, MimicError> {
        if (self.predicate)(event) != self.inverse {
            Ok(vec![event.clone()])
        } else {
            Ok(Vec::new())
        }
    }
}

/// Multiplies every delta, and the durations declared inside abstract
/// events, by `factor`. Text rates are divided by it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeDilation {
    factor: f64,
}

impl TimeDilation {
    pub fn new(factor: f64) -> Result<Self, MimicError> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(MimicError::InvalidParameter(format!(
                "time dilation factor must be a positive number, got {factor}"
            )));
        }
        Ok(Self { factor })
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    fn scale(&self, value: u64) -> u64 {
        (value as f64 * self.factor).round() as u64
    }
}

impl Transform for TimeDilation {
    fn name(&self) -> &str {
        "time_dilation"
    }

    fn apply(&self, event: &Event, _rng: &mut dyn RngCore) -> Result<Vec<Event>, MimicError> {
        let mut out = event.clone();
        out.delta_ns = self.scale(event.delta_ns);
        match &mut out.kind {
            EventKind::PointerClickTo {
                move_duration_ns,
                click_delay_ns,
                ..
            } => {
                *move_duration_ns = self.scale(*move_duration_ns);
                *click_delay_ns = self.scale(*click_delay_ns);
            }
            EventKind::TextEntry { rate, .. } => *rate /= self.factor,
            _ => {}
        }
        Ok(vec![out])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseMode {
    /// `delta * max(N(1, variance), 0)`: jitter proportional to the delta.
    #[default]
    Relative,
    /// `max(delta + N(0, variance), 0)` with the variance in ms².
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeNoise {
    variance: f64,
    mode: NoiseMode,
}

impl TimeNoise {
    pub fn new(variance: f64, mode: NoiseMode) -> Result<Self, MimicError> {
        if !variance.is_finite() || variance <= 0.0 {
            return Err(MimicError::InvalidParameter(format!(
                "time noise variance must be a positive number, got {variance}"
            )));
        }
        Ok(Self { variance, mode })
    }

    pub fn relative(variance: f64) -> Result<Self, MimicError> {
        Self::new(variance, NoiseMode::Relative)
    }
}

impl Transform for TimeNoise {
    fn name(&self) -> &str {
        "time_noise"
    }

    fn apply(&self, event: &Event, rng: &mut dyn RngCore) -> Result<Vec<Event>, MimicError> {
        let sigma = self.variance.sqrt();
        let z = standard_normal(rng);
        let delta = event.delta_ns as f64;
        let noisy = match self.mode {
            NoiseMode::Relative => delta * (1.0 + sigma * z).max(0.0),
            NoiseMode::Absolute => (delta + sigma * z * 1_000_000.0).max(0.0),
        };
        let mut out = event.clone();
        out.delta_ns = noisy.round() as u64;
        Ok(vec![out])
    }
}

/// Wraps a closure as a transform. Closure errors surface as
/// `TransformContractViolation`.
pub struct FnTransform<F> {
    name: String,
    function: F,
}

impl<F> FnTransform<F>
where
    F: Fn(&Event) -> Result<Vec<Event>, String> + Send + Sync,
{
    pub fn new(name: impl Into<String>, function: F) -> Self {
        Self {
            name: name.into(),
            function,
        }
    }
}

impl<F> Transform for FnTransform<F>
where
    F: Fn(&Event) -> Result<Vec<Event>, String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, event: &Event, _rng: &mut dyn RngCore) -> Result<Vec<Event>, MimicError> {
        (self.function)(event).map_err(|message| {
            MimicError::TransformContractViolation(format!(
                "transform `{}` failed on {} event: {message}",
                self.name,
                event.tag().as_str()
            ))
        })
    }
}

/// Persistable description of a transform, stored in scheduled lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transform", rename_all = "snake_case")]
pub enum TransformSpec {
    FilterEvents {
        matchers: Vec<EventMatcher>,
        #[serde(default)]
        inverse: bool,
    },
    TimeDilation {
        factor: f64,
    },
    TimeNoise {
        variance: f64,
        #[serde(default)]
        mode: NoiseMode,
    },
    /// Looked up by name in the [`TransformRegistry`] at assembly time.
    Custom {
        name: String,
    },
}

impl TransformSpec {
    pub fn validate(&self) -> Result<(), MimicError> {
        match self {
            Self::TimeDilation { factor } => TimeDilation::new(*factor).map(|_| ()),
            Self::TimeNoise { variance, mode } => TimeNoise::new(*variance, *mode).map(|_| ()),
            Self::Custom { name } if name.trim().is_empty() => Err(MimicError::InvalidParameter(
                "custom transform name must not be empty".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn instantiate(
        &self,
        registry: &TransformRegistry,
    ) -> Result<Arc<dyn Transform>, MimicError> {
        Ok(match self {
            Self::FilterEvents { matchers, inverse } => {
                Arc::new(FilterEvents::new(matchers.clone(), *inverse))
            }
            Self::TimeDilation { factor } => Arc::new(TimeDilation::new(*factor)?),
            Self::TimeNoise { variance, mode } => Arc::new(TimeNoise::new(*variance, *mode)?),
            Self::Custom { name } => registry.get(name).ok_or_else(|| {
                MimicError::InvalidParameter(format!("no custom transform registered as `{name}`"))
            })?,
        })
    }
}

#[derive(Clone, Default)]
pub struct TransformRegistry {
    entries: BTreeMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    pub fn register(&mut self, name: impl Into<String>, transform: Arc<dyn Transform>) {
        self.entries.insert(name.into(), transform);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transform>> {
        self.entries.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Applies `transform` to every event, replacing each with its output run.
pub fn apply(
    transform: &dyn Transform,
    events: &[Event],
    rng: &mut dyn RngCore,
) -> Result<Vec<Event>, MimicError> {
    let mut out = Vec::with_capacity(events.len());
    for event in events {
        let produced = transform.apply(event, rng)?;
        for candidate in &produced {
            if let Err(err) = candidate.validate() {
                event.validate()?;
                return Err(MimicError::TransformContractViolation(format!(
                    "transform `{}` produced an invalid event: {err}",
                    transform.name()
                )));
            }
        }
        out.extend(produced);
    }
    Ok(out)
}

/// Applies each spec in order, each consuming the previous output.
pub fn apply_chain(
    specs: &[TransformSpec],
    registry: &TransformRegistry,
    events: Vec<Event>,
    rng: &mut dyn RngCore,
) -> Result<Vec<Event>, MimicError> {
    let mut current = events;
    for spec in specs {
        let transform = spec.instantiate(registry)?;
        current = apply(transform.as_ref(), &current, rng)?;
    }
    Ok(current)
}

/// Box-Muller draw from N(0, 1).
pub(crate) fn standard_normal(rng: &mut dyn RngCore) -> f64 {
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
