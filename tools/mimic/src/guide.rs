//! Named sequences and scenarios plus guide-wide scheduled transforms.

use crate::errors::MimicError;
use crate::event::Event;
use crate::logging::emit;
use crate::playback::{Backend, PlaybackOutcome, Player};
use crate::scenario::{resolve, Resolution, Scenario, ScenarioSelection};
use crate::sequence::Sequence;
use crate::transform::{apply_chain, Transform, TransformRegistry, TransformSpec};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything that persists as one unit. Custom transforms live in the
/// runtime registry and must be re-registered after a load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Guide {
    #[serde(default)]
    sequences: BTreeMap<String, Sequence>,
    #[serde(default)]
    scenarios: BTreeMap<String, Scenario>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    scheduled: Vec<TransformSpec>,
    #[serde(skip)]
    registry: TransformRegistry,
}

impl PartialEq for Guide {
    fn eq(&self, other: &Self) -> bool {
        self.sequences == other.sequences
            && self.scenarios == other.scenarios
            && self.scheduled == other.scheduled
    }
}

fn check_name(kind: &str, name: &str) -> Result<(), MimicError> {
    if name.trim().is_empty() {
        return Err(MimicError::InvalidParameter(format!(
            "{kind} name must not be empty"
        )));
    }
    Ok(())
}

impl Guide {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_sequence(
        &mut self,
        name: impl Into<String>,
        sequence: Sequence,
    ) -> Result<Option<Sequence>, MimicError> {
        let name = name.into();
        check_name("sequence", &name)?;
        Ok(self.sequences.insert(name, sequence))
    }

    pub fn sequence(&self, name: &str) -> Option<&Sequence> {
        self.sequences.get(name)
    }

    pub fn sequence_mut(&mut self, name: &str) -> Option<&mut Sequence> {
        self.sequences.get_mut(name)
    }

    pub fn remove_sequence(&mut self, name: &str) -> Option<Sequence> {
        self.sequences.remove(name)
    }

    /// Sorted, so pattern matching sees a stable candidate order.
    pub fn sequence_names(&self) -> Vec<String> {
        self.sequences.keys().cloned().collect()
    }

    pub fn insert_scenario(
        &mut self,
        name: impl Into<String>,
        scenario: Scenario,
    ) -> Result<Option<Scenario>, MimicError> {
        let name = name.into();
        check_name("scenario", &name)?;
        scenario.validate()?;
        Ok(self.scenarios.insert(name, scenario))
    }

    pub fn scenario(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.get(name)
    }

    pub fn remove_scenario(&mut self, name: &str) -> Option<Scenario> {
        self.scenarios.remove(name)
    }

    pub fn scenario_names(&self) -> Vec<String> {
        self.scenarios.keys().cloned().collect()
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

    /// Makes `name` available to `TransformSpec::Custom` entries.
    pub fn register_transform(&mut self, name: impl Into<String>, transform: Arc<dyn Transform>) {
        self.registry.register(name, transform);
    }

    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    /// Takes over `loaded`'s persisted contents, keeping this guide's
    /// registered transforms.
    pub fn install(&mut self, loaded: Guide) {
        self.sequences = loaded.sequences;
        self.scenarios = loaded.scenarios;
        self.scheduled = loaded.scheduled;
    }

    /// Guide transforms, then the segment's own, in registration order.
    /// Stored sequences are left untouched.
    fn assemble_segment(
        &self,
        segment: &Sequence,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Event>, MimicError> {
        let events = apply_chain(&self.scheduled, &self.registry, segment.events().to_vec(), rng)?;
        apply_chain(segment.scheduled_transforms(), &self.registry, events, rng)
    }

    /// Resolves `name` and runs the scheduled transforms over the result,
    /// producing the (possibly still abstract) timeline that would play.
    pub fn assemble_scenario(
        &self,
        name: &str,
        rng: &mut dyn RngCore,
    ) -> Result<(Resolution, Vec<Event>), MimicError> {
        let scenario = self
            .scenario(name)
            .ok_or_else(|| MimicError::NoMatch(format!("no scenario named `{name}`")))?;
        let resolution = resolve(scenario, self, rng)?;
        let mut timeline = Vec::new();
        for segment in &resolution.segments {
            timeline.extend(self.assemble_segment(segment, rng)?);
        }
        Ok((resolution, timeline))
    }

    pub fn assemble_sequence(
        &self,
        name: &str,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Event>, MimicError> {
        let sequence = self
            .sequence(name)
            .ok_or_else(|| MimicError::NoMatch(format!("no sequence named `{name}`")))?;
        self.assemble_segment(sequence, rng)
    }

    /// Picks a scenario per `selection` and plays one fresh draw of it.
    pub fn simulate<B: Backend>(
        &self,
        selection: &ScenarioSelection,
        player: &Player<B>,
        rng: &mut dyn RngCore,
    ) -> Result<PlaybackOutcome, MimicError> {
        let name = selection.pick(self, rng)?;
        self.play_scenario(&name, player, rng)
    }

    pub fn play_scenario<B: Backend>(
        &self,
        name: &str,
        player: &Player<B>,
        rng: &mut dyn RngCore,
    ) -> Result<PlaybackOutcome, MimicError> {
        let (resolution, timeline) = self.assemble_scenario(name, rng)?;
        emit(
            player.logger(),
            "info",
            "scenario.resolved",
            json!({"scenario": name, "chosen": resolution.chosen, "events": timeline.len()}),
        );
        let policy = self.scenario(name).and_then(|s| s.playback.as_ref());
        player.play(&timeline, policy, rng)
    }

    pub fn play_sequence<B: Backend>(
        &self,
        name: &str,
        player: &Player<B>,
        rng: &mut dyn RngCore,
    ) -> Result<PlaybackOutcome, MimicError> {
        let timeline = self.assemble_sequence(name, rng)?;
        player.play(&timeline, None, rng)
    }
}
