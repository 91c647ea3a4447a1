//! Scenario tokens and their resolution against a guide's sequence names.

use crate::errors::MimicError;
use crate::event::{Event, MovePolicy};
use crate::guide::Guide;
use crate::sequence::Sequence;
use rand::{Rng, RngCore};
use regex::Regex;
use serde::{Deserialize, Serialize};

const REGEX_META: &[char] = &[
    '.', '*', '+', '?', '(', ')', '[', ']', '{', '}', '|', '^', '$', '\\',
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Token {
    Literal(String),
    /// Matched against the whole sequence name.
    Pattern(String),
}

impl Token {
    pub fn literal(name: impl Into<String>) -> Self {
        Self::Literal(name.into())
    }

    pub fn pattern(source: impl Into<String>) -> Result<Self, MimicError> {
        let source = source.into();
        compile(&source)?;
        Ok(Self::Pattern(source))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal(name) | Self::Pattern(name) => name,
        }
    }

    /// Every name this token matches, in `names` order. A pattern whose
    /// source is itself one of `names` matches only that name.
    pub fn matching<'n>(
        &self,
        names: impl IntoIterator<Item = &'n str>,
    ) -> Result<Vec<&'n str>, MimicError> {
        match self {
            Self::Literal(literal) => Ok(names
                .into_iter()
                .filter(|name| *name == literal.as_str())
                .collect()),
            Self::Pattern(source) => {
                let names = names.into_iter().collect::<Vec<_>>();
                if let Some(exact) = names.iter().find(|name| **name == source.as_str()) {
                    return Ok(vec![*exact]);
                }
                let regex = compile(source)?;
                Ok(names.into_iter().filter(|name| regex.is_match(name)).collect())
            }
        }
    }
}

fn compile(source: &str) -> Result<Regex, MimicError> {
    Regex::new(&format!("^(?:{source})$"))
        .map_err(|e| MimicError::InvalidParameter(format!("invalid pattern `{source}`: {e}")))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub tokens: Vec<Token>,
    /// Movement resampling used when this scenario plays, overriding the
    /// player's policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playback: Option<MovePolicy>,
}

impl Scenario {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            playback: None,
        }
    }

    /// Splits on whitespace; words containing regex metacharacters become
    /// patterns, everything else a literal name.
    pub fn parse(text: &str) -> Result<Self, MimicError> {
        let tokens = text
            .split_whitespace()
            .map(|word| {
                if word.contains(REGEX_META) {
                    Token::pattern(word)
                } else {
                    Ok(Token::literal(word))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        if tokens.is_empty() {
            return Err(MimicError::InvalidParameter(
                "scenario needs at least one token".to_string(),
            ));
        }
        Ok(Self::new(tokens))
    }

    pub fn with_playback(mut self, policy: MovePolicy) -> Self {
        self.playback = Some(policy);
        self
    }

    pub fn validate(&self) -> Result<(), MimicError> {
        for token in &self.tokens {
            if let Token::Pattern(source) = token {
                compile(source)?;
            }
        }
        if let Some(policy) = &self.playback {
            policy.validate()?;
        }
        Ok(())
    }
}

/// One concrete draw of a scenario: the chosen sequence per token.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub chosen: Vec<String>,
    pub segments: Vec<Sequence>,
}

impl Resolution {
    /// Delta-chains the segments' stored events in token order.
    pub fn assembled(&self) -> Vec<Event> {
        self.segments
            .iter()
            .flat_map(|segment| segment.iter().cloned())
            .collect()
    }
}

/// Draws one matching sequence per token, uniformly and independently.
/// The guide is only read.
pub fn resolve(
    scenario: &Scenario,
    guide: &Guide,
    rng: &mut dyn RngCore,
) -> Result<Resolution, MimicError> {
    let names = guide.sequence_names();
    let mut chosen = Vec::with_capacity(scenario.tokens.len());
    let mut segments = Vec::with_capacity(scenario.tokens.len());
    for token in &scenario.tokens {
        let candidates = token.matching(names.iter().map(String::as_str))?;
        if candidates.is_empty() {
            return Err(MimicError::NoMatch(format!(
                "no sequence matches `{}`",
                token.as_str()
            )));
        }
        let name = candidates[rng.random_range(0..candidates.len())];
        let sequence = guide
            .sequence(name)
            .ok_or_else(|| MimicError::NoMatch(format!("sequence `{name}` vanished")))?;
        chosen.push(name.to_string());
        segments.push(sequence.clone());
    }
    Ok(Resolution { chosen, segments })
}

/// Which stored scenario a simulation plays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScenarioSelection {
    /// Uniform over every scenario in the guide.
    #[default]
    Any,
    /// Uniform among the listed names.
    OneOf(Vec<String>),
    Named(String),
}

impl ScenarioSelection {
    pub fn from_names(mut names: Vec<String>) -> Self {
        match names.len() {
            0 => Self::Any,
            1 => Self::Named(names.remove(0)),
            _ => Self::OneOf(names),
        }
    }

    pub fn pick(&self, guide: &Guide, rng: &mut dyn RngCore) -> Result<String, MimicError> {
        let pool = match self {
            Self::Any => guide.scenario_names(),
            Self::OneOf(names) => names.clone(),
            Self::Named(name) => vec![name.clone()],
        };
        if pool.is_empty() {
            return Err(MimicError::NoMatch("no scenarios to choose from".to_string()));
        }
        let name = pool[rng.random_range(0..pool.len())].clone();
        if guide.scenario(&name).is_none() {
            return Err(MimicError::NoMatch(format!("no scenario named `{name}`")));
        }
        Ok(name)
    }
}
