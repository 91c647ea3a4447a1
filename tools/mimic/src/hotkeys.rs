use crate::errors::MimicError;
use crate::event::{EventKind, Key, NamedKey};
use std::collections::BTreeSet;

/// Ctrl + Alt + r toggles recording.
pub const DEFAULT_RECORD_CHORD: &str = "ctrl+alt+r";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChordSignal {
    /// Not part of a completed chord; record it.
    Pass,
    /// Release of a key that completed the chord; drop it.
    Swallow,
    /// This press completed the chord.
    Completed,
}

/// Watches key traffic for one chord. Left and right modifiers count as
/// the same key.
#[derive(Debug, Clone)]
pub struct ChordTracker {
    keys: BTreeSet<Key>,
    held: BTreeSet<Key>,
    swallowing: BTreeSet<Key>,
}

impl ChordTracker {
    pub fn new(keys: impl IntoIterator<Item = Key>) -> Result<Self, MimicError> {
        let keys = keys.into_iter().map(normalize).collect::<BTreeSet<_>>();
        if keys.is_empty() {
            return Err(MimicError::InvalidParameter(
                "hotkey chord needs at least one key".to_string(),
            ));
        }
        Ok(Self {
            keys,
            held: BTreeSet::new(),
            swallowing: BTreeSet::new(),
        })
    }

    pub fn parse(chord: &str) -> Result<Self, MimicError> {
        Self::new(parse_chord(chord)?)
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.keys.iter().copied()
    }

    pub fn contains(&self, key: Key) -> bool {
        self.keys.contains(&normalize(key))
    }

    pub fn observe(&mut self, kind: &EventKind) -> ChordSignal {
        match kind {
            EventKind::KeyPress { key } => {
                let key = normalize(*key);
                self.held.insert(key);
                if self.keys.contains(&key) && self.keys.is_subset(&self.held) {
                    self.swallowing = self.keys.clone();
                    ChordSignal::Completed
                } else {
                    ChordSignal::Pass
                }
            }
            EventKind::KeyRelease { key } => {
                let key = normalize(*key);
                self.held.remove(&key);
                if self.swallowing.remove(&key) {
                    ChordSignal::Swallow
                } else {
                    ChordSignal::Pass
                }
            }
            _ => ChordSignal::Pass,
        }
    }
}

impl Default for ChordTracker {
    fn default() -> Self {
        Self {
            keys: [
                Key::Named(NamedKey::CtrlLeft),
                Key::Named(NamedKey::AltLeft),
                Key::Char('r'),
            ]
            .into_iter()
            .collect(),
            held: BTreeSet::new(),
            swallowing: BTreeSet::new(),
        }
    }
}

pub fn normalize(key: Key) -> Key {
    match key {
        Key::Named(NamedKey::CtrlRight) => Key::Named(NamedKey::CtrlLeft),
        Key::Named(NamedKey::AltRight) => Key::Named(NamedKey::AltLeft),
        Key::Named(NamedKey::ShiftRight) => Key::Named(NamedKey::ShiftLeft),
        Key::Char(c) => Key::Char(c.to_ascii_lowercase()),
        other => other,
    }
}

/// Parses `ctrl+alt+r` style chords.
pub fn parse_chord(chord: &str) -> Result<Vec<Key>, MimicError> {
    chord
        .split('+')
        .map(|part| {
            let part = part.trim().to_ascii_lowercase();
            let key = match part.as_str() {
                "ctrl" | "control" => Key::Named(NamedKey::CtrlLeft),
                "alt" => Key::Named(NamedKey::AltLeft),
                "shift" => Key::Named(NamedKey::ShiftLeft),
                "meta" | "super" | "cmd" => Key::Named(NamedKey::Meta),
                "enter" => Key::Named(NamedKey::Enter),
                "tab" => Key::Named(NamedKey::Tab),
                "space" => Key::Named(NamedKey::Space),
                "esc" | "escape" => Key::Named(NamedKey::Escape),
                single if single.chars().count() == 1 => {
                    Key::Char(single.chars().next().unwrap_or_default())
                }
                other => {
                    return Err(MimicError::InvalidParameter(format!(
                        "unknown key `{other}` in chord `{chord}`"
                    )))
                }
            };
            Ok(key)
        })
        .collect()
}

pub fn describe_chord(keys: impl IntoIterator<Item = Key>) -> String {
    keys.into_iter()
        .map(|key| match key {
            Key::Char(c) => c.to_string(),
            Key::Named(NamedKey::CtrlLeft | NamedKey::CtrlRight) => "ctrl".to_string(),
            Key::Named(NamedKey::AltLeft | NamedKey::AltRight) => "alt".to_string(),
            Key::Named(NamedKey::ShiftLeft | NamedKey::ShiftRight) => "shift".to_string(),
            Key::Named(named) => format!("{named:?}").to_ascii_lowercase(),
            Key::Code(code) => format!("#{code}"),
        })
        .collect::<Vec<_>>()
        .join("+")
}
