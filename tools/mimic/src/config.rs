use crate::errors::MimicError;
use crate::event::{Curve, MovePolicy};
use crate::hotkeys::{ChordTracker, DEFAULT_RECORD_CHORD};
use crate::logging::{DEFAULT_DISK_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::playback::PlaybackOptions;
use crate::runtime::FileSystem;
use crate::sequence::Reabstraction;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub guide_path: Option<PathBuf>,
    pub seed: Option<u64>,
    pub passphrase_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub playback: PlaybackConfig,
    pub recording: RecordingConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CurveKind {
    Linear,
    Bezier,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackConfig {
    pub step_interval_ms: u64,
    pub min_step_us: u64,
    pub max_steps: u32,
    pub curve: CurveKind,
    pub bezier_spread: f64,
    pub smooth: bool,
    pub cancel_poll_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordingConfig {
    pub inactivity_ms: u64,
    pub max_span_ms: u64,
    pub hotkey: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistenceConfig {
    pub guide_path: Option<PathBuf>,
    /// Name of the environment variable holding the seal passphrase.
    pub passphrase_env: Option<String>,
    /// zstd-compress saved guides.
    pub compress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            playback: PlaybackConfig {
                step_interval_ms: 10,
                min_step_us: 100,
                max_steps: 1000,
                curve: CurveKind::Bezier,
                bezier_spread: 1.2,
                smooth: true,
                cancel_poll_ms: 50,
            },
            recording: RecordingConfig {
                inactivity_ms: 100,
                max_span_ms: 3000,
                hotkey: DEFAULT_RECORD_CHORD.to_string(),
            },
            persistence: PersistenceConfig {
                guide_path: None,
                passphrase_env: None,
                compress: true,
            },
            logging: LoggingConfig {
                path: None,
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
            seed: None,
        }
    }
}

impl AppConfig {
    pub fn move_policy(&self) -> MovePolicy {
        let playback = &self.playback;
        MovePolicy {
            step_interval_ns: playback.step_interval_ms.saturating_mul(1_000_000),
            min_step_ns: playback.min_step_us.saturating_mul(1_000),
            max_steps: playback.max_steps,
            curve: match playback.curve {
                CurveKind::Linear => Curve::Linear,
                CurveKind::Bezier => Curve::QuadraticBezier {
                    spread: playback.bezier_spread,
                },
            },
            smooth: playback.smooth,
        }
    }

    pub fn playback_options(&self) -> PlaybackOptions {
        PlaybackOptions {
            policy: self.move_policy(),
            cancel_poll: Duration::from_millis(self.playback.cancel_poll_ms),
        }
    }

    pub fn reabstraction(&self) -> Reabstraction {
        Reabstraction {
            inactivity_ns: self.recording.inactivity_ms.saturating_mul(1_000_000),
            max_span_ns: self.recording.max_span_ms.saturating_mul(1_000_000),
        }
    }

    pub fn record_chord(&self) -> Result<ChordTracker, MimicError> {
        ChordTracker::parse(&self.recording.hotkey)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    playback: Option<PartialPlaybackConfig>,
    recording: Option<PartialRecordingConfig>,
    persistence: Option<PartialPersistenceConfig>,
    logging: Option<PartialLoggingConfig>,
    seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialPlaybackConfig {
    step_interval_ms: Option<u64>,
    min_step_us: Option<u64>,
    max_steps: Option<u32>,
    curve: Option<CurveKind>,
    bezier_spread: Option<f64>,
    smooth: Option<bool>,
    cancel_poll_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRecordingConfig {
    inactivity_ms: Option<u64>,
    max_span_ms: Option<u64>,
    hotkey: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialPersistenceConfig {
    guide_path: Option<PathBuf>,
    passphrase_env: Option<String>,
    compress: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

pub fn load_config(overrides: &CliOverrides, fs: &dyn FileSystem) -> Result<AppConfig, MimicError> {
    let mut cfg = AppConfig::default();
    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        cfg = parse_config(&file_contents)?;
    }
    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Layers a TOML document over the defaults without validating.
pub fn parse_config(text: &str) -> Result<AppConfig, MimicError> {
    let partial: PartialAppConfig =
        toml::from_str(text).map_err(|e| MimicError::ConfigParse(e.to_string()))?;
    let mut cfg = AppConfig::default();
    merge_partial_config(&mut cfg, partial);
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(playback) = partial.playback {
        if let Some(value) = playback.step_interval_ms {
            cfg.playback.step_interval_ms = value;
        }
        if let Some(value) = playback.min_step_us {
            cfg.playback.min_step_us = value;
        }
        if let Some(value) = playback.max_steps {
            cfg.playback.max_steps = value;
        }
        if let Some(value) = playback.curve {
            cfg.playback.curve = value;
        }
        if let Some(value) = playback.bezier_spread {
            cfg.playback.bezier_spread = value;
        }
        if let Some(value) = playback.smooth {
            cfg.playback.smooth = value;
        }
        if let Some(value) = playback.cancel_poll_ms {
            cfg.playback.cancel_poll_ms = value;
        }
    }
    if let Some(recording) = partial.recording {
        if let Some(value) = recording.inactivity_ms {
            cfg.recording.inactivity_ms = value;
        }
        if let Some(value) = recording.max_span_ms {
            cfg.recording.max_span_ms = value;
        }
        if let Some(value) = recording.hotkey {
            cfg.recording.hotkey = value;
        }
    }
    if let Some(persistence) = partial.persistence {
        if persistence.guide_path.is_some() {
            cfg.persistence.guide_path = persistence.guide_path;
        }
        if persistence.passphrase_env.is_some() {
            cfg.persistence.passphrase_env = persistence.passphrase_env;
        }
        if let Some(value) = persistence.compress {
            cfg.persistence.compress = value;
        }
    }
    if let Some(logging) = partial.logging {
        if logging.path.is_some() {
            cfg.logging.path = logging.path;
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
    if partial.seed.is_some() {
        cfg.seed = partial.seed;
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(path) = &overrides.guide_path {
        cfg.persistence.guide_path = Some(path.clone());
    }
    if let Some(seed) = overrides.seed {
        cfg.seed = Some(seed);
    }
    if let Some(name) = &overrides.passphrase_env {
        cfg.persistence.passphrase_env = Some(name.clone());
    }
}

pub fn validate_config(cfg: &AppConfig) -> Result<(), MimicError> {
    if cfg.playback.step_interval_ms == 0 {
        return Err(MimicError::InvalidConfig(
            "playback.step_interval_ms must be greater than zero".to_string(),
        ));
    }
    if cfg.playback.max_steps == 0 {
        return Err(MimicError::InvalidConfig(
            "playback.max_steps must be greater than zero".to_string(),
        ));
    }
    if !cfg.playback.bezier_spread.is_finite() || cfg.playback.bezier_spread < 0.0 {
        return Err(MimicError::InvalidConfig(
            "playback.bezier_spread must be a non-negative number".to_string(),
        ));
    }
    if cfg.playback.cancel_poll_ms == 0 {
        return Err(MimicError::InvalidConfig(
            "playback.cancel_poll_ms must be greater than zero".to_string(),
        ));
    }
    if cfg.recording.inactivity_ms == 0 || cfg.recording.max_span_ms < cfg.recording.inactivity_ms {
        return Err(MimicError::InvalidConfig(
            "recording.max_span_ms must be at least recording.inactivity_ms, which must be positive"
                .to_string(),
        ));
    }
    cfg.record_chord()
        .map_err(|e| MimicError::InvalidConfig(format!("recording.hotkey: {e}")))?;
    if cfg.logging.max_payload_bytes < 16 {
        return Err(MimicError::InvalidConfig(
            "logging.max_payload_bytes must be at least 16".to_string(),
        ));
    }
    if cfg
        .persistence
        .passphrase_env
        .as_deref()
        .is_some_and(|name| name.trim().is_empty())
    {
        return Err(MimicError::InvalidConfig(
            "persistence.passphrase_env must name a variable".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeFileSystem;
    use std::path::Path;

    #[test]
    fn partial_file_keeps_unset_defaults() {
        let cfg = parse_config(
            r#"
seed = 7

[playback]
curve = "linear"
cancel_poll_ms = 20
"#,
        )
        .expect("parse");
        assert_eq!(cfg.seed, Some(7));
        assert_eq!(cfg.move_policy().curve, Curve::Linear);
        assert_eq!(cfg.playback_options().cancel_poll, Duration::from_millis(20));
        assert!(cfg.persistence.compress);
        let raw = parse_config("[persistence]\ncompress = false\n").expect("parse");
        assert!(!raw.persistence.compress);
        assert_eq!(cfg.playback.max_steps, 1000);
        assert_eq!(cfg.reabstraction(), Reabstraction::default());
        assert_eq!(cfg.move_policy().step_interval_ns, MovePolicy::default().step_interval_ns);
    }

    #[test]
    fn cli_overrides_win_over_file() {
        let fs = FakeFileSystem::with_file(
            "/cfg/mimic.toml",
            "seed = 1\n[persistence]\nguide_path = \"/data/a.guide\"\n",
        );
        let cfg = load_config(
            &CliOverrides {
                config_path: Some(Path::new("/cfg/mimic.toml").to_path_buf()),
                guide_path: Some(Path::new("/data/b.guide").to_path_buf()),
                seed: Some(9),
                passphrase_env: None,
            },
            &fs,
        )
        .expect("load");
        assert_eq!(cfg.seed, Some(9));
        assert_eq!(
            cfg.persistence.guide_path.as_deref(),
            Some(Path::new("/data/b.guide"))
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let fs = FakeFileSystem::with_file("/c.toml", "[playback]\nstep_interval_ms = 0\n");
        let overrides = CliOverrides {
            config_path: Some(Path::new("/c.toml").to_path_buf()),
            ..CliOverrides::default()
        };
        assert!(matches!(
            load_config(&overrides, &fs),
            Err(MimicError::InvalidConfig(_))
        ));

        let fs = FakeFileSystem::with_file("/c.toml", "[recording]\nhotkey = \"ctrl+nope\"\n");
        assert!(matches!(
            load_config(&overrides, &fs),
            Err(MimicError::InvalidConfig(_))
        ));

        let fs = FakeFileSystem::with_file("/c.toml", "[playback\n");
        assert!(matches!(
            load_config(&overrides, &fs),
            Err(MimicError::ConfigParse(_))
        ));
    }
}
