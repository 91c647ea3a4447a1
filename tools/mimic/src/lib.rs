pub mod codec;
pub mod config;
pub mod errors;
pub mod event;
pub mod guide;
pub mod hotkeys;
pub mod logging;
pub mod playback;
pub mod recorder;
pub mod runtime;
pub mod scenario;
pub mod sequence;
pub mod transform;

use clap::{error::ErrorKind, Parser};
use codec::{GuideCodec, GuideStore, Seal, DEFAULT_COMPRESSION_LEVEL};
use config::{load_config, AppConfig, CliOverrides};
use errors::MimicError;
use guide::Guide;
use logging::JsonlLogger;
use playback::{CancelToken, JsonlBackend, PlaybackStatus, Player};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use recorder::{Capture, RecordingSession};
use runtime::ProductionRuntime;
use scenario::{Scenario, ScenarioSelection};
use sequence::TimedEvent;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Clone, Parser)]
#[command(name = "mimic")]
#[command(about = "Compose and replay recorded GUI interaction scenarios")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Guide file to load (and to save after imports or definitions).
    #[arg(long)]
    pub guide: Option<PathBuf>,
    /// Scenario to simulate; repeat to pick uniformly among several.
    #[arg(long = "scenario")]
    pub scenarios: Vec<String>,
    /// Play one stored sequence instead of a scenario.
    #[arg(long, conflicts_with = "scenarios")]
    pub sequence: Option<String>,
    #[arg(long, default_value_t = false)]
    pub list: bool,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Write the realized atomic sequence as JSON.
    #[arg(long)]
    pub realized_out: Option<PathBuf>,
    /// Environment variable holding the guide passphrase.
    #[arg(long)]
    pub passphrase_env: Option<String>,
    /// JSONL capture (one timestamped event per line) to record into the guide.
    #[arg(long, requires = "name")]
    pub import_capture: Option<PathBuf>,
    /// Sequence name for `--import-capture`.
    #[arg(long)]
    pub name: Option<String>,
    /// `NAME=TOKENS` scenario definition; repeatable.
    #[arg(long = "define-scenario")]
    pub define_scenarios: Vec<String>,
}

pub fn run() -> Result<i32, MimicError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let env = std::env::vars_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| MimicError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    ctrlc::set_handler(|| CancelToken::global().cancel())
        .map_err(|e| MimicError::Io(format!("install interrupt handler: {e}")))?;
    run_with_runtime(&args, &env, &cwd, &runtime, Box::new(std::io::stdout()))
}

pub fn run_with_runtime(
    args: &[OsString],
    env: &[(OsString, OsString)],
    cwd: &Path,
    runtime: &ProductionRuntime,
    mut out: Box<dyn Write + Send>,
) -> Result<i32, MimicError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(MimicError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.as_ref().map(|path| absolutize(cwd, path)),
        guide_path: cli.guide.clone(),
        seed: cli.seed,
        passphrase_env: cli.passphrase_env.clone(),
    };
    let cfg = load_config(&overrides, runtime.file_system.as_ref())?;
    let logger = JsonlLogger::from_config(&cfg.logging).map(|mut logger| {
        logger.path = absolutize(cwd, &logger.path);
        logger
    });

    let guide_path = cfg
        .persistence
        .guide_path
        .as_ref()
        .map(|path| absolutize(cwd, path))
        .ok_or_else(|| {
            MimicError::Cli("a guide is required: pass --guide or set persistence.guide_path".to_string())
        })?;
    let store = GuideStore::new(runtime.file_system.clone(), codec_for(&cfg, env)?);
    let mut rng = match cfg.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_rng(&mut rand::rng()),
    };

    let mut guide = Guide::new();
    let editing = cli.import_capture.is_some() || !cli.define_scenarios.is_empty();
    if !(editing && !runtime.file_system.exists(&guide_path)) {
        store.load_into(&mut guide, &guide_path)?;
    }

    if editing {
        if let (Some(capture), Some(name)) = (&cli.import_capture, &cli.name) {
            let sequence = import_capture(runtime, &cfg, logger.clone(), &absolutize(cwd, capture))?;
            write_line(&mut out, &format!("recorded {name}: {} events", sequence.len()))?;
            guide.insert_sequence(name.clone(), sequence)?;
        }
        for definition in &cli.define_scenarios {
            let (name, tokens) = definition.split_once('=').ok_or_else(|| {
                MimicError::Cli(format!("scenario definition `{definition}` is not NAME=TOKENS"))
            })?;
            guide.insert_scenario(name.trim(), Scenario::parse(tokens)?)?;
            write_line(&mut out, &format!("defined {}", name.trim()))?;
        }
        store.save(&guide, &guide_path, &mut rng)?;
        return Ok(0);
    }

    if cli.list {
        for name in guide.sequence_names() {
            let len = guide.sequence(&name).map_or(0, |seq| seq.len());
            write_line(&mut out, &format!("sequence {name} ({len} events)"))?;
        }
        for name in guide.scenario_names() {
            let tokens = guide
                .scenario(&name)
                .map(|scenario| {
                    scenario
                        .tokens
                        .iter()
                        .map(|token| token.as_str().to_string())
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default();
            write_line(&mut out, &format!("scenario {name}: {tokens}"))?;
        }
        return Ok(0);
    }

    CancelToken::global().reset();
    let player = Player::new(JsonlBackend::new(out))
        .with_clock(runtime.clock.clone())
        .with_options(cfg.playback_options())
        .with_logger(logger);
    let outcome = match &cli.sequence {
        Some(name) => guide.play_sequence(name, &player, &mut rng)?,
        None => guide.simulate(
            &ScenarioSelection::from_names(cli.scenarios.clone()),
            &player,
            &mut rng,
        )?,
    };

    if let Some(path) = &cli.realized_out {
        let json = serde_json::to_string_pretty(&outcome.realized)
            .map_err(|e| MimicError::Io(e.to_string()))?;
        runtime
            .file_system
            .write_string(&absolutize(cwd, path), &json)?;
    }

    match outcome.status {
        PlaybackStatus::Completed => Ok(0),
        PlaybackStatus::Cancelled => Ok(EXIT_CANCELLED),
        PlaybackStatus::BackendFailed { message } => Err(MimicError::Backend(message)),
    }
}

fn codec_for(cfg: &AppConfig, env: &[(OsString, OsString)]) -> Result<GuideCodec, MimicError> {
    let compression = cfg.persistence.compress.then_some(DEFAULT_COMPRESSION_LEVEL);
    let Some(var) = &cfg.persistence.passphrase_env else {
        return Ok(GuideCodec::new().with_compression(compression));
    };
    let passphrase = env
        .iter()
        .find(|(key, _)| key.to_str() == Some(var.as_str()))
        .and_then(|(_, value)| value.to_str())
        .ok_or_else(|| MimicError::Cli(format!("environment variable {var} is not set")))?;
    Ok(GuideCodec::sealed(Seal::from_passphrase(passphrase)?).with_compression(compression))
}

/// Feeds a capture file through a recording session, as hook callbacks
/// would, and returns the re-abstracted sequence.
fn import_capture(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    logger: Option<JsonlLogger>,
    path: &Path,
) -> Result<sequence::Sequence, MimicError> {
    let text = runtime.file_system.read_to_string(path)?;
    let mut session = RecordingSession::new(cfg.reabstraction())
        .with_chord(cfg.record_chord()?)
        .with_logger(logger);
    let producer = session.producer();
    session.start()?;
    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let TimedEvent { timestamp_ns, kind } = serde_json::from_str(line).map_err(|e| {
            MimicError::MalformedEvent(format!("{}:{}: {e}", path.display(), number + 1))
        })?;
        producer.send(Capture::Event { timestamp_ns, kind });
    }
    session.stop()
}

fn write_line(out: &mut dyn Write, line: &str) -> Result<(), MimicError> {
    writeln!(out, "{line}").map_err(|e| MimicError::Io(e.to_string()))
}

fn absolutize(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}
