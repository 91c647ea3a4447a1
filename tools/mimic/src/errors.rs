use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MimicError {
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("transform contract violation: {0}")]
    TransformContractViolation(String),
    #[error("no match: {0}")]
    NoMatch(String),
    #[error("a recording session is already active")]
    SessionAlreadyActive,
    #[error("a playback is already active")]
    PlaybackActive,
    #[error("backend error: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("decrypt error: {0}")]
    Decrypt(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
}
