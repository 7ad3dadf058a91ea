use tapwire_capture::CaptureError;
use tapwire_config::ConfigError;
use thiserror::Error;
use tokio::task::JoinError;

/// Errors that stop the engine. Per-connection failures are faults, not errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Capture task failed: {0}")]
    Task(String),
}

impl From<JoinError> for EngineError {
    fn from(err: JoinError) -> Self {
        EngineError::Task(err.to_string())
    }
}
