use thiserror::Error;

/// Internal error currency for the engine. Boundary functions translate
/// these into the bool/callback contracts the host API expects; they are
/// never allowed to propagate as panics out of a callback thread.
#[derive(Debug, Error)]
pub enum BackstageError {
    #[error("failed to open audio device: {0}")]
    DeviceOpen(String),

    #[error("failed to start audio device: {0}")]
    DeviceStart(String),

    #[error("WAV write failed: {0}")]
    WavWrite(#[from] std::io::Error),

    #[error("failed to load simulation asset: {0}")]
    SimulationLoad(String),

    #[error("event queue overflow, event dropped")]
    QueueOverflow,
}

pub type Result<T> = std::result::Result<T, BackstageError>;
