use thiserror::Error;

/// Why the controller latched and halted cycling. Cleared only by `arm()`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TripReason {
    #[error("control signal inputs lost")]
    SignalLoss,
    #[error("cell bus silent")]
    BusSilence,
}

#[derive(Debug, Error, Clone)]
pub enum BmsError {
    #[error("signal fault: {0}")]
    SignalFault(String),
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("timeout waiting for cell bus")]
    Timeout,
    #[error("interlock tripped: {0}")]
    Trip(TripReason),
    #[error("io error: {0}")]
    Io(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing signal source")]
    MissingSignals,
    #[error("missing cell bus")]
    MissingCellBus,
    #[error("missing inhibit outputs")]
    MissingOutputs,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
