use thiserror::Error;

/// Failures while bringing up process-level infrastructure.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("failed to bind listener: {0}")]
    Io(#[from] std::io::Error),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
}

impl InfraError {
    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}
