use thiserror::Error;

/// A convenience `Result` alias using [`CarelineError`].
pub type CarelineResult<T> = Result<T, CarelineError>;

/// Top-level error type for the CareLine agent substrate.
///
/// The `Display` output of every variant is the human-readable text carried in
/// a failed [`Response`](crate::Response), so callers see exactly the same
/// message the failing task recorded.
#[derive(Error, Debug)]
pub enum CarelineError {
    /// Malformed or missing input fields.
    #[error("{0}")]
    Validation(String),

    /// An action name the receiving agent does not accept.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// The target agent is not present in the registry.
    #[error("Agent {0} not connected")]
    PeerUnavailable(String),

    /// The remote handler answered with a failed response.
    #[error("{0}")]
    PeerFailure(String),

    /// The call could not be delivered or its reply could not be read.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A caller-imposed deadline elapsed before the peer answered.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A fatal failure inside an orchestration run.
    #[error("{0}")]
    Orchestrator(String),

    /// An action handler panicked before producing a result.
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),

    /// A failure inside the monitoring engine.
    #[error("Monitor error: {0}")]
    Monitor(String),

    /// A failure reported by an external business capability.
    #[error("Capability error: {0}")]
    Capability(String),

    /// Invalid configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CarelineError {
    /// Shorthand for a [`CarelineError::Validation`] error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
