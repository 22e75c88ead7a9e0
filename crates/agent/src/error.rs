use rivet_core::error::StoreError;

/// Failures that stop `prompt` before or outside model processing.
///
/// Model and tool failures are not errors at this level: they are recorded on
/// the assistant message and the call still returns it.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("No model configured: pass one explicitly or configure a provider")]
    NoModel,

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Session {0} is already processing a prompt")]
    SessionBusy(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

