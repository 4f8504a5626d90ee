use thiserror::Error;

/// Hard failures that abort a run before (or instead of) per-item work.
#[derive(Debug, Error)]
pub enum ForensicError {
    #[error("missing credentials for {provider}: set {env_var}")]
    MissingCredentials {
        provider: &'static str,
        env_var: &'static str,
    },
    #[error("local model endpoint unreachable at {url}: {reason}")]
    EndpointUnreachable { url: String, reason: String },
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("output directory is locked by another run: {0}")]
    StoreLocked(String),
    #[error("no segments found in {0}; run `chatsift segment` first")]
    NoSegments(String),
    #[error("no pages could be read from {0}")]
    NoPages(String),
}
