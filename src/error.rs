use thiserror::Error;

/// Failure taxonomy for the chat engine.
///
/// Configuration problems abort immediately and are never retried. Network
/// errors are retried by the dispatcher before surfacing with the attempt
/// count. Malformed response fragments and stream stalls are not errors at
/// all: the assembler recovers the former silently and the watchdog converts
/// the latter into a truncation notice on the reply.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error after {attempts} attempt(s): {source}")]
    Network {
        #[source]
        source: reqwest::Error,
        attempts: u32,
    },

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("session storage error: {0}")]
    Session(#[from] std::io::Error),

    #[error("session format error: {0}")]
    Format(#[from] serde_json::Error),

    #[error("script error: {0}")]
    Script(String),

    #[error("tool error: {0}")]
    Tool(String),
}
