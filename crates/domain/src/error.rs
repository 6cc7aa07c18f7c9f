/// Shared error type used across all Caseflow crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("connection: {0}")]
    Connection(String),

    #[error("LLM {provider}: {message}")]
    Llm { provider: String, message: String },

    #[error("bitable: {0}")]
    Bitable(String),

    #[error("field not found: {0}")]
    FieldNotFound(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("filter not supported: {0}")]
    FilterNotSupported(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("pending action expired for user {0}")]
    PendingActionExpired(String),

    #[error("no pending action for user {0}")]
    PendingActionNotFound(String),

    #[error("config: {0}")]
    Config(String),

    #[error("template: {0}")]
    Template(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Map to the stable `error_code` string carried in skill results and
    /// consumed by the renderer's error classifier.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Timeout(_) => "timeout",
            Error::Connection(_) | Error::Http(_) => "connection_error",
            Error::RecordNotFound(_) => "record_not_found",
            Error::FieldNotFound(_) => "field_not_found",
            Error::PermissionDenied(_) => "permission_denied",
            Error::RateLimited(_) => "rate_limit",
            Error::FilterNotSupported(_) => "filter_not_supported",
            Error::PendingActionExpired(_) => "pending_action_expired",
            Error::PendingActionNotFound(_) => "pending_action_not_found",
            _ => "general",
        }
    }
}
