/// Typed error hierarchy for relay event handling. An error from one
/// connection's handler never crosses to another connection; each variant
/// maps to exactly one reply (or deliberate silence) on the offending
/// connection.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RelayError {
    /// Malformed or out-of-sequence inbound event.
    #[error("{0}")]
    Protocol(String),

    /// Acting before auth.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Durable store unavailable or a query failed.
    #[error("store error: {0}")]
    Store(String),
}

impl RelayError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::NotAuthenticated => "not_authenticated",
            Self::Store(_) => "store",
        }
    }

    /// One-sentence text sent to the peer in an `error` event.
    pub fn client_message(&self) -> String {
        match self {
            Self::Protocol(msg) => msg.clone(),
            Self::NotAuthenticated => "Not authenticated".into(),
            Self::Store(_) => "Failed to persist message".into(),
        }
    }
}
