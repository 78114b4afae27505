use crate::types::Source;

/// Failure modes of a (profile, source) scan. The orchestrator decides
/// retry policy per variant, so adapters must pick the right one instead
/// of collapsing everything into a generic error.
///
/// `Display`/`Error` are implemented by hand rather than derived: the
/// `source` field names the originating platform (a `Source`, not an error
/// source), which `thiserror`'s derive would try to treat as a `std::error::Error`.
#[derive(Debug)]
pub enum ScanError {
    /// Retryable next cycle; cursor stays put.
    Network { source: Source, message: String },

    /// The source served a bot-challenge page instead of data.
    /// Not retried within the cycle; logged with the offending URL.
    ProtectionChallenge { url: String },

    /// Session is invalid; the pair is suspended until an operator
    /// refreshes credentials out of band.
    AuthExpired { source: Source },

    /// The page structure changed enough that the whole scan is unusable.
    /// Individual malformed items are skipped inside adapters and never
    /// reach this variant.
    Parse { source: Source, message: String },
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanError::Network { source, message } => {
                write!(f, "network error scanning {source}: {message}")
            }
            ScanError::ProtectionChallenge { url } => {
                write!(f, "bot protection challenge at {url}")
            }
            ScanError::AuthExpired { source } => {
                write!(f, "authentication expired for {source}")
            }
            ScanError::Parse { source, message } => {
                write!(f, "parse error scanning {source}: {message}")
            }
        }
    }
}

impl std::error::Error for ScanError {}

impl ScanError {
    pub fn network(source: Source, err: impl std::fmt::Display) -> Self {
        ScanError::Network {
            source,
            message: err.to_string(),
        }
    }

    pub fn parse(source: Source, message: impl Into<String>) -> Self {
        ScanError::Parse {
            source,
            message: message.into(),
        }
    }
}
