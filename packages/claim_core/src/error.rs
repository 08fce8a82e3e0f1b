/// Errors reported by external collaborators (classifier, card reader,
/// identity lookup, ledger, telemetry feed, artifact store).
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The call did not finish within its request timeout
    #[error("request timed out")]
    Timeout,

    /// The remote side or device could not be reached
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The remote side answered but refused the operation
    #[error("rejected: {0}")]
    Rejected(String),

    /// Input could not be parsed or validated
    #[error("malformed input: {0}")]
    Malformed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AdapterError {
    /// Transient failures are retried at the next natural loop iteration.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AdapterError::Timeout | AdapterError::Unavailable(_) | AdapterError::Other(_)
        )
    }
}

/// Errors talking to the claim actor.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("claim actor is gone")]
    ActorGone,

    #[error("claim actor didn't respond")]
    NoResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AdapterError::Timeout.is_transient());
        assert!(AdapterError::Unavailable("reader busy".into()).is_transient());
        assert!(AdapterError::Other(anyhow::anyhow!("boom")).is_transient());
        assert!(!AdapterError::Rejected("no such account".into()).is_transient());
        assert!(!AdapterError::Malformed("bad json".into()).is_transient());
    }

    #[test]
    fn test_display() {
        assert_eq!(AdapterError::Timeout.to_string(), "request timed out");
        assert_eq!(CoreError::ActorGone.to_string(), "claim actor is gone");
    }
}
