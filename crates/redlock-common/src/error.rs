use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedlockError {
    #[error("lock not acquired for key {key}")]
    LockNotAcquired { key: String },
    #[error("cannot release lock {key}")]
    CannotRelease { key: String },
    #[error("could not fetch TTL for key {key} in {elapsed:.2} seconds")]
    TtlUnavailable { key: String, elapsed: f64 },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("cannot connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },
    #[error("configuration error: {0}")]
    Config(String),
}

impl RedlockError {
    /// True for the errors produced by a failed majority vote.
    pub fn is_quorum_failure(&self) -> bool {
        matches!(
            self,
            Self::LockNotAcquired { .. } | Self::CannotRelease { .. } | Self::TtlUnavailable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RedlockError>;

#[cfg(test)]
mod tests {
    use super::RedlockError;

    #[test]
    fn messages_name_the_key() {
        let err = RedlockError::LockNotAcquired {
            key: "my-key".to_string(),
        };
        assert_eq!(err.to_string(), "lock not acquired for key my-key");

        let err = RedlockError::TtlUnavailable {
            key: "my-key".to_string(),
            elapsed: 0.0,
        };
        assert_eq!(
            err.to_string(),
            "could not fetch TTL for key my-key in 0.00 seconds"
        );
    }

    #[test]
    fn only_vote_errors_are_quorum_failures() {
        assert!(RedlockError::CannotRelease { key: "k".to_string() }.is_quorum_failure());
        assert!(!RedlockError::Config("empty".to_string()).is_quorum_failure());
    }
}
