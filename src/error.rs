//! Error taxonomy for the Substrates core.

use std::fmt;

/// The error taxonomy a caller of this crate can observe, per the error
/// handling design: configuration/validation errors propagate synchronously
/// to the offending caller; emission-time failures never propagate to the
/// emitter and are instead routed to a circuit's error sink.
#[derive(Debug, thiserror::Error)]
pub enum SubstratesError {
    /// A null callback, out-of-range numeric argument, or malformed name
    /// segment. Raised at the construction/configuration call site.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted on a closed Circuit, Conduit, Channel, or Scope.
    #[error("closed: {0}")]
    Closed(String),

    /// Queue-full under a bounded, non-dropping back-pressure policy.
    #[error("rejected: {0}")]
    Rejected(String),

    /// User code raised during delivery or operator evaluation. This
    /// variant is constructed internally to report failures through a
    /// circuit's error sink; it is never returned from `Pipe::emit`.
    #[error("callback failure: {0}")]
    CallbackFailure(String),

    /// `await` with a deadline did not observe quiescence in time.
    #[error("quiescence timeout after waiting for {0:?}")]
    QuiescenceTimeout(std::time::Duration),

    /// An invariant violation that should never surface to a well-behaved
    /// caller.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type SubstratesResult<T> = Result<T, SubstratesError>;

impl SubstratesError {
    pub fn invalid_argument<T: fmt::Display>(msg: T) -> Self {
        SubstratesError::InvalidArgument(msg.to_string())
    }

    pub fn closed<T: fmt::Display>(msg: T) -> Self {
        SubstratesError::Closed(msg.to_string())
    }

    pub fn rejected<T: fmt::Display>(msg: T) -> Self {
        SubstratesError::Rejected(msg.to_string())
    }

    pub fn callback_failure<T: fmt::Display>(msg: T) -> Self {
        SubstratesError::CallbackFailure(msg.to_string())
    }

    pub fn quiescence_timeout(deadline: std::time::Duration) -> Self {
        SubstratesError::QuiescenceTimeout(deadline)
    }

    pub fn internal<T: fmt::Display>(msg: T) -> Self {
        SubstratesError::Internal(msg.to_string())
    }

    /// Whether retrying the same operation later has a realistic chance of
    /// succeeding (a transient queue-full or timeout) as opposed to a
    /// configuration mistake that will fail identically every time.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubstratesError::Rejected(_) | SubstratesError::QuiescenceTimeout(_)
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SubstratesError::Closed(_))
    }
}

#[cfg(feature = "config")]
impl From<config::ConfigError> for SubstratesError {
    fn from(err: config::ConfigError) -> Self {
        SubstratesError::invalid_argument(err)
    }
}

#[cfg(feature = "config")]
impl From<toml::de::Error> for SubstratesError {
    fn from(err: toml::de::Error) -> Self {
        SubstratesError::invalid_argument(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_match_variants() {
        assert!(matches!(
            SubstratesError::invalid_argument("bad"),
            SubstratesError::InvalidArgument(_)
        ));
        assert!(SubstratesError::rejected("full").is_retryable());
        assert!(!SubstratesError::invalid_argument("x").is_retryable());
        assert!(SubstratesError::closed("c").is_closed());
    }
}
