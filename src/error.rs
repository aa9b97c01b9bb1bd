use thiserror::Error;

/// Why a data request produced no result. Every client call ends in either a
/// fully parsed value or exactly one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    #[error("{0} is not configured")]
    ConfigMissing(&'static str),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("API key rejected")]
    Unauthorized,

    #[error("endpoint not available on the current plan")]
    PlanRestricted,

    #[error("no data for {0}")]
    NotFound(String),

    #[error("upstream returned HTTP {0}")]
    Upstream(u16),

    #[error("unexpected response: {0}")]
    Parse(String),
}

impl Failure {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) => true,
            Self::Upstream(status) => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Short label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigMissing(_) => "config_missing",
            Self::Timeout => "timeout",
            Self::Network(_) => "network",
            Self::Unauthorized => "unauthorized",
            Self::PlanRestricted => "plan_restricted",
            Self::NotFound(_) => "not_found",
            Self::Upstream(_) => "upstream",
            Self::Parse(_) => "parse",
        }
    }
}

impl From<reqwest::Error> for Failure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Failure {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(Failure::Timeout.is_retryable());
        assert!(Failure::Network("reset".into()).is_retryable());
        assert!(Failure::Upstream(429).is_retryable());
        assert!(Failure::Upstream(503).is_retryable());
        assert!(!Failure::Upstream(418).is_retryable());
        assert!(!Failure::Unauthorized.is_retryable());
        assert!(!Failure::PlanRestricted.is_retryable());
        assert!(!Failure::Parse("x".into()).is_retryable());
    }
}
