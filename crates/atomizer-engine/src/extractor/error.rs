//! Extraction errors

/// Errors from the change extractor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    /// Provider quota hit (HTTP 429 / RESOURCE_EXHAUSTED)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Network failure or server-side error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request refused for a reason retrying will not fix
    #[error("Request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// Response could not be parsed into change events
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Retry budget used up
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<ExtractError>,
    },
}

impl ExtractError {
    /// Rate limits and transport failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractError::RateLimited(_) | ExtractError::Transport(_))
    }

    /// Number of calls made before the error surfaced
    pub fn attempts(&self) -> u32 {
        match self {
            ExtractError::Exhausted { attempts, .. } => *attempts,
            _ => 1,
        }
    }

    /// Adds the calls already spent on earlier chunks of the same commit
    pub fn with_prior_calls(self, prior: u32) -> Self {
        if prior == 0 {
            return self;
        }
        match self {
            ExtractError::Exhausted { attempts, last } => ExtractError::Exhausted {
                attempts: attempts + prior,
                last,
            },
            other => ExtractError::Exhausted {
                attempts: prior + 1,
                last: Box::new(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prior_calls_extend_attempts() {
        let exhausted = ExtractError::Exhausted {
            attempts: 3,
            last: Box::new(ExtractError::RateLimited("HTTP 429".into())),
        };
        assert_eq!(exhausted.with_prior_calls(2).attempts(), 5);

        let rejected = ExtractError::Rejected { status: 400, body: "bad".into() };
        assert_eq!(rejected.clone().with_prior_calls(0), rejected);
        let wrapped = rejected.with_prior_calls(1);
        assert_eq!(wrapped.attempts(), 2);
        assert!(wrapped.to_string().contains("Request rejected (400)"));
    }
}
