//! Backend error taxonomy.

use thiserror::Error;

/// Vote rejection codes the backend returns on `POST /votes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteRejection {
    DuplicateVote,
    VotingNotStarted,
    VotingEnded,
    VotingNotActive,
    AwardNotFound,
    NomineeNotFound,
    Other(String),
}

impl VoteRejection {
    pub fn from_code(code: &str) -> Self {
        match code {
            "DUPLICATE_VOTE" => Self::DuplicateVote,
            "VOTING_NOT_STARTED" => Self::VotingNotStarted,
            "VOTING_ENDED" => Self::VotingEnded,
            "VOTING_NOT_ACTIVE" => Self::VotingNotActive,
            "AWARD_NOT_FOUND" => Self::AwardNotFound,
            "NOMINEE_NOT_FOUND" => Self::NomineeNotFound,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend rejected request ({status} {code}): {message}")]
    Backend {
        status: u16,
        code: String,
        message: String,
    },
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

impl ApiError {
    /// Transport failures and server-side 5xx responses are worth retrying;
    /// a 4xx rejection is a decision, not a glitch.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Backend { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// The vote rejection this error represents, if any.
    pub fn vote_rejection(&self) -> Option<VoteRejection> {
        match self {
            ApiError::Backend { status, code, .. } if *status < 500 => {
                Some(VoteRejection::from_code(code))
            }
            _ => None,
        }
    }

    /// True for the backend failures that mean "no credential is enrolled
    /// yet" during a WebAuthn authentication exchange. Callers should offer
    /// registration instead of retrying.
    pub fn indicates_missing_credentials(&self) -> bool {
        match self {
            ApiError::Backend { code, message, .. } => {
                code == "NO_CREDENTIALS"
                    || code == "AUTHENTICATION_OPTIONS_ERROR"
                    || message.contains("No WebAuthn credentials")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(status: u16, code: &str, message: &str) -> ApiError {
        ApiError::Backend {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    #[test]
    fn rejection_codes_parse() {
        assert_eq!(
            VoteRejection::from_code("DUPLICATE_VOTE"),
            VoteRejection::DuplicateVote
        );
        assert_eq!(
            VoteRejection::from_code("VOTING_ENDED"),
            VoteRejection::VotingEnded
        );
        assert_eq!(
            VoteRejection::from_code("SOMETHING_ELSE"),
            VoteRejection::Other("SOMETHING_ELSE".into())
        );
    }

    #[test]
    fn server_errors_are_retryable_rejections_are_not() {
        assert!(backend(503, "UNAVAILABLE", "down").is_retryable());
        assert!(!backend(409, "DUPLICATE_VOTE", "already voted").is_retryable());
        assert!(!backend(404, "AWARD_NOT_FOUND", "missing").is_retryable());
    }

    #[test]
    fn vote_rejection_only_for_client_errors() {
        assert_eq!(
            backend(409, "DUPLICATE_VOTE", "x").vote_rejection(),
            Some(VoteRejection::DuplicateVote)
        );
        assert_eq!(backend(500, "INTERNAL", "x").vote_rejection(), None);
    }

    #[test]
    fn missing_credentials_detection() {
        assert!(backend(400, "NO_CREDENTIALS", "none").indicates_missing_credentials());
        assert!(backend(400, "X", "No WebAuthn credentials registered for user")
            .indicates_missing_credentials());
        assert!(!backend(400, "BAD_REQUEST", "nope").indicates_missing_credentials());
    }
}
