//! Error types for challenge issue and verification.

use thiserror::Error;

/// Why a signer refused or failed to sign.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignError {
    /// The holder of the key said no.
    #[error("signing declined")]
    Declined,

    #[error("signer failed: {0}")]
    Failed(String),
}

/// Errors raised while issuing or verifying a challenge statement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChallengeError {
    /// The signer exposes no identity to sign as.
    #[error("no signing capability available")]
    NoSigningCapability,

    #[error("signing declined")]
    SigningDeclined,

    #[error("signer failed: {0}")]
    SignerFailed(String),

    #[error("challenge expired at {expires_at} (now {now})")]
    Expired { expires_at: i64, now: i64 },

    #[error("challenge issued at {issued_at} is in the future (now {now})")]
    NotYetValid { issued_at: i64, now: i64 },

    #[error("challenge audience {found} does not match {expected}")]
    AudienceMismatch { expected: String, found: String },

    #[error("challenge is for chain {found}, expected {expected}")]
    ChainMismatch { expected: String, found: String },

    /// The statement does not hold together.
    #[error("malformed challenge: {0}")]
    Malformed(String),

    #[error("challenge signature does not verify")]
    BadSignature,
}

impl ChallengeError {
    /// Whether this error came from the verifier rather than the signer.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            ChallengeError::NoSigningCapability
                | ChallengeError::SigningDeclined
                | ChallengeError::SignerFailed(_)
        )
    }
}

impl From<SignError> for ChallengeError {
    fn from(err: SignError) -> Self {
        match err {
            SignError::Declined => ChallengeError::SigningDeclined,
            SignError::Failed(reason) => ChallengeError::SignerFailed(reason),
        }
    }
}

/// Result type for challenge operations.
pub type Result<T> = std::result::Result<T, ChallengeError>;
