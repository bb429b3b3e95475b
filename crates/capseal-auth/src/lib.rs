//! # capseal auth
//!
//! Challenge-response authentication. A caller proves control of an
//! identity by signing a short-lived statement; the decryption network
//! verifies it without any pre-shared secret.
//!
//! ## Key Types
//!
//! - [`Signer`] - Signing interface; key material never leaves it
//! - [`ChallengeAuthenticator`] - Issues signed [`ChallengeStatement`]s
//! - [`verify_challenge`] - Network-side verification

pub mod challenge;
pub mod error;
pub mod signer;

pub use challenge::{
    render_message, verify_challenge, Audience, ChallengeAuthenticator, ChallengeStatement,
    CHALLENGE_TTL_MILLIS, MAX_CLOCK_SKEW_MILLIS,
};
pub use error::{ChallengeError, Result, SignError};
pub use signer::Signer;
