//! Challenge statements: short-lived, signed proofs of identity.
//!
//! A statement is a human-readable sign-in message naming the identity,
//! the audience (domain and origin), the chain, a random nonce and a one
//! hour validity window. The signer signs the rendered message; verifiers
//! re-render it from the fields and check the signature and the window.

use std::fmt::Write as _;
use std::sync::Arc;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use capseal_core::{Clock, Identity, Signature, SystemClock};

use crate::error::{ChallengeError, Result};
use crate::signer::Signer;

/// How long a statement stays valid after issue.
pub const CHALLENGE_TTL_MILLIS: i64 = 60 * 60 * 1000;

/// Tolerated clock drift between issuer and verifier.
pub const MAX_CLOCK_SKEW_MILLIS: i64 = 30 * 1000;

/// Version line of the rendered message.
pub const STATEMENT_VERSION: &str = "1";

const STATEMENT_TEXT: &str = "Prove control of this identity to unlock capseal secrets.";

/// Who a statement is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Audience {
    pub domain: String,
    pub origin: String,
}

impl Audience {
    pub fn new(domain: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            origin: origin.into(),
        }
    }
}

impl std::fmt::Display for Audience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.domain, self.origin)
    }
}

/// A signed sign-in statement.
///
/// Created fresh for every decryption attempt and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeStatement {
    pub identity: Identity,
    pub signature: Signature,
    pub message: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub audience: Audience,
    pub chain: String,
    pub nonce: String,
}

impl ChallengeStatement {
    /// Check the statement was issued for `chain`.
    pub fn ensure_chain(&self, chain: &str) -> Result<()> {
        if self.chain != chain {
            return Err(ChallengeError::ChainMismatch {
                expected: chain.to_string(),
                found: self.chain.clone(),
            });
        }
        Ok(())
    }
}

/// Render the message that gets signed.
pub fn render_message(
    identity: &Identity,
    audience: &Audience,
    chain: &str,
    nonce: &str,
    issued_at: i64,
    expires_at: i64,
) -> String {
    let mut message = String::new();
    // Writing to a String cannot fail.
    let _ = write!(
        message,
        "{domain} wants you to sign in with your capseal identity:\n\
         {identity}\n\
         \n\
         {statement}\n\
         \n\
         URI: {origin}\n\
         Version: {version}\n\
         Chain: {chain}\n\
         Nonce: {nonce}\n\
         Issued At: {issued_at}\n\
         Expiration Time: {expires_at}",
        domain = audience.domain,
        identity = identity.to_hex(),
        statement = STATEMENT_TEXT,
        origin = audience.origin,
        version = STATEMENT_VERSION,
    );
    message
}

/// Issues statements on behalf of a signer.
#[derive(Clone)]
pub struct ChallengeAuthenticator {
    audience: Audience,
    chain: String,
    clock: Arc<dyn Clock>,
}

impl ChallengeAuthenticator {
    pub fn new(audience: Audience, chain: impl Into<String>) -> Self {
        Self::with_clock(audience, chain, Arc::new(SystemClock))
    }

    /// Use `clock` as the source of `issued_at`.
    pub fn with_clock(audience: Audience, chain: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            audience,
            chain: chain.into(),
            clock,
        }
    }

    pub fn audience(&self) -> &Audience {
        &self.audience
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Compose, render and sign a fresh statement.
    pub async fn issue(&self, signer: &dyn Signer) -> Result<ChallengeStatement> {
        let identity = signer
            .identity()
            .ok_or(ChallengeError::NoSigningCapability)?;

        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce = hex::encode(nonce);

        let issued_at = self.clock.now_millis();
        let expires_at = issued_at + CHALLENGE_TTL_MILLIS;
        let message = render_message(
            &identity,
            &self.audience,
            &self.chain,
            &nonce,
            issued_at,
            expires_at,
        );

        let signature = signer.sign(message.as_bytes()).await?;
        debug!(identity = ?identity, expires_at, "challenge issued");

        Ok(ChallengeStatement {
            identity,
            signature,
            message,
            issued_at,
            expires_at,
            audience: self.audience.clone(),
            chain: self.chain.clone(),
            nonce,
        })
    }
}

impl std::fmt::Debug for ChallengeAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeAuthenticator")
            .field("audience", &self.audience)
            .field("chain", &self.chain)
            .finish()
    }
}

/// Verify a statement and return the identity it proves.
pub fn verify_challenge(
    statement: &ChallengeStatement,
    expected_audience: &Audience,
    now: i64,
) -> Result<Identity> {
    let result = check(statement, expected_audience, now);
    if let Err(err) = &result {
        warn!(identity = ?statement.identity, error = %err, "challenge rejected");
    }
    result
}

fn check(statement: &ChallengeStatement, expected_audience: &Audience, now: i64) -> Result<Identity> {
    if statement.audience != *expected_audience {
        return Err(ChallengeError::AudienceMismatch {
            expected: expected_audience.to_string(),
            found: statement.audience.to_string(),
        });
    }

    let lifetime = statement
        .expires_at
        .checked_sub(statement.issued_at)
        .ok_or_else(|| ChallengeError::Malformed("validity window out of range".into()))?;
    if lifetime <= 0 || lifetime > CHALLENGE_TTL_MILLIS {
        return Err(ChallengeError::Malformed(format!(
            "validity window of {lifetime}ms"
        )));
    }

    if statement.nonce.is_empty() {
        return Err(ChallengeError::Malformed("empty nonce".into()));
    }

    let expected_message = render_message(
        &statement.identity,
        &statement.audience,
        &statement.chain,
        &statement.nonce,
        statement.issued_at,
        statement.expires_at,
    );
    if statement.message != expected_message {
        return Err(ChallengeError::Malformed(
            "message does not match statement fields".into(),
        ));
    }

    statement
        .identity
        .verify(statement.message.as_bytes(), &statement.signature)
        .map_err(|_| ChallengeError::BadSignature)?;

    if statement.issued_at > now.saturating_add(MAX_CLOCK_SKEW_MILLIS) {
        return Err(ChallengeError::NotYetValid {
            issued_at: statement.issued_at,
            now,
        });
    }
    if now > statement.expires_at {
        return Err(ChallengeError::Expired {
            expires_at: statement.expires_at,
            now,
        });
    }

    Ok(statement.identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SignError;
    use async_trait::async_trait;
    use capseal_core::{Keypair, ManualClock};
    use proptest::prelude::*;

    const T0: i64 = 1_700_000_000_000;

    fn audience() -> Audience {
        Audience::new("capseal.test", "https://capseal.test")
    }

    fn authenticator() -> ChallengeAuthenticator {
        ChallengeAuthenticator::with_clock(audience(), "capseal-devnet", Arc::new(ManualClock::new(T0)))
    }

    struct Declining(Keypair);

    #[async_trait]
    impl Signer for Declining {
        fn identity(&self) -> Option<Identity> {
            Some(self.0.identity())
        }

        async fn sign(&self, _message: &[u8]) -> std::result::Result<Signature, SignError> {
            Err(SignError::Declined)
        }
    }

    struct WatchOnly;

    #[async_trait]
    impl Signer for WatchOnly {
        fn identity(&self) -> Option<Identity> {
            None
        }

        async fn sign(&self, _message: &[u8]) -> std::result::Result<Signature, SignError> {
            Err(SignError::Failed("no key".into()))
        }
    }

    #[tokio::test]
    async fn test_issue_and_verify() {
        let keypair = Keypair::from_seed(&[1; 32]);
        let statement = authenticator().issue(&keypair).await.unwrap();

        assert_eq!(statement.issued_at, T0);
        assert_eq!(statement.expires_at, T0 + CHALLENGE_TTL_MILLIS);
        assert!(statement.message.contains("Version: 1"));
        assert!(statement.message.contains(&keypair.identity().to_hex()));

        let identity = verify_challenge(&statement, &audience(), T0 + 1).unwrap();
        assert_eq!(identity, keypair.identity());
    }

    #[tokio::test]
    async fn test_nonces_are_fresh() {
        let keypair = Keypair::from_seed(&[1; 32]);
        let a = authenticator().issue(&keypair).await.unwrap();
        let b = authenticator().issue(&keypair).await.unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    #[tokio::test]
    async fn test_expired() {
        let keypair = Keypair::from_seed(&[1; 32]);
        let statement = authenticator().issue(&keypair).await.unwrap();
        let err = verify_challenge(&statement, &audience(), T0 + CHALLENGE_TTL_MILLIS + 1).unwrap_err();
        assert!(matches!(err, ChallengeError::Expired { .. }));
    }

    #[tokio::test]
    async fn test_not_yet_valid() {
        let keypair = Keypair::from_seed(&[1; 32]);
        let statement = authenticator().issue(&keypair).await.unwrap();

        assert!(verify_challenge(&statement, &audience(), T0 - MAX_CLOCK_SKEW_MILLIS).is_ok());
        let err = verify_challenge(&statement, &audience(), T0 - MAX_CLOCK_SKEW_MILLIS - 1).unwrap_err();
        assert!(matches!(err, ChallengeError::NotYetValid { .. }));
    }

    #[tokio::test]
    async fn test_audience_mismatch() {
        let keypair = Keypair::from_seed(&[1; 32]);
        let statement = authenticator().issue(&keypair).await.unwrap();
        let other = Audience::new("evil.test", "https://evil.test");
        assert!(matches!(
            verify_challenge(&statement, &other, T0),
            Err(ChallengeError::AudienceMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_swapped_identity_is_rejected() {
        let alice = Keypair::from_seed(&[1; 32]);
        let mallory = Keypair::from_seed(&[2; 32]);
        let mut statement = authenticator().issue(&alice).await.unwrap();

        // Claim to be mallory while keeping alice's message.
        statement.identity = mallory.identity();
        assert!(matches!(
            verify_challenge(&statement, &audience(), T0),
            Err(ChallengeError::Malformed(_))
        ));

        // Re-render for mallory but keep alice's signature.
        statement.message = render_message(
            &statement.identity,
            &statement.audience,
            &statement.chain,
            &statement.nonce,
            statement.issued_at,
            statement.expires_at,
        );
        assert!(matches!(
            verify_challenge(&statement, &audience(), T0),
            Err(ChallengeError::BadSignature)
        ));
    }

    #[tokio::test]
    async fn test_extended_window_is_malformed() {
        let keypair = Keypair::from_seed(&[1; 32]);
        let mut statement = authenticator().issue(&keypair).await.unwrap();
        statement.expires_at += CHALLENGE_TTL_MILLIS;
        assert!(matches!(
            verify_challenge(&statement, &audience(), T0),
            Err(ChallengeError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_signer_errors() {
        let err = authenticator().issue(&WatchOnly).await.unwrap_err();
        assert_eq!(err, ChallengeError::NoSigningCapability);
        assert!(!err.is_rejection());

        let declining = Declining(Keypair::from_seed(&[1; 32]));
        let err = authenticator().issue(&declining).await.unwrap_err();
        assert_eq!(err, ChallengeError::SigningDeclined);
    }

    #[tokio::test]
    async fn test_chain_check() {
        let statement = authenticator()
            .issue(&Keypair::from_seed(&[1; 32]))
            .await
            .unwrap();
        assert!(statement.ensure_chain("capseal-devnet").is_ok());
        assert!(matches!(
            statement.ensure_chain("mainnet"),
            Err(ChallengeError::ChainMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_statement_json_roundtrip() {
        let statement = authenticator()
            .issue(&Keypair::from_seed(&[1; 32]))
            .await
            .unwrap();
        let json = serde_json::to_string(&statement).unwrap();
        assert!(json.contains("\"expiresAt\""));
        let back: ChallengeStatement = serde_json::from_str(&json).unwrap();
        assert_eq!(back, statement);
    }

    fn signed(keypair: &Keypair, issued_at: i64, expires_at: i64) -> ChallengeStatement {
        let identity = keypair.identity();
        let message = render_message(&identity, &audience(), "capseal-devnet", "ab", issued_at, expires_at);
        ChallengeStatement {
            identity,
            signature: keypair.sign(message.as_bytes()),
            message,
            issued_at,
            expires_at,
            audience: audience(),
            chain: "capseal-devnet".into(),
            nonce: "ab".into(),
        }
    }

    #[test]
    fn test_extreme_timestamps_rejected() {
        let keypair = Keypair::from_seed(&[5; 32]);

        let statement = signed(&keypair, -1, i64::MAX);
        assert!(matches!(
            verify_challenge(&statement, &audience(), 0),
            Err(ChallengeError::Malformed(_))
        ));

        let statement = signed(&keypair, i64::MIN, 0);
        assert!(matches!(
            verify_challenge(&statement, &audience(), 0),
            Err(ChallengeError::Malformed(_))
        ));
    }

    #[test]
    fn test_clock_at_upper_bound() {
        let keypair = Keypair::from_seed(&[5; 32]);
        let statement = signed(&keypair, i64::MAX - 10, i64::MAX);
        assert!(verify_challenge(&statement, &audience(), i64::MAX).is_ok());

        let statement = signed(&keypair, T0, T0 + CHALLENGE_TTL_MILLIS);
        assert!(matches!(
            verify_challenge(&statement, &audience(), i64::MAX),
            Err(ChallengeError::Expired { .. })
        ));
    }

    proptest! {
        #[test]
        fn window_is_respected(offset in 0i64..CHALLENGE_TTL_MILLIS) {
            let keypair = Keypair::from_seed(&[4; 32]);
            let identity = keypair.identity();
            let message = render_message(&identity, &audience(), "capseal-devnet", "ab", T0, T0 + CHALLENGE_TTL_MILLIS);
            let statement = ChallengeStatement {
                identity,
                signature: keypair.sign(message.as_bytes()),
                message,
                issued_at: T0,
                expires_at: T0 + CHALLENGE_TTL_MILLIS,
                audience: audience(),
                chain: "capseal-devnet".into(),
                nonce: "ab".into(),
            };
            prop_assert!(verify_challenge(&statement, &audience(), T0 + offset).is_ok());
        }
    }
}
