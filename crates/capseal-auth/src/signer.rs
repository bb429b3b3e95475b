//! The signing interface exposed by whoever holds a private key.
//!
//! The authenticator only ever sees an identity and signatures; key
//! material stays behind this trait.

use std::sync::Arc;

use async_trait::async_trait;

use capseal_core::{Identity, Keypair, Signature};

use crate::error::SignError;

/// Something that can sign messages as an identity.
#[async_trait]
pub trait Signer: Send + Sync {
    /// The identity this signer signs as, if it has one.
    fn identity(&self) -> Option<Identity>;

    /// Sign `message`. May be declined by the key holder.
    async fn sign(&self, message: &[u8]) -> Result<Signature, SignError>;
}

#[async_trait]
impl Signer for Keypair {
    fn identity(&self) -> Option<Identity> {
        Some(Keypair::identity(self))
    }

    async fn sign(&self, message: &[u8]) -> Result<Signature, SignError> {
        Ok(Keypair::sign(self, message))
    }
}

#[async_trait]
impl<T: Signer + ?Sized> Signer for Arc<T> {
    fn identity(&self) -> Option<Identity> {
        (**self).identity()
    }

    async fn sign(&self, message: &[u8]) -> Result<Signature, SignError> {
        (**self).sign(message).await
    }
}
