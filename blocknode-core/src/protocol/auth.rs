//! Challenge/response request authentication.
//!
//! `hash = hex(HMAC-SHA256(key = secret, msg = ident || salt))`, with a fresh salt per
//! request. The server recomputes the digest from its own copy of the secret.

use crate::error::{BlockError, Result};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    pub ident: String,
    pub salt: String,
    pub hash: String,
}

impl Auth {
    /// Sign as `ident` with a freshly generated salt.
    pub fn sign(ident: &str, secret: &str) -> Result<Self> {
        let salt = ulid::Ulid::new().to_string();
        let hash = compute_hash(ident, secret, &salt)?;
        Ok(Self {
            ident: ident.to_string(),
            salt,
            hash,
        })
    }

    /// Constant-time check of `hash` against `secret`.
    pub fn verify(&self, secret: &str) -> bool {
        let Ok(expected) = hex::decode(&self.hash) else {
            return false;
        };
        let Ok(mac) = keyed_mac(&self.ident, secret, &self.salt) else {
            return false;
        };
        mac.verify_slice(&expected).is_ok()
    }
}

pub fn compute_hash(ident: &str, secret: &str, salt: &str) -> Result<String> {
    let mac = keyed_mac(ident, secret, salt)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn keyed_mac(ident: &str, secret: &str, salt: &str) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BlockError::Internal(format!("hmac key: {}", e)))?;
    mac.update(ident.as_bytes());
    mac.update(salt.as_bytes());
    Ok(mac)
}

/// Server-side table of identities and their secrets.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    secrets: HashMap<String, String>,
}

impl Credentials {
    pub fn new(secrets: HashMap<String, String>) -> Self {
        Self { secrets }
    }

    pub fn insert(&mut self, ident: impl Into<String>, secret: impl Into<String>) {
        self.secrets.insert(ident.into(), secret.into());
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    pub fn check(&self, auth: Option<&Auth>) -> Result<()> {
        let auth = auth.ok_or_else(|| BlockError::AuthFailed("missing credentials".to_string()))?;
        let secret = self
            .secrets
            .get(&auth.ident)
            .ok_or_else(|| BlockError::AuthFailed(format!("unknown ident {}", auth.ident)))?;

        if !auth.verify(secret) {
            return Err(BlockError::AuthFailed(format!(
                "hash mismatch for {}",
                auth.ident
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        let mut credentials = Credentials::default();
        credentials.insert("alice", "s3cret");
        credentials
    }

    #[test]
    fn test_sign_and_verify() {
        let auth = Auth::sign("alice", "s3cret").unwrap();
        assert_eq!(auth.hash.len(), 64);
        assert!(auth.verify("s3cret"));
        assert!(!auth.verify("other"));
    }

    #[test]
    fn test_salt_changes_hash() {
        let a = compute_hash("alice", "s3cret", "salt-1").unwrap();
        let b = compute_hash("alice", "s3cret", "salt-2").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, compute_hash("alice", "s3cret", "salt-1").unwrap());
    }

    #[test]
    fn test_check_accepts_valid_signature() {
        let auth = Auth::sign("alice", "s3cret").unwrap();
        credentials().check(Some(&auth)).unwrap();
    }

    #[test]
    fn test_check_rejects_wrong_secret() {
        let auth = Auth::sign("alice", "guess").unwrap();
        let err = credentials().check(Some(&auth)).unwrap_err();
        assert!(matches!(err, BlockError::AuthFailed(_)));
    }

    #[test]
    fn test_check_rejects_missing_and_unknown() {
        assert!(credentials().check(None).is_err());
        let auth = Auth::sign("mallory", "s3cret").unwrap();
        assert!(credentials().check(Some(&auth)).is_err());
    }

    #[test]
    fn test_garbage_hash_rejected() {
        let mut auth = Auth::sign("alice", "s3cret").unwrap();
        auth.hash = "not hex".to_string();
        assert!(!auth.verify("s3cret"));
    }
}
