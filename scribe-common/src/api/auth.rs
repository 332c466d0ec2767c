//! Access-key authorization
//!
//! Every request carries the shared secret. Keys are compared through their
//! SHA-256 digests with a full-length fold, so comparison time does not depend
//! on how many leading bytes of the secret match.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::{Error, Result};

/// Shared secret expected from clients
#[derive(Clone)]
pub struct AccessKey {
    digest: [u8; 32],
}

impl AccessKey {
    /// Build from the configured secret; empty secrets are refused
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Config("access key must not be empty".to_string()));
        }
        Ok(Self {
            digest: digest(secret),
        })
    }

    /// Check a key presented by a client
    pub fn verify(&self, provided: &str) -> bool {
        let candidate = digest(provided);
        self.digest
            .iter()
            .zip(candidate.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessKey(<redacted>)")
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_accepts_only_exact_key() {
        let key = AccessKey::new("s3cret").unwrap();
        assert!(key.verify("s3cret"));
        assert!(!key.verify("s3cre"));
        assert!(!key.verify("s3cret "));
        assert!(!key.verify(""));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(AccessKey::new(""), Err(Error::Config(_))));
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let key = AccessKey::new("s3cret").unwrap();
        assert!(!format!("{:?}", key).contains("s3cret"));
    }
}
