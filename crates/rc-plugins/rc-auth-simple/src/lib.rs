//! # rc-auth-simple
//!
//! Shared-secret implementation of `AdminAuth`.
//! The configured key is compared against the `x-admin-key` header value.

use rc_core::traits::AdminAuth;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

pub struct AdminKeyAuth {
    /// Admin key (e.g., from the `ADMIN_KEY` environment variable)
    key: SecretString,
}

impl AdminKeyAuth {
    pub fn new(key: SecretString) -> Self {
        Self { key }
    }
}

impl AdminAuth for AdminKeyAuth {
    /// Compares SHA-256 digests byte by byte without short-circuiting, so the
    /// time taken does not reveal how much of the key was right.
    /// An empty presented key never matches.
    fn verify_admin_key(&self, presented: &str) -> bool {
        if presented.is_empty() {
            return false;
        }
        let expected = Sha256::digest(self.key.expose_secret().as_bytes());
        let actual = Sha256::digest(presented.as_bytes());
        expected
            .iter()
            .zip(actual.iter())
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
    }
}
