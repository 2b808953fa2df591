//! Pre-shared credential
//!
//! The wire header carries a SHA-224 digest of the shared secret as a
//! bearer-style token. The digest is computed once at startup and shared
//! read-only across all sessions; rotation requires a restart.

use sha2::{Digest, Sha224};

/// Length of the credential digest (SHA-224 output)
pub const CREDENTIAL_LEN: usize = 28;

/// Process-wide credential: the SHA-224 digest of the shared secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential([u8; CREDENTIAL_LEN]);

impl Credential {
    /// Derive the credential from the configured secret
    pub fn from_secret(secret: &str) -> Self {
        let mut hasher = Sha224::new();
        hasher.update(secret.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Byte-exact comparison against a header prefix
    pub fn matches(&self, bytes: &[u8]) -> bool {
        bytes == self.0.as_slice()
    }

    pub fn as_bytes(&self) -> &[u8; CREDENTIAL_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never log the digest itself
        f.write_str("Credential(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_length() {
        let cred = Credential::from_secret("hunter2");
        assert_eq!(cred.as_bytes().len(), CREDENTIAL_LEN);
    }

    #[test]
    fn test_matches_own_digest() {
        let cred = Credential::from_secret("hunter2");
        let bytes = *cred.as_bytes();
        assert!(cred.matches(&bytes));
    }

    #[test]
    fn test_rejects_flipped_byte() {
        let cred = Credential::from_secret("hunter2");
        let mut bytes = *cred.as_bytes();
        bytes[0] ^= 0x01;
        assert!(!cred.matches(&bytes));
    }

    #[test]
    fn test_rejects_wrong_length() {
        let cred = Credential::from_secret("hunter2");
        assert!(!cred.matches(&cred.as_bytes()[..27]));
    }

    #[test]
    fn test_deterministic() {
        let a = Credential::from_secret("secret");
        let b = Credential::from_secret("secret");
        assert_eq!(a.as_bytes(), b.as_bytes());
    }
}
