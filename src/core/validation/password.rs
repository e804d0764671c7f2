//! PBKDF2-SHA512 password hashing

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha512;

pub const PBKDF2_ITERATIONS: u32 = 10_000;
pub const HASH_LENGTH: usize = 255;
pub const SALT_LENGTH: usize = 32;

/// Salt and derived key, both hex encoded
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash {
    pub salt: String,
    pub hash: String,
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHash")
            .field("salt", &"[REDACTED]")
            .field("hash", &"[REDACTED]")
            .finish()
    }
}

impl PasswordHash {
    /// Hash `password` under a fresh random salt
    pub fn derive(password: &str) -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = hex::encode(salt);
        let hash = derive_key(password, &salt);
        Self { salt, hash }
    }

    /// Check `password` against this hash
    pub fn verify(&self, password: &str) -> bool {
        derive_key(password, &self.salt) == self.hash
    }
}

fn derive_key(password: &str, salt: &str) -> String {
    let mut key = [0u8; HASH_LENGTH];
    pbkdf2::pbkdf2_hmac::<Sha512>(password.as_bytes(), salt.as_bytes(), PBKDF2_ITERATIONS, &mut key);
    hex::encode(key)
}
