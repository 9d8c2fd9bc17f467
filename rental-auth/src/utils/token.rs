use rand::RngCore;
use sha2::{Digest, Sha256};

/// 32 random bytes, hex encoded. Used for verification and reset links.
pub fn generate_random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 hex digest. Opaque tokens are only ever persisted in this form.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
