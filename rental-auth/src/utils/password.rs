use std::sync::OnceLock;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use service_core::error::FieldError;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Newtype for password to prevent accidental logging
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Newtype for password hash
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Hash a password using Argon2id with a random salt.
pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let argon2 = Argon2::default();
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = argon2
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(PasswordHashString::new(password_hash))
}

/// Verify a password against a stored hash.
pub fn verify_password(
    password: &Password,
    password_hash: &PasswordHashString,
) -> Result<(), anyhow::Error> {
    let parsed_hash = PasswordHash::new(password_hash.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    Argon2::default()
        .verify_password(password.as_str().as_bytes(), &parsed_hash)
        .map_err(|_| anyhow::anyhow!("Password verification failed"))
}

/// Burn a verification against a fixed hash so unknown emails cost the same as wrong passwords.
pub fn verify_against_dummy(password: &Password) {
    static DUMMY_HASH: OnceLock<Option<PasswordHashString>> = OnceLock::new();
    let dummy = DUMMY_HASH.get_or_init(|| hash_password(&Password::new("dummy-Passw0rd!")).ok());
    if let Some(hash) = dummy {
        let _ = verify_password(password, hash);
    }
}

/// Every rule the password breaks, as field errors on `field`.
pub fn check_password_strength(field: &str, password: &str) -> Vec<FieldError> {
    let mut violations = Vec::new();

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        violations.push(FieldError::new(
            field,
            format!("must be at least {} characters", MIN_PASSWORD_LENGTH),
        ));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        violations.push(FieldError::new(field, "must contain an uppercase letter"));
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        violations.push(FieldError::new(field, "must contain a lowercase letter"));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push(FieldError::new(field, "must contain a digit"));
    }
    if !password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
        violations.push(FieldError::new(field, "must contain a special character"));
    }

    violations
}
