use std::sync::OnceLock;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

pub fn verify_password(hash: &str, password: &str) -> anyhow::Result<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("Invalid password hash: {e}"))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

    Ok(hash.to_string())
}

/// Runs argon2 verification on the blocking pool.
pub async fn verify_password_blocking(hash: String, password: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&hash, &password)).await?
}

/// Hash of a password nobody has, created on first use.
static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();

fn dummy_hash() -> Option<&'static str> {
    DUMMY_HASH
        .get_or_init(|| hash_password("vitals-unknown-account").ok())
        .as_deref()
}

/// Does the argon2 work of a real check for a login naming no account, so
/// response time does not reveal which usernames exist.
pub async fn verify_against_dummy(password: String) {
    let outcome = tokio::task::spawn_blocking(move || match dummy_hash() {
        Some(hash) => verify_password(hash, &password).map(|_| ()),
        None => Err(anyhow::anyhow!("dummy hash unavailable")),
    })
    .await;
    if !matches!(outcome, Ok(Ok(()))) {
        tracing::warn!("Dummy password check did not run");
    }
}
