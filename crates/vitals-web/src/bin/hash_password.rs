//! Prints a `password_hash = "..."` line for a `[[users]]` config entry.
//!
//! Usage: `hash_password [PASSWORD]`. Without an argument the password is
//! read from stdin twice and both entries must match.

use std::io::{self, BufRead, Write};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;

fn prompt(label: &str, lines: &mut impl Iterator<Item = io::Result<String>>) -> anyhow::Result<String> {
    eprint!("{label}: ");
    io::stderr().flush()?;
    let line = lines
        .next()
        .ok_or_else(|| anyhow::anyhow!("unexpected end of input"))??;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn read_password() -> anyhow::Result<String> {
    if let Some(arg) = std::env::args().nth(1) {
        return Ok(arg);
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let first = prompt("Password", &mut lines)?;
    let second = prompt("Repeat password", &mut lines)?;
    if first != second {
        anyhow::bail!("passwords do not match");
    }
    Ok(first)
}

fn main() -> anyhow::Result<()> {
    let password = read_password()?;
    if password.trim().is_empty() {
        anyhow::bail!("password cannot be empty");
    }

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;

    println!("password_hash = \"{hash}\"");
    Ok(())
}
