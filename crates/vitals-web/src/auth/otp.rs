//! One-time login codes sent to a user's phone.
//!
//! Codes are single-use, expire after a fixed TTL and allow a bounded
//! number of wrong guesses. Delivery goes through [`OtpSender`]; the
//! shipped [`LogOtpSender`] only records the dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use vitals_core::Clock;

pub fn generate_otp() -> String {
    let mut rng = rand::thread_rng();
    let code: u32 = rng.gen_range(100_000..1_000_000);
    format!("{code:06}")
}

/// Keeps the last four digits.
pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    let tail: String = digits.iter().skip(digits.len().saturating_sub(4)).collect();
    format!("***{tail}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpError {
    /// No code outstanding for this phone, or it expired.
    Missing,
    Mismatch,
    TooManyAttempts,
}

#[derive(Debug, Clone)]
struct OtpChallenge {
    identity: String,
    code: String,
    created_at: DateTime<Utc>,
    attempts: u32,
}

pub struct OtpStore {
    codes: DashMap<String, OtpChallenge>,
    ttl: Duration,
    max_attempts: u32,
    clock: Arc<dyn Clock>,
}

impl OtpStore {
    pub fn new(ttl_seconds: u64, max_attempts: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            codes: DashMap::new(),
            ttl: Duration::seconds(i64::try_from(ttl_seconds).unwrap_or(i64::MAX / 1000)),
            max_attempts: max_attempts.max(1),
            clock,
        }
    }

    /// Creates a fresh code for `phone`, replacing any outstanding one.
    pub fn issue(&self, phone: &str, identity: &str) -> String {
        let code = generate_otp();
        self.codes.insert(
            phone.to_string(),
            OtpChallenge {
                identity: identity.to_string(),
                code: code.clone(),
                created_at: self.clock.now(),
                attempts: 0,
            },
        );
        code
    }

    /// Consumes the code on success and returns the identity it was issued
    /// for. Expired or exhausted challenges are dropped.
    pub fn verify(&self, phone: &str, code: &str) -> Result<String, OtpError> {
        let now = self.clock.now();
        let outcome = {
            let Some(mut challenge) = self.codes.get_mut(phone) else {
                return Err(OtpError::Missing);
            };
            if now - challenge.created_at > self.ttl {
                Err(OtpError::Missing)
            } else if challenge.attempts >= self.max_attempts {
                Err(OtpError::TooManyAttempts)
            } else {
                challenge.attempts += 1;
                if constant_time_eq(challenge.code.as_bytes(), code.as_bytes()) {
                    Ok(())
                } else if challenge.attempts >= self.max_attempts {
                    Err(OtpError::TooManyAttempts)
                } else {
                    Err(OtpError::Mismatch)
                }
            }
        };

        match outcome {
            Ok(()) => self
                .codes
                .remove_if(phone, |_, c| constant_time_eq(c.code.as_bytes(), code.as_bytes()))
                .map(|(_, c)| c.identity)
                .ok_or(OtpError::Missing),
            Err(OtpError::Mismatch) => Err(OtpError::Mismatch),
            Err(e) => {
                self.codes.remove(phone);
                Err(e)
            }
        }
    }

    pub fn cleanup_expired(&self) {
        let now = self.clock.now();
        let ttl = self.ttl;
        self.codes.retain(|_, c| now - c.created_at <= ttl);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.codes.len()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Delivers a code to a phone number.
#[async_trait]
pub trait OtpSender: Send + Sync {
    async fn send(&self, phone: &str, code: &str) -> anyhow::Result<()>;
}

/// Records the dispatch in the log instead of sending an SMS.
#[derive(Debug, Default)]
pub struct LogOtpSender;

#[async_trait]
impl OtpSender for LogOtpSender {
    async fn send(&self, phone: &str, code: &str) -> anyhow::Result<()> {
        tracing::info!(phone = %mask_phone(phone), "one-time code dispatched");
        tracing::debug!(phone = %mask_phone(phone), code, "no SMS gateway configured");
        Ok(())
    }
}
