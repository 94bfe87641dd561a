use std::sync::Arc;
use std::time::Duration;

use vitals_core::{
    Clock, CounterStore, MemoryCounterStore, MemoryCredentialStore, RateLimiter,
    RedisCounterStore, SessionGuard, TokenIssuer,
};

use crate::auth::otp::{LogOtpSender, OtpSender, OtpStore};
use crate::auth::users::UserDirectory;
use crate::config::{CounterBackend, ServerConfig};
use crate::metrics::MetricLog;

const REDIS_KEY_PREFIX: &str = "vitals:rl:";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub clock: Arc<dyn Clock>,
    pub tokens: Arc<TokenIssuer>,
    pub sessions: Arc<SessionGuard>,
    pub limiter: Arc<RateLimiter>,
    pub users: Arc<UserDirectory>,
    pub otp_codes: Arc<OtpStore>,
    pub otp_sender: Arc<dyn OtpSender>,
    pub metrics: Arc<MetricLog>,
}

/// Falls back to a day for lifetimes `chrono` cannot represent;
/// `ServerConfig::validate` rejects those before startup.
fn token_ttl(hours: u64) -> chrono::Duration {
    i64::try_from(hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .unwrap_or_else(|| chrono::Duration::days(1))
}

impl AppState {
    /// Wires the core components around an already chosen counter store.
    pub fn new(config: ServerConfig, clock: Arc<dyn Clock>, counters: Arc<dyn CounterStore>) -> Self {
        let users = UserDirectory::new(&config.users);
        let credentials = Arc::new(MemoryCredentialStore::new());
        users.seed(&credentials);

        let tokens = TokenIssuer::new(
            config.auth.jwt_secret.as_bytes(),
            token_ttl(config.auth.jwt_ttl_hours),
            clock.clone(),
        );
        let sessions = SessionGuard::new(
            credentials,
            clock.clone(),
            Duration::from_millis(config.auth.credential_timeout_ms),
        );
        let limiter = RateLimiter::new(
            counters,
            clock.clone(),
            Duration::from_millis(config.rate_limit.store_timeout_ms),
        );
        let otp_codes = OtpStore::new(
            config.auth.otp_ttl_seconds,
            config.auth.otp_max_attempts,
            clock.clone(),
        );

        Self {
            config: Arc::new(config),
            clock,
            tokens: Arc::new(tokens),
            sessions: Arc::new(sessions),
            limiter: Arc::new(limiter),
            users: Arc::new(users),
            otp_codes: Arc::new(otp_codes),
            otp_sender: Arc::new(LogOtpSender),
            metrics: Arc::new(MetricLog::new()),
        }
    }

    /// Builds state for the configured counter backend.
    pub async fn from_config(config: ServerConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let counters: Arc<dyn CounterStore> = match config.rate_limit.backend {
            CounterBackend::Memory => {
                tracing::info!("Rate limiting with process-local counters (single instance only)");
                Arc::new(MemoryCounterStore::new())
            }
            CounterBackend::Redis => {
                let url = config
                    .rate_limit
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("rate_limit.redis_url is not set"))?;
                let store = RedisCounterStore::connect(url, REDIS_KEY_PREFIX).await?;
                tracing::info!("Rate limiting with shared Redis counters");
                Arc::new(store)
            }
        };

        Ok(Self::new(config, clock, counters))
    }
}
