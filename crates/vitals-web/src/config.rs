use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use ipnet::IpNet;
use serde::Deserialize;
use vitals_core::LimitRule;

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub password_hash: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_jwt_ttl_hours")]
    pub jwt_ttl_hours: u64,
    #[serde(default = "default_otp_ttl_seconds")]
    pub otp_ttl_seconds: u64,
    #[serde(default = "default_otp_max_attempts")]
    pub otp_max_attempts: u32,
    #[serde(default = "default_credential_timeout_ms")]
    pub credential_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RuleConfig {
    pub limit: u32,
    pub window_seconds: u64,
}

impl RuleConfig {
    pub fn rule(&self) -> LimitRule {
        LimitRule::new(self.limit, self.window_seconds)
    }
}

/// A proxy address or network whose forwarding headers are believed.
/// Accepts CIDR notation or a bare address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct ProxyNet(IpNet);

impl ProxyNet {
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.0.contains(ip)
    }
}

impl TryFrom<String> for ProxyNet {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let raw = raw.trim();
        if let Ok(net) = raw.parse::<IpNet>() {
            return Ok(Self(net));
        }
        let ip: IpAddr = raw
            .parse()
            .map_err(|_| format!("trusted proxy '{raw}' is neither a CIDR nor an IP address"))?;
        let prefix = if ip.is_ipv4() { 32 } else { 128 };
        IpNet::new(ip, prefix)
            .map(Self)
            .map_err(|e| format!("trusted proxy '{raw}': {e}"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_backend")]
    pub backend: CounterBackend,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_idle_multiplier")]
    pub idle_multiplier: u32,
    #[serde(default = "default_anonymous_rule")]
    pub anonymous: RuleConfig,
    #[serde(default = "default_login_rule")]
    pub login: RuleConfig,
    #[serde(default = "default_otp_rule")]
    pub otp: RuleConfig,
    #[serde(default = "default_authenticated_rule")]
    pub authenticated: RuleConfig,
    /// Peers allowed to set `X-Forwarded-For` / `X-Real-IP`. Empty means
    /// the socket address is always the client.
    #[serde(default)]
    pub trusted_proxies: Vec<ProxyNet>,
}

impl RateLimitConfig {
    fn rules(&self) -> [(&'static str, &RuleConfig); 4] {
        [
            ("anonymous", &self.anonymous),
            ("login", &self.login),
            ("otp", &self.otp),
            ("authenticated", &self.authenticated),
        ]
    }

    /// Entries idle this long are swept. Never less than five of the
    /// longest configured windows.
    pub fn idle_threshold(&self) -> std::time::Duration {
        let longest = self
            .rules()
            .iter()
            .map(|(_, r)| r.window_seconds)
            .max()
            .unwrap_or(60);
        std::time::Duration::from_secs(
            longest.saturating_mul(u64::from(self.idle_multiplier.max(5))),
        )
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_ttl_hours: default_jwt_ttl_hours(),
            otp_ttl_seconds: default_otp_ttl_seconds(),
            otp_max_attempts: default_otp_max_attempts(),
            credential_timeout_ms: default_credential_timeout_ms(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: None,
            store_timeout_ms: default_store_timeout_ms(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            idle_multiplier: default_idle_multiplier(),
            anonymous: default_anonymous_rule(),
            login: default_login_rule(),
            otp: default_otp_rule(),
            authenticated: default_authenticated_rule(),
            trusted_proxies: Vec::new(),
        }
    }
}

fn default_true() -> bool { true }
fn default_jwt_ttl_hours() -> u64 { 24 }
fn default_otp_ttl_seconds() -> u64 { 300 }
fn default_otp_max_attempts() -> u32 { 5 }
fn default_credential_timeout_ms() -> u64 { 500 }
fn default_backend() -> CounterBackend { CounterBackend::Memory }
fn default_store_timeout_ms() -> u64 { 250 }
fn default_sweep_interval_seconds() -> u64 { 60 }
fn default_idle_multiplier() -> u32 { 5 }
fn default_anonymous_rule() -> RuleConfig { RuleConfig { limit: 30, window_seconds: 60 } }
fn default_login_rule() -> RuleConfig { RuleConfig { limit: 5, window_seconds: 60 } }
fn default_otp_rule() -> RuleConfig { RuleConfig { limit: 3, window_seconds: 300 } }
fn default_authenticated_rule() -> RuleConfig { RuleConfig { limit: 120, window_seconds: 60 } }

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// One year.
const MAX_JWT_TTL_HOURS: u64 = 24 * 365;

const WEAK_SECRETS: &[&str] = &[
    "change-me-to-a-random-secret",
    "secret",
    "password",
    "jwt-secret",
];

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("VITALS_WEB_CONFIG")
            .map(PathBuf::from)
            .ok();

        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(&path)?;
            toml::from_str(&contents)?
        } else {
            ServerConfig {
                bind_addr: default_bind_addr(),
                auth: AuthConfig::default(),
                rate_limit: RateLimitConfig::default(),
                tls: TlsConfig::default(),
                users: Vec::new(),
            }
        };

        if let Ok(secret) = std::env::var("VITALS_JWT_SECRET") {
            config.auth.jwt_secret = secret;
        }
        if let Ok(addr) = std::env::var("VITALS_BIND_ADDR") {
            config.bind_addr = addr.parse()?;
        }
        if let Ok(url) = std::env::var("VITALS_REDIS_URL") {
            config.rate_limit.redis_url = Some(url);
            config.rate_limit.backend = CounterBackend::Redis;
        }
        if let Ok(cert) = std::env::var("VITALS_TLS_CERT") {
            config.tls.cert_path = Some(cert);
        }
        if let Ok(key) = std::env::var("VITALS_TLS_KEY") {
            config.tls.key_path = Some(key);
        }

        config.validate()?;
        Ok(config)
    }

    /// Fills in a random secret when none is set and rejects settings the
    /// server cannot run safely with.
    pub fn validate(&mut self) -> anyhow::Result<()> {
        if self.auth.jwt_secret.is_empty() {
            self.auth.jwt_secret = uuid::Uuid::new_v4().to_string();
            tracing::warn!(
                "No JWT secret configured. Generated random secret (will change on restart)."
            );
        }

        if WEAK_SECRETS.iter().any(|&w| self.auth.jwt_secret == w) {
            anyhow::bail!(
                "JWT secret matches a known weak/placeholder value. \
                 Set a strong random secret via VITALS_JWT_SECRET environment variable."
            );
        }
        if self.auth.jwt_secret.len() < 32 {
            tracing::warn!(
                "JWT secret is shorter than 32 characters. \
                 Consider using a stronger secret via VITALS_JWT_SECRET."
            );
        }

        if self.auth.jwt_ttl_hours == 0 || self.auth.jwt_ttl_hours > MAX_JWT_TTL_HOURS {
            anyhow::bail!(
                "auth.jwt_ttl_hours must be between 1 and {MAX_JWT_TTL_HOURS}, got {}",
                self.auth.jwt_ttl_hours
            );
        }

        for (name, rule) in self.rate_limit.rules() {
            if rule.window_seconds == 0 {
                anyhow::bail!("rate_limit.{name}.window_seconds must be at least 1");
            }
            if rule.limit == 0 {
                anyhow::bail!("rate_limit.{name}.limit must be at least 1");
            }
        }

        if self.rate_limit.backend == CounterBackend::Redis && self.rate_limit.redis_url.is_none() {
            anyhow::bail!("rate_limit.backend = \"redis\" requires rate_limit.redis_url");
        }
        if self.rate_limit.idle_multiplier < 5 {
            tracing::warn!(
                "rate_limit.idle_multiplier {} is below 5; using 5",
                self.rate_limit.idle_multiplier
            );
            self.rate_limit.idle_multiplier = 5;
        }

        let mut seen = std::collections::HashSet::new();
        for user in &self.users {
            if !seen.insert(user.id.as_str()) {
                anyhow::bail!("duplicate user id in configuration: {}", user.id);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> ServerConfig {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse("");
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.auth.jwt_ttl_hours, 24);
        assert_eq!(config.rate_limit.backend, CounterBackend::Memory);
        assert_eq!(config.rate_limit.login.rule(), LimitRule::new(5, 60));
        assert_eq!(config.rate_limit.otp.rule(), LimitRule::new(3, 300));
        assert!(config.users.is_empty());
    }

    #[test]
    fn users_and_rules_parse() {
        let config = parse(
            r#"
            [rate_limit]
            backend = "redis"
            redis_url = "redis://127.0.0.1:6379"
            authenticated = { limit = 10, window_seconds = 30 }

            [[users]]
            id = "u-1"
            username = "alice"
            phone = "+15550100"
            password_hash = "$argon2id$stub"
            "#,
        );
        assert_eq!(config.rate_limit.backend, CounterBackend::Redis);
        assert_eq!(config.rate_limit.authenticated.rule(), LimitRule::new(10, 30));
        let alice = &config.users[0];
        assert_eq!(alice.username, "alice");
        assert_eq!(alice.id, "u-1");
        assert!(alice.active);
    }

    #[test]
    fn example_config_parses() {
        let config = parse(include_str!("../config.example.toml"));
        assert_eq!(config.rate_limit.anonymous.rule(), LimitRule::new(30, 60));
        assert_eq!(config.users.len(), 1);
    }

    #[test]
    fn idle_threshold_scales_longest_window() {
        let config = parse("");
        assert_eq!(
            config.rate_limit.idle_threshold(),
            std::time::Duration::from_secs(1_500)
        );
    }

    #[test]
    fn validate_generates_missing_secret() {
        let mut config = parse("");
        config.validate().unwrap();
        assert!(!config.auth.jwt_secret.is_empty());
    }

    #[test]
    fn validate_rejects_weak_secret() {
        let mut config = parse("[auth]\njwt_secret = \"secret\"\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_redis_url() {
        let mut config = parse("[rate_limit]\nbackend = \"redis\"\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_clamps_idle_multiplier() {
        let mut config = parse("[rate_limit]\nidle_multiplier = 2\n");
        config.validate().unwrap();
        assert_eq!(config.rate_limit.idle_multiplier, 5);
    }

    #[test]
    fn validate_rejects_zero_window() {
        let mut config = parse("[rate_limit]\nlogin = { limit = 1, window_seconds = 0 }\n");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rate_limit.login.window_seconds"));
    }

    #[test]
    fn validate_rejects_zero_limit() {
        let mut config = parse("[rate_limit]\notp = { limit = 0, window_seconds = 60 }\n");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rate_limit.otp.limit"));
    }

    #[test]
    fn idle_threshold_saturates() {
        let config = parse(&format!(
            "[rate_limit]\nanonymous = {{ limit = 1, window_seconds = {} }}\n",
            u64::MAX / 2
        ));
        assert_eq!(
            config.rate_limit.idle_threshold(),
            std::time::Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn validate_bounds_token_lifetime() {
        let mut config = parse("[auth]\njwt_ttl_hours = 0\n");
        assert!(config.validate().is_err());

        let mut config = parse("[auth]\njwt_ttl_hours = 9223372036854775807\n");
        assert!(config.validate().is_err());

        let mut config = parse("[auth]\njwt_ttl_hours = 720\n");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn trusted_proxies_accept_cidr_and_bare_ip() {
        let config = parse(
            r#"
            [rate_limit]
            trusted_proxies = ["10.0.0.0/8", "192.0.2.7", "::1"]
            "#,
        );
        let proxies = &config.rate_limit.trusted_proxies;
        assert_eq!(proxies.len(), 3);
        assert!(proxies[0].contains(&"10.20.30.40".parse().unwrap()));
        assert!(proxies[1].contains(&"192.0.2.7".parse().unwrap()));
        assert!(!proxies[1].contains(&"192.0.2.8".parse().unwrap()));
        assert!(proxies[2].contains(&"::1".parse().unwrap()));
    }

    #[test]
    fn malformed_trusted_proxy_is_rejected() {
        let result = toml::from_str::<ServerConfig>("[rate_limit]\ntrusted_proxies = [\"proxy.local\"]\n");
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let mut config = parse(
            r#"
            [[users]]
            id = "u-1"
            username = "a"
            password_hash = "x"
            [[users]]
            id = "u-1"
            username = "b"
            password_hash = "y"
            "#,
        );
        assert!(config.validate().is_err());
    }
}
