//! Rate-limit key policy.
//!
//! Keys are composed by the caller: anonymous routes count per client IP,
//! authenticated routes per identity, and one-time-code requests per phone
//! number so a single number cannot be flooded from rotating addresses.

use std::fmt;
use std::net::IpAddr;

/// Route groups that get their own counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Login,
    Otp,
    Api,
}

impl RouteClass {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteClass::Login => "login",
            RouteClass::Otp => "otp",
            RouteClass::Api => "api",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn ip(route: RouteClass, ip: Option<IpAddr>) -> Self {
        match ip {
            Some(ip) => Self(format!("{}:ip:{ip}", route.as_str())),
            None => Self(format!("{}:ip:unknown", route.as_str())),
        }
    }

    pub fn identity(route: RouteClass, identity: &str) -> Self {
        Self(format!("{}:user:{identity}", route.as_str()))
    }

    /// Keys by phone number when one is present, otherwise by IP.
    pub fn phone_or_ip(route: RouteClass, phone: Option<&str>, ip: Option<IpAddr>) -> Self {
        match phone.and_then(normalize_phone) {
            Some(phone) => Self(format!("{}:phone:{phone}", route.as_str())),
            None => Self::ip(route, ip),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keeps digits and a leading `+`; spaces, dashes and brackets are dropped
/// so formatting variants of one number share a counter. Returns `None`
/// when no digits remain.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        out.push('+');
    }
    out.extend(trimmed.chars().filter(char::is_ascii_digit));

    if out.trim_start_matches('+').is_empty() {
        None
    } else {
        Some(out)
    }
}
