//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero
//! configuration for local development.  A value that fails to parse is
//! logged and ignored.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use heraut_federation::{ActorCacheConfig, FederationConfig};
use heraut_shared::constants::{
    ACTOR_CACHE_FRESHNESS_SECS, DEFAULT_DELIVERY_CONCURRENCY, DEFAULT_HTTP_PORT,
    DEFAULT_NETWORK_TIMEOUT_SECS, MAX_PAYLOAD_SIZE,
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Env: `HTTP_ADDR`. Default: `0.0.0.0:8080`.
    pub http_addr: SocketAddr,

    /// Env: `DATABASE_PATH`. Default: the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Env: `INSTANCE_NAME`. Default: `"Héraut"`.
    pub instance_name: String,

    /// Public origin used to mint actor and status URIs.
    /// Env: `PUBLIC_URL`. Default: `http://localhost:8080`.
    pub public_url: String,

    /// Env: `INSTANCE_DOMAIN`. Default: the host of `public_url`.
    pub instance_domain: String,

    /// Env: `ACTOR_CACHE_FRESHNESS_SECS`. Default: one day.
    pub actor_cache_freshness: Duration,

    /// Env: `FETCH_TIMEOUT_SECS`. Default: 10 seconds.
    pub fetch_timeout: Duration,

    /// Env: `DELIVERY_CONCURRENCY`. Default: 8.
    pub delivery_concurrency: usize,

    /// Env: `DELIVERY_TIMEOUT_SECS`. Default: 10 seconds.
    pub delivery_timeout: Duration,

    /// Env: `RATE_LIMIT_PER_SEC` / `RATE_LIMIT_BURST`. Default: 10 / 30.
    pub rate_limit_per_sec: f64,
    pub rate_limit_burst: f64,

    /// Largest accepted request body.
    pub max_payload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            instance_name: heraut_shared::constants::APP_NAME.to_string(),
            public_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            instance_domain: "localhost".to_string(),
            actor_cache_freshness: Duration::from_secs(ACTOR_CACHE_FRESHNESS_SECS),
            fetch_timeout: Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
            delivery_concurrency: DEFAULT_DELIVERY_CONCURRENCY,
            delivery_timeout: Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        parse_into(&lookup, "HTTP_ADDR", &mut config.http_addr);

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.trim().is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(url) = lookup("PUBLIC_URL") {
            let url = url.trim().trim_end_matches('/').to_string();
            match host_of(&url) {
                Some(host) => {
                    config.instance_domain = host.to_string();
                    config.public_url = url;
                }
                None => tracing::warn!(value = %url, "Invalid PUBLIC_URL, using default"),
            }
        }

        if let Some(domain) = lookup("INSTANCE_DOMAIN").filter(|d| !d.trim().is_empty()) {
            config.instance_domain = domain.trim().to_ascii_lowercase();
        }

        let mut secs = config.actor_cache_freshness.as_secs();
        parse_into(&lookup, "ACTOR_CACHE_FRESHNESS_SECS", &mut secs);
        config.actor_cache_freshness = Duration::from_secs(secs);

        let mut secs = config.fetch_timeout.as_secs();
        parse_into(&lookup, "FETCH_TIMEOUT_SECS", &mut secs);
        config.fetch_timeout = Duration::from_secs(secs.max(1));

        parse_into(&lookup, "DELIVERY_CONCURRENCY", &mut config.delivery_concurrency);
        config.delivery_concurrency = config.delivery_concurrency.max(1);

        let mut secs = config.delivery_timeout.as_secs();
        parse_into(&lookup, "DELIVERY_TIMEOUT_SECS", &mut secs);
        config.delivery_timeout = Duration::from_secs(secs.max(1));

        parse_into(&lookup, "RATE_LIMIT_PER_SEC", &mut config.rate_limit_per_sec);
        parse_into(&lookup, "RATE_LIMIT_BURST", &mut config.rate_limit_burst);

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    pub fn federation_config(&self) -> FederationConfig {
        let mut federation = FederationConfig::new(&self.public_url, &self.instance_domain);
        federation.actor_cache = ActorCacheConfig {
            freshness: self.actor_cache_freshness,
            fetch_timeout: self.fetch_timeout,
        };
        federation.delivery_concurrency = self.delivery_concurrency;
        federation.delivery_timeout = self.delivery_timeout;
        federation
    }
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, target: &mut T) {
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(variable = name, value = %raw, "Invalid value, using default"),
    }
}

fn host_of(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let authority = rest.split('/').next()?;
    let host = authority.split(':').next()?;
    (!host.is_empty()).then_some(host)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.actor_cache_freshness, Duration::from_secs(86_400));
        assert_eq!(config.instance_domain, "localhost");
    }

    #[test]
    fn test_public_url_sets_domain() {
        let config = config_from(&[("PUBLIC_URL", "https://social.example:8443/")]);
        assert_eq!(config.public_url, "https://social.example:8443");
        assert_eq!(config.instance_domain, "social.example");

        let federation = config.federation_config();
        assert_eq!(federation.base_url, "https://social.example:8443");
        assert_eq!(federation.local_domain, "social.example");
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("HTTP_ADDR", "not an address"),
            ("DELIVERY_CONCURRENCY", "-3"),
            ("FETCH_TIMEOUT_SECS", "5"),
            ("RATE_LIMIT_BURST", "lots"),
        ]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.delivery_concurrency, 8);
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
        assert_eq!(config.rate_limit_burst, 30.0);
    }
}
