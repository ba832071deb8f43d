//! Proxy configuration loaded from environment variables.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::proxy::HEALTH_PATH;
use crate::resolve::DEFAULT_PROXY_PATH;

const DEFAULT_BIND_HOST: &str = "127.0.0.1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the server listens on.
    pub bind_host: String,

    /// Listen port. `None` picks a free port at startup.
    pub port: Option<u16>,

    /// Route of the proxy, also the prefix of every wrapped URL.
    pub proxy_path: String,

    /// User-Agent sent on every outbound request.
    pub user_agent: String,

    /// Upper bound on one upstream exchange.
    pub timeout: Duration,

    /// Largest inbound request body forwarded upstream.
    pub max_body_bytes: usize,

    /// Accepted bearer tokens. Empty means the proxy is open.
    pub api_tokens: Arc<HashSet<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            port: None,
            proxy_path: DEFAULT_PROXY_PATH.to_string(),
            user_agent: default_user_agent(),
            timeout: DEFAULT_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            api_tokens: Arc::new(HashSet::new()),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All optional:
    /// - `PROXY_BIND_HOST`: listen address (default: "127.0.0.1")
    /// - `PROXY_PORT`: listen port (default: a free port)
    /// - `PROXY_PATH`: proxy route (default: "/proxy")
    /// - `PROXY_USER_AGENT`: outbound User-Agent (default: "ifm-proxy/<version>")
    /// - `PROXY_TIMEOUT_SECS`: upstream timeout in seconds (default: 8)
    /// - `PROXY_MAX_BODY_BYTES`: inbound body limit (default: 10 MiB)
    /// - `PROXY_API_TOKENS`: comma-separated bearer tokens (default: none, open access)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let bind_host = std::env::var("PROXY_BIND_HOST").unwrap_or(defaults.bind_host);

        let port = parse_var::<u16>("PROXY_PORT")?;

        let proxy_path = std::env::var("PROXY_PATH")
            .map(|raw| normalize_proxy_path(&raw))
            .unwrap_or(defaults.proxy_path);

        let user_agent = std::env::var("PROXY_USER_AGENT")
            .ok()
            .filter(|ua| !ua.trim().is_empty())
            .unwrap_or(defaults.user_agent);

        let timeout = match parse_var::<u64>("PROXY_TIMEOUT_SECS")? {
            Some(0) => anyhow::bail!("PROXY_TIMEOUT_SECS must be greater than zero"),
            Some(secs) => Duration::from_secs(secs),
            None => defaults.timeout,
        };

        let max_body_bytes =
            parse_var::<usize>("PROXY_MAX_BODY_BYTES")?.unwrap_or(defaults.max_body_bytes);

        let api_tokens: HashSet<String> = std::env::var("PROXY_API_TOKENS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        tracing::info!(
            bind_host = %bind_host,
            port = ?port,
            proxy_path = %proxy_path,
            timeout_secs = timeout.as_secs(),
            max_body_bytes,
            gated = !api_tokens.is_empty(),
            "proxy configuration loaded"
        );

        let config = Self {
            bind_host,
            port,
            proxy_path,
            user_agent,
            timeout,
            max_body_bytes,
            api_tokens: Arc::new(api_tokens),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the router cannot be built from.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.proxy_path == HEALTH_PATH {
            anyhow::bail!("PROXY_PATH must not be {HEALTH_PATH}, the health route lives there");
        }
        Ok(())
    }
}

fn default_user_agent() -> String {
    format!("ifm-proxy/{}", env!("CARGO_PKG_VERSION"))
}

/// One leading slash, no trailing slash.
fn normalize_proxy_path(raw: &str) -> String {
    format!("/{}", raw.trim().trim_matches('/'))
}

fn parse_var<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {key}: {raw:?}")),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that touch the process environment.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "PROXY_BIND_HOST",
        "PROXY_PORT",
        "PROXY_PATH",
        "PROXY_USER_AGENT",
        "PROXY_TIMEOUT_SECS",
        "PROXY_MAX_BODY_BYTES",
        "PROXY_API_TOKENS",
    ];

    fn with_env_vars<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let saved: Vec<_> = ENV_KEYS
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
        for (k, v) in vars {
            std::env::set_var(k, v);
        }

        f();

        for (k, v) in &saved {
            match v {
                Some(val) => std::env::set_var(k, val),
                None => std::env::remove_var(k),
            }
        }
    }

    #[test]
    fn config_defaults() {
        with_env_vars(&[], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.bind_host, "127.0.0.1");
            assert_eq!(config.port, None);
            assert_eq!(config.proxy_path, "/proxy");
            assert!(config.user_agent.starts_with("ifm-proxy/"));
            assert_eq!(config.timeout, Duration::from_secs(8));
            assert_eq!(config.max_body_bytes, 10 * 1024 * 1024);
            assert!(config.api_tokens.is_empty());
        });
    }

    #[test]
    fn config_custom_values() {
        with_env_vars(
            &[
                ("PROXY_BIND_HOST", "0.0.0.0"),
                ("PROXY_PORT", "9090"),
                ("PROXY_PATH", "api/ifm-proxy/"),
                ("PROXY_USER_AGENT", "AlphaDocsProxy/1.0"),
                ("PROXY_TIMEOUT_SECS", "3"),
                ("PROXY_MAX_BODY_BYTES", "1024"),
                ("PROXY_API_TOKENS", "one, two,,"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.bind_host, "0.0.0.0");
                assert_eq!(config.port, Some(9090));
                assert_eq!(config.proxy_path, "/api/ifm-proxy");
                assert_eq!(config.user_agent, "AlphaDocsProxy/1.0");
                assert_eq!(config.timeout, Duration::from_secs(3));
                assert_eq!(config.max_body_bytes, 1024);
                assert_eq!(config.api_tokens.len(), 2);
                assert!(config.api_tokens.contains("one"));
                assert!(config.api_tokens.contains("two"));
            },
        );
    }

    #[test]
    fn config_rejects_malformed_numbers() {
        with_env_vars(&[("PROXY_PORT", "eighty")], || {
            let err = Config::from_env().unwrap_err();
            assert!(err.to_string().contains("PROXY_PORT"));
        });
        with_env_vars(&[("PROXY_TIMEOUT_SECS", "0")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn config_rejects_proxy_path_on_health_route() {
        for raw in ["/health", "health/", " //health "] {
            with_env_vars(&[("PROXY_PATH", raw)], || {
                let err = Config::from_env().unwrap_err();
                assert!(err.to_string().contains("PROXY_PATH"), "{raw}");
            });
        }

        let config = Config {
            proxy_path: "/health".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn proxy_path_normalization() {
        assert_eq!(normalize_proxy_path("/proxy"), "/proxy");
        assert_eq!(normalize_proxy_path("proxy/"), "/proxy");
        assert_eq!(normalize_proxy_path(" //a/b// "), "/a/b");
    }
}
