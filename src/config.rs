use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::auth::cookie::CookieConfig;
use crate::ratelimit::tracker::{DEFAULT_BLOCK_THRESHOLD, DEFAULT_RESET_WINDOW, LimiterConfig};

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub root_dir: PathBuf,
    pub gate: GateConfig,
}

/// Settings of the token gate. Can be loaded from a JSON file and then
/// overridden from the environment.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GateConfig {
    pub token_param: String,
    pub allowed_tokens: Vec<String>,
    pub cookie: CookieConfig,
    /// Upper bound on client identifiers held by the attempt tracker.
    pub max_tracked_clients: usize,
    /// Header holding the client address when running behind a proxy.
    pub client_ip_header: Option<String>,
    pub block_threshold: u32,
    /// Seconds.
    pub reset_window: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            token_param: "token".to_string(),
            allowed_tokens: Vec::new(),
            cookie: CookieConfig::default(),
            max_tracked_clients: 10_000,
            client_ip_header: None,
            block_threshold: DEFAULT_BLOCK_THRESHOLD,
            reset_window: DEFAULT_RESET_WINDOW.as_secs(),
        }
    }
}

impl GateConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        Ok(config)
    }

    /// Applies `TOKENGATE_*` overrides looked up through `var`.
    pub fn apply_env<F>(&mut self, var: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(tokens) = var("TOKENGATE_TOKENS") {
            self.allowed_tokens = tokens
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(param) = var("TOKENGATE_TOKEN_PARAM") {
            self.token_param = param;
        }
        if let Some(name) = var("TOKENGATE_COOKIE_NAME") {
            self.cookie.name = name;
        }
        if let Some(header) = var("TOKENGATE_CLIENT_IP_HEADER") {
            self.client_ip_header = Some(header).filter(|h| !h.is_empty());
        }
        if let Some(max) = var("TOKENGATE_MAX_TRACKED") {
            self.max_tracked_clients = parse_var("TOKENGATE_MAX_TRACKED", &max)?;
        }
        if let Some(threshold) = var("TOKENGATE_BLOCK_THRESHOLD") {
            self.block_threshold = parse_var("TOKENGATE_BLOCK_THRESHOLD", &threshold)?;
        }
        if let Some(window) = var("TOKENGATE_RESET_WINDOW") {
            self.reset_window = parse_var("TOKENGATE_RESET_WINDOW", &window)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.allowed_tokens.is_empty() {
            bail!("allowedTokens cannot be empty");
        }
        if self.allowed_tokens.iter().any(|t| t.is_empty()) {
            bail!("allowedTokens cannot contain an empty token");
        }
        if self.token_param.is_empty() {
            bail!("tokenParam cannot be empty");
        }
        if self.cookie.name.is_empty() {
            bail!("cookie.name cannot be empty");
        }
        if !self.cookie.name.chars().all(is_cookie_name_char) {
            bail!("cookie.name {:?} is not a valid cookie name", self.cookie.name);
        }
        if self.max_tracked_clients == 0 {
            bail!("maxTrackedClients must be at least 1");
        }
        if self.block_threshold == 0 {
            bail!("blockThreshold must be at least 1");
        }
        Ok(())
    }

    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            block_threshold: self.block_threshold,
            reset_window: Duration::from_secs(self.reset_window),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut gate = match std::env::var_os("TOKENGATE_CONFIG") {
            Some(path) => GateConfig::load(Path::new(&path))?,
            None => GateConfig::default(),
        };
        gate.apply_env(|key| std::env::var(key).ok())?;
        gate.validate()?;

        Ok(Config {
            bind_addr: {
                let port = std::env::var("TOKENGATE_PORT").unwrap_or_else(|_| "8080".to_string());
                std::env::var("TOKENGATE_BIND_ADDR")
                    .unwrap_or_else(|_| format!("0.0.0.0:{}", port))
            },
            root_dir: PathBuf::from(
                std::env::var("TOKENGATE_ROOT").unwrap_or_else(|_| "./public".to_string()),
            ),
            gate,
        })
    }
}

fn parse_var<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{} has an invalid value {:?}", key, value))
}

// RFC 6265 token characters.
fn is_cookie_name_char(c: char) -> bool {
    c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?={}".contains(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    use tempfile::NamedTempFile;

    use crate::auth::cookie::SameSite;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn valid() -> GateConfig {
        GateConfig {
            allowed_tokens: vec!["secret".to_string()],
            ..GateConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = GateConfig::default();
        assert_eq!(config.token_param, "token");
        assert_eq!(config.cookie.name, "auth_session");
        assert_eq!(config.limiter_config(), LimiterConfig::default());
        // No tokens configured yet.
        assert!(config.validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "tokenParam": "key",
                "allowedTokens": ["one", "two"],
                "cookie": {{ "name": "gate", "sameSite": "Lax", "maxAge": 600 }},
                "maxTrackedClients": 50,
                "resetWindow": 120
            }}"#
        )
        .unwrap();

        let config = GateConfig::load(file.path()).unwrap();
        assert_eq!(config.token_param, "key");
        assert_eq!(config.allowed_tokens, vec!["one", "two"]);
        assert_eq!(config.cookie.name, "gate");
        assert_eq!(config.cookie.same_site, SameSite::Lax);
        assert_eq!(config.cookie.max_age, 600);
        assert_eq!(config.max_tracked_clients, 50);
        assert_eq!(config.block_threshold, DEFAULT_BLOCK_THRESHOLD);
        assert_eq!(
            config.limiter_config().reset_window,
            Duration::from_secs(120)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(GateConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GateConfig::default();
        config
            .apply_env(env(&[
                ("TOKENGATE_TOKENS", "a, b,,c"),
                ("TOKENGATE_TOKEN_PARAM", "t"),
                ("TOKENGATE_COOKIE_NAME", "sid"),
                ("TOKENGATE_CLIENT_IP_HEADER", "X-Real-IP"),
                ("TOKENGATE_MAX_TRACKED", "42"),
                ("TOKENGATE_BLOCK_THRESHOLD", "3"),
            ]))
            .unwrap();

        assert_eq!(config.allowed_tokens, vec!["a", "b", "c"]);
        assert_eq!(config.token_param, "t");
        assert_eq!(config.cookie.name, "sid");
        assert_eq!(config.client_ip_header.as_deref(), Some("X-Real-IP"));
        assert_eq!(config.max_tracked_clients, 42);
        assert_eq!(config.block_threshold, 3);
    }

    #[test]
    fn test_env_invalid_number() {
        let mut config = GateConfig::default();
        let err = config
            .apply_env(env(&[("TOKENGATE_MAX_TRACKED", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("TOKENGATE_MAX_TRACKED"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = valid();
        config.token_param.clear();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.cookie.name = "bad name;".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.max_tracked_clients = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.block_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.allowed_tokens.push(String::new());
        assert!(config.validate().is_err());
    }
}
