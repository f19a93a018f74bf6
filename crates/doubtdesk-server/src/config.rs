use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use doubtdesk_api::rate_limit::RateLimitConfig;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub public_url: String,
    pub token_ttl_days: i64,
    pub limits: RateLimitConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = get("DOUBTDESK_JWT_SECRET").unwrap_or_default();
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("DOUBTDESK_JWT_SECRET is unset or still a placeholder; set it in .env and restart");
        }

        let defaults = RateLimitConfig::default();
        Ok(Self {
            jwt_secret,
            db_path: var("DOUBTDESK_DB_PATH", "doubtdesk.db").into(),
            host: var("DOUBTDESK_HOST", "0.0.0.0"),
            port: parse(&get, "DOUBTDESK_PORT", 3000)?,
            upload_dir: var("DOUBTDESK_UPLOAD_DIR", "./uploads").into(),
            public_url: var("DOUBTDESK_PUBLIC_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            token_ttl_days: parse(&get, "DOUBTDESK_TOKEN_TTL_DAYS", 30)?,
            limits: RateLimitConfig {
                comments_per_minute: parse(&get, "DOUBTDESK_COMMENT_LIMIT_PER_MIN", defaults.comments_per_minute)?,
                doubts_per_minute: parse(&get, "DOUBTDESK_DOUBT_LIMIT_PER_MIN", defaults.doubts_per_minute)?,
            },
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_once_secret_is_set() {
        let config = load(&[("DOUBTDESK_JWT_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("doubtdesk.db"));
        assert_eq!(config.token_ttl_days, 30);
        assert_eq!(config.limits.comments_per_minute, 5);
        assert_eq!(config.limits.doubts_per_minute, 3);
    }

    #[test]
    fn placeholder_or_missing_secret_is_rejected() {
        assert!(load(&[]).is_err());
        assert!(load(&[("DOUBTDESK_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("DOUBTDESK_JWT_SECRET", "a-real-secret"),
            ("DOUBTDESK_PORT", "8080"),
            ("DOUBTDESK_PUBLIC_URL", "https://desk.example.com/"),
            ("DOUBTDESK_COMMENT_LIMIT_PER_MIN", "10"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.public_url, "https://desk.example.com");
        assert_eq!(config.limits.comments_per_minute, 10);

        assert!(load(&[("DOUBTDESK_JWT_SECRET", "a-real-secret"), ("DOUBTDESK_PORT", "http")]).is_err());
    }
}
