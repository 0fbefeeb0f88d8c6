use serde::Deserialize;

const PLACEHOLDER_SECRET: &str = "CHANGE_ME_SESSION_SECRET";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// HS256 secret shared with the sign-in front end that issues session tokens.
    pub session_secret: String,
    /// Cookie carrying the session token. Default: `next-auth.session-token`.
    pub session_cookie: String,
    /// Usage ceiling assigned to every new key.
    /// Set via KEYGATE_DEFAULT_RATE_LIMIT env var. Default: 200.
    pub default_rate_limit: i64,
    /// Prefix prepended to generated secrets so they are recognisable in logs and scanners.
    pub key_prefix: String,
    pub github_api_url: String,
    pub github_raw_url: String,
    pub github_token: Option<String>,
    /// Total timeout for each outbound GitHub request, in seconds.
    pub fetch_timeout_secs: u64,
    pub dashboard_origin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: "postgres://localhost/keygate".into(),
            session_secret: PLACEHOLDER_SECRET.into(),
            session_cookie: "next-auth.session-token".into(),
            default_rate_limit: 200,
            key_prefix: "ak_".into(),
            github_api_url: "https://api.github.com".into(),
            github_raw_url: "https://raw.githubusercontent.com".into(),
            github_token: None,
            fetch_timeout_secs: 10,
            dashboard_origin: "http://localhost:3000".into(),
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    let defaults = Config::default();

    let session_secret =
        std::env::var("KEYGATE_SESSION_SECRET").unwrap_or_else(|_| PLACEHOLDER_SECRET.into());

    if session_secret == PLACEHOLDER_SECRET {
        let env_mode = std::env::var("KEYGATE_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "KEYGATE_SESSION_SECRET is still the insecure placeholder. \
                 Set the secret shared with the sign-in front end before running in production."
            );
        }
        eprintln!("⚠️  KEYGATE_SESSION_SECRET is not set — using insecure placeholder.");
    }

    let default_rate_limit = env_parse("KEYGATE_DEFAULT_RATE_LIMIT", defaults.default_rate_limit);
    if default_rate_limit < 0 {
        anyhow::bail!("KEYGATE_DEFAULT_RATE_LIMIT must not be negative");
    }

    Ok(Config {
        port: env_parse("KEYGATE_PORT", defaults.port),
        database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
        session_secret,
        session_cookie: std::env::var("KEYGATE_SESSION_COOKIE").unwrap_or(defaults.session_cookie),
        default_rate_limit,
        key_prefix: std::env::var("KEYGATE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
        github_api_url: std::env::var("KEYGATE_GITHUB_API_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or(defaults.github_api_url),
        github_raw_url: std::env::var("KEYGATE_GITHUB_RAW_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or(defaults.github_raw_url),
        github_token: std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()),
        fetch_timeout_secs: env_parse("KEYGATE_FETCH_TIMEOUT_SECS", defaults.fetch_timeout_secs),
        dashboard_origin: std::env::var("DASHBOARD_ORIGIN").unwrap_or(defaults.dashboard_origin),
    })
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
