use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Process-level configuration loaded once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub google_client_id: String,
    pub google_client_secret: String,
    pub oauth_redirect_uri: String,
    pub generator_api_key: String,
    pub generator_model: String,
    pub admin_token: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            google_client_id: env::var("GOOGLE_CLIENT_ID")
                .context("GOOGLE_CLIENT_ID must be set")?,
            google_client_secret: env::var("GOOGLE_CLIENT_SECRET")
                .context("GOOGLE_CLIENT_SECRET must be set")?,
            oauth_redirect_uri: env::var("OAUTH_REDIRECT_URI").unwrap_or_else(|_| {
                "http://localhost:3000/api/accounts/oauth/callback".to_string()
            }),
            generator_api_key: env::var("GENERATOR_API_KEY")
                .context("GENERATOR_API_KEY must be set")?,
            generator_model: env::var("GENERATOR_MODEL")
                .unwrap_or_else(|_| "gemini-1.5-flash".to_string()),
            admin_token: env::var("ADMIN_TOKEN").context("ADMIN_TOKEN must be set")?,
        })
    }
}

/// Configuration for the inbox scan job
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// How often the scheduler fires a scan cycle
    pub interval: Duration,
    /// Maximum unread messages fetched per account per cycle
    pub page_size: u32,
    /// Timeout applied to every provider, generator, and store round trip
    pub call_timeout: Duration,
    /// Deliver generated replies; when off, replies are logged as drafts
    pub auto_send: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(180),
            page_size: 5,
            call_timeout: Duration::from_secs(30),
            auto_send: false,
        }
    }
}

impl ScanConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let interval_secs = env::var("SCAN_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.interval.as_secs());

        let page_size = env::var("SCAN_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.page_size);

        let call_timeout_secs = env::var("SCAN_CALL_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.call_timeout.as_secs());

        let auto_send = env::var("SCAN_AUTO_SEND")
            .ok()
            .map(|s| parse_bool(&s))
            .unwrap_or(defaults.auto_send);

        Self {
            interval: Duration::from_secs(interval_secs),
            page_size,
            call_timeout: Duration::from_secs(call_timeout_secs),
            auto_send,
        }
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}
