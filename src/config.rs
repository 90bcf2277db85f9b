use crate::errors::AppError;

/// Default Netatmo API root.
pub const DEFAULT_NETATMO_BASE_URL: &str = "https://api.netatmo.com";

/// Application configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub netatmo: NetatmoConfig,
    /// Static credential pair used to seed the token row on first start.
    pub seed_tokens: Option<SeedTokens>,
    pub admin_username: String,
    pub admin_password: String,
}

/// Netatmo API client settings.
#[derive(Debug, Clone)]
pub struct NetatmoConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SeedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let admin_username = env_or("ADMIN_USERNAME", "admin");
        let admin_password = env_or("ADMIN_PASSWORD", "admin");
        if admin_username == "admin" && admin_password == "admin" {
            tracing::warn!("ADMIN_USERNAME/ADMIN_PASSWORD not set, using default admin credentials");
        }

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            port: env_or("PORT", "3000")
                .parse()
                .map_err(|_| AppError::ConfigError("PORT must be a valid u16".to_string()))?,
            netatmo: NetatmoConfig::from_env()?,
            seed_tokens: SeedTokens::from_env(),
            admin_username,
            admin_password,
        })
    }
}

impl NetatmoConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self {
            base_url: env_or("NETATMO_BASE_URL", DEFAULT_NETATMO_BASE_URL),
            client_id: required("NETATMO_CLIENT_ID")?,
            client_secret: required("NETATMO_CLIENT_SECRET")?,
            timeout_secs: env_or("HTTP_TIMEOUT_SECS", "30").parse().map_err(|_| {
                AppError::ConfigError("HTTP_TIMEOUT_SECS must be a number".to_string())
            })?,
        })
    }
}

impl SeedTokens {
    /// Both halves must be present; a lone access token cannot be refreshed.
    pub fn from_env() -> Option<Self> {
        let access_token = non_empty("NETATMO_ACCESS_TOKEN")?;
        let refresh_token = non_empty("NETATMO_REFRESH_TOKEN")?;
        Some(Self {
            access_token,
            refresh_token,
        })
    }
}

fn required(key: &str) -> Result<String, AppError> {
    non_empty(key).ok_or_else(|| AppError::ConfigError(format!("{} must be set", key)))
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    non_empty(key).unwrap_or_else(|| default.to_string())
}
