use std::path::PathBuf;

use thiserror::Error;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_BREVO_API_URL: &str = "https://api.brevo.com/v3";
pub const DEFAULT_ZOHO_API_URL: &str = "https://mail.zoho.com/api";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub brevo_api_key: Option<String>,
    pub brevo_api_url: String,
    pub sender_name: String,
    pub sender_email: String,
    pub zoho_api_url: String,
    pub whatsapp_verify_token: Option<String>,
    pub config_cache_path: PathBuf,
    pub legacy_account_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                value: raw,
            })?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            port,
            database_url: get("DATABASE_URL").unwrap_or_else(|| "convoflow.db".to_string()),
            brevo_api_key: get("BREVO_API_KEY"),
            brevo_api_url: get("BREVO_API_URL")
                .unwrap_or_else(|| DEFAULT_BREVO_API_URL.to_string()),
            sender_name: get("BREVO_SENDER_NAME").unwrap_or_else(|| "Sender Alex".to_string()),
            sender_email: get("BREVO_SENDER_EMAIL")
                .unwrap_or_else(|| "senderalex@example.com".to_string()),
            zoho_api_url: get("ZOHO_API_URL").unwrap_or_else(|| DEFAULT_ZOHO_API_URL.to_string()),
            whatsapp_verify_token: get("WHATSAPP_VERIFY_TOKEN"),
            config_cache_path: get("CONFIG_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.txt")),
            legacy_account_path: get("LEGACY_ACCOUNT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("zoho_account.json")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.database_url, "convoflow.db");
        assert_eq!(config.brevo_api_url, DEFAULT_BREVO_API_URL);
        assert_eq!(config.zoho_api_url, DEFAULT_ZOHO_API_URL);
        assert_eq!(config.config_cache_path, PathBuf::from("config.txt"));
        assert_eq!(config.legacy_account_path, PathBuf::from("zoho_account.json"));
        assert!(config.brevo_api_key.is_none());
        assert!(config.whatsapp_verify_token.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("BREVO_API_KEY", "xkeysib-123"),
            ("WHATSAPP_VERIFY_TOKEN", "s3cret"),
            ("CONFIG_CACHE_PATH", "/tmp/cache.json"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.brevo_api_key.as_deref(), Some("xkeysib-123"));
        assert_eq!(config.whatsapp_verify_token.as_deref(), Some("s3cret"));
        assert_eq!(config.config_cache_path, PathBuf::from("/tmp/cache.json"));
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let config = Config::from_lookup(lookup(&[("PORT", ""), ("BREVO_API_KEY", "  ")])).unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.brevo_api_key.is_none());
    }

    #[test]
    fn rejects_non_numeric_port() {
        let err = Config::from_lookup(lookup(&[("PORT", "fivethousand")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}
