//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Bot name for identification in logs.
    pub name: String,
    /// Telegram Bot API token. Telegram is disabled when absent.
    pub telegram_token: Option<SecretString>,
    /// Telegram usernames or numeric ids allowed to talk to the bot (`*` = everyone).
    pub telegram_allowed_users: Vec<String>,
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Port for the HTTP status API.
    pub http_port: u16,
    /// Upper bound on a single event's processing, repository calls included.
    pub handler_timeout: Duration,
    /// External ids seeded as admins on startup.
    pub admin_ids: Vec<String>,
    /// Directory for rolling log files (stderr only when unset).
    pub log_dir: Option<PathBuf>,
    /// Whether the stdin channel is enabled.
    pub cli_enabled: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "vendbot".to_string(),
            telegram_token: None,
            telegram_allowed_users: vec!["*".to_string()],
            db_path: PathBuf::from("./data/vendbot.db"),
            http_port: 8080,
            handler_timeout: Duration::from_secs(15),
            admin_ids: Vec::new(),
            log_dir: None,
            cli_enabled: true,
        }
    }
}

impl BotConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_vars<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let telegram_token = get("TELEGRAM_BOT_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::from);

        let telegram_allowed_users = get("TELEGRAM_ALLOWED_USERS")
            .map(|s| split_list(&s))
            .unwrap_or(defaults.telegram_allowed_users);

        let db_path = get("VENDBOT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let http_port: u16 = get("VENDBOT_HTTP_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.http_port);

        let handler_timeout = match get("VENDBOT_HANDLER_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(0) => {
                    return Err(ConfigError::InvalidValue {
                        key: "VENDBOT_HANDLER_TIMEOUT_SECS".into(),
                        message: "must be greater than zero".into(),
                    });
                }
                Ok(secs) => Duration::from_secs(secs),
                Err(_) => defaults.handler_timeout,
            },
            None => defaults.handler_timeout,
        };

        let admin_ids = get("VENDBOT_ADMIN_IDS")
            .map(|s| split_list(&s))
            .unwrap_or_default();

        let log_dir = get("VENDBOT_LOG_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        // The stdin channel defaults to on only when Telegram is not configured.
        let cli_enabled = get("VENDBOT_CLI")
            .map(|s| matches!(s.trim(), "1" | "true" | "yes" | "on"))
            .unwrap_or(telegram_token.is_none());

        Ok(Self {
            telegram_token,
            telegram_allowed_users,
            db_path,
            http_port,
            handler_timeout,
            admin_ids,
            log_dir,
            cli_enabled,
            ..defaults
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = BotConfig::from_vars(vars(&[])).unwrap();
        assert!(config.telegram_token.is_none());
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.handler_timeout, Duration::from_secs(15));
        assert!(config.cli_enabled, "CLI is the fallback channel");
        assert_eq!(config.telegram_allowed_users, vec!["*"]);
    }

    #[test]
    fn telegram_token_disables_cli_by_default() {
        let config = BotConfig::from_vars(vars(&[("TELEGRAM_BOT_TOKEN", "123:ABC")])).unwrap();
        assert_eq!(
            config.telegram_token.as_ref().unwrap().expose_secret(),
            "123:ABC"
        );
        assert!(!config.cli_enabled);
    }

    #[test]
    fn lists_are_trimmed_and_filtered() {
        let config =
            BotConfig::from_vars(vars(&[("VENDBOT_ADMIN_IDS", " 42, ,77 ,")])).unwrap();
        assert_eq!(config.admin_ids, vec!["42", "77"]);
    }

    #[test]
    fn bad_port_falls_back_to_default() {
        let config = BotConfig::from_vars(vars(&[("VENDBOT_HTTP_PORT", "not-a-port")])).unwrap();
        assert_eq!(config.http_port, 8080);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = BotConfig::from_vars(vars(&[("VENDBOT_HANDLER_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn explicit_cli_flag_wins() {
        let config = BotConfig::from_vars(vars(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("VENDBOT_CLI", "true"),
        ]))
        .unwrap();
        assert!(config.cli_enabled);
    }
}
