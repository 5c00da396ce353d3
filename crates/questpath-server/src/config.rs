//! Configuration file management for questpath.
//!
//! Provides a TOML-based config file at `~/.config/questpath/config.toml` and
//! a resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use questpath_core::billing::BillingConfig;
use questpath_core::goal::QuotaPolicy;
use questpath_core::producer::ProducerConfig;
use questpath_db::config::DbConfig;

pub const ENV_DATABASE_URL: &str = "QUESTPATH_DATABASE_URL";
pub const ENV_STRIPE_API_KEY: &str = "QUESTPATH_STRIPE_API_KEY";
pub const ENV_WEBHOOK_SECRET: &str = "QUESTPATH_STRIPE_WEBHOOK_SECRET";
pub const ENV_OPENAI_API_KEY: &str = "QUESTPATH_OPENAI_API_KEY";
pub const ENV_FRONTEND_URL: &str = "QUESTPATH_FRONTEND_URL";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub billing: BillingSection,
    #[serde(default)]
    pub producer: ProducerSection,
    #[serde(default)]
    pub quota: QuotaSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BillingSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stripe_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_url: Option<String>,
    /// Monthly price in cents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_cents: Option<i64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProducerSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct QuotaSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_goal_limit: Option<i64>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the questpath config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/questpath` or
/// `~/.config/questpath`, on every platform.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("questpath");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("questpath")
}

/// Return the path to the questpath config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// The file holds API secrets, so it is made owner-only (0600) on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

/// Show only the ends of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 12 {
        return "****".to_owned();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, split into the parts each component needs.
#[derive(Debug)]
pub struct AppConfig {
    pub db_config: DbConfig,
    pub billing: BillingConfig,
    pub producer: ProducerConfig,
    pub quota: QuotaPolicy,
}

/// Env var if set and non-empty, else the file value.
fn env_or(key: &str, file_value: Option<&String>) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| file_value.cloned())
}

fn required(key: &str, file_value: Option<&String>, what: &str) -> Result<String> {
    match env_or(key, file_value) {
        Some(value) => Ok(value),
        None => bail!("{what} not found; set {key} or run `questpath init` to create a config file"),
    }
}

impl AppConfig {
    /// Resolve configuration from the on-disk config file (if any).
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        Self::resolve_from(cli_db_url, load_config().ok())
    }

    /// Resolve using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `QUESTPATH_DATABASE_URL` > `database.url` > `DbConfig::DEFAULT_URL`
    /// - Stripe key, webhook secret, OpenAI key: env > file > error
    /// - Frontend URL: `QUESTPATH_FRONTEND_URL` > `billing.frontend_url` > default
    pub fn resolve_from(cli_db_url: Option<&str>, file_config: Option<ConfigFile>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_url = if let Some(url) = cli_db_url {
            url.to_owned()
        } else if let Some(url) = env_or(ENV_DATABASE_URL, None) {
            url
        } else if !file.database.url.trim().is_empty() {
            file.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_owned()
        };
        let db_config = DbConfig::new(db_url);

        let stripe_key = required(
            ENV_STRIPE_API_KEY,
            file.billing.stripe_api_key.as_ref(),
            "stripe api key",
        )?;
        let webhook_secret = required(
            ENV_WEBHOOK_SECRET,
            file.billing.webhook_secret.as_ref(),
            "stripe webhook secret",
        )?;
        let openai_key = required(
            ENV_OPENAI_API_KEY,
            file.producer.openai_api_key.as_ref(),
            "openai api key",
        )?;

        let mut billing = BillingConfig::new(stripe_key, webhook_secret);
        if let Some(url) = env_or(ENV_FRONTEND_URL, file.billing.frontend_url.as_ref()) {
            billing.frontend_url = url;
        }
        if let Some(price) = file.billing.price_cents {
            if price <= 0 {
                bail!("billing.price_cents must be positive, got {price}");
            }
            billing.price_cents = price;
        }

        let mut producer = ProducerConfig::new(openai_key);
        if let Some(model) = file.producer.model.clone() {
            producer.model = model;
        }
        if let Some(secs) = file.producer.timeout_secs {
            producer.timeout = Duration::from_secs(secs);
        }

        let mut quota = QuotaPolicy::default();
        if let Some(limit) = file.quota.free_goal_limit {
            if limit < 0 {
                bail!("quota.free_goal_limit must not be negative, got {limit}");
            }
            quota.free_goal_limit = limit;
        }

        Ok(Self {
            db_config,
            billing,
            producer,
            quota,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    const ALL_ENV: [&str; 5] = [
        ENV_DATABASE_URL,
        ENV_STRIPE_API_KEY,
        ENV_WEBHOOK_SECRET,
        ENV_OPENAI_API_KEY,
        ENV_FRONTEND_URL,
    ];

    fn clear_env() {
        for key in ALL_ENV {
            unsafe { std::env::remove_var(key) };
        }
    }

    fn set_secrets_env() {
        unsafe { std::env::set_var(ENV_STRIPE_API_KEY, "sk_env") };
        unsafe { std::env::set_var(ENV_WEBHOOK_SECRET, "whsec_env") };
        unsafe { std::env::set_var(ENV_OPENAI_API_KEY, "sk-openai-env") };
    }

    fn full_file() -> ConfigFile {
        ConfigFile {
            database: DatabaseSection {
                url: "postgresql://filehost:5432/filedb".to_owned(),
            },
            billing: BillingSection {
                stripe_api_key: Some("sk_file".to_owned()),
                webhook_secret: Some("whsec_file".to_owned()),
                frontend_url: Some("https://file.example".to_owned()),
                price_cents: Some(900),
            },
            producer: ProducerSection {
                openai_api_key: Some("sk-openai-file".to_owned()),
                model: Some("gpt-test".to_owned()),
                timeout_secs: Some(15),
            },
            quota: QuotaSection {
                free_goal_limit: Some(5),
            },
        }
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let orig_xdg = std::env::var("XDG_CONFIG_HOME").ok();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };

        let saved = save_config(&full_file());
        let loaded = load_config();
        let path = config_path();

        match orig_xdg {
            Some(x) => unsafe { std::env::set_var("XDG_CONFIG_HOME", x) },
            None => unsafe { std::env::remove_var("XDG_CONFIG_HOME") },
        }

        saved.unwrap();
        let loaded = loaded.unwrap();
        assert!(path.starts_with(tmp.path()));
        assert_eq!(loaded.database.url, "postgresql://filehost:5432/filedb");
        assert_eq!(loaded.billing.price_cents, Some(900));
        assert_eq!(loaded.producer.model.as_deref(), Some("gpt-test"));
        assert_eq!(loaded.quota.free_goal_limit, Some(5));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = std::fs::metadata(&path).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        }
    }

    #[test]
    fn minimal_file_parses_with_defaults() {
        let parsed: ConfigFile = toml::from_str(
            r#"
            [database]
            url = "postgresql://localhost:5432/questpath"
            "#,
        )
        .unwrap();
        assert!(parsed.billing.stripe_api_key.is_none());
        assert!(parsed.quota.free_goal_limit.is_none());
    }

    #[test]
    fn resolve_with_cli_flag_overrides_all() {
        let _lock = lock_env();
        clear_env();
        set_secrets_env();
        unsafe { std::env::set_var(ENV_DATABASE_URL, "postgresql://env:5432/envdb") };

        let config = AppConfig::resolve_from(Some("postgresql://cli:5432/clidb"), Some(full_file())).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");

        clear_env();
    }

    #[test]
    fn resolve_env_overrides_file() {
        let _lock = lock_env();
        clear_env();
        set_secrets_env();
        unsafe { std::env::set_var(ENV_DATABASE_URL, "postgresql://env:5432/envdb") };
        unsafe { std::env::set_var(ENV_FRONTEND_URL, "https://env.example") };

        let config = AppConfig::resolve_from(None, Some(full_file())).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://env:5432/envdb");
        assert_eq!(config.billing.api_key, "sk_env");
        assert_eq!(config.billing.webhook_secret, "whsec_env");
        assert_eq!(config.billing.frontend_url, "https://env.example");
        assert_eq!(config.producer.api_key, "sk-openai-env");

        clear_env();
    }

    #[test]
    fn resolve_uses_file_when_env_unset() {
        let _lock = lock_env();
        clear_env();

        let config = AppConfig::resolve_from(None, Some(full_file())).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://filehost:5432/filedb");
        assert_eq!(config.billing.api_key, "sk_file");
        assert_eq!(config.billing.price_cents, 900);
        assert_eq!(config.producer.model, "gpt-test");
        assert_eq!(config.producer.timeout, Duration::from_secs(15));
        assert_eq!(config.quota.free_goal_limit, 5);
    }

    #[test]
    fn resolve_defaults_when_optional_values_missing() {
        let _lock = lock_env();
        clear_env();
        set_secrets_env();

        let config = AppConfig::resolve_from(None, None).unwrap();
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
        assert_eq!(config.billing.frontend_url, BillingConfig::DEFAULT_FRONTEND_URL);
        assert_eq!(config.billing.price_cents, 500);
        assert_eq!(config.quota, QuotaPolicy::default());
        assert_eq!(config.producer.timeout, ProducerConfig::DEFAULT_TIMEOUT);

        clear_env();
    }

    #[test]
    fn resolve_errors_when_secret_missing() {
        let _lock = lock_env();
        clear_env();
        unsafe { std::env::set_var(ENV_STRIPE_API_KEY, "sk_env") };
        unsafe { std::env::set_var(ENV_OPENAI_API_KEY, "sk-openai-env") };

        let result = AppConfig::resolve_from(None, None);
        clear_env();

        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("stripe webhook secret not found"), "unexpected error: {msg}");
        assert!(msg.contains(ENV_WEBHOOK_SECRET), "unexpected error: {msg}");
    }

    #[test]
    fn resolve_rejects_negative_quota() {
        let _lock = lock_env();
        clear_env();
        let mut file = full_file();
        file.quota.free_goal_limit = Some(-1);

        assert!(AppConfig::resolve_from(None, Some(file)).is_err());
    }

    #[test]
    fn mask_secret_hides_middle() {
        assert_eq!(mask_secret("sk_test_abcdefghijklmnop"), "sk_tes...mnop");
        assert_eq!(mask_secret("short"), "****");
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let _lock = lock_env();
        let path = config_path();
        assert!(
            path.ends_with("questpath/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
