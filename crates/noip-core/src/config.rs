use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{NoipError, Result};

pub const DEFAULT_INTERVAL_MINUTES: u32 = 5;
pub const DEFAULT_HOSTNAME: &str = "mytest.testdomain.com";
pub const DEFAULT_ENDPOINT: &str = "http://dynupdate.no-ip.com/nic/update";
pub const DEFAULT_USER_AGENT: &str = concat!("noip-updater/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MISFIRE_GRACE_SECS: u64 = 1;

/// Top-level config (noip.toml + NOIP_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NoipConfig {
    #[serde(default)]
    pub noip: AccountConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// The No-IP account and the host it keeps up to date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// base64 of `username:password`, sent as HTTP Basic auth.
    #[serde(default)]
    pub credential: String,
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_interval")]
    pub interval_minutes: u32,
    /// Address to report instead of letting No-IP detect the caller's IP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            credential: String::new(),
            hostname: default_hostname(),
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            ip: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log file path. Console output is always on.
    #[serde(default = "default_log_file")]
    pub file: Option<String>,
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Start every run with an empty log file.
    #[serde(default = "bool_true")]
    pub truncate_on_start: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            level: default_log_level(),
            truncate_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            user_agent: default_user_agent(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How late a fire may be and still run; later fires are skipped.
    #[serde(default = "default_misfire_grace_secs")]
    pub misfire_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            misfire_grace_secs: DEFAULT_MISFIRE_GRACE_SECS,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_hostname() -> String {
    DEFAULT_HOSTNAME.to_string()
}
fn default_interval() -> u32 {
    DEFAULT_INTERVAL_MINUTES
}
fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_misfire_grace_secs() -> u64 {
    DEFAULT_MISFIRE_GRACE_SECS
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_db_path() -> String {
    format!("{}/jobs.db", data_dir())
}
fn default_log_file() -> Option<String> {
    Some(format!("{}/noip-updater.log", data_dir()))
}

/// `~/.noip`, or `./.noip` when `HOME` is unset.
pub fn data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.noip", home)
}

/// Resolve the config path: explicit argument > `NOIP_CONFIG` > `~/.noip/noip.toml`.
pub fn resolve_path(config_path: Option<&str>) -> String {
    config_path
        .map(String::from)
        .or_else(|| std::env::var("NOIP_CONFIG").ok())
        .unwrap_or_else(|| format!("{}/noip.toml", data_dir()))
}

impl NoipConfig {
    /// Load config from a TOML file with NOIP_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g. `NOIP_NOIP__HOSTNAME` or
    /// `NOIP_LOG__LEVEL`. A missing file is not an error: every field has a
    /// default, and [`NoipConfig::validate`] rejects what cannot run.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = resolve_path(config_path);
        Self::figment(&path)
            .extract()
            .map_err(|e| NoipError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(NoipConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("NOIP_").split("__"))
    }

    /// Reject settings the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.noip.credential.trim().is_empty() {
            return Err(NoipError::Config(
                "noip.credential is empty; run `noip-updater setup` first".to_string(),
            ));
        }
        if self.noip.hostname.trim().is_empty() {
            return Err(NoipError::Config("noip.hostname is empty".to_string()));
        }
        if self.noip.interval_minutes == 0 {
            return Err(NoipError::Config(
                "noip.interval_minutes must be a positive integer".to_string(),
            ));
        }
        if self.http.timeout_secs == 0 {
            return Err(NoipError::Config(
                "http.timeout_secs must be a positive integer".to_string(),
            ));
        }
        if self.scheduler.misfire_grace_secs == 0 {
            return Err(NoipError::Config(
                "scheduler.misfire_grace_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Write the config as TOML, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let text = toml::to_string_pretty(self)
            .map_err(|e| NoipError::Config(format!("cannot serialize config: {e}")))?;
        std::fs::write(path, text)?;
        tracing::info!(path = %path.display(), "wrote configuration file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> NoipConfig {
        let mut cfg = NoipConfig::default();
        cfg.noip.credential = "dXNlcjpwYXNz".to_string();
        cfg
    }

    #[test]
    fn defaults_match_first_run_values() {
        let cfg = NoipConfig::default();
        assert_eq!(cfg.noip.interval_minutes, 5);
        assert_eq!(cfg.noip.hostname, "mytest.testdomain.com");
        assert_eq!(cfg.http.timeout_secs, 5);
        assert!(cfg.log.truncate_on_start);
    }

    #[test]
    fn empty_credential_is_rejected() {
        let err = NoipConfig::default().validate().unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut cfg = valid();
        cfg.noip.interval_minutes = 0;
        assert!(cfg.validate().is_err());
        cfg.noip.interval_minutes = 1;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_misfire_grace_is_rejected() {
        let mut cfg = valid();
        cfg.scheduler.misfire_grace_secs = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("misfire_grace_secs"));
    }

    #[test]
    fn env_overrides_file_with_double_underscore_keys() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "noip.toml",
                r#"
                [noip]
                credential = "abc"

                [log]
                level = "warn"
                "#,
            )?;
            jail.set_env("NOIP_LOG__LEVEL", "debug");
            jail.set_env("NOIP_SCHEDULER__MISFIRE_GRACE_SECS", "3");

            let cfg = NoipConfig::load(Some("noip.toml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg.noip.credential, "abc");
            assert_eq!(cfg.log.level, "debug");
            assert_eq!(cfg.scheduler.misfire_grace_secs, 3);
            Ok(())
        });
    }

    #[test]
    fn blank_hostname_is_rejected() {
        let mut cfg = valid();
        cfg.noip.hostname = "  ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn save_then_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("noip.toml");

        let mut cfg = valid();
        cfg.noip.hostname = "home.ddns.net".to_string();
        cfg.noip.interval_minutes = 15;
        cfg.save(&path).unwrap();

        let loaded = NoipConfig::load(path.to_str()).unwrap();
        assert_eq!(loaded.noip.hostname, "home.ddns.net");
        assert_eq!(loaded.noip.interval_minutes, 15);
        assert_eq!(loaded.noip.credential, cfg.noip.credential);
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noip.toml");
        std::fs::write(&path, "[noip]\ncredential = \"abc\"\n").unwrap();

        let loaded = NoipConfig::load(path.to_str()).unwrap();
        assert_eq!(loaded.noip.credential, "abc");
        assert_eq!(loaded.noip.interval_minutes, DEFAULT_INTERVAL_MINUTES);
        assert_eq!(loaded.http.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noip.toml");
        std::fs::write(&path, "[noip]\ninterval_minutes = \"soon\"\n").unwrap();

        let err = NoipConfig::load(path.to_str()).unwrap_err();
        assert!(matches!(err, NoipError::Config(_)));
    }
}
