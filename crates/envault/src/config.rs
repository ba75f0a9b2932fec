//! Configuration loading and validation.
//!
//! The configuration file (JSON) is named by the `CONFIG_PATH` environment
//! variable, which is read once and then removed from the process
//! environment. The process exits with a clear error message if a required
//! key is missing or invalid.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::{self, Deserializer};
use serde::Deserialize;

const CONFIG_PATH_ENV_VAR: &str = "CONFIG_PATH";

/// Deployment environment; selects the log format and verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    Dev,
    Prod,
}

/// A duration given as a human-readable string (`"30s"`, `"1h"`, `"1h30m"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationStr(pub Duration);

impl DurationStr {
    pub fn get(self) -> Duration {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }
}

impl<'de> Deserialize<'de> for DurationStr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_duration(&text).map(DurationStr).map_err(de::Error::custom)
    }
}

/// Parse a duration string made of `<integer><unit>` segments, where the
/// unit is one of `ms`, `s`, `m`, `h`.
fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("duration is empty".into());
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("duration {text:?} is missing a unit"))?;
        if digits_end == 0 {
            return Err(format!("invalid duration {text:?}"));
        }
        let value: u64 = rest[..digits_end]
            .parse()
            .map_err(|_| format!("invalid number in duration {text:?}"))?;

        let unit_end = rest[digits_end..]
            .find(|c: char| c.is_ascii_digit())
            .map(|i| digits_end + i)
            .unwrap_or(rest.len());
        let step = match &rest[digits_end..unit_end] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            unit => return Err(format!("unknown unit {unit:?} in duration {text:?}")),
        };
        total += step;
        rest = &rest[unit_end..];
    }
    Ok(total)
}

/// Validated service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_environment")]
    pub environment: Environment,

    /// Path to the SQLite database file. **Required.**
    #[serde(rename = "db-path")]
    pub db_path: String,

    /// Directory that receives encrypted file blobs. **Required.**
    #[serde(rename = "file-storage-path")]
    pub file_storage_path: String,

    /// Hard cap on an upload request body, in bytes.
    #[serde(rename = "max-upload-size", default = "default_max_upload_size")]
    pub max_upload_size: u64,

    /// Maximum age of the newest data key before the next encryption mints a
    /// fresh one. **Required.**
    #[serde(rename = "dec-rotation-period")]
    pub dec_rotation_period: DurationStr,

    /// Lifetime of issued session tokens.
    #[serde(rename = "token_time_to_live", default = "default_token_ttl")]
    pub token_time_to_live: DurationStr,

    #[serde(default = "default_address")]
    pub address: String,

    /// Per-request timeouts; zero means unlimited.
    #[serde(rename = "read-timeout", default = "default_no_timeout")]
    pub read_timeout: DurationStr,
    #[serde(rename = "write-timeout", default = "default_no_timeout")]
    pub write_timeout: DurationStr,
    #[serde(rename = "idle-timeout", default = "default_idle_timeout")]
    pub idle_timeout: DurationStr,
}

fn default_environment() -> Environment {
    Environment::Prod
}
fn default_max_upload_size() -> u64 {
    1024
}
fn default_token_ttl() -> DurationStr {
    DurationStr(Duration::from_secs(3600))
}
fn default_address() -> String {
    "0.0.0.0:8080".into()
}
fn default_no_timeout() -> DurationStr {
    DurationStr(Duration::ZERO)
}
fn default_idle_timeout() -> DurationStr {
    DurationStr(Duration::from_secs(30))
}

impl Config {
    /// Load and validate configuration from the file named by `CONFIG_PATH`.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable or file is missing, or if any key
    /// fails to parse or validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV_VAR)
            .with_context(|| format!("{CONFIG_PATH_ENV_VAR} environment variable is not set"))?;
        std::env::remove_var(CONFIG_PATH_ENV_VAR);

        let raw = config::Config::builder()
            .add_source(config::File::new(&path, config::FileFormat::Json))
            .build()
            .with_context(|| format!("could not read config file {path}"))?;

        let cfg: Config = raw
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.db_path, "db-path")?;
        ensure_non_empty(&self.file_storage_path, "file-storage-path")?;

        if self.max_upload_size == 0 {
            anyhow::bail!("max-upload-size must be > 0");
        }
        if self.dec_rotation_period.is_zero() {
            anyhow::bail!("dec-rotation-period must be > 0");
        }
        self.address
            .parse::<SocketAddr>()
            .with_context(|| format!("address {:?} is not a valid socket address", self.address))?;
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
