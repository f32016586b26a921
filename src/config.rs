use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use log::LevelFilter;
use url::Url;

pub(crate) const CONFIG_FILE: &str = "config.env";

const DEFAULT_THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_LOG_FILE: &str = "log.txt";

/// Loads `config.env` into the process environment, overriding variables
/// that are already set.
pub(crate) fn load_env_file(path: &str) -> Result<PathBuf, dotenvy::Error> {
    dotenvy::from_filename_override(path)
}

fn required<F>(lookup: &F, key: &str) -> anyhow::Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("{} is not set", key))
}

fn optional<F, T>(lookup: &F, key: &str) -> anyhow::Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key).map(|value| value.trim().to_string()) {
        Some(value) if !value.is_empty() => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("{} is malformed: {}", key, e)),
        _ => Ok(None),
    }
}

pub(crate) struct LogSettings {
    pub(crate) level: LevelFilter,
    pub(crate) file: PathBuf,
}

impl LogSettings {
    /// Never fails: unknown levels fall back to `info`, since the logger has
    /// to exist before configuration errors can be reported.
    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let level = optional::<_, LevelFilter>(&lookup, "LOG_LEVEL")
            .ok()
            .flatten()
            .unwrap_or(LevelFilter::Info);
        let file = lookup("LOG_FILE")
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));
        Self { level, file }
    }

    pub(crate) fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }
}

#[derive(Clone)]
pub(crate) struct Config {
    /// Application credentials of a self-hosted Bot API server.
    pub(crate) api_id: i32,
    pub(crate) api_hash: String,
    pub(crate) bot_token: String,
    pub(crate) bot_api_url: Option<Url>,
    pub(crate) downloads_dir: PathBuf,
    pub(crate) thumbnail_timeout: Duration,
    pub(crate) aria2c_path: PathBuf,
    pub(crate) ffprobe_path: PathBuf,
}

impl Config {
    pub(crate) fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_id = required(&lookup, "API_ID")?
            .parse::<i32>()
            .context("API_ID must be an integer")?;
        let api_hash = required(&lookup, "API_HASH")?;
        let bot_token = required(&lookup, "BOT_TOKEN")?;
        if !bot_token.contains(':') {
            return Err(anyhow!("BOT_TOKEN is malformed: expected <id>:<secret>"));
        }

        let downloads_dir = match optional::<_, PathBuf>(&lookup, "DOWNLOADS_DIR")? {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("couldn't determine the home directory, set DOWNLOADS_DIR")?
                .join("Downloads"),
        };
        let thumbnail_timeout = optional::<_, u64>(&lookup, "THUMBNAIL_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_THUMBNAIL_TIMEOUT);

        Ok(Self {
            api_id,
            api_hash,
            bot_token,
            bot_api_url: optional(&lookup, "BOT_API_URL")?,
            downloads_dir,
            thumbnail_timeout,
            aria2c_path: optional(&lookup, "ARIA2C_PATH")?.unwrap_or_else(|| "aria2c".into()),
            ffprobe_path: optional(&lookup, "FFPROBE_PATH")?.unwrap_or_else(|| "ffprobe".into()),
        })
    }

    pub(crate) fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .field("bot_token", &"<redacted>")
            .field("bot_api_url", &self.bot_api_url.as_ref().map(Url::as_str))
            .field("downloads_dir", &self.downloads_dir)
            .field("thumbnail_timeout", &self.thumbnail_timeout)
            .field("aria2c_path", &self.aria2c_path)
            .field("ffprobe_path", &self.ffprobe_path)
            .finish()
    }
}
