//! `friendlink.conf` persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fmt, fs};

use friendlink::dispatch::{DEFAULT_POLL_INTERVAL, DEFAULT_STOP_TIMEOUT};
use friendlink::message::DEFAULT_HISTORY_CAPACITY;
use friendlink::{ClientBuilder, Error};

/// Default location: `<config_dir>/friendlink/friendlink.conf`.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("friendlink")
        .join("friendlink.conf")
}

/// Client settings stored as `key=value` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub history_capacity: usize,
    pub poll_interval_ms: u64,
    pub stop_timeout_ms: u64,
    pub log: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            poll_interval_ms: millis(DEFAULT_POLL_INTERVAL),
            stop_timeout_ms: millis(DEFAULT_STOP_TIMEOUT),
            log: None,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> friendlink::Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::InvalidArgument(format!(
                "load config {}: {e}",
                path.display()
            ))),
        }
    }

    /// Parse `key=value` lines. Blank lines and `#` comments are skipped;
    /// unknown keys are ignored.
    pub fn parse(text: &str) -> friendlink::Result<Self> {
        let mut cfg = Self::default();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((k, v)) = line.split_once('=') else {
                continue;
            };
            let v = v.trim();
            match k.trim() {
                "history_capacity" => cfg.history_capacity = number(k, v)?,
                "poll_interval_ms" => cfg.poll_interval_ms = number(k, v)?,
                "stop_timeout_ms" => cfg.stop_timeout_ms = number(k, v)?,
                "log" => cfg.log = (!v.is_empty()).then(|| v.to_owned()),
                other => tracing::debug!(key = other, "unknown config key ignored"),
            }
        }
        Ok(cfg)
    }

    /// Save to `path`, creating the parent directory.
    pub fn save(&self, path: &Path) -> friendlink::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| Error::InvalidArgument(format!("mkdir: {e}")))?;
        }
        fs::write(path, self.to_string())
            .map_err(|e| Error::InvalidArgument(format!("write config: {e}")))
    }

    /// A client builder carrying these settings.
    pub fn builder(&self) -> ClientBuilder {
        friendlink::Client::builder()
            .history_capacity(self.history_capacity)
            .poll_interval(Duration::from_millis(self.poll_interval_ms))
            .stop_timeout(Duration::from_millis(self.stop_timeout_ms))
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "history_capacity={}", self.history_capacity)?;
        writeln!(f, "poll_interval_ms={}", self.poll_interval_ms)?;
        writeln!(f, "stop_timeout_ms={}", self.stop_timeout_ms)?;
        writeln!(f, "log={}", self.log.as_deref().unwrap_or_default())
    }
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> friendlink::Result<T>
where
    T::Err: fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::InvalidArgument(format!("config {}: {e}", key.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_overrides_defaults_and_skips_noise() {
        let cfg = Config::parse("# tuned\nhistory_capacity = 10\n\nlog=debug\ncolour=yes\n").unwrap();
        assert_eq!(cfg.history_capacity, 10);
        assert_eq!(cfg.log.as_deref(), Some("debug"));
        assert_eq!(cfg.stop_timeout_ms, 2500);
        assert_eq!(cfg.poll_interval_ms, 1);
    }

    #[test]
    fn bad_number_is_rejected() {
        let err = Config::parse("stop_timeout_ms=soon").unwrap_err();
        assert!(err.to_string().contains("stop_timeout_ms"));
    }

    #[test]
    fn display_parses_back() {
        let cfg = Config {
            log: Some("friendlink=trace".into()),
            ..Config::default()
        };
        assert_eq!(Config::parse(&cfg.to_string()).unwrap(), cfg);
    }
}
