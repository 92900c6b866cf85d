//! Layered daemon configuration and path helpers.
//!
//! Figment merges built-in defaults, `searchd.toml`, `searchd.<env>.toml` and
//! `SEARCH_*` environment variables (`__` separates sections). Relative paths
//! resolve against the directory of the base file after `~`/`${VAR}` expansion.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "searchd.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    pub host: String,
    pub port: u16,
    /// Maximum number of concurrently executing queries.
    pub max_queue: usize,
    #[serde(with = "duration")]
    pub query_timeout: Duration,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 9050,
            max_queue: 5,
            query_timeout: Duration::from_secs(10),
        }
    }
}

impl WebSettings {
    pub fn listen_addr(&self) -> String {
        let host = if self.host.is_empty() { "0.0.0.0" } else { self.host.as_str() };
        format!("{host}:{}", self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// Root directory holding one sub-directory per generation.
    pub path: PathBuf,
    pub batch: usize,
    /// Staleness after which a query nudges the refresh loop.
    #[serde(with = "duration")]
    pub age: Duration,
    #[serde(with = "duration")]
    pub update_interval: Duration,
    /// Zero disables periodic rebuilds.
    #[serde(with = "duration")]
    pub rebuild_interval: Duration,
    pub max_hits: usize,
    pub writer_memory: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("search.index"),
            batch: 4096,
            age: Duration::from_millis(100),
            update_interval: Duration::from_secs(120),
            rebuild_interval: Duration::from_secs(24 * 60 * 60),
            max_hits: 100,
            writer_memory: 50_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub models: PathBuf,
    /// Search filter file; empty keeps every string-typed field.
    pub search: PathBuf,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self { models: PathBuf::from("models.yml"), search: PathBuf::from("search.yml") }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub snapshot_dir: PathBuf,
    pub changes_file: PathBuf,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            snapshot_dir: PathBuf::from("data/snapshot"),
            changes_file: PathBuf::from("data/changes.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestricterSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub web: WebSettings,
    pub index: IndexSettings,
    pub models: ModelSettings,
    pub feed: FeedSettings,
    pub restricter: RestricterSettings,
}

impl Settings {
    /// Loads from `SEARCH_CONFIG` (or `searchd.toml`) and the `RUST_ENV` overlay.
    pub fn load() -> Result<Self> {
        let base = env::var("SEARCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_from(expand_path(base), &env_name)
    }

    pub fn load_from(base: impl AsRef<Path>, env_name: &str) -> Result<Self> {
        let base = base.as_ref();
        let overlay = match env_name {
            "dev" | "development" => Some("dev"),
            "prod" | "production" => Some("prod"),
            "test" | "testing" => Some("test"),
            _ => None,
        };

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file(base));
        if let Some(overlay) = overlay {
            figment = figment.merge(Toml::file(base.with_extension(format!("{overlay}.toml"))));
        }
        figment = figment.merge(Env::prefixed("SEARCH_").ignore(&["config"]).split("__"));

        let mut settings: Settings = figment.extract().map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let root = base.parent().unwrap_or_else(|| Path::new(""));
        settings.resolve_paths(root);
        settings.validate()?;
        Ok(settings)
    }

    fn resolve_paths(&mut self, root: &Path) {
        let resolve = |p: &mut PathBuf| {
            if !p.as_os_str().is_empty() {
                *p = resolve_with_base(root, p.to_string_lossy());
            }
        };
        resolve(&mut self.index.path);
        resolve(&mut self.models.models);
        resolve(&mut self.models.search);
        resolve(&mut self.feed.snapshot_dir);
        resolve(&mut self.feed.changes_file);
    }

    pub fn validate(&self) -> Result<()> {
        let zero = |what: &str| Err(Error::InvalidConfig(format!("{what} must be greater than zero")));
        if self.index.batch == 0 {
            return zero("index.batch");
        }
        if self.index.max_hits == 0 {
            return zero("index.max_hits");
        }
        if self.index.update_interval.is_zero() {
            return zero("index.update_interval");
        }
        if self.web.max_queue == 0 {
            return zero("web.max_queue");
        }
        if self.index.path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("index.path must not be empty".into()));
        }
        for (what, value) in [
            ("web.query_timeout", self.web.query_timeout),
            ("index.age", self.index.age),
            ("index.update_interval", self.index.update_interval),
            ("index.rebuild_interval", self.index.rebuild_interval),
        ] {
            if value > MAX_DURATION {
                return Err(Error::InvalidConfig(format!(
                    "{what} must not exceed {}",
                    format_duration(MAX_DURATION)
                )));
            }
        }
        Ok(())
    }
}

/// Expand a user-provided path string (`~` and `${VAR}`/`$VAR`) without
/// canonicalizing it.
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Expand `p`, then join it onto `base` unless it is already absolute.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() {
        p
    } else {
        base.join(p)
    }
}

/// Upper bound for every configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Parses `"250ms"`, `"10s"`, `"2m"`, `"1h"` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let s = input.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let split = s.find(|c: char| !c.is_ascii_digit())?;
    let (value, unit) = s.split_at(split);
    let value: u64 = value.parse().ok()?;
    match unit.trim() {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs),
        "h" => value.checked_mul(60 * 60).map(Duration::from_secs),
        _ => None,
    }
}

pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 != 0 {
        format!("{ms}ms")
    } else if ms % 3_600_000 == 0 && ms > 0 {
        format!("{}h", ms / 3_600_000)
    } else if ms % 60_000 == 0 && ms > 0 {
        format!("{}m", ms / 60_000)
    } else {
        format!("{}s", ms / 1000)
    }
}

mod duration {
    use std::fmt;
    use std::time::Duration;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("seconds or a duration string such as \"250ms\" or \"2m\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
                Ok(Duration::from_secs(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
                u64::try_from(v)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
                super::parse_duration(v).ok_or_else(|| E::custom(format!("invalid duration {v:?}")))
            }
        }

        d.deserialize_any(DurationVisitor)
    }
}
