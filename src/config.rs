//! Configuration Module
//!
//! Loads server configuration from a TOML file named by `LWS_CONFIG`, with
//! environment overrides for the listener port and the cleanup interval.
//!
//! # Example
//! ```toml
//! root = "/srv/www"
//! stat_cache = { capacity = 1024, timeout = "30s" }
//! thread_pool = { name = "lws", threads = 8 }
//!
//! [defaults]
//! path = "/srv/lib/?.lua"
//! max_requests = 10000
//! gc = 100
//!
//! [[location]]
//! pattern = "~ ^/app/(\\w+)$"
//! lws = "$document_root/app/$1.lua"
//! max_memory = "64m"
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::{EngineConfig, EngineLimits};
use crate::error::ConfigError;
use crate::expr::Expression;
use crate::location::{Location, Locations};
use crate::stat::{STAT_CACHE_CAP_DEFAULT, STAT_CACHE_TIMEOUT_DEFAULT};

/// Default in-memory request body limit before spooling to a file.
pub const CLIENT_BODY_BUFFER_SIZE_DEFAULT: usize = 16 * 1024;

// == Config ==
/// Server configuration parameters.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Stat-cache purge interval in seconds
    pub cleanup_interval: u64,
    /// Document root, exposed as `$document_root`
    pub root: String,
    pub thread_pool: ThreadPoolConfig,
    pub stat_cache: StatCacheConfig,
    /// Bodies up to this size stay in memory
    pub client_body_buffer_size: usize,
    /// Location blocks with server defaults already merged in
    pub locations: Vec<LocationConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPoolConfig {
    pub name: String,
    pub threads: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatCacheConfig {
    /// 0 disables the cache
    pub capacity: usize,
    pub timeout: Duration,
}

// == Location Directives ==
/// Per-location directives as written; unset values inherit from `[defaults]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationDirectives {
    /// Target script expression
    pub lws: Option<String>,
    pub path_info: Option<String>,
    pub init: Option<PathBuf>,
    pub pre: Option<PathBuf>,
    pub post: Option<PathBuf>,
    pub path: Option<String>,
    /// Native module search path. Setting it builds the engine with
    /// `Lua::unsafe_new`, since only that state can load C modules.
    pub cpath: Option<String>,
    pub max_memory: Option<SizeValue>,
    pub max_requests: Option<u64>,
    pub gc: Option<u64>,
}

impl LocationDirectives {
    /// Child value if set, else the parent's.
    pub fn merge(&self, parent: &Self) -> Self {
        Self {
            lws: self.lws.clone().or_else(|| parent.lws.clone()),
            path_info: self.path_info.clone().or_else(|| parent.path_info.clone()),
            init: self.init.clone().or_else(|| parent.init.clone()),
            pre: self.pre.clone().or_else(|| parent.pre.clone()),
            post: self.post.clone().or_else(|| parent.post.clone()),
            path: self.path.clone().or_else(|| parent.path.clone()),
            cpath: self.cpath.clone().or_else(|| parent.cpath.clone()),
            max_memory: self.max_memory.clone().or_else(|| parent.max_memory.clone()),
            max_requests: self.max_requests.or(parent.max_requests),
            gc: self.gc.or(parent.gc),
        }
    }
}

/// Size given as a byte count or as text with a `k`/`m`/`g` suffix.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SizeValue {
    Bytes(u64),
    Text(String),
}

/// Time given as seconds or as text such as `"500ms"`, `"30s"`, `"1m30s"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    Seconds(u64),
    Text(String),
}

// == Location Config ==
/// One location block after merging with the server defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationConfig {
    pub pattern: String,
    pub directives: LocationDirectives,
    pub limits: EngineLimits,
}

impl LocationConfig {
    fn new(pattern: String, directives: LocationDirectives) -> Result<Self, ConfigError> {
        let max_memory = match &directives.max_memory {
            Some(size) => size_value("max_memory", size)?,
            None => 0,
        };
        let limits = EngineLimits {
            max_memory,
            max_requests: directives.max_requests.unwrap_or(0),
            gc: directives.gc.unwrap_or(0),
        };
        Ok(Self {
            pattern,
            directives,
            limits,
        })
    }

    /// Compiles expressions and builds the configuration identity.
    pub fn compile(&self) -> Result<Location, ConfigError> {
        let d = &self.directives;
        let main = d
            .lws
            .as_deref()
            .map(|source| Expression::compile("lws", source))
            .transpose()?;
        let path_info = d
            .path_info
            .as_deref()
            .map(|source| Expression::compile("path_info", source))
            .transpose()?;

        let engine = EngineConfig {
            main: d.lws.clone().unwrap_or_default(),
            init: d.init.clone(),
            pre: d.pre.clone(),
            post: d.post.clone(),
            path: d.path.clone().unwrap_or_default(),
            cpath: d.cpath.clone().unwrap_or_default(),
            limits: self.limits,
        };

        Ok(Location {
            pattern: self.pattern.clone(),
            main,
            path_info,
            engine: Arc::new(engine),
        })
    }
}

// == Raw File Format ==
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    port: Option<u16>,
    cleanup_interval: Option<u64>,
    root: Option<String>,
    client_body_buffer_size: Option<SizeValue>,
    thread_pool: Option<RawThreadPool>,
    stat_cache: Option<RawStatCache>,
    #[serde(default)]
    defaults: LocationDirectives,
    #[serde(default, rename = "location")]
    locations: Vec<RawLocation>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawThreadPool {
    name: Option<String>,
    threads: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStatCache {
    capacity: Option<SizeValue>,
    timeout: Option<TimeValue>,
}

/// `deny_unknown_fields` has no effect through `flatten`; keys the
/// directives do not take end up in `unknown`.
#[derive(Debug, Deserialize)]
struct RawLocation {
    pattern: String,
    #[serde(flatten)]
    directives: LocationDirectives,
    #[serde(flatten)]
    unknown: BTreeMap<String, toml::Value>,
}

impl Config {
    /// Loads the file named by `LWS_CONFIG` (or built-in defaults), then
    /// applies `SERVER_PORT` and `CLEANUP_INTERVAL` overrides.
    ///
    /// # Environment Variables
    /// - `LWS_CONFIG` - Path of the TOML configuration file
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Stat-cache purge frequency in seconds (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match env::var("LWS_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    // == Parse ==
    /// Parses and validates a configuration document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;
        let defaults = Self::default();

        let thread_pool = match raw.thread_pool {
            Some(pool) => ThreadPoolConfig {
                name: pool.name.unwrap_or(defaults.thread_pool.name),
                threads: pool.threads.unwrap_or(defaults.thread_pool.threads),
            },
            None => defaults.thread_pool,
        };
        if thread_pool.threads == 0 {
            return Err(ConfigError::Zero("thread_pool.threads"));
        }

        let stat_cache = match raw.stat_cache {
            Some(cache) => StatCacheConfig {
                capacity: match &cache.capacity {
                    Some(size) => size_value("stat_cache.capacity", size)?,
                    None => STAT_CACHE_CAP_DEFAULT,
                },
                timeout: match &cache.timeout {
                    Some(time) => time_value("stat_cache.timeout", time)?,
                    None => STAT_CACHE_TIMEOUT_DEFAULT,
                },
            },
            None => defaults.stat_cache,
        };

        let client_body_buffer_size = match &raw.client_body_buffer_size {
            Some(size) => size_value("client_body_buffer_size", size)?,
            None => defaults.client_body_buffer_size,
        };

        let raw_locations = if raw.locations.is_empty() {
            vec![RawLocation {
                pattern: "/".to_string(),
                directives: LocationDirectives::default(),
                unknown: BTreeMap::new(),
            }]
        } else {
            raw.locations
        };
        let locations = raw_locations
            .into_iter()
            .map(|location| {
                if let Some(directive) = location.unknown.keys().next() {
                    return Err(ConfigError::UnknownDirective {
                        pattern: location.pattern,
                        directive: directive.clone(),
                    });
                }
                LocationConfig::new(location.pattern, location.directives.merge(&raw.defaults))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            server_port: raw.port.unwrap_or(defaults.server_port),
            cleanup_interval: raw.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            root: raw.root.unwrap_or(defaults.root),
            thread_pool,
            stat_cache,
            client_body_buffer_size,
            locations,
        })
    }

    /// Applies environment-style overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.server_port = port;
        }
        if let Some(interval) = lookup("CLEANUP_INTERVAL").and_then(|v| v.parse().ok()) {
            self.cleanup_interval = interval;
        }
    }

    // == Compile Locations ==
    /// Compiles every location block, rejecting duplicates and bad expressions.
    pub fn compile_locations(&self) -> Result<Locations, ConfigError> {
        let mut locations = Locations::new();
        for location in &self.locations {
            locations.insert(location.compile()?)?;
        }
        Ok(locations)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            cleanup_interval: 10,
            root: ".".to_string(),
            thread_pool: ThreadPoolConfig {
                name: "default".to_string(),
                threads: num_cpus::get().max(1),
            },
            stat_cache: StatCacheConfig {
                capacity: STAT_CACHE_CAP_DEFAULT,
                timeout: STAT_CACHE_TIMEOUT_DEFAULT,
            },
            client_body_buffer_size: CLIENT_BODY_BUFFER_SIZE_DEFAULT,
            locations: vec![LocationConfig {
                pattern: "/".to_string(),
                directives: LocationDirectives::default(),
                limits: EngineLimits::default(),
            }],
        }
    }
}

fn size_value(directive: &'static str, value: &SizeValue) -> Result<usize, ConfigError> {
    let parsed = match value {
        SizeValue::Bytes(n) => usize::try_from(*n).ok(),
        SizeValue::Text(text) => parse_size(text),
    };
    parsed.ok_or_else(|| ConfigError::InvalidSize {
        directive,
        value: match value {
            SizeValue::Bytes(n) => n.to_string(),
            SizeValue::Text(text) => text.clone(),
        },
    })
}

fn time_value(directive: &'static str, value: &TimeValue) -> Result<Duration, ConfigError> {
    match value {
        TimeValue::Seconds(n) => Ok(Duration::from_secs(*n)),
        TimeValue::Text(text) => parse_time(text).ok_or_else(|| ConfigError::InvalidTime {
            directive,
            value: text.clone(),
        }),
    }
}

// == Size Parsing ==
/// Parses `"512"`, `"16k"`, `"64m"` or `"1g"` (suffixes in either case).
pub fn parse_size(text: &str) -> Option<usize> {
    let text = text.trim();
    let (digits, scale) = match text.char_indices().last()? {
        (i, 'k' | 'K') => (&text[..i], 1024),
        (i, 'm' | 'M') => (&text[..i], 1024 * 1024),
        (i, 'g' | 'G') => (&text[..i], 1024 * 1024 * 1024),
        _ => (text, 1),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<usize>().ok()?.checked_mul(scale)
}

// == Time Parsing ==
/// Parses a time such as `"30"`, `"500ms"`, `"30s"`, `"2h"` or `"1m30s"`.
///
/// A bare number means seconds. Units: `ms`, `s`, `m`, `h`, `d`, `w`.
pub fn parse_time(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        return text.parse().ok().map(Duration::from_secs);
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.bytes().take_while(u8::is_ascii_alphabetic).count();
        let (unit, tail) = rest.split_at(unit_len);
        let part = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "h" => Duration::from_secs(value.checked_mul(3600)?),
            "d" => Duration::from_secs(value.checked_mul(86_400)?),
            "w" => Duration::from_secs(value.checked_mul(604_800)?),
            _ => return None,
        };
        total = total.checked_add(part)?;
        rest = tail.trim_start();
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.cleanup_interval, 10);
        assert_eq!(config.thread_pool.name, "default");
        assert!(config.thread_pool.threads >= 1);
        assert_eq!(config.stat_cache.capacity, 1024);
        assert_eq!(config.stat_cache.timeout, Duration::from_secs(30));
        assert_eq!(config.client_body_buffer_size, 16 * 1024);
        assert_eq!(config.locations.len(), 1);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> =
            [("SERVER_PORT", "8081"), ("CLEANUP_INTERVAL", "nope")].into();
        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.server_port, 8081);
        assert_eq!(config.cleanup_interval, 10);
    }

    #[test]
    fn test_full_document() {
        let config = Config::from_toml_str(
            r#"
            port = 8080
            root = "/srv/www"
            cleanup_interval = 5
            client_body_buffer_size = "8k"
            thread_pool = { name = "lws", threads = 4 }
            stat_cache = { capacity = 256, timeout = "1m30s" }

            [defaults]
            path = "/srv/lib/?.lua"
            max_requests = 1000
            gc = 50

            [[location]]
            pattern = "/"
            lws = "$document_root$uri.lua"
            max_memory = "64m"

            [[location]]
            pattern = "= /status"
            lws = "/srv/status.lua"
            gc = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.server_port, 8080);
        assert_eq!(config.root, "/srv/www");
        assert_eq!(config.client_body_buffer_size, 8192);
        assert_eq!(
            config.thread_pool,
            ThreadPoolConfig {
                name: "lws".into(),
                threads: 4
            }
        );
        assert_eq!(config.stat_cache.capacity, 256);
        assert_eq!(config.stat_cache.timeout, Duration::from_secs(90));

        let root = &config.locations[0];
        assert_eq!(root.directives.path.as_deref(), Some("/srv/lib/?.lua"));
        assert_eq!(
            root.limits,
            EngineLimits {
                max_memory: 64 * 1024 * 1024,
                max_requests: 1000,
                gc: 50
            }
        );

        let status = &config.locations[1];
        assert_eq!(status.limits.gc, 0);
        assert_eq!(status.limits.max_memory, 0);

        let locations = config.compile_locations().unwrap();
        assert_eq!(locations.len(), 2);
        let matched = locations.find("/status").unwrap();
        assert_eq!(matched.location.engine.main, "/srv/status.lua");
    }

    #[test]
    fn test_merge_child_wins() {
        let parent = LocationDirectives {
            lws: Some("parent".into()),
            gc: Some(10),
            ..LocationDirectives::default()
        };
        let child = LocationDirectives {
            gc: Some(3),
            ..LocationDirectives::default()
        };
        let merged = child.merge(&parent);
        assert_eq!(merged.lws.as_deref(), Some("parent"));
        assert_eq!(merged.gc, Some(3));
        assert_eq!(merged.max_requests, None);
    }

    #[test]
    fn test_location_without_lws_declines() {
        let config = Config::from_toml_str(
            r#"
            [[location]]
            pattern = "/static"
            "#,
        )
        .unwrap();
        let locations = config.compile_locations().unwrap();
        assert!(locations.find("/static/a.css").unwrap().location.main.is_none());
    }

    #[test]
    fn test_stat_cache_can_be_disabled() {
        let config = Config::from_toml_str("stat_cache = { capacity = 0 }").unwrap();
        assert_eq!(config.stat_cache.capacity, 0);
        assert_eq!(config.stat_cache.timeout, STAT_CACHE_TIMEOUT_DEFAULT);
    }

    #[test]
    fn test_invalid_values_are_fatal() {
        let err = Config::from_toml_str(
            r#"
            [[location]]
            pattern = "/"
            max_memory = "12x"
            "#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "\"max_memory\" has invalid size value \"12x\"");

        let err = Config::from_toml_str(r#"stat_cache = { timeout = "soon" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTime { .. }));

        let err = Config::from_toml_str("thread_pool = { threads = 0 }").unwrap_err();
        assert!(matches!(err, ConfigError::Zero(_)));

        let err = Config::from_toml_str("unknown_key = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_duplicate_directive_is_rejected() {
        let err = Config::from_toml_str(
            r#"
            stat_cache = { capacity = 1 }
            stat_cache = { capacity = 2 }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_unknown_location_directive_is_rejected() {
        let err = Config::from_toml_str(
            r#"
            [[location]]
            pattern = "/"
            lws = "/x.lua"
            max_request = 5
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownDirective { ref pattern, ref directive }
                if pattern == "/" && directive == "max_request"
        ));

        let err = Config::from_toml_str(
            r#"
            [defaults]
            gcc = 10
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_compile_errors_are_fatal() {
        let config = Config::from_toml_str(
            r#"
            [[location]]
            pattern = "/a"
            lws = "$unknown"
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.compile_locations(),
            Err(ConfigError::Expression { .. })
        ));

        let config = Config::from_toml_str(
            r#"
            [[location]]
            pattern = "/a"
            [[location]]
            pattern = "/a"
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.compile_locations(),
            Err(ConfigError::Duplicate(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lws.toml");
        std::fs::write(&path, "root = \"/data\"").unwrap();
        assert_eq!(Config::from_file(&path).unwrap().root, "/data");

        assert!(matches!(
            Config::from_file(dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512"), Some(512));
        assert_eq!(parse_size("16k"), Some(16 * 1024));
        assert_eq!(parse_size("16K"), Some(16 * 1024));
        assert_eq!(parse_size("2m"), Some(2 * 1024 * 1024));
        assert_eq!(parse_size("1G"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_size(""), None);
        assert_eq!(parse_size("k"), None);
        assert_eq!(parse_size("12x"), None);
        assert_eq!(parse_size("-1"), None);
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_time("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_time("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_time("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_time("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_time("1d 12h"), Some(Duration::from_secs(129_600)));
        assert_eq!(parse_time(""), None);
        assert_eq!(parse_time("s"), None);
        assert_eq!(parse_time("10y"), None);
        assert_eq!(parse_time("soon"), None);
    }
}
