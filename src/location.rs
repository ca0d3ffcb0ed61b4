//! Location Matching
//!
//! Maps a request path to the location block whose directives apply, in the
//! usual order: exact match, then `^~` prefix, then regexes in declaration
//! order, then the longest plain prefix.

use std::collections::HashMap;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};

use crate::engine::EngineConfig;
use crate::error::ConfigError;
use crate::expr::Expression;

// == Location ==
/// Compiled directives of one location block.
#[derive(Debug)]
pub struct Location {
    /// Pattern as written in the configuration
    pub pattern: String,
    /// Target script expression; `None` disables script handling here
    pub main: Option<Expression>,
    pub path_info: Option<Expression>,
    /// Configuration identity for the state pool
    pub engine: Arc<EngineConfig>,
}

/// A location selected for a path, with its regex captures.
#[derive(Debug, Clone)]
pub struct LocationMatch {
    pub location: Arc<Location>,
    /// `$0..$9`; empty for non-regex locations
    pub captures: Vec<Option<String>>,
}

impl LocationMatch {
    pub fn new(location: Arc<Location>) -> Self {
        Self {
            location,
            captures: Vec::new(),
        }
    }
}

#[derive(Debug)]
enum Kind {
    Exact(String),
    Prefix { prefix: String, stop_regex: bool },
    Regex(Regex),
    Named(String),
}

impl Kind {
    fn parse(pattern: &str) -> Result<Self, ConfigError> {
        let pattern = pattern.trim();
        let regex = |source: &str, case_insensitive: bool| {
            RegexBuilder::new(source)
                .case_insensitive(case_insensitive)
                .build()
                .map(Kind::Regex)
                .map_err(|source| ConfigError::Regex {
                    pattern: pattern.to_string(),
                    source,
                })
        };

        if let Some(name) = pattern.strip_prefix('@') {
            return Ok(Kind::Named(name.to_string()));
        }
        match pattern.split_once(char::is_whitespace) {
            Some(("=", path)) => Ok(Kind::Exact(path.trim().to_string())),
            Some(("~", source)) => regex(source.trim(), false),
            Some(("~*", source)) => regex(source.trim(), true),
            Some(("^~", prefix)) => Ok(Kind::Prefix {
                prefix: prefix.trim().to_string(),
                stop_regex: true,
            }),
            _ => Ok(Kind::Prefix {
                prefix: pattern.to_string(),
                stop_regex: false,
            }),
        }
    }

    /// Normalized form used to detect duplicate blocks.
    fn canonical(&self) -> String {
        match self {
            Kind::Exact(path) => format!("= {path}"),
            Kind::Prefix { prefix, .. } => prefix.clone(),
            Kind::Regex(regex) => format!("~ {}", regex.as_str()),
            Kind::Named(name) => format!("@{name}"),
        }
    }
}

// == Locations ==
/// All location blocks of a server.
#[derive(Debug, Default)]
pub struct Locations {
    exact: HashMap<String, Arc<Location>>,
    /// Sorted by descending prefix length
    prefixes: Vec<(String, bool, Arc<Location>)>,
    regexes: Vec<(Regex, Arc<Location>)>,
    named: HashMap<String, Arc<Location>>,
    patterns: Vec<String>,
}

impl Locations {
    pub fn new() -> Self {
        Self::default()
    }

    // == Insert ==
    /// Adds a location block, rejecting a pattern declared twice.
    pub fn insert(&mut self, location: Location) -> Result<(), ConfigError> {
        let kind = Kind::parse(&location.pattern)?;
        let canonical = kind.canonical();
        if self.patterns.contains(&canonical) {
            return Err(ConfigError::Duplicate(location.pattern));
        }
        self.patterns.push(canonical);

        let location = Arc::new(location);
        match kind {
            Kind::Exact(path) => {
                self.exact.insert(path, location);
            }
            Kind::Prefix { prefix, stop_regex } => {
                self.prefixes.push((prefix, stop_regex, location));
                self.prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
            }
            Kind::Regex(regex) => self.regexes.push((regex, location)),
            Kind::Named(name) => {
                self.named.insert(name, location);
            }
        }
        Ok(())
    }

    // == Find ==
    /// Selects the location for `path`. Named locations never match here.
    pub fn find(&self, path: &str) -> Option<LocationMatch> {
        if let Some(location) = self.exact.get(path) {
            return Some(LocationMatch::new(Arc::clone(location)));
        }

        let prefix = self
            .prefixes
            .iter()
            .find(|(prefix, _, _)| path.starts_with(prefix.as_str()));

        if let Some((_, true, location)) = prefix {
            return Some(LocationMatch::new(Arc::clone(location)));
        }

        for (regex, location) in &self.regexes {
            if let Some(captures) = regex.captures(path) {
                let captures = captures
                    .iter()
                    .take(10)
                    .map(|m| m.map(|m| m.as_str().to_string()))
                    .collect();
                return Some(LocationMatch {
                    location: Arc::clone(location),
                    captures,
                });
            }
        }

        prefix.map(|(_, _, location)| LocationMatch::new(Arc::clone(location)))
    }

    /// Looks up a named location, with or without its leading `@`.
    pub fn named(&self, name: &str) -> Option<LocationMatch> {
        let name = name.strip_prefix('@').unwrap_or(name);
        self.named
            .get(name)
            .map(|location| LocationMatch::new(Arc::clone(location)))
    }

    /// Every distinct configuration identity in use.
    pub fn engine_configs(&self) -> Vec<Arc<EngineConfig>> {
        let mut configs: Vec<Arc<EngineConfig>> = Vec::new();
        let all = self
            .exact
            .values()
            .chain(self.prefixes.iter().map(|(_, _, l)| l))
            .chain(self.regexes.iter().map(|(_, l)| l))
            .chain(self.named.values());
        for location in all {
            if location.main.is_some() && !configs.contains(&location.engine) {
                configs.push(Arc::clone(&location.engine));
            }
        }
        configs
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
