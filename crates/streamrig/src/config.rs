//! Configuration values and the "defaults overridden by caller" merge.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// Ordered string key/value settings, as found in Java-style `.properties` files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Parses `.properties` text: `key=value`, `key: value` or `key value` lines,
    /// `#`/`!` comments, and backslash line continuations.
    pub fn parse(text: &str) -> Result<Self, HarnessError> {
        let mut properties = Properties::new();
        let mut pending = String::new();

        for (index, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim_start();
            if pending.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
                continue;
            }

            if let Some(stripped) = continued(line) {
                pending.push_str(stripped);
                continue;
            }
            pending.push_str(line);

            let logical = std::mem::take(&mut pending);
            let (key, value) = split_entry(&logical);
            if key.is_empty() {
                return Err(HarnessError::invalid_setting(
                    &format!("line {}", index + 1),
                    "entry has no key",
                ));
            }
            properties.set(key, value);
        }

        if !pending.is_empty() {
            let (key, value) = split_entry(&pending);
            properties.set(key, value);
        }

        Ok(properties)
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Reads and parses a setting, returning `Ok(None)` when it is absent.
    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>, HarnessError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| HarnessError::invalid_setting(key, format!("'{raw}': {e}"))),
            None => Ok(None),
        }
    }

    pub fn get_parsed_or<T>(&self, key: &str, default: T) -> Result<T, HarnessError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.get_parsed(key)?.unwrap_or(default))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copies every entry of `other` into `self`; `other` wins on conflicts.
    pub fn extend_from(&mut self, other: &Properties) {
        for (key, value) in other.iter() {
            self.set(key, value);
        }
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl From<BTreeMap<String, String>> for Properties {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        write!(f, "}}")
    }
}

fn continued(line: &str) -> Option<&str> {
    let trailing = line.chars().rev().take_while(|c| *c == '\\').count();
    if trailing % 2 == 1 {
        Some(&line[..line.len() - 1])
    } else {
        None
    }
}

fn split_entry(line: &str) -> (&str, &str) {
    let separator = line.find(['=', ':']);
    let whitespace = line.find(char::is_whitespace);
    let split_at = match (separator, whitespace) {
        (Some(sep), Some(ws)) if ws < sep => {
            // `key   = value` still splits on the separator
            if line[ws..sep].trim().is_empty() { sep } else { ws }
        }
        (Some(sep), _) => sep,
        (None, Some(ws)) => ws,
        (None, None) => return (line.trim(), ""),
    };

    let key = line[..split_at].trim();
    let rest = line[split_at..].trim_start();
    let value = rest
        .strip_prefix(['=', ':'])
        .unwrap_or(rest)
        .trim_start();
    (key, value.trim_end())
}

/// Layers settings: `defaults`, then caller `overrides`, then `forced` keys that
/// win over everything.
pub fn effective_config(
    defaults: &Properties,
    overrides: &Properties,
    forced: &Properties,
) -> Properties {
    let mut effective = defaults.clone();
    effective.extend_from(overrides);
    effective.extend_from(forced);
    effective
}

/// Resolved configuration of one embedded service.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedServiceConfig {
    pub host: String,
    pub port: u16,
    /// Connect string of the coordination service this one depends on.
    pub connect_string: Option<String>,
    pub properties: Properties,
}

impl EmbeddedServiceConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_string: None,
            properties: Properties::new(),
        }
    }

    pub fn with_connect_string(mut self, connect_string: impl Into<String>) -> Self {
        self.connect_string = Some(connect_string.into());
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
