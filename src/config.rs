//! String key/value configuration.
//!
//! [`Params`] is the configuration surface handed to playback helpers such
//! as [`PlaybackSession::choose_from_params`](crate::PlaybackSession::choose_from_params).
//! Values are stored as strings and converted on access, so the same set
//! can come from a URI query (`file.pango?OrderedPlayback=1`) or a flat YAML
//! mapping.

use std::str::FromStr;

use serde_yaml_ng::Value as YamlValue;

use crate::{PacketStreamError, Result};

/// Key selecting the process-wide playback session.
pub const ORDERED_PLAYBACK: &str = "OrderedPlayback";

/// Ordered set of string parameters. Later `set`s overwrite earlier ones in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=value` pairs separated by `&`. A key without `=` is set to `"true"`.
    pub fn from_uri_query(query: &str) -> Self {
        let mut params = Self::new();
        for pair in query.trim_start_matches('?').split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((key, value)) => params.set(key, value),
                None => params.set(pair, "true"),
            }
        }
        params
    }

    /// Parse a flat YAML mapping of scalars.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let value: YamlValue = serde_yaml_ng::from_str(yaml).map_err(|e| PacketStreamError::Config {
            key: "<yaml>".to_string(),
            details: e.to_string(),
        })?;

        let mut params = Self::new();
        let mapping = match value {
            YamlValue::Null => return Ok(params),
            YamlValue::Mapping(mapping) => mapping,
            _ => {
                return Err(PacketStreamError::Config {
                    key: "<yaml>".to_string(),
                    details: "expected a mapping at the top level".to_string(),
                });
            }
        };

        for (key, value) in mapping {
            let key = scalar_to_string(&key).ok_or_else(|| PacketStreamError::Config {
                key: format!("{:?}", key),
                details: "keys must be scalars".to_string(),
            })?;
            let value = scalar_to_string(&value).ok_or_else(|| PacketStreamError::Config {
                key: key.clone(),
                details: "values must be scalars".to_string(),
            })?;
            params.set(key, value);
        }
        Ok(params)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get_raw(key).is_some()
    }

    /// Typed lookup; `default` when the key is absent.
    pub fn get<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_raw(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| PacketStreamError::Config {
                key: key.to_string(),
                details: format!("cannot parse '{}': {}", raw, e),
            }),
        }
    }

    /// Boolean lookup accepting `true/false`, `1/0`, `yes/no` and `on/off`.
    pub fn get_flag(&self, key: &str, default: bool) -> Result<bool> {
        let Some(raw) = self.get_raw(key) else {
            return Ok(default);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(PacketStreamError::Config {
                key: key.to_string(),
                details: format!("'{}' is not a boolean", raw),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn scalar_to_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Bool(b) => Some(b.to_string()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Null => Some(String::new()),
        _ => None,
    }
}
