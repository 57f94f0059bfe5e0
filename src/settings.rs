/*!
 * Typed key/value settings for projects and translators.
 *
 * Settings are a map of `SettingValue` tagged-union values with getters
 * that perform safe coercions. Ambiguous conversions (e.g. an arbitrary
 * string asked for as an integer) fail with `SubtitleError::SettingsError`
 * rather than guessing.
 */

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::errors::SubtitleError;
use crate::timecode::{duration_from_seconds, duration_to_seconds};

/// A single setting value.
///
/// Durations are serialised as fractional seconds; a float read back from
/// JSON coerces to a duration through `get_duration`.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<SettingValue>),
    Map(BTreeMap<String, SettingValue>),
    Duration(Duration),
}

impl SettingValue {
    /// Convert to a JSON value for the project codec
    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Bool(b) => Value::Bool(*b),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            Self::Duration(duration) => Value::from(duration_to_seconds(*duration)),
        }
    }

    /// Build a setting value from a JSON value.
    ///
    /// Durations cannot be distinguished from floats in JSON, so they come
    /// back as `Float`; `get_duration` coerces them on read.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Int(i))
                } else {
                    n.as_f64().map(Self::Float)
                }
            }
            Value::Array(items) => Some(Self::List(
                items.iter().filter_map(Self::from_json).collect(),
            )),
            Value::Object(map) => Some(Self::Map(
                map.iter()
                    .filter_map(|(key, value)| {
                        Self::from_json(value).map(|v| (key.clone(), v))
                    })
                    .collect(),
            )),
        }
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<usize> for SettingValue {
    fn from(value: usize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Duration> for SettingValue {
    fn from(value: Duration) -> Self {
        Self::Duration(value)
    }
}

impl From<Vec<String>> for SettingValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value.into_iter().map(SettingValue::String).collect())
    }
}

fn settings_error(key: &str, message: impl Into<String>) -> SubtitleError {
    SubtitleError::SettingsError {
        key: key.to_string(),
        message: message.into(),
    }
}

/// An ordered map of settings with typed, coercing accessors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    values: BTreeMap<String, SettingValue>,
}

impl Settings {
    /// Create an empty settings map
    pub fn new() -> Self {
        Self::default()
    }

    /// Build settings from an iterator of key/value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SettingValue>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Raw access to a setting value
    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    /// Whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Set a value, replacing any previous one
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<SettingValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Remove a value, returning it if present
    pub fn remove(&mut self, key: &str) -> Option<SettingValue> {
        self.values.remove(key)
    }

    /// Merge another settings map into this one; the other map wins on collision
    pub fn update(&mut self, other: &Settings) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Iterate the settings in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SettingValue)> {
        self.values.iter()
    }

    /// Keys currently present
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Number of settings in the map
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a string value; scalars stringify, lists and maps do not
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            SettingValue::String(s) => Some(s.clone()),
            SettingValue::Int(i) => Some(i.to_string()),
            SettingValue::Float(f) => Some(f.to_string()),
            SettingValue::Bool(b) => Some(b.to_string()),
            SettingValue::Duration(d) => Some(duration_to_seconds(*d).to_string()),
            SettingValue::List(_) | SettingValue::Map(_) => None,
        }
    }

    /// Get an integer, coercing whole floats and numeric strings
    pub fn get_int(&self, key: &str) -> Result<Option<i64>, SubtitleError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(SettingValue::Int(i)) => Ok(Some(*i)),
            Some(SettingValue::Bool(b)) => Ok(Some(i64::from(*b))),
            Some(SettingValue::Float(f)) => {
                if f.fract() == 0.0 {
                    Ok(Some(*f as i64))
                } else {
                    Err(settings_error(key, format!("{f} is not a whole number")))
                }
            }
            Some(SettingValue::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| settings_error(key, format!("'{s}' is not an integer"))),
            Some(other) => Err(settings_error(
                key,
                format!("cannot convert {other:?} to an integer"),
            )),
        }
    }

    /// Get a float, coercing integers and numeric strings
    pub fn get_float(&self, key: &str) -> Result<Option<f64>, SubtitleError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(SettingValue::Float(f)) => Ok(Some(*f)),
            Some(SettingValue::Int(i)) => Ok(Some(*i as f64)),
            Some(SettingValue::Duration(d)) => Ok(Some(duration_to_seconds(*d))),
            Some(SettingValue::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| settings_error(key, format!("'{s}' is not a number"))),
            Some(other) => Err(settings_error(
                key,
                format!("cannot convert {other:?} to a number"),
            )),
        }
    }

    /// Get a bool, coercing "true"/"false" strings and 0/1 integers
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, SubtitleError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(SettingValue::Bool(b)) => Ok(Some(*b)),
            Some(SettingValue::Int(0)) => Ok(Some(false)),
            Some(SettingValue::Int(1)) => Ok(Some(true)),
            Some(SettingValue::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" => Ok(Some(true)),
                "false" | "no" => Ok(Some(false)),
                other => Err(settings_error(key, format!("'{other}' is not a boolean"))),
            },
            Some(other) => Err(settings_error(
                key,
                format!("cannot convert {other:?} to a boolean"),
            )),
        }
    }

    /// Get a duration, coercing numeric values as seconds
    pub fn get_duration(&self, key: &str) -> Result<Option<Duration>, SubtitleError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(SettingValue::Duration(d)) => Ok(Some(*d)),
            Some(SettingValue::Int(i)) if *i >= 0 => {
                Ok(Some(Duration::from_secs(*i as u64)))
            }
            Some(SettingValue::Float(f)) if *f >= 0.0 => {
                Ok(Some(duration_from_seconds(*f)))
            }
            Some(SettingValue::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| *f >= 0.0)
                .map(|f| Some(duration_from_seconds(f)))
                .ok_or_else(|| settings_error(key, format!("'{s}' is not a duration"))),
            Some(other) => Err(settings_error(
                key,
                format!("cannot convert {other:?} to a duration"),
            )),
        }
    }

    /// Get a list of strings; a single string yields a one-element list
    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(SettingValue::List(items)) => items
                .iter()
                .filter_map(|item| match item {
                    SettingValue::String(s) => Some(s.clone()),
                    SettingValue::Int(i) => Some(i.to_string()),
                    SettingValue::Float(f) => Some(f.to_string()),
                    _ => None,
                })
                .collect(),
            Some(SettingValue::String(s)) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Nested map accessor; edits through the returned reference propagate
    pub fn get_map_mut(&mut self, key: &str) -> Option<&mut BTreeMap<String, SettingValue>> {
        match self.values.get_mut(key) {
            Some(SettingValue::Map(map)) => Some(map),
            _ => None,
        }
    }

    /// Read-only nested map accessor
    pub fn get_map(&self, key: &str) -> Option<&BTreeMap<String, SettingValue>> {
        match self.values.get(key) {
            Some(SettingValue::Map(map)) => Some(map),
            _ => None,
        }
    }

    /// Serialise to a JSON object for the project codec
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(key, value)| (key.clone(), value.to_json()))
                .collect(),
        )
    }

    /// Build settings from a JSON object, skipping null values
    pub fn from_json(value: &Value) -> Self {
        let mut settings = Self::new();
        if let Value::Object(map) = value {
            for (key, value) in map {
                if let Some(setting) = SettingValue::from_json(value) {
                    settings.values.insert(key.clone(), setting);
                }
            }
        }
        settings
    }
}

impl FromIterator<(String, SettingValue)> for Settings {
    fn from_iter<I: IntoIterator<Item = (String, SettingValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
