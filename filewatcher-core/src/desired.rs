//! Desired-state documents.
//!
//! A desired document is a JSON object pushed by the remote side. Each of the
//! three recognized keys is tri-state: absent (leave alone), explicit `null`
//! (reset to default), or a value (replace). Every other key is ignored.

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::ConfigError;

pub const KEY_INTERVAL: &str = "interval";
pub const KEY_RENAME_EXTENSION: &str = "renameExtension";
pub const KEY_SEARCH_PATTERN: &str = "searchPattern";

/// One key of a desired update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Desired<T> {
    /// Key not present: leave the field unchanged and do not report it.
    #[default]
    Absent,
    /// Key present with `null`: reset the field to its default.
    Reset,
    /// Key present with a value.
    Set(T),
}

impl<T> Desired<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Desired::Absent)
    }

    /// `None` when absent, otherwise the value to hand to a setter
    /// (`Some(None)` meaning reset).
    pub fn into_setter_arg(self) -> Option<Option<T>> {
        match self {
            Desired::Absent => None,
            Desired::Reset => Some(None),
            Desired::Set(value) => Some(Some(value)),
        }
    }
}

/// A type-checked desired-state update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DesiredUpdate {
    pub interval: Desired<i64>,
    pub rename_extension: Desired<String>,
    pub search_pattern: Desired<String>,
}

impl DesiredUpdate {
    /// Parse a desired document.
    ///
    /// Returns `Ok(None)` for `null` or any non-object document, which the
    /// handler treats as "empty desired properties". All recognized keys are
    /// type-checked before anything is returned, so a malformed document
    /// never produces a partial update.
    pub fn from_json(document: &Value) -> Result<Option<Self>, ConfigError> {
        let Some(map) = document.as_object() else {
            return Ok(None);
        };

        Ok(Some(Self {
            interval: read_key(map, KEY_INTERVAL, "an integer", Value::as_i64)?,
            rename_extension: read_key(map, KEY_RENAME_EXTENSION, "a string", |v| {
                v.as_str().map(str::to_owned)
            })?,
            search_pattern: read_key(map, KEY_SEARCH_PATTERN, "a string", |v| {
                v.as_str().map(str::to_owned)
            })?,
        }))
    }

    /// True when none of the recognized keys is present.
    pub fn is_noop(&self) -> bool {
        self.interval.is_absent()
            && self.rename_extension.is_absent()
            && self.search_pattern.is_absent()
    }
}

fn read_key<T>(
    map: &Map<String, Value>,
    key: &'static str,
    expected: &'static str,
    convert: impl Fn(&Value) -> Option<T>,
) -> Result<Desired<T>, ConfigError> {
    match map.get(key) {
        None => Ok(Desired::Absent),
        Some(Value::Null) => Ok(Desired::Reset),
        Some(value) => convert(value)
            .map(Desired::Set)
            .ok_or_else(|| ConfigError::InvalidValue {
                key,
                expected,
                found: value.to_string(),
            }),
    }
}

/// Read a full desired-state snapshot from disk.
///
/// The file is parsed as YAML, which also accepts plain JSON documents.
/// An empty file yields `null`.
pub fn load_document(path: &Path) -> Result<Value, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(serde_json::to_value(yaml)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_null_and_value_are_distinguished() {
        let update = DesiredUpdate::from_json(&json!({
            "interval": 5000,
            "renameExtension": null,
        }))
        .expect("parse")
        .expect("object document");

        assert_eq!(update.interval, Desired::Set(5000));
        assert_eq!(update.rename_extension, Desired::Reset);
        assert_eq!(update.search_pattern, Desired::Absent);
    }

    #[test]
    fn unknown_keys_and_version_metadata_are_ignored() {
        let update = DesiredUpdate::from_json(&json!({ "$version": 7, "colour": "blue" }))
            .expect("parse")
            .expect("object document");
        assert!(update.is_noop());
    }

    #[test]
    fn null_document_is_treated_as_empty() {
        assert_eq!(DesiredUpdate::from_json(&Value::Null).expect("parse"), None);
        assert_eq!(DesiredUpdate::from_json(&json!([1, 2])).expect("parse"), None);
    }

    #[test]
    fn wrong_type_is_rejected_with_key_name() {
        let err = DesiredUpdate::from_json(&json!({ "interval": "fast" }))
            .expect_err("string interval must be rejected");
        let message = err.to_string();
        assert!(message.contains("interval"), "message: {message}");
        assert!(message.contains("an integer"), "message: {message}");
    }

    #[test]
    fn zero_and_negative_intervals_are_accepted() {
        let update = DesiredUpdate::from_json(&json!({ "interval": -5 }))
            .expect("parse")
            .expect("object document");
        assert_eq!(update.interval, Desired::Set(-5));
    }

    #[test]
    fn setter_arg_maps_tri_state() {
        assert_eq!(Desired::<i64>::Absent.into_setter_arg(), None);
        assert_eq!(Desired::<i64>::Reset.into_setter_arg(), Some(None));
        assert_eq!(Desired::Set(3).into_setter_arg(), Some(Some(3)));
    }
}
