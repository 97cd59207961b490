//! Domain model types shared by the classifier, the diff engine and the
//! SQLite store.
//!
//! A row in an ODK table is stored as one or more *versions* that share the
//! same row id. The committed version carries a savepoint type of
//! `COMPLETE` or `INCOMPLETE`; checkpoints written while the user is still
//! editing carry no savepoint type at all.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ResolutionError;

/// Raw savepoint type of a finalized row.
pub const SAVEPOINT_COMPLETE: &str = "COMPLETE";
/// Raw savepoint type of a row saved without finalizing.
pub const SAVEPOINT_INCOMPLETE: &str = "INCOMPLETE";

// ---------------------------------------------------------------------------
// Savepoint type
// ---------------------------------------------------------------------------

/// Savepoint tag of a single row version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SavepointType {
    /// Finalized by the user.
    Complete,
    /// Saved, but not finalized.
    Incomplete,
    /// A checkpoint (or a brand new row) that was never saved.
    Unset,
}

impl SavepointType {
    /// Parse the raw stored value. `None` and the empty string mean
    /// [`SavepointType::Unset`]; unknown strings are malformed history.
    pub fn from_raw(raw: Option<&str>) -> Result<Self, ResolutionError> {
        match raw {
            None | Some("") => Ok(Self::Unset),
            Some(SAVEPOINT_COMPLETE) => Ok(Self::Complete),
            Some(SAVEPOINT_INCOMPLETE) => Ok(Self::Incomplete),
            Some(other) => Err(ResolutionError::InvalidState(format!(
                "unknown savepoint type '{other}'"
            ))),
        }
    }

    /// The raw stored value, `None` for checkpoints.
    pub fn as_raw(self) -> Option<&'static str> {
        match self {
            Self::Complete => Some(SAVEPOINT_COMPLETE),
            Self::Incomplete => Some(SAVEPOINT_INCOMPLETE),
            Self::Unset => None,
        }
    }

    /// True for `Complete` and `Incomplete`.
    pub fn is_saved(self) -> bool {
        !matches!(self, Self::Unset)
    }
}

impl fmt::Display for SavepointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::Incomplete => write!(f, "incomplete"),
            Self::Unset => write!(f, "checkpoint"),
        }
    }
}

/// Serde adapter storing a [`SavepointType`] as its raw nullable string.
mod raw_savepoint {
    use super::SavepointType;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &SavepointType, s: S) -> Result<S::Ok, S::Error> {
        match value.as_raw() {
            Some(raw) => s.serialize_some(raw),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SavepointType, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        SavepointType::from_raw(raw.as_deref()).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Row versions
// ---------------------------------------------------------------------------

/// One savepoint snapshot of a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowVersion {
    #[serde(with = "raw_savepoint", default = "unset_savepoint")]
    pub savepoint_type: SavepointType,
    pub savepoint_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub savepoint_creator: Option<String>,
    /// Element key to raw value. A missing key and an explicit `None` both
    /// mean the value is absent.
    #[serde(default)]
    pub column_values: BTreeMap<String, Option<String>>,
}

fn unset_savepoint() -> SavepointType {
    SavepointType::Unset
}

impl RowVersion {
    /// Create an empty version with the given savepoint.
    pub fn new(savepoint_type: SavepointType, savepoint_timestamp: DateTime<Utc>) -> Self {
        Self {
            savepoint_type,
            savepoint_timestamp,
            savepoint_creator: None,
            column_values: BTreeMap::new(),
        }
    }

    /// Builder-style setter for one column value.
    #[must_use]
    pub fn with_value(mut self, element_key: impl Into<String>, raw: Option<&str>) -> Self {
        self.column_values
            .insert(element_key.into(), raw.map(str::to_string));
        self
    }

    /// The raw value stored for `element_key`, if any.
    pub fn raw_value(&self, element_key: &str) -> Option<&str> {
        self.column_values
            .get(element_key)
            .and_then(|v| v.as_deref())
    }
}

/// All versions of one row, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowHistory {
    pub table_id: String,
    pub row_id: String,
    versions: Vec<RowVersion>,
}

impl RowHistory {
    /// Build a history; versions are put in ascending timestamp order.
    /// Versions with identical timestamps keep their given order.
    pub fn new(
        table_id: impl Into<String>,
        row_id: impl Into<String>,
        mut versions: Vec<RowVersion>,
    ) -> Self {
        versions.sort_by_key(|v| v.savepoint_timestamp);
        Self {
            table_id: table_id.into(),
            row_id: row_id.into(),
            versions,
        }
    }

    pub fn versions(&self) -> &[RowVersion] {
        &self.versions
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn oldest(&self) -> Option<&RowVersion> {
        self.versions.first()
    }

    pub fn newest(&self) -> Option<&RowVersion> {
        self.versions.last()
    }
}

// ---------------------------------------------------------------------------
// Column schema
// ---------------------------------------------------------------------------

/// ODK element type of a column. Only used to render display text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementType {
    String,
    Integer,
    Number,
    Boolean,
    Date,
    DateTime,
    Time,
    Array,
    Object,
    RowPath,
    ConfigPath,
    /// A named composite type such as `geopoint`.
    Custom(String),
}

impl ElementType {
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array)
    }
}

impl From<&str> for ElementType {
    /// Unknown names become [`ElementType::Custom`].
    fn from(s: &str) -> Self {
        match s {
            "string" => Self::String,
            "integer" => Self::Integer,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "dateTime" => Self::DateTime,
            "time" => Self::Time,
            "array" => Self::Array,
            "object" => Self::Object,
            "rowpath" => Self::RowPath,
            "configpath" => Self::ConfigPath,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl FromStr for ElementType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
            Self::Date => write!(f, "date"),
            Self::DateTime => write!(f, "dateTime"),
            Self::Time => write!(f, "time"),
            Self::Array => write!(f, "array"),
            Self::Object => write!(f, "object"),
            Self::RowPath => write!(f, "rowpath"),
            Self::ConfigPath => write!(f, "configpath"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

impl Serialize for ElementType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ElementType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(Self::from(raw.as_str()))
    }
}

/// A column as stored in the table schema, before retention is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub element_key: String,
    #[serde(default)]
    pub element_name: Option<String>,
    pub element_type: ElementType,
    #[serde(default)]
    pub parent_element_key: Option<String>,
    #[serde(default)]
    pub ordinal: i64,
}

/// A column ready for diffing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub element_key: String,
    pub element_type: ElementType,
    /// Persisted display-name override (raw, possibly localizable JSON).
    pub display_name: Option<String>,
    /// Whether this column holds user-visible state of its own.
    pub is_unit_of_retention: bool,
}

impl ColumnDefinition {
    /// A retained, top-level column without a display-name override.
    pub fn retained(element_key: impl Into<String>, element_type: ElementType) -> Self {
        Self {
            element_key: element_key.into(),
            element_type,
            display_name: None,
            is_unit_of_retention: true,
        }
    }

    /// Derive ordered definitions from raw column specs.
    ///
    /// A column with children is not retained unless it is an array, and no
    /// descendant of an array is retained. Order is `(ordinal, element_key)`.
    pub fn from_specs(specs: Vec<ColumnSpec>) -> Result<Vec<Self>, ResolutionError> {
        let by_key: HashMap<&str, &ColumnSpec> =
            specs.iter().map(|s| (s.element_key.as_str(), s)).collect();
        if by_key.len() != specs.len() {
            return Err(ResolutionError::InvalidState(
                "duplicate element key in column schema".into(),
            ));
        }
        let parents: HashSet<&str> = specs
            .iter()
            .filter_map(|s| s.parent_element_key.as_deref())
            .collect();

        let mut defs = Vec::with_capacity(specs.len());
        for spec in &specs {
            let mut under_array = false;
            let mut cursor = spec.parent_element_key.as_deref();
            let mut depth = 0usize;
            while let Some(parent_key) = cursor {
                let parent = by_key.get(parent_key).ok_or_else(|| {
                    ResolutionError::InvalidState(format!(
                        "column '{}' references unknown parent '{parent_key}'",
                        spec.element_key
                    ))
                })?;
                depth += 1;
                if depth > specs.len() {
                    return Err(ResolutionError::InvalidState(format!(
                        "column '{}' has a cyclic parent chain",
                        spec.element_key
                    )));
                }
                if parent.element_type.is_array() {
                    under_array = true;
                }
                cursor = parent.parent_element_key.as_deref();
            }

            let has_children = parents.contains(spec.element_key.as_str());
            let retained = !under_array && (spec.element_type.is_array() || !has_children);
            defs.push((
                spec.ordinal,
                Self {
                    element_key: spec.element_key.clone(),
                    element_type: spec.element_type.clone(),
                    display_name: None,
                    is_unit_of_retention: retained,
                },
            ));
        }

        defs.sort_by(|(oa, a), (ob, b)| oa.cmp(ob).then_with(|| a.element_key.cmp(&b.element_key)));
        Ok(defs.into_iter().map(|(_, d)| d).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn spec(key: &str, ty: &str, parent: Option<&str>, ordinal: i64) -> ColumnSpec {
        ColumnSpec {
            element_key: key.into(),
            element_name: None,
            element_type: ty.parse().unwrap(),
            parent_element_key: parent.map(str::to_string),
            ordinal,
        }
    }

    #[test]
    fn test_savepoint_from_raw() {
        assert_eq!(SavepointType::from_raw(None).unwrap(), SavepointType::Unset);
        assert_eq!(SavepointType::from_raw(Some("")).unwrap(), SavepointType::Unset);
        assert_eq!(
            SavepointType::from_raw(Some("COMPLETE")).unwrap(),
            SavepointType::Complete
        );
        assert_eq!(
            SavepointType::from_raw(Some("INCOMPLETE")).unwrap(),
            SavepointType::Incomplete
        );
        assert!(matches!(
            SavepointType::from_raw(Some("complete")),
            Err(ResolutionError::InvalidState(_))
        ));
    }

    #[test]
    fn test_history_sorted_oldest_first() {
        let history = RowHistory::new(
            "t",
            "r",
            vec![
                RowVersion::new(SavepointType::Unset, ts(20)),
                RowVersion::new(SavepointType::Complete, ts(10)),
            ],
        );
        assert_eq!(history.oldest().unwrap().savepoint_type, SavepointType::Complete);
        assert_eq!(history.newest().unwrap().savepoint_type, SavepointType::Unset);
    }

    #[test]
    fn test_row_version_json_uses_raw_savepoint() {
        let version = RowVersion::new(SavepointType::Unset, ts(0)).with_value("a", Some("x"));
        let json = serde_json::to_value(&version).unwrap();
        assert!(json["savepoint_type"].is_null());

        let parsed: RowVersion = serde_json::from_str(
            r#"{"savepoint_type": "COMPLETE",
                "savepoint_timestamp": "2024-01-01T00:00:00Z",
                "column_values": {"a": null}}"#,
        )
        .unwrap();
        assert_eq!(parsed.savepoint_type, SavepointType::Complete);
        assert_eq!(parsed.raw_value("a"), None);
    }

    #[test]
    fn test_element_type_round_trip_names() {
        assert_eq!("dateTime".parse::<ElementType>().unwrap(), ElementType::DateTime);
        assert_eq!(
            "geopoint".parse::<ElementType>().unwrap(),
            ElementType::Custom("geopoint".into())
        );
        assert_eq!(ElementType::RowPath.to_string(), "rowpath");

        let custom: ElementType = serde_json::from_str("\"mimeUri\"").unwrap();
        assert_eq!(custom, ElementType::Custom("mimeUri".into()));
        assert_eq!(serde_json::to_string(&custom).unwrap(), "\"mimeUri\"");
    }

    #[test]
    fn test_retention_over_column_tree() {
        let defs = ColumnDefinition::from_specs(vec![
            spec("name", "string", None, 0),
            spec("location", "geopoint", None, 1),
            spec("location_latitude", "number", Some("location"), 2),
            spec("location_longitude", "number", Some("location"), 3),
            spec("tags", "array", None, 4),
            spec("tags_items", "string", Some("tags"), 5),
        ])
        .unwrap();

        let retained: Vec<&str> = defs
            .iter()
            .filter(|d| d.is_unit_of_retention)
            .map(|d| d.element_key.as_str())
            .collect();
        assert_eq!(
            retained,
            vec!["name", "location_latitude", "location_longitude", "tags"]
        );
    }

    #[test]
    fn test_specs_ordered_by_ordinal_then_key() {
        let defs = ColumnDefinition::from_specs(vec![
            spec("b", "string", None, 1),
            spec("z", "string", None, 0),
            spec("a", "string", None, 1),
        ])
        .unwrap();
        let keys: Vec<&str> = defs.iter().map(|d| d.element_key.as_str()).collect();
        assert_eq!(keys, vec!["z", "a", "b"]);
    }

    #[test]
    fn test_specs_reject_unknown_parent_and_cycles() {
        let err = ColumnDefinition::from_specs(vec![spec("a", "string", Some("nope"), 0)]);
        assert!(matches!(err, Err(ResolutionError::InvalidState(_))));

        let err = ColumnDefinition::from_specs(vec![
            spec("a", "object", Some("b"), 0),
            spec("b", "object", Some("a"), 1),
        ]);
        assert!(matches!(err, Err(ResolutionError::InvalidState(_))));
    }
}
