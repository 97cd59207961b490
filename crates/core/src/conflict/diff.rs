//! Column-level diff between the oldest and newest version of a row.

use serde::Serialize;
use tracing::debug;

use super::display::DisplayFormatter;
use crate::models::{ColumnDefinition, RowVersion};

/// Classification of one retained column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffKind {
    /// Both versions agree, or differences are being ignored.
    Concordant { display_value: String },
    /// The raw values differ. `oldest` is the server-side (saved) version,
    /// `newest` the local checkpoint.
    Conflicting {
        oldest_raw: Option<String>,
        oldest_display: String,
        newest_raw: Option<String>,
        newest_display: String,
    },
}

/// Diff entry for one retained column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDiff {
    pub element_key: String,
    pub display_name: String,
    #[serde(flatten)]
    pub kind: DiffKind,
}

impl ColumnDiff {
    pub fn is_conflicting(&self) -> bool {
        matches!(self.kind, DiffKind::Conflicting { .. })
    }
}

/// Ordered diff of a row, in column-definition order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RowDiff {
    pub columns: Vec<ColumnDiff>,
}

impl RowDiff {
    /// The conflicting subset, in the same order.
    pub fn conflicting(&self) -> impl Iterator<Item = &ColumnDiff> {
        self.columns.iter().filter(|c| c.is_conflicting())
    }

    pub fn conflict_count(&self) -> usize {
        self.conflicting().count()
    }

    pub fn is_conflicting(&self, element_key: &str) -> bool {
        self.conflicting().any(|c| c.element_key == element_key)
    }

    pub fn get(&self, element_key: &str) -> Option<&ColumnDiff> {
        self.columns.iter().find(|c| c.element_key == element_key)
    }
}

/// Compare `oldest` and `newest` column by column.
///
/// Columns that are not units of retention are skipped. Equality is on the
/// raw stored representation, so two blob references with the same raw
/// text compare equal even if the files behind them differ.
pub fn diff_columns(
    columns: &[ColumnDefinition],
    oldest: &RowVersion,
    newest: &RowVersion,
    treat_all_as_concordant: bool,
    formatter: &DisplayFormatter,
) -> RowDiff {
    let mut out = Vec::with_capacity(columns.len());

    for column in columns.iter().filter(|c| c.is_unit_of_retention) {
        let key = column.element_key.as_str();
        let oldest_raw = oldest.raw_value(key);
        let newest_raw = newest.raw_value(key);
        let newest_display = formatter.display_text(&column.element_type, newest_raw);

        let kind = if treat_all_as_concordant || oldest_raw == newest_raw {
            DiffKind::Concordant {
                display_value: newest_display,
            }
        } else {
            DiffKind::Conflicting {
                oldest_raw: oldest_raw.map(str::to_string),
                oldest_display: formatter.display_text(&column.element_type, oldest_raw),
                newest_raw: newest_raw.map(str::to_string),
                newest_display,
            }
        };

        out.push(ColumnDiff {
            element_key: column.element_key.clone(),
            display_name: formatter.column_display_name(column),
            kind,
        });
    }

    let diff = RowDiff { columns: out };
    debug!(
        columns = diff.columns.len(),
        conflicting = diff.conflict_count(),
        forced = treat_all_as_concordant,
        "computed column diff"
    );
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ElementType, SavepointType};
    use chrono::{TimeZone, Utc};

    fn version(t: SavepointType, secs: i64, values: &[(&str, Option<&str>)]) -> RowVersion {
        values.iter().fold(
            RowVersion::new(t, Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()),
            |v, (k, raw)| v.with_value(*k, *raw),
        )
    }

    fn columns(keys: &[&str]) -> Vec<ColumnDefinition> {
        keys.iter()
            .map(|k| ColumnDefinition::retained(*k, ElementType::String))
            .collect()
    }

    #[test]
    fn test_conflicting_and_concordant_in_definition_order() {
        let oldest = version(
            SavepointType::Complete,
            0,
            &[("b", Some("same")), ("a", Some("x")), ("c", None)],
        );
        let newest = version(
            SavepointType::Unset,
            1,
            &[("b", Some("same")), ("a", Some("y"))],
        );
        let diff = diff_columns(
            &columns(&["c", "a", "b"]),
            &oldest,
            &newest,
            false,
            &DisplayFormatter::default(),
        );

        let keys: Vec<&str> = diff.columns.iter().map(|c| c.element_key.as_str()).collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
        assert!(!diff.columns[0].is_conflicting(), "both absent is concordant");
        assert_eq!(
            diff.columns[1].kind,
            DiffKind::Conflicting {
                oldest_raw: Some("x".into()),
                oldest_display: "x".into(),
                newest_raw: Some("y".into()),
                newest_display: "y".into(),
            }
        );
        assert!(!diff.columns[2].is_conflicting());
        assert_eq!(diff.conflict_count(), 1);
    }

    #[test]
    fn test_absent_versus_present_conflicts() {
        let oldest = version(SavepointType::Complete, 0, &[("a", None)]);
        let newest = version(SavepointType::Unset, 1, &[("a", Some("y"))]);
        let diff = diff_columns(
            &columns(&["a"]),
            &oldest,
            &newest,
            false,
            &DisplayFormatter::default(),
        );
        assert!(diff.is_conflicting("a"));
    }

    #[test]
    fn test_forced_concordance_hides_all_conflicts() {
        let oldest = version(SavepointType::Unset, 0, &[("a", Some("x")), ("b", None)]);
        let newest = version(SavepointType::Unset, 1, &[("a", Some("y")), ("b", Some("z"))]);
        let diff = diff_columns(
            &columns(&["a", "b"]),
            &oldest,
            &newest,
            true,
            &DisplayFormatter::default(),
        );
        assert_eq!(diff.columns.len(), 2);
        assert_eq!(diff.conflict_count(), 0);
        assert_eq!(
            diff.columns[0].kind,
            DiffKind::Concordant {
                display_value: "y".into()
            }
        );
    }

    #[test]
    fn test_non_retained_columns_skipped() {
        let mut cols = columns(&["a", "parent"]);
        cols[1].is_unit_of_retention = false;
        let oldest = version(SavepointType::Complete, 0, &[("parent", Some("1"))]);
        let newest = version(SavepointType::Unset, 1, &[("parent", Some("2"))]);
        let diff = diff_columns(&cols, &oldest, &newest, false, &DisplayFormatter::default());
        assert_eq!(diff.columns.len(), 1);
        assert!(diff.get("parent").is_none());
    }

    #[test]
    fn test_diff_is_deterministic() {
        let oldest = version(SavepointType::Complete, 0, &[("a", Some("1")), ("b", Some("2"))]);
        let newest = version(SavepointType::Unset, 1, &[("a", Some("3")), ("b", Some("2"))]);
        let cols = columns(&["b", "a"]);
        let fmt = DisplayFormatter::default();
        let first = diff_columns(&cols, &oldest, &newest, false, &fmt);
        let second = diff_columns(&cols, &oldest, &newest, false, &fmt);
        assert_eq!(first, second);
    }

    #[test]
    fn test_equal_raw_blob_reference_is_concordant() {
        let cols = vec![ColumnDefinition::retained("photo", ElementType::RowPath)];
        let oldest = version(SavepointType::Complete, 0, &[("photo", Some("uuid:1/a.jpg"))]);
        let newest = version(SavepointType::Unset, 1, &[("photo", Some("uuid:1/a.jpg"))]);
        let diff = diff_columns(&cols, &oldest, &newest, false, &DisplayFormatter::default());
        assert_eq!(
            diff.columns[0].kind,
            DiffKind::Concordant {
                display_value: "a.jpg".into()
            }
        );
    }
}
