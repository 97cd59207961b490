//! End-to-end tests for checkpoint resolution against a real SQLite file.
//!
//! Each test imports a fixture, opens a `ResolutionSession` through the
//! store's provider implementations, drives the selection and commits it
//! with the SQLite executor.

use std::sync::Arc;

use tempfile::TempDir;

use odksync_core::conflict::{
    ColumnResolution, CommitOutcome, DisplayFormatter, ResolutionCase, ResolutionSession,
    RowAction, SqliteResolutionExecutor,
};
use odksync_core::db::Database;
use odksync_core::import::Fixture;
use odksync_core::models::SavepointType;
use odksync_core::ResolutionError;

// ===========================================================================
// Helpers
// ===========================================================================

const FIXTURE: &str = r#"{
  "tables": [{
    "table_id": "households",
    "columns": [
      { "element_key": "head_name", "element_type": "string", "ordinal": 0 },
      { "element_key": "members", "element_type": "integer", "ordinal": 1 },
      { "element_key": "location", "element_type": "geopoint", "ordinal": 2 },
      { "element_key": "location_latitude", "element_type": "number",
        "parent_element_key": "location", "ordinal": 3 },
      { "element_key": "location_longitude", "element_type": "number",
        "parent_element_key": "location", "ordinal": 4 },
      { "element_key": "visited", "element_type": "boolean", "ordinal": 5 }
    ],
    "display_names": {
      "head_name": "{\"default\":\"Head of household\",\"fr\":\"Chef de ménage\"}"
    },
    "rows": [
      {
        "row_id": "uuid:saved",
        "versions": [
          { "savepoint_type": "COMPLETE", "savepoint_timestamp": "2024-05-01T10:00:00Z",
            "column_values": { "head_name": "Ada", "members": "4",
                               "location_latitude": "1.5", "location_longitude": "2.5",
                               "visited": "1" } },
          { "savepoint_type": null, "savepoint_timestamp": "2024-05-01T10:05:00Z",
            "column_values": { "head_name": "Ada", "members": "5",
                               "location_latitude": "1.5", "location_longitude": "2.5",
                               "visited": "0" } },
          { "savepoint_type": null, "savepoint_timestamp": "2024-05-01T10:09:00Z",
            "column_values": { "head_name": "Ada L.", "members": "6",
                               "location_latitude": "1.5", "location_longitude": "2.5",
                               "visited": "0" } }
        ]
      },
      {
        "row_id": "uuid:new",
        "versions": [
          { "savepoint_type": null, "savepoint_timestamp": "2024-05-02T08:00:00Z",
            "column_values": { "head_name": "Grace" } },
          { "savepoint_type": null, "savepoint_timestamp": "2024-05-02T08:01:00Z",
            "column_values": { "head_name": "Grace H.", "members": "2" } }
        ]
      },
      {
        "row_id": "uuid:done",
        "versions": [
          { "savepoint_type": "INCOMPLETE", "savepoint_timestamp": "2024-05-03T08:00:00Z",
            "column_values": { "head_name": "Linus" } }
        ]
      }
    ]
  }]
}"#;

const TABLE: &str = "households";

struct Harness {
    _dir: TempDir,
    db: Arc<Database>,
    executor: SqliteResolutionExecutor,
    formatter: DisplayFormatter,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::new(dir.path().join("app").join("odksync.db")).unwrap());
        db.initialize().unwrap();
        db.import_fixture(&Fixture::from_json(FIXTURE).unwrap())
            .unwrap();
        Self {
            _dir: dir,
            executor: SqliteResolutionExecutor::new(db.clone()),
            db,
            formatter: DisplayFormatter::new("fr_CA"),
        }
    }

    fn open(&self, row_id: &str) -> Result<ResolutionSession, ResolutionError> {
        ResolutionSession::open(self.db.as_ref(), TABLE, row_id, &self.formatter)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[test]
fn test_saved_row_diff_uses_retained_columns_and_display_names() {
    let h = Harness::new();
    let session = h.open("uuid:saved").unwrap();

    assert_eq!(session.case(), ResolutionCase::RestoreOrPromote);
    assert_eq!(session.restore_target(), SavepointType::Complete);
    assert_eq!(session.version_count(), 3);

    let keys: Vec<&str> = session
        .diff()
        .columns
        .iter()
        .map(|c| c.element_key.as_str())
        .collect();
    assert_eq!(
        keys,
        vec![
            "head_name",
            "members",
            "location_latitude",
            "location_longitude",
            "visited"
        ]
    );
    assert_eq!(session.diff().columns[0].display_name, "Chef de ménage");
    assert_eq!(session.diff().columns[1].display_name, "members");

    let conflicting: Vec<&str> = session
        .diff()
        .conflicting()
        .map(|c| c.element_key.as_str())
        .collect();
    assert_eq!(conflicting, vec!["head_name", "members", "visited"]);
}

#[test]
fn test_promote_newest_with_server_choices() {
    let h = Harness::new();
    let mut session = h.open("uuid:saved").unwrap();

    session.choose("members", ColumnResolution::Server).unwrap();
    session.choose("head_name", ColumnResolution::Local).unwrap();
    session.request(RowAction::PromoteNewest).unwrap();
    session.confirm().unwrap();
    let outcome = session.submit(&h.executor).unwrap();
    assert_eq!(
        outcome,
        CommitOutcome::Applied {
            action: RowAction::PromoteNewest,
            removed_versions: 2,
            overridden_columns: 1,
        }
    );

    let left = h.db.row_versions(TABLE, "uuid:saved").unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].savepoint_type.as_deref(), Some("INCOMPLETE"));
    assert_eq!(left[0].column_values["members"].as_deref(), Some("4"));
    assert_eq!(left[0].column_values["head_name"].as_deref(), Some("Ada L."));
    assert_eq!(left[0].column_values["visited"].as_deref(), Some("0"));

    // Resolved rows drop out of the listing and reopen as already resolved.
    let listed: Vec<String> = h
        .db
        .list_checkpoint_rows(TABLE)
        .unwrap()
        .into_iter()
        .map(|r| r.row_id)
        .collect();
    assert_eq!(listed, vec!["uuid:new".to_string()]);
    assert_eq!(
        h.open("uuid:saved").unwrap().case(),
        ResolutionCase::AlreadyResolved
    );
}

#[test]
fn test_promote_oldest_restores_saved_version() {
    let h = Harness::new();
    let mut session = h.open("uuid:saved").unwrap();
    session.choose("members", ColumnResolution::Local).unwrap();
    session.request(RowAction::PromoteOldest).unwrap();
    session.confirm().unwrap();
    session.submit(&h.executor).unwrap();

    let left = h.db.row_versions(TABLE, "uuid:saved").unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].savepoint_type.as_deref(), Some("COMPLETE"));
    assert_eq!(left[0].column_values["members"].as_deref(), Some("4"));
}

#[test]
fn test_new_row_is_all_concordant_and_deletable() {
    let h = Harness::new();
    let mut session = h.open("uuid:new").unwrap();
    assert_eq!(session.case(), ResolutionCase::DeleteOrPromote);
    assert_eq!(session.diff().conflict_count(), 0);
    assert!(session.request(RowAction::PromoteOldest).is_err());

    session.request(RowAction::Delete).unwrap();
    session.confirm().unwrap();
    session.submit(&h.executor).unwrap();

    assert!(h.db.row_versions(TABLE, "uuid:new").unwrap().is_empty());
    assert!(h.open("uuid:new").unwrap_err().is_empty_history());
}

#[test]
fn test_single_saved_version_is_already_resolved() {
    let h = Harness::new();
    let session = h.open("uuid:done").unwrap();
    assert_eq!(session.case(), ResolutionCase::AlreadyResolved);
    assert_eq!(session.restore_target(), SavepointType::Incomplete);
    assert!(session.allowed_actions().is_empty());
    assert!(session.diff().columns.is_empty());
}

#[test]
fn test_cancel_never_mutates_and_selection_survives_reopen() {
    let h = Harness::new();
    let mut session = h.open("uuid:saved").unwrap();
    session.choose("visited", ColumnResolution::Server).unwrap();
    session.request(RowAction::PromoteOldest).unwrap();
    session.cancel().unwrap();
    h.db
        .save_selection(TABLE, "uuid:saved", &session.snapshot())
        .unwrap();

    assert_eq!(h.db.row_versions(TABLE, "uuid:saved").unwrap().len(), 3);

    let snapshot = h.db.load_selection(TABLE, "uuid:saved").unwrap().unwrap();
    let mut reopened = h.open("uuid:saved").unwrap();
    reopened.restore(&snapshot).unwrap();
    assert_eq!(reopened.selection(), session.selection());
    assert_eq!(
        reopened.selection().choice("visited").unwrap().value.as_deref(),
        Some("1")
    );
}

#[test]
fn test_snapshot_from_other_row_is_rejected() {
    let h = Harness::new();
    let mut saved = h.open("uuid:saved").unwrap();
    saved.choose("members", ColumnResolution::Server).unwrap();
    let snapshot = saved.snapshot();

    // The new row has no conflicting columns, so nothing in the snapshot fits.
    let mut other = h.open("uuid:new").unwrap();
    assert!(matches!(
        other.restore(&snapshot),
        Err(ResolutionError::PersistenceMismatch(_))
    ));
    assert!(other.selection().choices().is_empty());
}

#[test]
fn test_commit_clears_saved_selection_and_audits() {
    let h = Harness::new();
    let mut session = h.open("uuid:saved").unwrap();
    h.db
        .save_selection(TABLE, "uuid:saved", &session.snapshot())
        .unwrap();

    session.request(RowAction::PromoteNewest).unwrap();
    session.confirm().unwrap();
    session.submit(&h.executor).unwrap();

    assert!(h.db.load_selection(TABLE, "uuid:saved").unwrap().is_none());
    let audit = h.db.list_audit_log(10).unwrap();
    assert_eq!(audit.len(), 1);
    assert!(audit[0].success);
    assert_eq!(audit[0].row_id.as_deref(), Some("uuid:saved"));
}

#[test]
fn test_row_deleted_between_open_and_commit_is_no_op() {
    let h = Harness::new();
    let mut session = h.open("uuid:saved").unwrap();
    session.request(RowAction::PromoteOldest).unwrap();
    session.confirm().unwrap();

    h.db
        .conn()
        .execute(
            "DELETE FROM row_versions WHERE row_id = 'uuid:saved'",
            [],
        )
        .unwrap();

    assert_eq!(
        session.submit(&h.executor).unwrap(),
        CommitOutcome::RowAlreadyGone
    );
}
