//! `odksync checkpoints` subcommands.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use dialoguer::Confirm;
use serde::Serialize;
use tracing::warn;

use odksync_core::config::AppConfig;
use odksync_core::conflict::{
    ColumnResolution, CommitOutcome, DiffKind, DisplayFormatter, ResolutionCase,
    ResolutionSession, RowAction, RowDecision, RowDiff, SelectionSnapshot,
    SqliteResolutionExecutor,
};
use odksync_core::models::SavepointType;
use odksync_core::{Database, ResolutionError};

use crate::{blocking, style, truncate};

#[derive(Subcommand, Debug)]
pub enum CheckpointsAction {
    /// List rows of a table that still have checkpoints.
    List {
        /// Table id.
        table: String,
    },
    /// Show the resolution case and column diff of a row.
    Show {
        table: String,
        row: String,

        /// Print the case and diff as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Resolve a row's checkpoints.
    Resolve {
        table: String,
        row: String,

        /// Whole-row action.
        #[arg(long, value_enum)]
        action: ActionArg,

        /// Keep the oldest (saved) value of a differing column. Repeatable.
        #[arg(long = "keep-oldest", value_name = "COLUMN")]
        keep_oldest: Vec<String>,

        /// Keep the newest (checkpoint) value of a differing column. Repeatable.
        #[arg(long = "keep-newest", value_name = "COLUMN")]
        keep_newest: Vec<String>,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
    /// Discard a saved, unfinished selection for a row.
    Forget {
        table: String,
        row: String,
    },
}

/// Whole-row action names on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionArg {
    /// Keep the newest checkpoint, saved as incomplete.
    TakeNewest,
    /// Discard the checkpoints and keep the saved version.
    TakeOldest,
    /// Delete a row that was never saved.
    Delete,
}

impl From<ActionArg> for RowAction {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::TakeNewest => RowAction::PromoteNewest,
            ActionArg::TakeOldest => RowAction::PromoteOldest,
            ActionArg::Delete => RowAction::Delete,
        }
    }
}

fn action_flag(action: RowAction) -> &'static str {
    match action {
        RowAction::PromoteNewest => "take-newest",
        RowAction::PromoteOldest => "take-oldest",
        RowAction::Delete => "delete",
    }
}

fn target_label(target: SavepointType) -> &'static str {
    match target {
        SavepointType::Complete => "finalized",
        SavepointType::Incomplete | SavepointType::Unset => "incomplete",
    }
}

fn describe_action(action: RowAction, target: SavepointType) -> String {
    match action {
        RowAction::PromoteNewest => {
            "keep the newest checkpoint and save the row as incomplete".to_string()
        }
        RowAction::PromoteOldest => format!(
            "discard the checkpoints and restore the {} version",
            target_label(target)
        ),
        RowAction::Delete => "delete this new row and all of its checkpoints".to_string(),
    }
}

pub async fn run(action: CheckpointsAction, db: Arc<Database>, config: &AppConfig) -> Result<()> {
    match action {
        CheckpointsAction::List { table } => cmd_list(db, table).await,
        CheckpointsAction::Show { table, row, json } => {
            cmd_show(db, config, table, row, json).await
        }
        CheckpointsAction::Resolve {
            table,
            row,
            action,
            keep_oldest,
            keep_newest,
            yes,
        } => {
            let request = ResolveArgs {
                action: action.into(),
                keep_oldest,
                keep_newest,
                skip_prompt: yes || !config.resolution.require_confirmation,
            };
            cmd_resolve(db, config, table, row, request).await
        }
        CheckpointsAction::Forget { table, row } => {
            let (t, r) = (table.clone(), row.clone());
            let removed = blocking(move || {
                db.clear_selection(&t, &r)
                    .context("failed to clear saved selection")
            })
            .await?;
            if removed {
                println!("{}", style::success(&format!("Discarded saved selection for {row}")));
            } else {
                println!("No saved selection for {row} in {table}.");
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Session loading
// ---------------------------------------------------------------------------

/// Open a session and reapply any saved selection. `None` means the row no
/// longer exists.
async fn load_session(
    db: Arc<Database>,
    config: &AppConfig,
    table: &str,
    row: &str,
) -> Result<Option<ResolutionSession>> {
    let formatter = DisplayFormatter::new(&config.display.locale);
    let persist = config.resolution.persist_selection;
    let (table, row) = (table.to_string(), row.to_string());

    blocking(move || {
        let mut session = match ResolutionSession::open(db.as_ref(), &table, &row, &formatter) {
            Ok(session) => session,
            Err(e) if e.is_empty_history() => return Ok(None),
            Err(e) => return Err(e).context("failed to load row"),
        };

        if !persist {
            return Ok(Some(session));
        }
        if let Some(snapshot) = db
            .load_selection(&table, &row)
            .context("failed to read saved selection")?
        {
            match session.restore(&snapshot) {
                Ok(()) => {}
                Err(e @ ResolutionError::PersistenceMismatch(_)) => {
                    warn!(
                        table_id = %table,
                        row_id = %row,
                        error = %e,
                        "discarding saved selection"
                    );
                    db.clear_selection(&table, &row)
                        .context("failed to discard saved selection")?;
                }
                Err(e) => return Err(e).context("failed to restore saved selection"),
            }
        }
        Ok(Some(session))
    })
    .await
}

fn print_row_gone(table: &str, row: &str) {
    println!(
        "{}",
        style::success(&format!("Row {row} no longer exists in {table}; nothing to resolve"))
    );
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

async fn cmd_list(db: Arc<Database>, table_id: String) -> Result<()> {
    let lookup = table_id.clone();
    let (rows, tables) = blocking(move || {
        let rows = db
            .list_checkpoint_rows(&lookup)
            .context("failed to list rows with checkpoints")?;
        let tables = db.list_tables().context("failed to list tables")?;
        Ok((rows, tables))
    })
    .await?;

    if !tables.contains(&table_id) {
        println!("{}", style::warn(&format!("Unknown table '{table_id}'")));
        if tables.is_empty() {
            println!("No tables imported yet; see `odksync import`.");
        } else {
            println!("Known tables: {}", tables.join(", "));
        }
        return Ok(());
    }

    if rows.is_empty() {
        println!();
        println!("{}", style::success(&format!("No checkpoints in {table_id}")));
        println!();
        return Ok(());
    }

    println!();
    println!(
        "{}",
        style::header(&format!("Rows with checkpoints in {table_id} ({})", rows.len()))
    );
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Row ID", "Versions", "Checkpoints", "Last change"]);
    for r in &rows {
        table.add_row(vec![
            Cell::new(&r.row_id),
            Cell::new(r.versions),
            Cell::new(r.checkpoints),
            Cell::new(truncate(&r.last_saved_at, 19)),
        ]);
    }
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

/// Machine-readable form of `checkpoints show`.
#[derive(Serialize)]
struct ShowJson<'a> {
    table_id: &'a str,
    row_id: &'a str,
    case: ResolutionCase,
    restore_target: String,
    versions: usize,
    allowed_actions: &'static [RowAction],
    diff: &'a RowDiff,
    selection: SelectionSnapshot,
}

async fn cmd_show(
    db: Arc<Database>,
    config: &AppConfig,
    table: String,
    row: String,
    json: bool,
) -> Result<()> {
    let Some(session) = load_session(db, config, &table, &row).await? else {
        if json {
            println!("null");
        } else {
            print_row_gone(&table, &row);
        }
        return Ok(());
    };

    if json {
        let out = ShowJson {
            table_id: session.table_id(),
            row_id: session.row_id(),
            case: session.case(),
            restore_target: session.restore_target().to_string(),
            versions: session.version_count(),
            allowed_actions: session.allowed_actions(),
            diff: session.diff(),
            selection: session.snapshot(),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&out).context("failed to encode JSON")?
        );
    } else {
        print_session(&session);
    }
    Ok(())
}

fn print_session(session: &ResolutionSession) {
    println!();
    println!(
        "{}",
        style::header(&format!("Row {} in {}", session.row_id(), session.table_id()))
    );
    println!("  Case      : {}", style::case_label(session.case()));
    println!("  Versions  : {}", session.version_count());
    println!(
        "  Oldest    : {} ({})",
        session.oldest_timestamp().format("%Y-%m-%d %H:%M:%S"),
        session.restore_target()
    );
    println!(
        "  Newest    : {}",
        session.newest_timestamp().format("%Y-%m-%d %H:%M:%S")
    );
    println!();

    if session.case() == ResolutionCase::AlreadyResolved {
        println!("{}", style::success("No checkpoints left; nothing to resolve"));
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    if session.case().treats_all_as_concordant() {
        table.set_header(vec!["Column", "Value"]);
        for column in &session.diff().columns {
            if let DiffKind::Concordant { display_value } = &column.kind {
                table.add_row(vec![Cell::new(&column.display_name), Cell::new(display_value)]);
            }
        }
    } else {
        table.set_header(vec!["Column", "Oldest (saved)", "Newest (checkpoint)", "", "Choice"]);
        for column in &session.diff().columns {
            match &column.kind {
                DiffKind::Concordant { display_value } => {
                    table.add_row(vec![
                        Cell::new(&column.display_name),
                        Cell::new(display_value),
                        Cell::new(display_value),
                        Cell::new(style::concordant()),
                        Cell::new(""),
                    ]);
                }
                DiffKind::Conflicting {
                    oldest_display,
                    newest_display,
                    ..
                } => {
                    let choice = session
                        .selection()
                        .choice(&column.element_key)
                        .map_or_else(|| "unresolved".to_string(), |c| c.resolution.to_string());
                    table.add_row(vec![
                        Cell::new(&column.display_name),
                        Cell::new(oldest_display),
                        Cell::new(newest_display),
                        Cell::new(style::conflicting()),
                        Cell::new(choice),
                    ]);
                }
            }
        }
    }
    println!("{table}");

    let conflicts = session.diff().conflict_count();
    if conflicts > 0 {
        println!(
            "{}",
            style::dim(&format!(
                "{conflicts} column(s) differ; keep a saved value with --keep-oldest <key>"
            ))
        );
    }
    if let RowDecision::Confirming(action) = session.selection().decision() {
        println!(
            "{}",
            style::warn(&format!(
                "Saved selection is waiting to {}",
                describe_action(action, session.restore_target())
            ))
        );
    }

    println!();
    println!("Available actions:");
    for action in session.allowed_actions() {
        println!(
            "  --action {:<12} {}",
            action_flag(*action),
            describe_action(*action, session.restore_target())
        );
    }
    println!();
}

// ---------------------------------------------------------------------------
// resolve
// ---------------------------------------------------------------------------

struct ResolveArgs {
    action: RowAction,
    keep_oldest: Vec<String>,
    keep_newest: Vec<String>,
    skip_prompt: bool,
}

async fn cmd_resolve(
    db: Arc<Database>,
    config: &AppConfig,
    table: String,
    row: String,
    args: ResolveArgs,
) -> Result<()> {
    let Some(mut session) = load_session(db.clone(), config, &table, &row).await? else {
        print_row_gone(&table, &row);
        return Ok(());
    };

    if session.case() == ResolutionCase::AlreadyResolved {
        println!("{}", style::success("No checkpoints left; nothing to resolve"));
        return Ok(());
    }

    // A restored pending confirmation is superseded by this invocation.
    if matches!(session.selection().decision(), RowDecision::Confirming(_)) {
        session.cancel().context("failed to reset saved selection")?;
    }
    for key in &args.keep_oldest {
        session
            .choose(key, ColumnResolution::Server)
            .with_context(|| format!("cannot keep the saved value of '{key}'"))?;
    }
    for key in &args.keep_newest {
        session
            .choose(key, ColumnResolution::Local)
            .with_context(|| format!("cannot keep the newest value of '{key}'"))?;
    }
    session.request(args.action).with_context(|| {
        let allowed: Vec<&str> = session
            .allowed_actions()
            .iter()
            .map(|a| action_flag(*a))
            .collect();
        format!(
            "'{}' is not available for this row (use one of: {})",
            action_flag(args.action),
            allowed.join(", ")
        )
    })?;

    let summary = describe_action(args.action, session.restore_target());
    if !args.skip_prompt {
        print_session(&session);
        let prompt = format!("Really {summary}?");
        let confirmed = blocking(move || {
            Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
                .context("confirmation prompt failed (pass --yes to skip it)")
        })
        .await?;

        if !confirmed {
            session.cancel().context("failed to cancel")?;
            if config.resolution.persist_selection {
                let snapshot = session.snapshot();
                let (db, t, r) = (db.clone(), table.clone(), row.clone());
                blocking(move || {
                    db.save_selection(&t, &r, &snapshot)
                        .context("failed to save selection")
                })
                .await?;
                println!("{}", style::dim("Cancelled; column choices saved for later"));
            } else {
                println!("{}", style::dim("Cancelled; nothing changed"));
            }
            return Ok(());
        }
    }

    session.confirm().context("failed to confirm")?;
    let target = session.restore_target();
    let executor = SqliteResolutionExecutor::new(db);
    let outcome = blocking(move || {
        session
            .submit(&executor)
            .context("failed to commit resolution")
    })
    .await?;

    match outcome {
        CommitOutcome::Applied {
            action,
            removed_versions,
            overridden_columns,
        } => {
            let done = match action {
                RowAction::PromoteNewest => format!(
                    "Kept newest checkpoint as incomplete ({overridden_columns} saved value(s))"
                ),
                RowAction::PromoteOldest => {
                    format!("Restored the {} version", target_label(target))
                }
                RowAction::Delete => "Deleted the new row".to_string(),
            };
            println!("{}", style::success(&done));
            println!(
                "{}",
                style::dim(&format!("{removed_versions} version(s) removed"))
            );
        }
        CommitOutcome::RowAlreadyGone => print_row_gone(&table, &row),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_arg_maps_to_row_action() {
        assert_eq!(RowAction::from(ActionArg::TakeNewest), RowAction::PromoteNewest);
        assert_eq!(RowAction::from(ActionArg::TakeOldest), RowAction::PromoteOldest);
        assert_eq!(RowAction::from(ActionArg::Delete), RowAction::Delete);
        assert_eq!(action_flag(RowAction::PromoteOldest), "take-oldest");
    }

    #[test]
    fn test_restore_message_depends_on_target() {
        assert!(describe_action(RowAction::PromoteOldest, SavepointType::Complete)
            .contains("finalized"));
        assert!(describe_action(RowAction::PromoteOldest, SavepointType::Incomplete)
            .contains("incomplete"));
    }
}
