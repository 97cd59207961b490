//! odksync command-line tool.
//!
//! Inspects ODK rows that still carry checkpoints, shows the column diff
//! between the saved version and the newest checkpoint, and commits the
//! user's resolution. Also generates / validates configuration files,
//! imports table fixtures and shows the audit log.

mod checkpoints;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use odksync_core::config::AppConfig;
use odksync_core::conflict::DisplayFormatter;
use odksync_core::import::Fixture;
use odksync_core::models::ColumnDefinition;
use odksync_core::Database;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// odksync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "odksync",
    version,
    about = "Resolve leftover checkpoints on ODK table rows"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override `app.data_dir` from the configuration.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path (defaults to the --config path).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a configuration file.
    Validate,

    /// Show the column schema of a table.
    Columns {
        /// Table id.
        table: String,
    },

    /// Inspect and resolve rows with checkpoints.
    Checkpoints {
        #[command(subcommand)]
        action: checkpoints::CheckpointsAction,
    },

    /// Import tables, display names and row versions from a JSON fixture.
    Import {
        /// Fixture file.
        file: PathBuf,
    },

    /// Show recent audit log entries.
    Audit {
        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{e:#}")));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Init { output } => {
            init_logging("warn");
            cmd_init(output.as_deref().unwrap_or(&config_path))
        }
        Commands::Validate => {
            init_logging("warn");
            cmd_validate(&config_path)
        }
        command => {
            let mut config = load_config(&config_path)?;
            if let Some(dir) = cli.data_dir {
                config.app.data_dir = dir;
            }
            init_logging(&config.app.log_level);
            let db = open_database(&config).await?;

            match command {
                Commands::Columns { table } => cmd_columns(db, &config, table).await,
                Commands::Checkpoints { action } => checkpoints::run(action, db, &config).await,
                Commands::Import { file } => cmd_import(db, file).await,
                Commands::Audit { limit } => cmd_audit(db, limit).await,
                Commands::Init { .. } | Commands::Validate => Ok(()),
            }
        }
    }
}

/// Logs go to stderr so they never mix with command output. `RUST_LOG`
/// wins over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// Config and database helpers
// ---------------------------------------------------------------------------

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("odksync")
        .join("config.toml")
}

/// Load and validate the config, or use defaults when the file is absent.
fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let config = AppConfig::default();
        config
            .validate()
            .context("built-in default configuration is invalid")?;
        return Ok(config);
    }
    AppConfig::load_and_validate(path).context("failed to load configuration file")
}

async fn open_database(config: &AppConfig) -> Result<Arc<Database>> {
    let db_path = config.database_path();
    blocking(move || {
        debug!(path = %db_path.display(), "opening store");
        let db = Database::new(&db_path)
            .with_context(|| format!("failed to open database {}", db_path.display()))?;
        db.initialize().context("failed to initialize database")?;
        Ok(Arc::new(db))
    })
    .await
}

/// Run blocking store I/O off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("blocking task failed")?
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    let body = AppConfig::default()
        .to_toml_string()
        .context("failed to render default configuration")?;
    let contents = format!("# odksync configuration\n\n{body}");

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(output, contents).context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!("Default configuration written to {}", output.display()))
    );
    println!();
    println!("Next steps:");
    println!("  1. Set app.data_dir and app.app_name for your ODK app");
    println!("  2. Validate with: odksync validate --config {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    if let Err(e) = config.validate() {
        println!("  [FAIL] Validation error: {e}");
        anyhow::bail!("configuration validation failed");
    }
    println!("  [OK] All fields are valid");

    println!();
    println!("Configuration summary:");
    println!("  App name      : {}", config.app.app_name);
    println!("  Database      : {}", config.database_path().display());
    println!("  Log level     : {}", config.app.log_level);
    println!("  Locale        : {}", config.display.locale);
    println!(
        "  Confirmation  : {}",
        if config.resolution.require_confirmation {
            "required"
        } else {
            "skipped"
        }
    );
    println!(
        "  Save progress : {}",
        if config.resolution.persist_selection {
            "yes"
        } else {
            "no"
        }
    );
    println!();
    println!("Configuration is valid.");
    Ok(())
}

async fn cmd_columns(db: Arc<Database>, config: &AppConfig, table_id: String) -> Result<()> {
    let lookup_id = table_id.clone();
    let columns = blocking(move || {
        let specs = db
            .list_column_specs(&lookup_id)
            .context("failed to read column definitions")?;
        let mut defs =
            ColumnDefinition::from_specs(specs.clone()).context("column schema is invalid")?;
        for def in &mut defs {
            def.display_name = db
                .get_display_name(&lookup_id, &def.element_key)
                .context("failed to read display name")?;
        }
        Ok((specs, defs))
    })
    .await?;
    let (specs, defs) = columns;

    if defs.is_empty() {
        println!("{}", style::warn(&format!("No columns defined for table '{table_id}'")));
        return Ok(());
    }

    let formatter = DisplayFormatter::new(&config.display.locale);
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Element key", "Type", "Parent", "Retained", "Display name"]);
    for def in &defs {
        let parent = specs
            .iter()
            .find(|s| s.element_key == def.element_key)
            .and_then(|s| s.parent_element_key.as_deref())
            .unwrap_or("—");
        table.add_row(vec![
            Cell::new(&def.element_key),
            Cell::new(def.element_type.to_string()),
            Cell::new(parent),
            Cell::new(if def.is_unit_of_retention { "yes" } else { "no" }),
            Cell::new(formatter.column_display_name(def)),
        ]);
    }

    println!();
    println!("{}", style::header(&format!("Columns of {table_id} ({})", defs.len())));
    println!("{table}");
    Ok(())
}

async fn cmd_import(db: Arc<Database>, file: PathBuf) -> Result<()> {
    let stats = blocking(move || {
        let fixture = Fixture::load(&file)
            .with_context(|| format!("failed to read fixture {}", file.display()))?;
        db.import_fixture(&fixture).context("import failed")
    })
    .await?;

    println!(
        "{}",
        style::success(&format!(
            "Imported {} table(s), {} column(s), {} row(s), {} version(s)",
            stats.tables, stats.columns, stats.rows, stats.versions
        ))
    );
    Ok(())
}

async fn cmd_audit(db: Arc<Database>, limit: u32) -> Result<()> {
    let (entries, total) = blocking(move || {
        let entries = db
            .list_audit_log(limit)
            .context("failed to list audit entries")?;
        let total = db.count_audit_log().context("failed to count audit entries")?;
        Ok((entries, total))
    })
    .await?;

    if entries.is_empty() {
        println!("No audit log entries found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Time", "Action", "Table", "Row", "Result", "Details"]);
    for entry in &entries {
        table.add_row(vec![
            Cell::new(local_time(&entry.created_at)),
            Cell::new(&entry.action),
            Cell::new(entry.table_id.as_deref().unwrap_or("—")),
            Cell::new(entry.row_id.as_deref().unwrap_or("—")),
            Cell::new(if entry.success { "ok" } else { "failed" }),
            Cell::new(entry.details.as_deref().unwrap_or("")),
        ]);
    }

    println!("{table}");
    println!(
        "{}",
        style::dim(&format!("{} of {total} entries shown", entries.len()))
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

/// Render a stored RFC 3339 timestamp in local time.
pub(crate) fn local_time(raw: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|_| raw.to_string())
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}
