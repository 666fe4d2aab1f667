//! `wbs` command line entry point

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use wbs_tracker_lib::commands;
use wbs_tracker_lib::config::EngineConfig;
use wbs_tracker_lib::domain::IdKind;
use wbs_tracker_lib::services::{FieldChanges, IdScope, MigrationOptions};
use wbs_tracker_lib::AppState;

#[derive(Parser, Debug)]
#[command(name = "wbs", version, about = "Work breakdown tracker", propagate_version = true)]
struct Cli {
    /// JSON config file
    #[arg(long, default_value = "wbs.json")]
    config: PathBuf,
    /// SQLite database, overrides the config
    #[arg(long)]
    db: Option<PathBuf>,
    #[arg(long)]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load work items from a JSON array, ids as given
    Import { file: PathBuf },
    /// Print items in tree order
    Tree {
        #[arg(long)]
        root: Option<String>,
    },
    /// Apply field edits given as a JSON object
    Edit { id: String, changes: String },
    RecalcSubtree { root: String },
    RecalcAncestors { id: String },
    /// Issue new ids
    Allocate {
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long)]
        project_id: Option<String>,
        #[arg(long)]
        project_name: Option<String>,
        #[arg(long)]
        parent: Option<String>,
        /// Day for date-based ids, today by default
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Move legacy ids to the structured scheme
    Migrate {
        #[arg(long)]
        dry_run: bool,
        /// JSON object of projectId → project name
        #[arg(long)]
        names: Option<PathBuf>,
    },
    ValidateIds,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Date,
    Wp,
    Task,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let _ = rolling_logger::error(&e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let mut config = EngineConfig::load(&cli.config)?;
    if let Some(db) = cli.db {
        config.database_path = Some(db);
    }
    if let Some(dir) = cli.log_dir {
        config.log_dir = Some(dir);
    }

    let log_dir = config.log_dir.clone().unwrap_or_else(|| PathBuf::from("logs"));
    rolling_logger::init_logger(&log_dir, "wbs")?;
    let _ = rolling_logger::info(&format!("wbs started: {:?}", cli.command));

    let state = AppState::open(config).await?;

    match cli.command {
        Command::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;
            print_json(&commands::import_json(&state, raw).await?)
        }
        Command::Tree { root } => {
            for row in commands::get_tree(&state, root).await? {
                println!(
                    "{}{}  {:>3}%  {}",
                    "  ".repeat(row.depth),
                    row.item.id,
                    row.item.completion,
                    row.item.title
                );
            }
            Ok(())
        }
        Command::Edit { id, changes } => {
            let changes: FieldChanges =
                serde_json::from_str(&changes).map_err(|e| format!("Invalid changes: {}", e))?;
            print_json(&commands::on_field_changed(&state, id, changes).await?)
        }
        Command::RecalcSubtree { root } => {
            print_json(&commands::recalculate_subtree(&state, root).await?)
        }
        Command::RecalcAncestors { id } => commands::recalculate_ancestors(&state, id).await,
        Command::Allocate {
            kind,
            project_id,
            project_name,
            parent,
            date,
            count,
        } => {
            let (scope, kind) = match kind {
                KindArg::Date => (
                    IdScope::Daily {
                        date: date.unwrap_or_else(|| chrono::Local::now().date_naive()),
                    },
                    IdKind::DateBased,
                ),
                KindArg::Wp => (
                    IdScope::WorkPackage {
                        project_id: project_id.ok_or("--project-id is required for wp ids")?,
                        project_name,
                        package: None,
                    },
                    IdKind::WorkPackage,
                ),
                KindArg::Task => (
                    IdScope::Subordinate {
                        parent_id: parent.ok_or("--parent is required for task ids")?,
                    },
                    IdKind::Task,
                ),
            };
            let request = commands::AllocateRequest { scope, kind, count };
            print_json(&commands::allocate_ids(&state, request).await?)
        }
        Command::Migrate { dry_run, names } => {
            let project_names: HashMap<String, String> = match names {
                Some(path) => read_json(&path)?,
                None => HashMap::new(),
            };
            let options = MigrationOptions {
                dry_run,
                project_names,
            };
            print_json(&commands::migrate(&state, options).await?)
        }
        Command::ValidateIds => print_json(&commands::validate_ids(&state).await?),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON in {}: {}", path.display(), e))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let out = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", out);
    Ok(())
}
