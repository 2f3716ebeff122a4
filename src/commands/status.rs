use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::experiment::Experiment;
use crate::store::{TABLES, count_rows};

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = args.store.db_path();

    info!(artifacts_root = %args.store.artifacts_root.display(), "status requested");

    if !db_path.exists() {
        warn!(path = %db_path.display(), "database file missing");
        return Ok(());
    }

    let connection = Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open {}", db_path.display()))?;

    for table in TABLES {
        match count_rows(&connection, table) {
            Ok(rows) => info!(table, rows, "table status"),
            Err(err) => warn!(table, error = %err, "table unavailable"),
        }
    }

    let schema_version = read_metadata(&connection, "db_schema_version")?.unwrap_or_default();
    let updated_at = read_metadata(&connection, "db_updated_at")?.unwrap_or_default();
    info!(path = %db_path.display(), schema_version = %schema_version, updated_at = %updated_at, "database status");

    for experiment in load_experiments(&connection)? {
        let label = experiment
            .display_strategy()
            .unwrap_or_else(|_| experiment.strategy.clone());
        info!(
            experiment = %experiment.name,
            strategy = %experiment.strategy,
            kind = ?experiment.kind,
            label = %label,
            "experiment"
        );
    }

    Ok(())
}

fn read_metadata(connection: &Connection, key: &str) -> Result<Option<String>> {
    connection
        .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
            row.get::<_, String>(0)
        })
        .optional()
        .with_context(|| format!("failed to read metadata {key}"))
}

fn load_experiments(connection: &Connection) -> Result<Vec<Experiment>> {
    let mut statement = connection
        .prepare("SELECT name, search_strategy FROM experiment ORDER BY name, search_strategy")?;
    let experiments = statement
        .query_map([], |row| {
            Ok(Experiment::new(
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(experiments)
}
