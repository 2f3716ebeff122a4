use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::util::now_utc_string;

pub const DB_SCHEMA_VERSION: &str = "0.2.0";

pub const TABLES: [&str; 5] = [
    "experiment",
    "query_instance",
    "query_result",
    "extended_result",
    "processed_files",
];

/// `name#strategy` identity of an experiment row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExperimentKey {
    pub name: String,
    pub strategy: String,
}

/// `model#query_name#index` identity of a query instance row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryInstanceKey {
    pub model_name: String,
    pub query_name: String,
    pub query_index: i64,
}

pub fn open_store(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;
    Ok(connection)
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys")?;
    Ok(())
}

pub fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS experiment (
              id INTEGER PRIMARY KEY,
              name TEXT NOT NULL,
              search_strategy TEXT NOT NULL,
              UNIQUE(name, search_strategy)
            );

            CREATE TABLE IF NOT EXISTS query_instance (
              id INTEGER PRIMARY KEY,
              model_name TEXT NOT NULL,
              query_name TEXT NOT NULL,
              query_index INTEGER NOT NULL,
              query_type TEXT,
              expected_answer TEXT,
              UNIQUE(model_name, query_name, query_index)
            );

            CREATE TABLE IF NOT EXISTS query_result (
              id INTEGER PRIMARY KEY,
              experiment_id INTEGER NOT NULL,
              query_instance_id INTEGER NOT NULL,
              time REAL,
              status TEXT NOT NULL,
              result TEXT,
              max_memory REAL,
              states INTEGER,
              color_reduction_time REAL,
              verification_time REAL,
              FOREIGN KEY(experiment_id) REFERENCES experiment(id),
              FOREIGN KEY(query_instance_id) REFERENCES query_instance(id)
            );

            CREATE TABLE IF NOT EXISTS extended_result (
              id INTEGER PRIMARY KEY,
              query_result_id INTEGER NOT NULL,
              stdout TEXT,
              stderr TEXT,
              FOREIGN KEY(query_result_id) REFERENCES query_result(id)
            );

            CREATE TABLE IF NOT EXISTS processed_files (
              id INTEGER PRIMARY KEY,
              file_name TEXT NOT NULL UNIQUE
            );

            CREATE INDEX IF NOT EXISTS idx_query_result_experiment ON query_result(experiment_id);
            CREATE INDEX IF NOT EXISTS idx_query_result_instance ON query_result(query_instance_id);
            ",
        )
        .context("failed to initialize results schema")?;

    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;

    Ok(())
}

pub fn touch_updated_at(connection: &Connection) -> Result<()> {
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now_utc_string()],
    )?;
    Ok(())
}

pub fn count_rows(connection: &Connection, table_name: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {table_name}");
    let count = connection
        .query_row(&sql, [], |row| row.get(0))
        .with_context(|| format!("failed to count rows in {table_name}"))?;
    Ok(count)
}

pub fn load_experiment_ids(connection: &Connection) -> Result<HashMap<ExperimentKey, i64>> {
    let mut statement = connection.prepare("SELECT id, name, search_strategy FROM experiment")?;
    let mut rows = statement.query([])?;
    let mut out = HashMap::new();

    while let Some(row) = rows.next()? {
        out.insert(
            ExperimentKey {
                name: row.get(1)?,
                strategy: row.get(2)?,
            },
            row.get(0)?,
        );
    }

    Ok(out)
}

pub fn load_query_instance_ids(connection: &Connection) -> Result<HashMap<QueryInstanceKey, i64>> {
    let mut statement =
        connection.prepare("SELECT id, model_name, query_name, query_index FROM query_instance")?;
    let mut rows = statement.query([])?;
    let mut out = HashMap::new();

    while let Some(row) = rows.next()? {
        out.insert(
            QueryInstanceKey {
                model_name: row.get(1)?,
                query_name: row.get(2)?,
                query_index: row.get(3)?,
            },
            row.get(0)?,
        );
    }

    Ok(out)
}

pub fn load_processed_files(connection: &Connection) -> Result<HashSet<String>> {
    let mut statement = connection.prepare("SELECT file_name FROM processed_files")?;
    let names = statement
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(names)
}
