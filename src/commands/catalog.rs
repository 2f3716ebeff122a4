use anyhow::{Context, Result};
use tracing::info;

use crate::cli::CatalogArgs;
use crate::commands::ingest::{CatalogSources, build_catalog};
use crate::store::{count_rows, open_store, touch_updated_at};
use crate::util::ensure_directory;

pub fn run(args: CatalogArgs) -> Result<()> {
    let db_path = args.store.db_path();
    let sources = CatalogSources::from(&args);

    if let Some(parent) = db_path.parent() {
        ensure_directory(parent)?;
    }

    info!(
        consensus = %sources.consensus_path.display(),
        models = %sources.models_dir.display(),
        "building query catalog"
    );

    let mut connection = open_store(&db_path)?;
    let tx = connection
        .transaction()
        .context("failed to begin catalog transaction")?;
    let inserted = build_catalog(&tx, &sources)?;
    touch_updated_at(&tx)?;
    tx.commit().context("failed to commit catalog transaction")?;

    let total = count_rows(&connection, "query_instance")?;
    info!(inserted, total, "catalog completed");

    Ok(())
}
