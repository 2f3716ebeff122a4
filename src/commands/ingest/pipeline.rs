use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::model::{ArchiveEntry, IngestCounts};
use crate::store::{load_processed_files, touch_updated_at};
use crate::util::sha256_file;

use super::archive::{discover_archives, read_archive};
use super::catalog::{CatalogSources, build_catalog};
use super::merge::StoreMerger;
use super::parser::ResultParser;

#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    pub counts: IngestCounts,
    pub archives: Vec<ArchiveEntry>,
}

/// One full ingestion run: catalog build, then every new archive, committed as a
/// single transaction. Any error leaves the store as it was before the run.
pub fn ingest_run(
    connection: &mut Connection,
    sources: &CatalogSources,
    archives_dir: &Path,
    parser: &dyn ResultParser,
    keep_job_output: bool,
) -> Result<IngestOutcome> {
    let tx = connection
        .transaction()
        .context("failed to begin ingest transaction")?;

    let catalog_rows_inserted = build_catalog(&tx, sources)?;
    let mut outcome = ingest_directory(&tx, archives_dir, parser, keep_job_output)?;
    outcome.counts.catalog_rows_inserted = catalog_rows_inserted;

    touch_updated_at(&tx)?;
    tx.commit().context("failed to commit ingest transaction")?;

    Ok(outcome)
}

/// Folds every archive not yet in `processed_files` into the store through `connection`.
/// Does not commit.
pub fn ingest_directory(
    connection: &Connection,
    archives_dir: &Path,
    parser: &dyn ResultParser,
    keep_job_output: bool,
) -> Result<IngestOutcome> {
    let already_processed = load_processed_files(connection)?;
    let mut merger = StoreMerger::load(connection, keep_job_output)?;
    let mut outcome = IngestOutcome::default();

    for archive in discover_archives(archives_dir)? {
        outcome.counts.archives_seen += 1;

        if already_processed.contains(&archive.name) {
            info!(archive = %archive.filename, "skipping already processed archive");
            outcome.counts.archives_skipped += 1;
            continue;
        }
        if merger.is_marked(&archive.name) {
            warn!(
                archive = %archive.filename,
                name = %archive.name,
                "another archive with the same name was ingested in this run, skipping"
            );
            outcome.counts.archives_skipped += 1;
            continue;
        }

        info!(archive = %archive.filename, "adding archive to database");

        let pending_before = merger.pending_results();
        let jobs = read_archive(&archive.path)?;
        outcome.counts.jobs_skipped += jobs.skipped_jobs;

        for job in jobs.jobs {
            let job = Rc::new(job);
            let results = parser
                .parse(&job.stdout, &job.stderr, jobs.large_job)
                .with_context(|| {
                    format!("failed to parse job {} in {}", job.job, archive.filename)
                })?;
            outcome.counts.jobs_parsed += 1;

            for result in results {
                merger
                    .stage_result(&archive.name, result, &job)
                    .with_context(|| {
                        format!("failed to merge job {} in {}", job.job, archive.filename)
                    })?;
            }
        }

        merger.mark_processed(&archive.name);
        outcome.counts.archives_ingested += 1;

        let results = merger.pending_results() - pending_before;
        info!(
            archive = %archive.filename,
            results,
            skipped_jobs = jobs.skipped_jobs,
            large_job = jobs.large_job,
            "archive staged"
        );

        outcome.archives.push(ArchiveEntry {
            sha256: sha256_file(&archive.path)?,
            name: archive.name,
            filename: archive.filename,
            results,
        });
    }

    let summary = merger.flush()?;
    outcome.counts.experiments_created = summary.experiments_created;
    outcome.counts.results_inserted = summary.results_inserted;
    outcome.counts.extended_results_inserted = summary.extended_results_inserted;

    info!(
        archives = summary.archives_marked,
        results = summary.results_inserted,
        experiments_created = summary.experiments_created,
        "staged results written"
    );

    Ok(outcome)
}
