use anyhow::Result;
use chrono::Utc;
use tracing::info;

use crate::cli::{IndexBase, IngestArgs};
use crate::model::{IngestPaths, IngestRunManifest};
use crate::store::{DB_SCHEMA_VERSION, open_store};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

use super::catalog::CatalogSources;
use super::parser::CommandResultParser;
use super::pipeline::ingest_run;

pub fn run(args: IngestArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let artifacts_root = args.artifacts_root().to_path_buf();
    let db_path = args.catalog.store.db_path();
    let archives_dir = args.archives_dir();
    let sources = CatalogSources::from(&args.catalog);
    let run_manifest_path = args.run_manifest_path.clone().unwrap_or_else(|| {
        artifacts_root.join("manifests").join(format!(
            "ingest_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });

    if let Some(parent) = db_path.parent() {
        ensure_directory(parent)?;
    }

    info!(
        artifacts_root = %artifacts_root.display(),
        run_id = %run_id,
        "starting ingest"
    );

    let mut connection = open_store(&db_path)?;
    let parser = CommandResultParser::new(args.parser_command.clone(), args.parser_args.clone());

    let outcome = ingest_run(
        &mut connection,
        &sources,
        &archives_dir,
        &parser,
        args.keep_job_output,
    )?;

    let manifest = IngestRunManifest {
        manifest_version: 1,
        run_id,
        db_schema_version: DB_SCHEMA_VERSION.to_string(),
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_ingest_command(&args),
        paths: IngestPaths {
            artifacts_root: artifacts_root.display().to_string(),
            db_path: db_path.display().to_string(),
            consensus_path: sources.consensus_path.display().to_string(),
            models_dir: sources.models_dir.display().to_string(),
            archives_dir: archives_dir.display().to_string(),
        },
        counts: outcome.counts,
        archives: outcome.archives,
    };

    write_json_pretty(&run_manifest_path, &manifest)?;

    info!(path = %run_manifest_path.display(), "wrote ingest run manifest");
    info!(
        catalog_rows = manifest.counts.catalog_rows_inserted,
        archives = manifest.counts.archives_ingested,
        skipped_archives = manifest.counts.archives_skipped,
        results = manifest.counts.results_inserted,
        "ingest completed"
    );

    Ok(())
}

pub(super) fn render_ingest_command(args: &IngestArgs) -> String {
    let catalog = &args.catalog;
    let mut command = vec![
        "mcc-results".to_string(),
        "ingest".to_string(),
        "--artifacts-root".to_string(),
        catalog.store.artifacts_root.display().to_string(),
    ];

    if let Some(path) = &catalog.store.db_path {
        command.push("--db-path".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &catalog.consensus_path {
        command.push("--consensus-path".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &catalog.models_dir {
        command.push("--models-dir".to_string());
        command.push(path.display().to_string());
    }
    command.push("--model-marker".to_string());
    command.push(catalog.model_marker.clone());
    if catalog.consensus_index_base != IndexBase::One {
        command.push("--consensus-index-base".to_string());
        command.push(catalog.consensus_index_base.as_str().to_string());
    }
    if let Some(path) = &args.archives_dir {
        command.push("--archives-dir".to_string());
        command.push(path.display().to_string());
    }
    command.push("--parser-command".to_string());
    command.push(args.parser_command.display().to_string());
    for arg in &args.parser_args {
        command.push("--parser-arg".to_string());
        command.push(arg.clone());
    }
    if args.keep_job_output {
        command.push("--keep-job-output".to_string());
    }
    if let Some(path) = &args.run_manifest_path {
        command.push("--run-manifest-path".to_string());
        command.push(path.display().to_string());
    }

    command.join(" ")
}

