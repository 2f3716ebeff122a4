use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use tracing::info;

use crate::error::PipelineError;
use crate::model::ParsedResult;
use crate::store::{
    ExperimentKey, QueryInstanceKey, load_experiment_ids, load_query_instance_ids,
};

use super::archive::JobOutput;

struct PendingResult {
    experiment_id: i64,
    query_instance_id: i64,
    result: ParsedResult,
    output: Option<Rc<JobOutput>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub experiments_created: usize,
    pub results_inserted: usize,
    pub extended_results_inserted: usize,
    pub archives_marked: usize,
}

/// Resolves parsed results onto experiment and query instance ids and batches the
/// rows. Nothing but new experiments is written until `flush`.
pub struct StoreMerger<'c> {
    connection: &'c Connection,
    keep_job_output: bool,
    experiment_ids: HashMap<ExperimentKey, i64>,
    query_instance_ids: HashMap<QueryInstanceKey, i64>,
    pending: Vec<PendingResult>,
    processed_archives: Vec<String>,
    experiments_created: usize,
}

impl<'c> StoreMerger<'c> {
    pub fn load(connection: &'c Connection, keep_job_output: bool) -> Result<Self> {
        let experiment_ids = load_experiment_ids(connection)?;
        let query_instance_ids = load_query_instance_ids(connection)?;

        info!(
            experiments = experiment_ids.len(),
            query_instances = query_instance_ids.len(),
            "loaded identity maps"
        );

        Ok(Self {
            connection,
            keep_job_output,
            experiment_ids,
            query_instance_ids,
            pending: Vec::new(),
            processed_archives: Vec::new(),
            experiments_created: 0,
        })
    }

    pub fn stage_result(
        &mut self,
        experiment_name: &str,
        result: ParsedResult,
        output: &Rc<JobOutput>,
    ) -> Result<()> {
        let experiment_id = self.resolve_experiment(experiment_name, &result.strategy)?;

        let instance_key = QueryInstanceKey {
            model_name: result.query.model_name.clone(),
            query_name: result.query.query_name.clone(),
            query_index: result.query.query_index,
        };
        let query_instance_id = *self.query_instance_ids.get(&instance_key).ok_or_else(|| {
            PipelineError::UnknownQueryInstance {
                model_name: instance_key.model_name.clone(),
                query_name: instance_key.query_name.clone(),
                query_index: instance_key.query_index,
            }
        })?;

        self.pending.push(PendingResult {
            experiment_id,
            query_instance_id,
            result,
            output: self.keep_job_output.then(|| Rc::clone(output)),
        });

        Ok(())
    }

    pub fn mark_processed(&mut self, archive_name: &str) {
        self.processed_archives.push(archive_name.to_string());
    }

    pub fn is_marked(&self, archive_name: &str) -> bool {
        self.processed_archives
            .iter()
            .any(|name| name == archive_name)
    }

    pub fn pending_results(&self) -> usize {
        self.pending.len()
    }

    /// The only place experiment rows are created.
    fn resolve_experiment(&mut self, name: &str, strategy: &str) -> Result<i64> {
        let key = ExperimentKey {
            name: name.to_string(),
            strategy: strategy.to_string(),
        };
        if let Some(id) = self.experiment_ids.get(&key) {
            return Ok(*id);
        }

        let id: i64 = self
            .connection
            .query_row(
                "INSERT INTO experiment(name, search_strategy) VALUES(?1, ?2) RETURNING id",
                params![key.name, key.strategy],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to create experiment {name}-{strategy}"))?;

        info!(experiment = %name, strategy = %strategy, id, "created experiment");
        self.experiment_ids.insert(key, id);
        self.experiments_created += 1;
        Ok(id)
    }

    /// Writes the batched results and archive markers. The caller owns the
    /// transaction and decides when they become visible.
    pub fn flush(self) -> Result<MergeSummary> {
        let mut summary = MergeSummary {
            experiments_created: self.experiments_created,
            ..MergeSummary::default()
        };

        {
            let mut result_statement = self.connection.prepare(
                "
                INSERT INTO query_result(
                  experiment_id, query_instance_id, time, status, result,
                  max_memory, states, color_reduction_time, verification_time
                )
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ",
            )?;
            let mut extended_statement = self.connection.prepare(
                "INSERT INTO extended_result(query_result_id, stdout, stderr) VALUES(?1, ?2, ?3)",
            )?;

            for pending in &self.pending {
                let result = &pending.result;
                let query_result_id = result_statement
                    .insert(params![
                        pending.experiment_id,
                        pending.query_instance_id,
                        result.time,
                        result.status.as_str(),
                        result.result.map(|verdict| verdict.as_str()),
                        result.max_memory,
                        result.states,
                        result.color_reduction_time,
                        result.verification_time,
                    ])
                    .context("failed to insert query result")?;
                summary.results_inserted += 1;

                if let Some(output) = &pending.output {
                    extended_statement
                        .execute(params![query_result_id, output.stdout, output.stderr])
                        .context("failed to insert extended result")?;
                    summary.extended_results_inserted += 1;
                }
            }
        }

        let mut processed_statement = self
            .connection
            .prepare("INSERT INTO processed_files(file_name) VALUES(?1)")?;
        for archive_name in &self.processed_archives {
            processed_statement
                .execute([archive_name])
                .with_context(|| format!("failed to mark archive {archive_name} as processed"))?;
            summary.archives_marked += 1;
        }

        Ok(summary)
    }
}
