use anyhow::Result;
use rusqlite::{Connection, params_from_iter};
use serde::Serialize;

use super::numbered_placeholders;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnswerSplit {
    pub total: i64,
    pub positive: i64,
    pub negative: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonRow {
    pub experiment: String,
    pub strategy: String,
    pub all: AnswerSplit,
    pub cardinality: AnswerSplit,
    pub fireability: AnswerSplit,
}

/// Answered results per experiment, excluding deadlock queries. An answer is
/// positive when it witnesses a path (`ef` satisfied or `ag` violated).
pub fn comparison_summary(
    connection: &Connection,
    experiment_ids: &[i64],
) -> Result<Vec<ComparisonRow>> {
    if experiment_ids.is_empty() {
        return Ok(Vec::new());
    }

    let positive = "((qi.query_type = 'ef' AND qr.result = 'Satisfied') OR (qi.query_type = 'ag' AND qr.result = 'Unsatisfied'))";
    let negative = "((qi.query_type = 'ag' AND qr.result = 'Satisfied') OR (qi.query_type = 'ef' AND qr.result = 'Unsatisfied'))";
    let cardinality =
        "(qi.query_name = 'ReachabilityCardinality' OR qi.query_name = 'LTLCardinality')";
    let fireability =
        "(qi.query_name = 'ReachabilityFireability' OR qi.query_name = 'LTLFireability')";

    let sql = format!(
        "
        SELECT
          e.name,
          e.search_strategy,
          COUNT(*),
          COUNT(*) FILTER (WHERE {positive}),
          COUNT(*) FILTER (WHERE {negative}),
          COUNT(*) FILTER (WHERE {cardinality}),
          COUNT(*) FILTER (WHERE {positive} AND {cardinality}),
          COUNT(*) FILTER (WHERE {negative} AND {cardinality}),
          COUNT(*) FILTER (WHERE {fireability}),
          COUNT(*) FILTER (WHERE {positive} AND {fireability}),
          COUNT(*) FILTER (WHERE {negative} AND {fireability})
        FROM query_result qr
          JOIN query_instance qi ON qi.id = qr.query_instance_id
          JOIN experiment e ON e.id = qr.experiment_id
        WHERE e.id IN ({ids})
          AND qi.query_name != 'ReachabilityDeadlock'
          AND qr.status = 'Answered'
        GROUP BY qr.experiment_id
        ORDER BY COUNT(*) DESC, e.name ASC
        ",
        ids = numbered_placeholders(1, experiment_ids.len()),
    );

    let mut statement = connection.prepare(&sql)?;
    let rows = statement
        .query_map(params_from_iter(experiment_ids), |row| {
            let split = |offset: usize| -> rusqlite::Result<AnswerSplit> {
                Ok(AnswerSplit {
                    total: row.get(offset)?,
                    positive: row.get(offset + 1)?,
                    negative: row.get(offset + 2)?,
                })
            };

            Ok(ComparisonRow {
                experiment: row.get(0)?,
                strategy: row.get(1)?,
                all: split(2)?,
                cardinality: split(5)?,
                fireability: split(8)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}
