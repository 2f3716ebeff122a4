use anyhow::Result;
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use serde::Serialize;

use crate::cli::Metric;

use super::numbered_placeholders;

/// Stand-in for zero measurements so log-scale plots stay finite.
const ZERO_SUBSTITUTE: f64 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CactusPoint {
    pub counter: i64,
    pub value: f64,
}

/// Number of instances every listed experiment measured below `threshold`.
pub fn easy_instance_count(
    connection: &Connection,
    experiment_ids: &[i64],
    threshold: f64,
    metric: Metric,
) -> Result<i64> {
    if experiment_ids.is_empty() {
        return Ok(0);
    }

    let sql = format!(
        "
        SELECT COUNT(*) FROM (
          SELECT query_instance_id
          FROM query_result
          WHERE experiment_id IN ({ids})
          GROUP BY query_instance_id
          HAVING MAX({column}) < ?1 AND COUNT({column}) = COUNT(*)
        )
        ",
        column = metric.column(),
        ids = numbered_placeholders(2, experiment_ids.len()),
    );

    let mut values = vec![Value::Real(threshold)];
    values.extend(experiment_ids.iter().copied().map(Value::Integer));

    let count = connection.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
    Ok(count)
}

/// Sorted answered measurements of one experiment, offset by the instances that
/// every experiment found easy.
pub fn cactus_points(
    connection: &Connection,
    experiment_id: i64,
    all_experiment_ids: &[i64],
    threshold: f64,
    category: Option<&str>,
    metric: Metric,
) -> Result<Vec<CactusPoint>> {
    let skip = easy_instance_count(connection, all_experiment_ids, threshold, metric)?;

    let easy_filter = if all_experiment_ids.is_empty() {
        String::new()
    } else {
        format!(
            "
            AND qr.query_instance_id NOT IN (
              SELECT query_instance_id
              FROM query_result
              WHERE experiment_id IN ({ids})
              GROUP BY query_instance_id
              HAVING MAX({column}) < ?3 AND COUNT({column}) = COUNT(*)
            )
            ",
            column = metric.column(),
            ids = numbered_placeholders(4, all_experiment_ids.len()),
        )
    };

    let sql = format!(
        "
        SELECT qr.{column}
        FROM query_result qr
          JOIN query_instance qi ON qi.id = qr.query_instance_id
        WHERE qr.experiment_id = ?1
          AND qr.status = 'Answered'
          AND qr.{column} IS NOT NULL
          AND qi.query_name != 'ReachabilityDeadlock'
          AND (?2 IS NULL OR qi.query_name = ?2)
          {easy_filter}
        ORDER BY qr.{column}
        ",
        column = metric.column(),
    );

    let mut values = vec![
        Value::Integer(experiment_id),
        category.map_or(Value::Null, |name| Value::Text(name.to_string())),
    ];
    if !all_experiment_ids.is_empty() {
        values.push(Value::Real(threshold));
        values.extend(all_experiment_ids.iter().copied().map(Value::Integer));
    }

    let mut statement = connection.prepare(&sql)?;
    let measurements = statement
        .query_map(params_from_iter(values), |row| row.get::<_, f64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(measurements
        .into_iter()
        .zip(skip..)
        .map(|(value, counter)| CactusPoint {
            counter,
            value: if value == 0.0 { ZERO_SUBSTITUTE } else { value },
        })
        .collect())
}
