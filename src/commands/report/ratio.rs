use std::cmp::Ordering;

use anyhow::Result;
use rusqlite::{Connection, params};
use serde::Serialize;

use crate::cli::Metric;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RatioPoint {
    pub counter: usize,
    pub ratio: f64,
}

/// Ratio of `a` to `b` on one instance, before unbounded values are clamped.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Ratio {
    /// `a` answered, `b` did not (or `a` measured zero).
    Zero,
    Finite(f64),
    /// `b` answered, `a` did not (or `b` measured zero).
    Unbounded,
}

impl Ratio {
    fn between(a: Option<f64>, b: Option<f64>) -> Self {
        match (a, b) {
            (None, None) => Self::Finite(1.0),
            (None, Some(_)) => Self::Unbounded,
            (Some(_), None) => Self::Zero,
            (Some(a), Some(b)) if a == 0.0 && b == 0.0 => Self::Finite(1.0),
            (Some(_), Some(b)) if b == 0.0 => Self::Unbounded,
            (Some(a), Some(_)) if a == 0.0 => Self::Zero,
            (Some(a), Some(b)) => Self::Finite(a / b),
        }
    }

    fn rank(self) -> (u8, f64) {
        match self {
            Self::Zero => (0, 0.0),
            Self::Finite(value) => (1, value),
            Self::Unbounded => (2, 0.0),
        }
    }
}

/// Per-instance ratios between two experiments, sorted ascending. Unbounded ratios
/// are clamped to the largest finite ratio, zero ratios to the smallest.
pub fn ratio_points(
    connection: &Connection,
    experiment_a: i64,
    experiment_b: i64,
    category: Option<&str>,
    metric: Metric,
) -> Result<Vec<RatioPoint>> {
    let sql = format!(
        "
        SELECT
          CASE WHEN qra.result IS NULL THEN NULL ELSE qra.{column} END,
          CASE WHEN qrb.result IS NULL THEN NULL ELSE qrb.{column} END
        FROM query_instance qi
          JOIN query_result qra ON qra.query_instance_id = qi.id
          JOIN query_result qrb ON qrb.query_instance_id = qi.id
        WHERE qra.experiment_id = ?1
          AND qrb.experiment_id = ?2
          AND (?3 IS NULL OR qi.query_name = ?3)
        ",
        column = metric.column(),
    );

    let mut statement = connection.prepare(&sql)?;
    let mut ratios = statement
        .query_map(params![experiment_a, experiment_b, category], |row| {
            Ok(Ratio::between(row.get(0)?, row.get(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    ratios.sort_by(|left, right| {
        let (left_class, left_value) = left.rank();
        let (right_class, right_value) = right.rank();
        left_class
            .cmp(&right_class)
            .then(left_value.partial_cmp(&right_value).unwrap_or(Ordering::Equal))
    });

    let finite = || {
        ratios.iter().filter_map(|ratio| match ratio {
            Ratio::Finite(value) => Some(*value),
            _ => None,
        })
    };
    let largest = finite().fold(None, |acc: Option<f64>, value| {
        Some(acc.map_or(value, |acc| acc.max(value)))
    });
    let smallest_positive = finite()
        .filter(|value| *value > 0.0)
        .fold(None, |acc: Option<f64>, value| {
            Some(acc.map_or(value, |acc| acc.min(value)))
        });

    Ok(ratios
        .iter()
        .enumerate()
        .map(|(counter, ratio)| RatioPoint {
            counter,
            ratio: match ratio {
                Ratio::Zero => smallest_positive.unwrap_or(1.0),
                Ratio::Finite(value) => *value,
                Ratio::Unbounded => largest.unwrap_or(1.0),
            },
        })
        .collect())
}
