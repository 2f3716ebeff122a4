use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use tracing::info;

use crate::cli::{CactusArgs, ComparisonArgs, RatioArgs, ReportCommand, StoreArgs};
use crate::experiment::{Experiment, lookup_id};
use crate::util::{print_json, write_json_pretty};

use super::cactus::{CactusPoint, cactus_points};
use super::comparison::comparison_summary;
use super::ratio::{RatioPoint, ratio_points};

#[derive(Debug, Serialize)]
struct CactusSeries {
    experiment: String,
    strategy: String,
    label: String,
    points: Vec<CactusPoint>,
}

#[derive(Debug, Serialize)]
struct RatioSeries {
    experiment_a: String,
    experiment_b: String,
    points: Vec<RatioPoint>,
}

pub fn run(command: ReportCommand) -> Result<()> {
    match command {
        ReportCommand::Comparison(args) => run_comparison(args),
        ReportCommand::Cactus(args) => run_cactus(args),
        ReportCommand::Ratio(args) => run_ratio(args),
    }
}

fn run_comparison(args: ComparisonArgs) -> Result<()> {
    let connection = open_report_connection(&args.store)?;
    let experiments = resolve_experiments(&connection, &args.experiments)?;
    let ids = experiments.iter().map(|(_, id)| *id).collect::<Vec<_>>();

    let rows = comparison_summary(&connection, &ids)?;
    info!(experiments = ids.len(), rows = rows.len(), "comparison summary ready");

    emit(args.output.as_deref(), &rows)
}

fn run_cactus(args: CactusArgs) -> Result<()> {
    let connection = open_report_connection(&args.store)?;
    let experiments = resolve_experiments(&connection, &args.experiments)?;
    let ids = experiments.iter().map(|(_, id)| *id).collect::<Vec<_>>();

    let mut series = Vec::with_capacity(experiments.len());
    for (experiment, id) in &experiments {
        let points = cactus_points(
            &connection,
            *id,
            &ids,
            args.lower_threshold,
            args.category.as_deref(),
            args.metric,
        )?;
        info!(experiment = %experiment.name, points = points.len(), "cactus series ready");

        series.push(CactusSeries {
            experiment: experiment.name.clone(),
            strategy: experiment.strategy.clone(),
            label: experiment.display_strategy()?,
            points,
        });
    }

    emit(args.output.as_deref(), &series)
}

fn run_ratio(args: RatioArgs) -> Result<()> {
    let connection = open_report_connection(&args.store)?;
    let tokens = [args.experiment_a.clone(), args.experiment_b.clone()];
    let experiments = resolve_experiments(&connection, &tokens)?;
    let (a, a_id) = &experiments[0];
    let (b, b_id) = &experiments[1];

    let points = ratio_points(
        &connection,
        *a_id,
        *b_id,
        args.category.as_deref(),
        args.metric,
    )?;
    info!(experiment_a = %a.name, experiment_b = %b.name, points = points.len(), "ratio series ready");

    emit(
        args.output.as_deref(),
        &RatioSeries {
            experiment_a: args.experiment_a,
            experiment_b: args.experiment_b,
            points,
        },
    )
}

fn open_report_connection(store: &StoreArgs) -> Result<Connection> {
    let db_path = store.db_path();
    Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open {}", db_path.display()))
}

fn resolve_experiments(
    connection: &Connection,
    tokens: &[String],
) -> Result<Vec<(Experiment, i64)>> {
    tokens
        .iter()
        .map(|token| -> Result<(Experiment, i64)> {
            let experiment = Experiment::parse(token)?;
            let id = lookup_id(connection, &experiment)
                .with_context(|| format!("failed to resolve experiment {token}"))?;
            Ok((experiment, id))
        })
        .collect()
}

fn emit<T: Serialize>(output: Option<&Path>, value: &T) -> Result<()> {
    match output {
        Some(path) => {
            write_json_pretty(path, value)?;
            info!(path = %path.display(), "wrote report");
            Ok(())
        }
        None => print_json(value),
    }
}
