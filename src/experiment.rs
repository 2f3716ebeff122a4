use rusqlite::{Connection, OptionalExtension, params};

use crate::error::PipelineError;

const BASELINE_NAME_PREFIX: &str = "V2baseline";
const BASELINE_LABEL: &str = "baseline";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExperimentKind {
    Baseline,
    EvenSuccessors,
    FixedSuccessors,
}

/// A verification configuration: a model-checker variant run with one search strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Experiment {
    pub name: String,
    pub strategy: String,
    pub kind: ExperimentKind,
}

impl Experiment {
    pub fn new(name: impl Into<String>, strategy: impl Into<String>) -> Self {
        let name = name.into();
        let strategy = strategy.into();
        let kind = classify(&name, &strategy);
        Self {
            name,
            strategy,
            kind,
        }
    }

    /// Parses a `<name>-<strategy>` token, splitting on the first hyphen.
    pub fn parse(token: &str) -> Result<Self, PipelineError> {
        let (name, strategy) = token
            .split_once('-')
            .ok_or_else(|| PipelineError::MalformedExperimentToken(token.to_string()))?;
        Ok(Self::new(name, strategy))
    }

    pub fn display_strategy(&self) -> Result<String, PipelineError> {
        let tag = match self.kind {
            ExperimentKind::Baseline => return Ok(BASELINE_LABEL.to_string()),
            ExperimentKind::EvenSuccessors => "EVEN-",
            ExperimentKind::FixedSuccessors => "FIX-",
        };

        let (_, detail) = self
            .strategy
            .split_once('_')
            .ok_or_else(|| PipelineError::MalformedStrategy(self.strategy.clone()))?;

        Ok(format!("{tag}{detail}"))
    }
}

pub fn classify(name: &str, strategy: &str) -> ExperimentKind {
    if name.starts_with(BASELINE_NAME_PREFIX) || strategy.eq_ignore_ascii_case("default") {
        ExperimentKind::Baseline
    } else if strategy
        .get(..1)
        .is_some_and(|first| first.eq_ignore_ascii_case("e"))
    {
        ExperimentKind::EvenSuccessors
    } else {
        ExperimentKind::FixedSuccessors
    }
}

/// Looks up an existing experiment row. Never creates one; only ingestion does.
pub fn lookup_id(connection: &Connection, experiment: &Experiment) -> anyhow::Result<i64> {
    let id = connection
        .query_row(
            "SELECT id FROM experiment WHERE name = ?1 AND search_strategy = ?2",
            params![experiment.name, experiment.strategy],
            |row| row.get(0),
        )
        .optional()?;

    id.ok_or_else(|| {
        PipelineError::ExperimentNotFound {
            name: experiment.name.clone(),
            strategy: experiment.strategy.clone(),
        }
        .into()
    })
}
