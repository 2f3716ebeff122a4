use thiserror::Error;

/// Domain failures that abort a command. Surfaced through `anyhow` so callers can
/// add context, and downcast in tests.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("experiment token `{0}` is not in <name>-<strategy> format")]
    MalformedExperimentToken(String),

    #[error("search strategy `{0}` has no `_` separating the successor generator detail")]
    MalformedStrategy(String),

    #[error("experiment not found: name={name} strategy={strategy}")]
    ExperimentNotFound { name: String, strategy: String },

    #[error(
        "result references unknown query instance {model_name}/{query_name}/{query_index}; catalog and archives are out of sync"
    )]
    UnknownQueryInstance {
        model_name: String,
        query_name: String,
        query_index: i64,
    },

    #[error("formula id `{0}` does not match <model>-<query>-[<block>-]<index>")]
    MalformedFormulaId(String),
}
