use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "mcc-results",
    version,
    about = "Ingest model-checking benchmark results into a sqlite store"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the query catalog (if empty) and fold new result archives into the store.
    Ingest(IngestArgs),
    /// Build the query catalog only.
    Catalog(CatalogArgs),
    Status(StatusArgs),
    #[command(subcommand)]
    Report(ReportCommand),
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, default_value = "artifacts")]
    pub artifacts_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

impl StoreArgs {
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.artifacts_root.join("results.db"))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum IndexBase {
    Zero,
    One,
}

impl IndexBase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zero => "zero",
            Self::One => "one",
        }
    }

    /// `None` when the shifted index does not fit in an `i64`.
    pub fn to_one_based(self, index: i64) -> Option<i64> {
        match self {
            Self::Zero => index.checked_add(1),
            Self::One => Some(index),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CatalogArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub consensus_path: Option<PathBuf>,

    #[arg(long)]
    pub models_dir: Option<PathBuf>,

    /// Only consensus rows whose model name contains this marker are used.
    #[arg(long, default_value = "COL")]
    pub model_marker: String,

    #[arg(long, value_enum, default_value_t = IndexBase::One)]
    pub consensus_index_base: IndexBase,
}

impl CatalogArgs {
    pub fn consensus_path(&self) -> PathBuf {
        self.consensus_path
            .clone()
            .unwrap_or_else(|| self.store.artifacts_root.join("consensus-answers.csv"))
    }

    pub fn models_dir(&self) -> PathBuf {
        self.models_dir
            .clone()
            .unwrap_or_else(|| self.store.artifacts_root.join("all-models"))
    }
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    #[arg(long)]
    pub archives_dir: Option<PathBuf>,

    /// Program that turns a job's stdout/stderr (JSON on stdin) into parsed results (JSON on stdout).
    #[arg(long)]
    pub parser_command: PathBuf,

    #[arg(long = "parser-arg")]
    pub parser_args: Vec<String>,

    /// Also store each job's stdout/stderr in extended_result.
    #[arg(long, default_value_t = false)]
    pub keep_job_output: bool,

    #[arg(long)]
    pub run_manifest_path: Option<PathBuf>,
}

impl IngestArgs {
    pub fn artifacts_root(&self) -> &Path {
        &self.catalog.store.artifacts_root
    }

    pub fn archives_dir(&self) -> PathBuf {
        self.archives_dir
            .clone()
            .unwrap_or_else(|| self.artifacts_root().join("packed-results"))
    }
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Metric {
    Time,
    Memory,
}

impl Metric {
    pub fn column(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Memory => "max_memory",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum ReportCommand {
    /// Answered totals with positive/negative splits per experiment.
    Comparison(ComparisonArgs),
    /// Sorted per-experiment values for cactus plots.
    Cactus(CactusArgs),
    /// Sorted per-instance ratios between two experiments.
    Ratio(RatioArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ComparisonArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Experiments in <name>-<strategy> format.
    #[arg(required = true)]
    pub experiments: Vec<String>,

    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CactusArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Instances solved below this by every experiment are dropped from the plot.
    pub lower_threshold: f64,

    #[arg(required = true)]
    pub experiments: Vec<String>,

    #[arg(long)]
    pub category: Option<String>,

    #[arg(long, value_enum, default_value_t = Metric::Time)]
    pub metric: Metric,

    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RatioArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    pub experiment_a: String,

    pub experiment_b: String,

    #[arg(long)]
    pub category: Option<String>,

    #[arg(long, value_enum, default_value_t = Metric::Time)]
    pub metric: Metric,

    #[arg(long)]
    pub output: Option<PathBuf>,
}
