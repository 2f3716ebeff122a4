use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum QueryType {
    #[serde(rename = "ag")]
    AllPaths,
    #[serde(rename = "ef")]
    ExistsPath,
}

impl QueryType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllPaths => "ag",
            Self::ExistsPath => "ef",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Satisfied,
    Unsatisfied,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Satisfied => "Satisfied",
            Self::Unsatisfied => "Unsatisfied",
        }
    }

    /// Consensus letters: `T` and `F`, anything else is unknown.
    pub fn from_consensus_letter(letter: &str) -> Option<Self> {
        match letter {
            "T" => Some(Self::Satisfied),
            "F" => Some(Self::Unsatisfied),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Answered,
    Timeout,
    OutOfMemory,
    Error,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Answered => "Answered",
            Self::Timeout => "Timeout",
            Self::OutOfMemory => "OutOfMemory",
            Self::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryInstanceRef {
    pub model_name: String,
    pub query_name: String,
    pub query_index: i64,
}

/// One answer produced by the result parser for a single job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResult {
    pub query: QueryInstanceRef,
    pub strategy: String,
    pub time: f64,
    pub status: RunStatus,
    pub result: Option<Verdict>,
    pub max_memory: f64,
    pub states: Option<i64>,
    pub color_reduction_time: Option<f64>,
    pub verification_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryInstanceRow {
    pub model_name: String,
    pub query_name: String,
    pub query_index: i64,
    pub query_type: Option<QueryType>,
    pub expected_answer: Option<Verdict>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestPaths {
    pub artifacts_root: String,
    pub db_path: String,
    pub consensus_path: String,
    pub models_dir: String,
    pub archives_dir: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestCounts {
    pub catalog_rows_inserted: usize,
    pub archives_seen: usize,
    pub archives_skipped: usize,
    pub archives_ingested: usize,
    pub jobs_parsed: usize,
    pub jobs_skipped: usize,
    pub experiments_created: usize,
    pub results_inserted: usize,
    pub extended_results_inserted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveEntry {
    pub name: String,
    pub filename: String,
    pub sha256: String,
    pub results: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub db_schema_version: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub paths: IngestPaths,
    pub counts: IngestCounts,
    pub archives: Vec<ArchiveEntry>,
}
