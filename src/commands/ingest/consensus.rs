use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::cli::IndexBase;
use crate::model::Verdict;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusAnswer {
    pub model_name: String,
    pub category: String,
    /// 1-based position of the formula in the category file.
    pub index: i64,
    pub verdict: Option<Verdict>,
}

pub fn read_consensus_answers(path: &Path, index_base: IndexBase) -> Result<Vec<ConsensusAnswer>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open consensus answers {}", path.display()))?;

    let mut answers = Vec::new();
    for (row_number, record) in reader.records().enumerate() {
        let record = record.with_context(|| {
            format!(
                "failed to read row {} of {}",
                row_number + 1,
                path.display()
            )
        })?;

        if record.len() < 4 {
            bail!(
                "consensus row {} of {} has {} columns, expected 4",
                row_number + 1,
                path.display(),
                record.len()
            );
        }

        let index = record[2].trim().parse::<i64>().with_context(|| {
            format!(
                "invalid query index `{}` on consensus row {}",
                &record[2],
                row_number + 1
            )
        })?;

        let index = index_base.to_one_based(index).with_context(|| {
            format!(
                "query index `{}` on consensus row {} is out of range",
                &record[2],
                row_number + 1
            )
        })?;

        answers.push(ConsensusAnswer {
            model_name: record[0].to_string(),
            category: record[1].to_string(),
            index,
            verdict: Verdict::from_consensus_letter(record[3].trim()),
        });
    }

    Ok(answers)
}
