use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use tracing::info;

use crate::cli::{CatalogArgs, IndexBase};
use crate::model::{QueryInstanceRow, QueryType};
use crate::store::count_rows;

use super::consensus::read_consensus_answers;
use super::formula::{FormulaIdParser, FormulaQuery, load_formula_file};

pub const DYNAMIC_QUERY_CATEGORIES: [&str; 6] = [
    "ReachabilityCardinality",
    "ReachabilityFireability",
    "LTLCardinality",
    "LTLFireability",
    "CTLCardinality",
    "CTLFireability",
];

pub const NON_DYNAMIC_QUERY_CATEGORIES: [&str; 5] = [
    "ReachabilityDeadlock",
    "OneSafe",
    "Liveness",
    "StableMarking",
    "QuasiLiveness",
];

pub const DEADLOCK_CATEGORY: &str = "ReachabilityDeadlock";

#[derive(Debug, Clone)]
pub struct CatalogSources {
    pub consensus_path: PathBuf,
    pub models_dir: PathBuf,
    pub model_marker: String,
    pub index_base: IndexBase,
}

impl From<&CatalogArgs> for CatalogSources {
    fn from(args: &CatalogArgs) -> Self {
        Self {
            consensus_path: args.consensus_path(),
            models_dir: args.models_dir(),
            model_marker: args.model_marker.clone(),
            index_base: args.consensus_index_base,
        }
    }
}

/// Fills `query_instance` from the consensus answers and formula files.
/// Does nothing when the table already has rows. Returns the number of rows inserted.
pub fn build_catalog(connection: &Connection, sources: &CatalogSources) -> Result<usize> {
    let existing = count_rows(connection, "query_instance")?;
    if existing > 0 {
        info!(
            query_instances = existing,
            "query instances already exist, skipping catalog build"
        );
        return Ok(0);
    }

    let rows = collect_catalog_rows(sources)?;
    insert_query_instances(connection, &rows)?;

    info!(query_instances = rows.len(), "query catalog built");
    Ok(rows.len())
}

fn collect_catalog_rows(sources: &CatalogSources) -> Result<Vec<QueryInstanceRow>> {
    let ids = FormulaIdParser::new()?;
    let mut formulas = FormulaCache::new(&sources.models_dir, &ids);
    let mut known_models = HashSet::<String>::new();
    let mut rows = Vec::new();

    let answers = read_consensus_answers(&sources.consensus_path, sources.index_base)?;
    for answer in answers
        .into_iter()
        .filter(|answer| answer.model_name.contains(&sources.model_marker))
    {
        known_models.insert(answer.model_name.clone());

        let mut query_type = None;
        if DYNAMIC_QUERY_CATEGORIES.contains(&answer.category.as_str()) {
            let queries = formulas.get(&answer.model_name, &answer.category)?;
            query_type = usize::try_from(answer.index - 1)
                .ok()
                .and_then(|position| queries.get(position))
                .and_then(|query| query.query_type);
        }
        if answer.category == DEADLOCK_CATEGORY {
            query_type = Some(QueryType::ExistsPath);
        }

        rows.push(QueryInstanceRow {
            model_name: answer.model_name,
            query_name: answer.category,
            query_index: answer.index,
            query_type,
            expected_answer: answer.verdict,
        });
    }

    for model_name in list_model_directories(&sources.models_dir)? {
        if known_models.contains(&model_name) {
            continue;
        }

        for category in DYNAMIC_QUERY_CATEGORIES {
            for query in formulas.get(&model_name, category)? {
                rows.push(QueryInstanceRow {
                    model_name: model_name.clone(),
                    query_name: category.to_string(),
                    query_index: query.query_index,
                    query_type: query.query_type,
                    expected_answer: None,
                });
            }
        }

        for category in NON_DYNAMIC_QUERY_CATEGORIES {
            rows.push(QueryInstanceRow {
                model_name: model_name.clone(),
                query_name: category.to_string(),
                query_index: 1,
                query_type: (category == DEADLOCK_CATEGORY).then_some(QueryType::ExistsPath),
                expected_answer: None,
            });
        }
    }

    Ok(rows)
}

/// Parsed formula files keyed by `(model, category)`, each file read at most once.
struct FormulaCache<'a> {
    models_dir: &'a Path,
    ids: &'a FormulaIdParser,
    files: HashMap<(String, String), Vec<FormulaQuery>>,
}

impl<'a> FormulaCache<'a> {
    fn new(models_dir: &'a Path, ids: &'a FormulaIdParser) -> Self {
        Self {
            models_dir,
            ids,
            files: HashMap::new(),
        }
    }

    fn get(&mut self, model_name: &str, category: &str) -> Result<&[FormulaQuery]> {
        let key = (model_name.to_string(), category.to_string());
        let queries = match self.files.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = self
                    .models_dir
                    .join(model_name)
                    .join(format!("{category}.xml"));
                entry.insert(load_formula_file(&path, self.ids)?)
            }
        };

        Ok(queries.as_slice())
    }
}

fn list_model_directories(models_dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(models_dir)
        .with_context(|| format!("failed to read {}", models_dir.display()))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", models_dir.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_dir()
        {
            continue;
        }

        let name = entry
            .file_name()
            .to_str()
            .map(ToOwned::to_owned)
            .with_context(|| format!("invalid UTF-8 model directory: {}", path.display()))?;
        names.push(name);
    }

    names.sort();
    Ok(names)
}

fn insert_query_instances(connection: &Connection, rows: &[QueryInstanceRow]) -> Result<()> {
    let mut statement = connection.prepare(
        "
        INSERT INTO query_instance(model_name, query_name, query_index, query_type, expected_answer)
        VALUES(?1, ?2, ?3, ?4, ?5)
        ",
    )?;

    for row in rows {
        statement
            .execute(params![
                row.model_name,
                row.query_name,
                row.query_index,
                row.query_type.map(QueryType::as_str),
                row.expected_answer.map(|verdict| verdict.as_str()),
            ])
            .with_context(|| {
                format!(
                    "failed to insert query instance {}/{}/{}",
                    row.model_name, row.query_name, row.query_index
                )
            })?;
    }

    Ok(())
}
