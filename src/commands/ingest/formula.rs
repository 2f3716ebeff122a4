use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use roxmltree::{Document, Node};

use crate::error::PipelineError;
use crate::model::QueryType;

const MCC_NAMESPACE: &str = "http://mcc.lip6.fr/";

/// A `<property>` from a formula file, reduced to what the catalog stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaQuery {
    pub query_name: String,
    pub query_index: i64,
    pub query_type: Option<QueryType>,
}

pub struct FormulaIdParser {
    pattern: Regex,
}

impl FormulaIdParser {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(r"^.+-([^-0-9]+)-([0-9]+-)?([0-9]+)$")
            .context("failed to compile formula id regex")?;
        Ok(Self { pattern })
    }

    /// Splits `<model>-<query>-[<block>-]<index>` into the query name and a 1-based index.
    pub fn parse(&self, id: &str) -> Result<(String, i64), PipelineError> {
        let malformed = || PipelineError::MalformedFormulaId(id.to_string());

        let captures = self.pattern.captures(id).ok_or_else(malformed)?;
        let query_name = captures.get(1).ok_or_else(malformed)?.as_str().to_string();
        let zero_based = captures
            .get(3)
            .ok_or_else(malformed)?
            .as_str()
            .parse::<i64>()
            .map_err(|_| malformed())?;

        Ok((query_name, zero_based + 1))
    }
}

pub fn load_formula_file(path: &Path, ids: &FormulaIdParser) -> Result<Vec<FormulaQuery>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read formula file {}", path.display()))?;
    parse_formula_document(&raw, ids)
        .with_context(|| format!("failed to parse formula file {}", path.display()))
}

pub fn parse_formula_document(raw: &str, ids: &FormulaIdParser) -> Result<Vec<FormulaQuery>> {
    let document = Document::parse(raw).context("invalid formula xml")?;
    let mut out = Vec::new();

    for property in document
        .descendants()
        .filter(|node| is_mcc_element(*node, "property"))
    {
        let id = mcc_children(property, "id")
            .next()
            .and_then(|node| node.text())
            .map(str::trim)
            .context("property without <id>")?;
        let (query_name, query_index) = ids.parse(id)?;

        out.push(FormulaQuery {
            query_name,
            query_index,
            query_type: classify_property(property),
        });
    }

    Ok(out)
}

/// Path quantifier at the top of the property's formula, with one level of
/// negation flipping it.
pub fn classify_property(property: Node<'_, '_>) -> Option<QueryType> {
    let formulas = || mcc_children(property, "formula");

    if formulas().any(|formula| has_mcc_child(formula, "all-paths")) {
        return Some(QueryType::AllPaths);
    }
    if formulas().any(|formula| has_mcc_child(formula, "exists-path")) {
        return Some(QueryType::ExistsPath);
    }

    let negations = || formulas().flat_map(|formula| mcc_children(formula, "negation"));

    if negations().any(|negation| has_mcc_child(negation, "all-paths")) {
        return Some(QueryType::ExistsPath);
    }
    if negations().any(|negation| has_mcc_child(negation, "exists-path")) {
        return Some(QueryType::AllPaths);
    }

    None
}

fn is_mcc_element(node: Node<'_, '_>, local_name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local_name
        && node.tag_name().namespace() == Some(MCC_NAMESPACE)
}

fn mcc_children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    local_name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |child| is_mcc_element(*child, local_name))
}

fn has_mcc_child(node: Node<'_, '_>, local_name: &str) -> bool {
    mcc_children(node, local_name).next().is_some()
}
