use std::fs::{self, File};
use std::path::PathBuf;

use anyhow::{Result, bail};
use rusqlite::{Connection, params};
use tempfile::TempDir;

use super::archive::{discover_archives, read_archive};
use super::catalog::{CatalogSources, DYNAMIC_QUERY_CATEGORIES, build_catalog};
use super::consensus::read_consensus_answers;
use super::formula::{FormulaIdParser, parse_formula_document};
use super::parser::{CommandResultParser, ResultParser};
use super::pipeline::{ingest_directory, ingest_run};
use super::run::render_ingest_command;
use crate::cli::{CatalogArgs, IndexBase, IngestArgs, StoreArgs};
use crate::error::PipelineError;
use crate::model::{ParsedResult, QueryInstanceRef, QueryType, RunStatus, Verdict};
use crate::store::{count_rows, open_store};

const MCC_NAMESPACE: &str = "http://mcc.lip6.fr/";
const AG: &str = "<all-paths><globally><is-fireable><transition>t1</transition></is-fireable></globally></all-paths>";
const EF: &str = "<exists-path><finally><is-fireable><transition>t1</transition></is-fireable></finally></exists-path>";
const NOT_AG: &str = "<negation><all-paths><globally><is-fireable><transition>t2</transition></is-fireable></globally></all-paths></negation>";
const NOT_EF: &str = "<negation><exists-path><finally><is-fireable><transition>t2</transition></is-fireable></finally></exists-path></negation>";
const PLAIN: &str = "<integer-le><integer-constant>1</integer-constant><integer-constant>2</integer-constant></integer-le>";

fn formula_document(model: &str, category: &str, bodies: &[&str]) -> String {
    let properties = bodies
        .iter()
        .enumerate()
        .map(|(index, body)| {
            format!(
                "<property><id>{model}-{category}-2024-{index:02}</id><description>generated</description><formula>{body}</formula></property>"
            )
        })
        .collect::<String>();
    format!(
        "<?xml version=\"1.0\"?>\n<property-set xmlns=\"{MCC_NAMESPACE}\">{properties}</property-set>\n"
    )
}

/// One result per stdout line: `<model> <query> <index> <strategy> <status> <verdict|-> <time>`.
fn line_parser(stdout: &str, _stderr: &str, large_job: bool) -> Result<Vec<ParsedResult>> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| -> Result<ParsedResult> {
            let fields = line.split_whitespace().collect::<Vec<_>>();
            if fields.len() != 7 {
                bail!("unexpected result line: {line}");
            }
            let time = fields[6].parse::<f64>()?;

            Ok(ParsedResult {
                query: QueryInstanceRef {
                    model_name: fields[0].to_string(),
                    query_name: fields[1].to_string(),
                    query_index: fields[2].parse()?,
                },
                strategy: fields[3].to_string(),
                time,
                status: match fields[4] {
                    "Answered" => RunStatus::Answered,
                    "Timeout" => RunStatus::Timeout,
                    _ => RunStatus::Error,
                },
                result: match fields[5] {
                    "Satisfied" => Some(Verdict::Satisfied),
                    "Unsatisfied" => Some(Verdict::Unsatisfied),
                    _ => None,
                },
                max_memory: if large_job { 2048.0 } else { 64.0 },
                states: Some(42),
                color_reduction_time: None,
                verification_time: Some(time),
            })
        })
        .collect()
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        let fixture = Self { dir };
        fs::create_dir_all(fixture.models_dir()).expect("create models dir");
        fs::create_dir_all(fixture.archives_dir()).expect("create archives dir");
        fixture
    }

    fn models_dir(&self) -> PathBuf {
        self.dir.path().join("all-models")
    }

    fn archives_dir(&self) -> PathBuf {
        self.dir.path().join("packed-results")
    }

    fn consensus_path(&self) -> PathBuf {
        self.dir.path().join("consensus-answers.csv")
    }

    fn sources(&self) -> CatalogSources {
        CatalogSources {
            consensus_path: self.consensus_path(),
            models_dir: self.models_dir(),
            model_marker: "COL".to_string(),
            index_base: IndexBase::One,
        }
    }

    fn open(&self) -> Connection {
        open_store(&self.dir.path().join("results.db")).expect("open store")
    }

    fn write_consensus(&self, rows: &[&str]) {
        fs::write(self.consensus_path(), rows.join("\n")).expect("write consensus");
    }

    fn write_formulas(&self, model: &str, category: &str, bodies: &[&str]) {
        let model_dir = self.models_dir().join(model);
        fs::create_dir_all(&model_dir).expect("create model dir");
        fs::write(
            model_dir.join(format!("{category}.xml")),
            formula_document(model, category, bodies),
        )
        .expect("write formulas");
    }

    fn write_all_formulas(&self, model: &str, bodies: &[&str]) {
        for category in DYNAMIC_QUERY_CATEGORIES {
            self.write_formulas(model, category, bodies);
        }
    }

    fn write_archive(&self, filename: &str, entries: &[(&str, &str)]) {
        let file = File::create(self.archives_dir().join(filename)).expect("create archive");
        let mut builder = tar::Builder::new(file);
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            builder
                .append_data(&mut header, name, content.as_bytes())
                .expect("append archive entry");
        }
        builder.finish().expect("finish archive");
    }

    /// M1-COL-00 with an existential third ReachabilityCardinality formula, answered T.
    fn seed_example_catalog(&self) {
        self.write_formulas("M1-COL-00", "ReachabilityCardinality", &[AG, NOT_EF, EF]);
        self.write_consensus(&["M1-COL-00,ReachabilityCardinality,3,T"]);
    }
}

fn pipeline_error(err: &anyhow::Error) -> Option<&PipelineError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
}

fn table_counts(connection: &Connection) -> Vec<i64> {
    ["experiment", "query_instance", "query_result", "processed_files"]
        .iter()
        .map(|table| count_rows(connection, table).expect("count rows"))
        .collect()
}

#[test]
fn formula_id_parser_extracts_query_name_and_one_based_index() {
    let ids = FormulaIdParser::new().unwrap();

    assert_eq!(
        ids.parse("AirplaneLD-COL-0010-ReachabilityCardinality-2024-03")
            .unwrap(),
        ("ReachabilityCardinality".to_string(), 4)
    );
    assert_eq!(
        ids.parse("Philosophers-COL-000005-LTLFireability-0").unwrap(),
        ("LTLFireability".to_string(), 1)
    );
}

#[test]
fn formula_id_parser_rejects_ids_outside_the_grammar() {
    let ids = FormulaIdParser::new().unwrap();

    for id in ["ReachabilityCardinality", "Model-COL-Query-", "Model-Query-12a"] {
        assert!(
            matches!(ids.parse(id), Err(PipelineError::MalformedFormulaId(ref raw)) if raw == id),
            "{id} should be rejected"
        );
    }
}

#[test]
fn quantifier_classification_flips_under_negation() {
    let ids = FormulaIdParser::new().unwrap();
    let raw = formula_document(
        "M1-COL-00",
        "CTLCardinality",
        &[AG, EF, NOT_AG, NOT_EF, PLAIN],
    );

    let queries = parse_formula_document(&raw, &ids).unwrap();
    let types = queries
        .iter()
        .map(|query| query.query_type)
        .collect::<Vec<_>>();
    assert_eq!(
        types,
        vec![
            Some(QueryType::AllPaths),
            Some(QueryType::ExistsPath),
            Some(QueryType::ExistsPath),
            Some(QueryType::AllPaths),
            None,
        ]
    );
    assert_eq!(
        queries.iter().map(|query| query.query_index).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );
}

#[test]
fn quantifier_classification_ignores_elements_outside_the_namespace() {
    let ids = FormulaIdParser::new().unwrap();
    let raw = "<property-set xmlns=\"http://example.org/\"><property><id>M-COL-Q-0</id><formula><all-paths/></formula></property></property-set>";

    assert!(parse_formula_document(raw, &ids).unwrap().is_empty());
}

#[test]
fn consensus_reader_maps_verdict_letters_and_index_base() {
    let fixture = Fixture::new();
    fixture.write_consensus(&[
        "M1-COL-00,ReachabilityCardinality,3,T",
        "M1-COL-00,ReachabilityFireability,0,F",
        "M1-COL-00,LTLCardinality,7,?",
    ]);

    let answers = read_consensus_answers(&fixture.consensus_path(), IndexBase::One).unwrap();
    assert_eq!(answers.len(), 3);
    assert_eq!(answers[0].index, 3);
    assert_eq!(answers[0].verdict, Some(Verdict::Satisfied));
    assert_eq!(answers[1].verdict, Some(Verdict::Unsatisfied));
    assert_eq!(answers[2].verdict, None);

    let zero_based = read_consensus_answers(&fixture.consensus_path(), IndexBase::Zero).unwrap();
    assert_eq!(zero_based[0].index, 4);
    assert_eq!(zero_based[1].index, 1);
}

#[test]
fn consensus_reader_rejects_index_that_overflows_when_shifted() {
    let fixture = Fixture::new();
    fixture.write_consensus(&["M1-COL-00,ReachabilityCardinality,9223372036854775807,T"]);

    let one_based = read_consensus_answers(&fixture.consensus_path(), IndexBase::One).unwrap();
    assert_eq!(one_based[0].index, i64::MAX);

    let err = read_consensus_answers(&fixture.consensus_path(), IndexBase::Zero).unwrap_err();
    assert!(err.to_string().contains("out of range"));
}

#[test]
fn consensus_reader_rejects_short_rows() {
    let fixture = Fixture::new();
    fixture.write_consensus(&["M1-COL-00,ReachabilityCardinality,3"]);

    let err = read_consensus_answers(&fixture.consensus_path(), IndexBase::One).unwrap_err();
    assert!(err.to_string().contains("expected 4"));
}

#[test]
fn catalog_attaches_consensus_answer_and_formula_type() {
    let fixture = Fixture::new();
    fixture.seed_example_catalog();
    fixture.write_consensus(&[
        "M1-COL-00,ReachabilityCardinality,3,T",
        "M1-COL-00,ReachabilityDeadlock,1,F",
        "M1-COL-00,OneSafe,1,T",
        "M2-PT-00,ReachabilityCardinality,1,T",
    ]);
    let connection = fixture.open();

    let inserted = build_catalog(&connection, &fixture.sources()).unwrap();
    assert_eq!(inserted, 3);

    let row = connection
        .query_row(
            "
            SELECT query_type, expected_answer FROM query_instance
            WHERE model_name = 'M1-COL-00' AND query_name = 'ReachabilityCardinality' AND query_index = 3
            ",
            [],
            |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .unwrap();
    assert_eq!(row, (Some("ef".to_string()), Some("Satisfied".to_string())));

    let deadlock_type: Option<String> = connection
        .query_row(
            "SELECT query_type FROM query_instance WHERE query_name = 'ReachabilityDeadlock'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(deadlock_type.as_deref(), Some("ef"));

    let one_safe_type: Option<String> = connection
        .query_row(
            "SELECT query_type FROM query_instance WHERE query_name = 'OneSafe'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(one_safe_type, None);

    let unmarked: i64 = connection
        .query_row(
            "SELECT COUNT(*) FROM query_instance WHERE model_name = 'M2-PT-00'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(unmarked, 0);
}

#[test]
fn catalog_leaves_type_empty_when_consensus_index_exceeds_formulas() {
    let fixture = Fixture::new();
    fixture.seed_example_catalog();
    fixture.write_consensus(&["M1-COL-00,ReachabilityCardinality,9,F"]);
    let connection = fixture.open();

    build_catalog(&connection, &fixture.sources()).unwrap();

    let query_type: Option<String> = connection
        .query_row("SELECT query_type FROM query_instance", [], |row| row.get(0))
        .unwrap();
    assert_eq!(query_type, None);
}

#[test]
fn catalog_enumerates_models_missing_from_consensus() {
    let fixture = Fixture::new();
    fixture.seed_example_catalog();
    fixture.write_all_formulas("M3-COL-01", &[EF, NOT_EF]);
    fs::write(fixture.models_dir().join("README"), "not a model").unwrap();
    let connection = fixture.open();

    let inserted = build_catalog(&connection, &fixture.sources()).unwrap();
    assert_eq!(inserted, 1 + DYNAMIC_QUERY_CATEGORIES.len() * 2 + 5);

    let rows = connection
        .prepare(
            "
            SELECT query_name, query_index, query_type, expected_answer FROM query_instance
            WHERE model_name = 'M3-COL-01' AND query_name IN ('LTLFireability', 'ReachabilityDeadlock', 'Liveness')
            ORDER BY query_name, query_index
            ",
        )
        .unwrap()
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap();

    assert_eq!(
        rows,
        vec![
            ("LTLFireability".to_string(), 1, Some("ef".to_string()), None),
            ("LTLFireability".to_string(), 2, Some("ag".to_string()), None),
            ("Liveness".to_string(), 1, None, None),
            ("ReachabilityDeadlock".to_string(), 1, Some("ef".to_string()), None),
        ]
    );
}

#[test]
fn catalog_build_is_a_noop_once_populated() {
    let fixture = Fixture::new();
    fixture.seed_example_catalog();
    fixture.write_all_formulas("M3-COL-01", &[AG]);
    let connection = fixture.open();

    let first = build_catalog(&connection, &fixture.sources()).unwrap();
    let count = count_rows(&connection, "query_instance").unwrap();

    fixture.write_all_formulas("M4-COL-02", &[AG]);
    let second = build_catalog(&connection, &fixture.sources()).unwrap();

    assert!(first > 0);
    assert_eq!(second, 0);
    assert_eq!(count_rows(&connection, "query_instance").unwrap(), count);
}

#[test]
fn catalog_rejects_malformed_formula_ids() {
    let fixture = Fixture::new();
    fixture.seed_example_catalog();
    fixture.write_all_formulas("M3-COL-01", &[AG]);
    fs::write(
        fixture
            .models_dir()
            .join("M3-COL-01")
            .join("CTLFireability.xml"),
        format!(
            "<property-set xmlns=\"{MCC_NAMESPACE}\"><property><id>broken</id><formula>{AG}</formula></property></property-set>"
        ),
    )
    .unwrap();
    let connection = fixture.open();

    let err = build_catalog(&connection, &fixture.sources()).unwrap_err();
    assert!(matches!(
        pipeline_error(&err),
        Some(PipelineError::MalformedFormulaId(id)) if id == "broken"
    ));
}

#[test]
fn read_archive_pairs_outputs_and_skips_jobs_without_error_file() {
    let fixture = Fixture::new();
    fixture.write_archive(
        "run1.tar",
        &[
            ("job-a.out", "a stdout"),
            ("job-a.err", "a stderr"),
            ("job-b.out", "b stdout"),
            ("notes.txt", "ignored"),
        ],
    );

    let jobs = read_archive(&fixture.archives_dir().join("run1.tar")).unwrap();
    assert!(!jobs.large_job);
    assert_eq!(jobs.skipped_jobs, 1);
    assert_eq!(jobs.jobs.len(), 1);
    assert_eq!(jobs.jobs[0].job, "job-a");
    assert_eq!(jobs.jobs[0].stdout, "a stdout");
    assert_eq!(jobs.jobs[0].stderr, "a stderr");
}

#[test]
fn read_archive_detects_large_job_marker() {
    let fixture = Fixture::new();
    fixture.write_archive(
        "run1.tar",
        &[("job.out", ""), ("job.err", ""), ("run1.large", "")],
    );

    let jobs = read_archive(&fixture.archives_dir().join("run1.tar")).unwrap();
    assert!(jobs.large_job);
}

#[test]
fn discover_archives_uses_name_before_first_dot() {
    let fixture = Fixture::new();
    fixture.write_archive("ExplicitCPN.v2.tar", &[]);
    fixture.write_archive("Baseline.tar", &[]);
    fs::write(fixture.archives_dir().join("notes.txt"), "").unwrap();

    let archives = discover_archives(&fixture.archives_dir()).unwrap();
    let names = archives
        .iter()
        .map(|archive| archive.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Baseline", "ExplicitCPN"]);
}

#[test]
fn ingest_example_archive_once_and_rerun_adds_nothing() {
    let fixture = Fixture::new();
    fixture.seed_example_catalog();
    fixture.write_archive(
        "run1.tar",
        &[
            (
                "job.out",
                "M1-COL-00 ReachabilityCardinality 3 default Answered Satisfied 1.23",
            ),
            ("job.err", ""),
        ],
    );
    let mut connection = fixture.open();

    let first = ingest_run(
        &mut connection,
        &fixture.sources(),
        &fixture.archives_dir(),
        &line_parser,
        false,
    )
    .unwrap();
    assert_eq!(first.counts.results_inserted, 1);
    assert_eq!(first.counts.archives_ingested, 1);
    assert_eq!(first.counts.experiments_created, 1);
    assert_eq!(first.archives[0].name, "run1");
    assert_eq!(first.archives[0].sha256.len(), 64);

    let (name, strategy, status, result, time): (String, String, String, Option<String>, f64) =
        connection
            .query_row(
                "
                SELECT e.name, e.search_strategy, qr.status, qr.result, qr.time
                FROM query_result qr JOIN experiment e ON e.id = qr.experiment_id
                ",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .unwrap();
    assert_eq!(name, "run1");
    assert_eq!(strategy, "default");
    assert_eq!(status, "Answered");
    assert_eq!(result.as_deref(), Some("Satisfied"));
    assert!((time - 1.23).abs() < f64::EPSILON);

    let processed: String = connection
        .query_row("SELECT file_name FROM processed_files", [], |row| row.get(0))
        .unwrap();
    assert_eq!(processed, "run1");

    let counts = table_counts(&connection);
    let second = ingest_run(
        &mut connection,
        &fixture.sources(),
        &fixture.archives_dir(),
        &line_parser,
        false,
    )
    .unwrap();
    assert_eq!(second.counts.archives_skipped, 1);
    assert_eq!(second.counts.results_inserted, 0);
    assert_eq!(second.counts.catalog_rows_inserted, 0);
    assert_eq!(table_counts(&connection), counts);
}

#[test]
fn ingest_only_folds_in_new_archives() {
    let fixture = Fixture::new();
    fixture.seed_example_catalog();
    fixture.write_archive(
        "run1.tar",
        &[
            (
                "job.out",
                "M1-COL-00 ReachabilityCardinality 3 default Answered Satisfied 1.23",
            ),
            ("job.err", ""),
        ],
    );
    let mut connection = fixture.open();
    ingest_run(
        &mut connection,
        &fixture.sources(),
        &fixture.archives_dir(),
        &line_parser,
        false,
    )
    .unwrap();

    let snapshot = |connection: &Connection| {
        connection
            .query_row(
                "SELECT id, experiment_id, query_instance_id, time, status, result FROM query_result WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .unwrap()
    };
    let before = snapshot(&connection);

    fixture.write_archive(
        "run2.tar",
        &[
            (
                "job.out",
                "M1-COL-00 ReachabilityCardinality 3 default Timeout - 3600",
            ),
            ("job.err", "killed"),
        ],
    );
    let outcome = ingest_run(
        &mut connection,
        &fixture.sources(),
        &fixture.archives_dir(),
        &line_parser,
        false,
    )
    .unwrap();

    assert_eq!(outcome.counts.archives_skipped, 1);
    assert_eq!(outcome.counts.archives_ingested, 1);
    assert_eq!(outcome.counts.results_inserted, 1);
    assert_eq!(count_rows(&connection, "query_result").unwrap(), 2);
    assert_eq!(count_rows(&connection, "processed_files").unwrap(), 2);
    assert_eq!(snapshot(&connection), before);
}

#[test]
fn job_without_error_file_yields_no_results() {
    let fixture = Fixture::new();
    fixture.seed_example_catalog();
    fixture.write_archive(
        "run1.tar",
        &[(
            "job.out",
            "M1-COL-00 ReachabilityCardinality 3 default Answered Satisfied 1.23",
        )],
    );
    let mut connection = fixture.open();

    let outcome = ingest_run(
        &mut connection,
        &fixture.sources(),
        &fixture.archives_dir(),
        &line_parser,
        false,
    )
    .unwrap();

    assert_eq!(outcome.counts.jobs_skipped, 1);
    assert_eq!(outcome.counts.results_inserted, 0);
    assert_eq!(count_rows(&connection, "query_result").unwrap(), 0);
    assert_eq!(count_rows(&connection, "processed_files").unwrap(), 1);
}

#[test]
fn unknown_query_instance_aborts_run_without_partial_commit() {
    let fixture = Fixture::new();
    fixture.seed_example_catalog();
    fixture.write_archive(
        "a-good.tar",
        &[
            (
                "job.out",
                "M1-COL-00 ReachabilityCardinality 3 default Answered Satisfied 1.23",
            ),
            ("job.err", ""),
        ],
    );
    fixture.write_archive(
        "b-bad.tar",
        &[
            (
                "job.out",
                "M9-COL-99 ReachabilityCardinality 1 default Answered Satisfied 0.5",
            ),
            ("job.err", ""),
        ],
    );
    let mut connection = fixture.open();

    let err = ingest_run(
        &mut connection,
        &fixture.sources(),
        &fixture.archives_dir(),
        &line_parser,
        false,
    )
    .unwrap_err();

    assert!(matches!(
        pipeline_error(&err),
        Some(PipelineError::UnknownQueryInstance { model_name, .. }) if model_name == "M9-COL-99"
    ));
    assert_eq!(table_counts(&connection), vec![0, 0, 0, 0]);
}

#[test]
fn one_job_may_answer_several_queries_across_strategies() {
    let fixture = Fixture::new();
    fixture.seed_example_catalog();
    fixture.write_archive(
        "ExplicitCPN.tar",
        &[
            (
                "job.out",
                "M1-COL-00 ReachabilityCardinality 3 Even_RDFS Answered Satisfied 0.5\nM1-COL-00 ReachabilityCardinality 3 Fix_BestFS Answered Satisfied 0.7\nM1-COL-00 ReachabilityCardinality 3 Even_RDFS Error - 0.1",
            ),
            ("job.err", ""),
        ],
    );
    let mut connection = fixture.open();

    let outcome = ingest_run(
        &mut connection,
        &fixture.sources(),
        &fixture.archives_dir(),
        &line_parser,
        false,
    )
    .unwrap();

    assert_eq!(outcome.counts.results_inserted, 3);
    assert_eq!(outcome.counts.experiments_created, 2);
    let strategies = connection
        .prepare("SELECT search_strategy FROM experiment WHERE name = 'ExplicitCPN' ORDER BY search_strategy")
        .unwrap()
        .query_map([], |row| row.get::<_, String>(0))
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(strategies, vec!["Even_RDFS", "Fix_BestFS"]);
}

#[test]
fn large_job_hint_reaches_parser() {
    let fixture = Fixture::new();
    fixture.seed_example_catalog();
    fixture.write_archive(
        "run1.tar",
        &[
            (
                "job.out",
                "M1-COL-00 ReachabilityCardinality 3 default Answered Satisfied 1.0",
            ),
            ("job.err", ""),
            ("marker.large", ""),
        ],
    );
    let mut connection = fixture.open();

    ingest_run(
        &mut connection,
        &fixture.sources(),
        &fixture.archives_dir(),
        &line_parser,
        false,
    )
    .unwrap();

    let max_memory: f64 = connection
        .query_row("SELECT max_memory FROM query_result", [], |row| row.get(0))
        .unwrap();
    assert!((max_memory - 2048.0).abs() < f64::EPSILON);
}

#[test]
fn keep_job_output_stores_extended_results() {
    let fixture = Fixture::new();
    fixture.seed_example_catalog();
    fixture.write_archive(
        "run1.tar",
        &[
            (
                "job.out",
                "M1-COL-00 ReachabilityCardinality 3 default Answered Satisfied 1.0",
            ),
            ("job.err", "peak rss 64MB"),
        ],
    );
    let connection = fixture.open();
    build_catalog(&connection, &fixture.sources()).unwrap();

    let outcome = ingest_directory(&connection, &fixture.archives_dir(), &line_parser, true).unwrap();
    assert_eq!(outcome.counts.extended_results_inserted, 1);

    let (query_result_id, stderr): (i64, String) = connection
        .query_row(
            "SELECT query_result_id, stderr FROM extended_result",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    let result_id: i64 = connection
        .query_row("SELECT id FROM query_result", [], |row| row.get(0))
        .unwrap();
    assert_eq!(query_result_id, result_id);
    assert_eq!(stderr, "peak rss 64MB");
}

#[test]
fn existing_experiments_are_reused_across_runs() {
    let fixture = Fixture::new();
    fixture.seed_example_catalog();
    let line = "M1-COL-00 ReachabilityCardinality 3 default Answered Satisfied 1.0";
    fixture.write_archive("run1.tar", &[("job.out", line), ("job.err", "")]);
    let mut connection = fixture.open();
    connection
        .execute(
            "INSERT INTO experiment(name, search_strategy) VALUES(?1, ?2)",
            params!["run1", "default"],
        )
        .unwrap();

    let outcome = ingest_run(
        &mut connection,
        &fixture.sources(),
        &fixture.archives_dir(),
        &line_parser,
        false,
    )
    .unwrap();

    assert_eq!(outcome.counts.experiments_created, 0);
    assert_eq!(count_rows(&connection, "experiment").unwrap(), 1);
}

#[test]
fn render_ingest_command_includes_optional_flags() {
    let args = IngestArgs {
        catalog: CatalogArgs {
            store: StoreArgs {
                artifacts_root: PathBuf::from("artifacts"),
                db_path: None,
            },
            consensus_path: None,
            models_dir: Some(PathBuf::from("models")),
            model_marker: "COL".to_string(),
            consensus_index_base: IndexBase::Zero,
        },
        archives_dir: None,
        parser_command: PathBuf::from("parse-results"),
        parser_args: vec!["--strict".to_string()],
        keep_job_output: true,
        run_manifest_path: None,
    };

    let command = render_ingest_command(&args);
    assert!(command.starts_with("mcc-results ingest --artifacts-root artifacts"));
    assert!(command.contains("--models-dir models"));
    assert!(command.contains("--consensus-index-base zero"));
    assert!(command.contains("--parser-command parse-results --parser-arg --strict"));
    assert!(command.contains("--keep-job-output"));
    assert!(!command.contains("--db-path"));
}

fn shell_parser(script: &str, extra_args: &[&str]) -> CommandResultParser {
    let mut args = vec!["-c".to_string(), script.to_string(), "sh".to_string()];
    args.extend(extra_args.iter().map(|arg| arg.to_string()));
    CommandResultParser::new(PathBuf::from("sh"), args)
}

const PARSED_RESULT_JSON: &str = r#"[{"query":{"model_name":"M1-COL-00","query_name":"ReachabilityCardinality","query_index":3},"strategy":"Even_RDFS","time":1.5,"status":"Answered","result":"Satisfied","max_memory":64.0,"states":10,"color_reduction_time":null,"verification_time":0.5}]"#;

#[test]
fn command_parser_sends_request_and_reads_results() {
    let dir = tempfile::tempdir().unwrap();
    let request_path = dir.path().join("request.json");
    let parser = shell_parser(
        r#"cat > "$1"; printf '%s' "$2""#,
        &[request_path.to_str().unwrap(), PARSED_RESULT_JSON],
    );

    let results = parser.parse("job stdout", "job stderr", true).unwrap();
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.query.model_name, "M1-COL-00");
    assert_eq!(result.query.query_index, 3);
    assert_eq!(result.strategy, "Even_RDFS");
    assert_eq!(result.status, RunStatus::Answered);
    assert_eq!(result.result, Some(Verdict::Satisfied));
    assert_eq!(result.states, Some(10));
    assert_eq!(result.color_reduction_time, None);

    let request: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&request_path).unwrap()).unwrap();
    assert_eq!(
        request,
        serde_json::json!({
            "stdout": "job stdout",
            "stderr": "job stderr",
            "large_job": true,
        })
    );
}

#[test]
fn command_parser_treats_blank_output_as_no_results() {
    let parser = shell_parser("cat > /dev/null; printf '  \\n\\t'", &[]);

    assert!(parser.parse("out", "err", false).unwrap().is_empty());
}

#[test]
fn command_parser_reports_failed_exit_once() {
    let parser = shell_parser("cat > /dev/null; echo boom >&2; exit 3", &[]);

    let message = parser.parse("out", "err", false).unwrap_err().to_string();
    assert!(message.contains("exit status: 3"), "{message}");
    assert!(message.contains("boom"), "{message}");
    assert_eq!(message.matches("exit status").count(), 1, "{message}");
}

#[test]
fn command_parser_accepts_output_without_reading_request() {
    let parser = shell_parser("echo '[]'", &[]);
    let stdout = "x".repeat(1 << 20);

    assert!(parser.parse(&stdout, "", false).unwrap().is_empty());
}

#[test]
fn parsed_result_uses_variant_names_on_the_wire() {
    let parsed: Vec<ParsedResult> = serde_json::from_str(PARSED_RESULT_JSON).unwrap();
    let value = serde_json::to_value(&parsed[0]).unwrap();

    assert_eq!(value["status"], "Answered");
    assert_eq!(value["result"], "Satisfied");

    let timeout: RunStatus = serde_json::from_str(r#""Timeout""#).unwrap();
    let violated: Verdict = serde_json::from_str(r#""Unsatisfied""#).unwrap();
    assert_eq!(timeout, RunStatus::Timeout);
    assert_eq!(violated, Verdict::Unsatisfied);
    assert!(serde_json::from_str::<RunStatus>(r#""answered""#).is_err());
}
