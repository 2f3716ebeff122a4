use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

const ARCHIVE_EXTENSION: &str = "tar";
const OUTPUT_SUFFIX: &str = ".out";
const ERROR_SUFFIX: &str = ".err";
const LARGE_JOB_SUFFIX: &str = "large";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    /// File name up to its first `.`; doubles as the experiment name.
    pub name: String,
    pub filename: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutput {
    pub job: String,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Default)]
pub struct ArchiveJobs {
    pub large_job: bool,
    pub jobs: Vec<JobOutput>,
    pub skipped_jobs: usize,
}

pub fn discover_archives(archives_dir: &Path) -> Result<Vec<ArchiveFile>> {
    let entries = fs::read_dir(archives_dir)
        .with_context(|| format!("failed to read {}", archives_dir.display()))?;

    let mut archives = Vec::new();
    for entry in entries {
        let entry = entry
            .with_context(|| format!("failed to read entry in {}", archives_dir.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }

        let is_archive = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == ARCHIVE_EXTENSION);
        if !is_archive {
            continue;
        }

        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToOwned::to_owned)
            .with_context(|| format!("invalid UTF-8 filename: {}", path.display()))?;
        let name = filename
            .split('.')
            .next()
            .unwrap_or_default()
            .to_string();

        archives.push(ArchiveFile {
            name,
            filename,
            path,
        });
    }

    archives.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(archives)
}

/// Reads every `<job>.out` / `<job>.err` pair from a tar archive. Jobs without an
/// error file are incomplete and counted as skipped.
pub fn read_archive(path: &Path) -> Result<ArchiveJobs> {
    let file =
        File::open(path).with_context(|| format!("failed to open archive {}", path.display()))?;
    let mut archive = tar::Archive::new(file);

    let mut large_job = false;
    let mut outputs = Vec::<(String, Vec<u8>)>::new();
    let mut errors = HashMap::<String, Vec<u8>>::new();

    for entry in archive
        .entries()
        .with_context(|| format!("failed to list entries of {}", path.display()))?
    {
        let mut entry =
            entry.with_context(|| format!("failed to read entry of {}", path.display()))?;
        let entry_name = entry
            .path()
            .with_context(|| format!("invalid entry path in {}", path.display()))?
            .to_string_lossy()
            .into_owned();

        if entry_name.ends_with(LARGE_JOB_SUFFIX) {
            large_job = true;
        }

        let target = if let Some(job) = entry_name.strip_suffix(OUTPUT_SUFFIX) {
            Some((job.to_string(), true))
        } else {
            entry_name
                .strip_suffix(ERROR_SUFFIX)
                .map(|job| (job.to_string(), false))
        };
        let Some((job, is_output)) = target else {
            continue;
        };
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {entry_name} in {}", path.display()))?;

        if is_output {
            outputs.push((job, data));
        } else {
            errors.insert(job, data);
        }
    }

    let mut jobs = ArchiveJobs {
        large_job,
        ..ArchiveJobs::default()
    };

    for (job, stdout) in outputs {
        let Some(stderr) = errors.remove(&job) else {
            debug!(archive = %path.display(), job = %job, "job has no error file, skipping");
            jobs.skipped_jobs += 1;
            continue;
        };

        jobs.jobs.push(JobOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            job,
        });
    }

    Ok(jobs)
}
