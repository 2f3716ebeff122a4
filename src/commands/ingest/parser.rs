use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;

use crate::model::ParsedResult;

/// Turns one job's captured output into the results it answered. A job may answer
/// several query instances, or none.
pub trait ResultParser {
    fn parse(&self, stdout: &str, stderr: &str, large_job: bool) -> Result<Vec<ParsedResult>>;
}

impl<F> ResultParser for F
where
    F: Fn(&str, &str, bool) -> Result<Vec<ParsedResult>>,
{
    fn parse(&self, stdout: &str, stderr: &str, large_job: bool) -> Result<Vec<ParsedResult>> {
        self(stdout, stderr, large_job)
    }
}

#[derive(Serialize)]
struct ParserRequest<'a> {
    stdout: &'a str,
    stderr: &'a str,
    large_job: bool,
}

/// Delegates parsing to an external program: a JSON request on stdin, a JSON array
/// of results on stdout.
#[derive(Debug, Clone)]
pub struct CommandResultParser {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandResultParser {
    pub fn new(program: PathBuf, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

impl ResultParser for CommandResultParser {
    fn parse(&self, stdout: &str, stderr: &str, large_job: bool) -> Result<Vec<ParsedResult>> {
        let request = serde_json::to_vec(&ParserRequest {
            stdout,
            stderr,
            large_job,
        })
        .context("failed to serialize parser request")?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to execute {}", self.program.display()))?;

        let mut stdin = child
            .stdin
            .take()
            .context("parser command stdin unavailable")?;
        let writer = thread::spawn(move || stdin.write_all(&request));

        let output = child
            .wait_with_output()
            .with_context(|| format!("failed to wait for {}", self.program.display()))?;
        let written = writer
            .join()
            .map_err(|_| anyhow!("parser request writer panicked"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} returned {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            );
        }

        // A parser may answer without reading the whole request.
        match written {
            Err(err) if err.kind() != ErrorKind::BrokenPipe => {
                return Err(err).with_context(|| {
                    format!("failed to write request to {}", self.program.display())
                });
            }
            _ => {}
        }

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("failed to parse results from {}", self.program.display()))
    }
}
