// ProcessInvoker: runs an action executable and captures its output.

use agent_common::TraceWriter;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, or `-1` when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Spawns a child process, streams stdout/stderr line by line into the trace
/// and collects both for the caller.
pub struct ProcessInvoker {
    trace: Arc<dyn TraceWriter>,
}

impl ProcessInvoker {
    pub fn new(trace: Arc<dyn TraceWriter>) -> Self {
        Self { trace }
    }

    /// Run `file_name` with `arguments` and extra `environment`, waiting for exit.
    ///
    /// Fails only if the process cannot be started or awaited; a non-zero
    /// exit code is reported through [`ProcessOutput::exit_code`].
    pub async fn execute(
        &self,
        working_directory: Option<&Path>,
        file_name: &str,
        arguments: &[String],
        environment: &HashMap<String, String>,
    ) -> Result<ProcessOutput> {
        self.trace.verbose(&format!(
            "Starting process '{}' with {} argument(s)",
            file_name,
            arguments.len()
        ));

        let mut cmd = Command::new(file_name);
        cmd.args(arguments)
            .envs(environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = working_directory.filter(|d| d.is_dir()) {
            cmd.current_dir(dir);
        }

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to start process '{}'", file_name))?;
        let pid = child.id().unwrap_or(0);

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(read_lines(out, self.trace.clone(), "stdout")));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_lines(err, self.trace.clone(), "stderr")));

        let status = child
            .wait()
            .await
            .with_context(|| format!("Failed to wait for process '{}'", file_name))?;

        let stdout = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        let exit_code = status.code().unwrap_or(-1);
        self.trace.verbose(&format!(
            "Finished process {} with exit code {}, and elapsed time {:.2?}.",
            pid,
            exit_code,
            start.elapsed()
        ));

        Ok(ProcessOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

/// Drain `stream` to EOF, one line at a time.
///
/// Lines are decoded lossily; the pipe is never closed early, so a child
/// writing invalid UTF-8 keeps running.
async fn read_lines<R>(stream: R, trace: Arc<dyn TraceWriter>, label: &'static str) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut collected = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(trim_newline(&buf)).into_owned();
                trace.verbose(&format!("[{}] {}", label, line));
                collected.push(line);
            }
            Err(e) => {
                trace.warning(&format!("Could not read process {}: {}", label, e));
                break;
            }
        }
    }
    collected
}

fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
