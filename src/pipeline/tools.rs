//! External process execution shared by every conversion strategy.
//!
//! Each invocation first takes a permit from a semaphore sized by
//! `max_concurrent_tools`, then runs under a deadline. On expiry the
//! `output()` future is dropped, which drops the child handle; with
//! `kill_on_drop(true)` that terminates the process.

use crate::error::DocRelayError;
use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Diagnostics attached to errors are cut to this many trailing bytes.
const MAX_DIAGNOSTIC_BYTES: usize = 8 * 1024;

/// Captured result of a finished process.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code as text; processes killed by a signal have no code.
    pub fn code(&self) -> String {
        match self.status.code() {
            Some(code) => code.to_string(),
            None => "none (terminated by signal)".to_string(),
        }
    }

    /// Error-stream text, falling back to stdout for tools that report
    /// problems there.
    pub fn diagnostics(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        tail(text, MAX_DIAGNOSTIC_BYTES).to_string()
    }
}

/// Last `max` bytes of `text`, moved forward to a char boundary.
pub fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Bounded, deadline-enforcing process launcher.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl ToolRunner {
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    /// Run `program` with `args` in `cwd` and capture its output.
    ///
    /// A non-zero exit is **not** an error here; each strategy decides what
    /// counts as success. Only failing to start and missing the deadline are.
    pub async fn run(
        &self,
        tool: &'static str,
        program: &Path,
        args: &[OsString],
        cwd: &Path,
    ) -> Result<ToolOutput, DocRelayError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| DocRelayError::Internal("tool semaphore closed".into()))?;

        debug!("Running {} {:?} in {}", program.display(), args, cwd.display());
        let start = Instant::now();

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(DocRelayError::ToolSpawnFailed {
                    tool,
                    program: program.to_path_buf(),
                    source,
                })
            }
            Err(_) => {
                warn!("{} exceeded its {:?} deadline; killed", tool, self.timeout);
                return Err(DocRelayError::ToolTimedOut {
                    tool,
                    after: self.timeout,
                });
            }
        };

        let output = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(
            "{} exited with {} after {}ms",
            tool,
            output.code(),
            start.elapsed().as_millis()
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("hello", 10), "hello");
        assert_eq!(tail("hello", 3), "llo");
        // 'é' is two bytes; cutting into it moves forward.
        assert_eq!(tail("aé", 1), "");
        assert_eq!(tail("aéb", 2), "b");
    }

    #[cfg(unix)]
    fn sh(script: &str) -> Vec<OsString> {
        vec!["-c".into(), script.into()]
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_exit_code_and_streams() {
        let runner = ToolRunner::new(2, Duration::from_secs(10));
        let cwd = tempfile::tempdir().unwrap();
        let out = runner
            .run(
                "sh",
                Path::new("sh"),
                &sh("echo out; echo err >&2; exit 3"),
                cwd.path(),
            )
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.code(), "3");
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.diagnostics().trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_in_working_directory() {
        let runner = ToolRunner::new(1, Duration::from_secs(10));
        let cwd = tempfile::tempdir().unwrap();
        runner
            .run("sh", Path::new("sh"), &sh("echo hi > marker"), cwd.path())
            .await
            .unwrap();
        assert!(cwd.path().join("marker").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deadline_kills_the_process() {
        let runner = ToolRunner::new(1, Duration::from_millis(200));
        let cwd = tempfile::tempdir().unwrap();
        let start = Instant::now();
        let err = runner
            .run("sh", Path::new("sh"), &sh("sleep 10"), cwd.path())
            .await
            .unwrap_err();
        assert!(matches!(err, DocRelayError::ToolTimedOut { tool: "sh", .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_failure() {
        let runner = ToolRunner::new(1, Duration::from_secs(10));
        let cwd = tempfile::tempdir().unwrap();
        let err = runner
            .run(
                "pandoc",
                Path::new("/nonexistent/docrelay-test-tool"),
                &[],
                cwd.path(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DocRelayError::ToolSpawnFailed { tool: "pandoc", .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn permits_bound_concurrency() {
        let runner = ToolRunner::new(1, Duration::from_secs(10));
        let cwd = tempfile::tempdir().unwrap();
        let args = sh("sleep 0.3");
        let start = Instant::now();
        let (a, b) = tokio::join!(
            runner.run("sh", Path::new("sh"), &args, cwd.path()),
            runner.run("sh", Path::new("sh"), &args, cwd.path()),
        );
        a.unwrap();
        b.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(600));
    }
}
