//! Codec subprocess management
//!
//! Encoders such as `cjxl` can write a lot to stderr. If stderr is piped but
//! never read, the child blocks once the pipe buffer fills and the parent waits
//! forever. `CodecProcess` drains stderr on its own thread and enforces a wall
//! clock deadline, killing the child when it is exceeded.
//!
//! ```ignore
//! use shared_utils::codec_process::run_with_timeout;
//! use std::time::Duration;
//!
//! let args = vec!["in.png".into(), "out.jxl".into()];
//! let outcome = run_with_timeout("cjxl", &args, Duration::from_secs(300))?;
//! assert!(outcome.status.success());
//! ```

use crate::logging::log_external_tool;
use std::ffi::OsStr;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {} s", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },
}

/// Exit status plus everything the child wrote to stderr.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub status: ExitStatus,
    pub stderr: String,
    pub elapsed: Duration,
}

/// A running codec child whose stderr is consumed in the background.
pub struct CodecProcess {
    program: String,
    child: Child,
    stderr_thread: Option<JoinHandle<String>>,
    started: Instant,
}

impl CodecProcess {
    /// Spawn `cmd` with stdout discarded and stderr captured.
    pub fn spawn(cmd: &mut Command) -> Result<Self, ProcessError> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        debug!(command = ?cmd, "Spawning codec process");

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stderr_thread = child.stderr.take().map(|stderr| {
            thread::spawn(move || {
                let mut buf = String::new();
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    buf.push_str(&line);
                    buf.push('\n');
                }
                buf
            })
        });

        Ok(Self {
            program,
            child,
            stderr_thread,
            started: Instant::now(),
        })
    }

    /// Wait until the child exits or `timeout` elapses.
    ///
    /// On timeout the child is killed and reaped before `TimedOut` is returned,
    /// so no zombie survives and the output file is no longer being written.
    pub fn wait_timeout(mut self, timeout: Duration) -> Result<ProcessOutcome, ProcessError> {
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    let stderr = self.collect_stderr();
                    return Ok(ProcessOutcome {
                        status,
                        stderr,
                        elapsed: self.started.elapsed(),
                    });
                }
                Ok(None) => {
                    if self.started.elapsed() >= timeout {
                        warn!(
                            program = %self.program,
                            timeout_secs = timeout.as_secs(),
                            "Codec process exceeded timeout, killing"
                        );
                        let _ = self.child.kill();
                        let _ = self.child.wait();
                        let _ = self.collect_stderr();
                        return Err(ProcessError::TimedOut {
                            program: self.program.clone(),
                            timeout,
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(source) => {
                    return Err(ProcessError::Wait {
                        program: self.program.clone(),
                        source,
                    })
                }
            }
        }
    }

    fn collect_stderr(&mut self) -> String {
        self.stderr_thread
            .take()
            .map(|t| t.join().unwrap_or_default())
            .unwrap_or_default()
    }
}

/// Run `program args...` to completion under a deadline and log the invocation.
pub fn run_with_timeout<P: AsRef<OsStr>>(
    program: P,
    args: &[String],
    timeout: Duration,
) -> Result<ProcessOutcome, ProcessError> {
    let program = program.as_ref();
    let tool_name = Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string_lossy().into_owned());

    let mut cmd = Command::new(program);
    cmd.args(args);

    let started = Instant::now();
    match CodecProcess::spawn(&mut cmd)?.wait_timeout(timeout) {
        Ok(outcome) => {
            log_external_tool(
                &tool_name,
                args,
                &outcome.stderr,
                outcome.status.code(),
                outcome.elapsed,
            );
            Ok(outcome)
        }
        Err(e) => {
            log_external_tool(&tool_name, args, &e.to_string(), None, started.elapsed());
            Err(e)
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_successful_process_reports_status() {
        let outcome = run_with_timeout("true", &[], Duration::from_secs(5)).unwrap();
        assert!(outcome.status.success());
    }

    #[test]
    fn test_failing_process_captures_stderr() {
        let args = vec!["-c".to_string(), "echo broken >&2; exit 3".to_string()];
        let outcome = run_with_timeout("sh", &args, Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.status.code(), Some(3));
        assert!(outcome.stderr.contains("broken"));
    }

    #[test]
    fn test_timeout_kills_child() {
        let args = vec!["5".to_string()];
        let started = Instant::now();
        let err = run_with_timeout("sleep", &args, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let err = run_with_timeout(
            "definitely-not-a-real-codec-binary",
            &[],
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn test_large_stderr_does_not_deadlock() {
        let args = vec![
            "-c".to_string(),
            "i=0; while [ $i -lt 5000 ]; do echo 0123456789abcdef0123456789 >&2; i=$((i+1)); done"
                .to_string(),
        ];
        let outcome = run_with_timeout("sh", &args, Duration::from_secs(20)).unwrap();
        assert!(outcome.status.success());
        assert!(outcome.stderr.len() > 64 * 1024);
    }
}
