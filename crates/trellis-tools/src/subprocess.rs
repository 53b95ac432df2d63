//! Subprocess tool: run source through an interpreter with a per-call
//! timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use trellis_contract::{Tool, ToolResult};

pub const SUBPROCESS_TOOL_NAME: &str = "subprocess";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeRequest {
    pub code: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub execution_time_ms: u64,
}

/// Runs code as `<program> <args...> <code>`. Defaults to `python3 -c`.
///
/// The timeout is enforced here: on expiry the child is killed and the
/// output reports `exit_code = -1` with a `[timeout]` marker in stderr. A
/// completed run is a tool `Success` whatever the exit code; callers decide
/// what a non-zero exit means.
pub struct SubprocessExecutor {
    program: String,
    args: Vec<String>,
}

impl SubprocessExecutor {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn python3() -> Self {
        Self::new("python3", ["-c"])
    }
}

#[async_trait]
impl Tool for SubprocessExecutor {
    fn name(&self) -> &str {
        SUBPROCESS_TOOL_NAME
    }

    async fn invoke(&self, request: Value) -> ToolResult {
        let request: CodeRequest = match serde_json::from_value(request) {
            Ok(request) => request,
            Err(error) => {
                return ToolResult::error(
                    SUBPROCESS_TOOL_NAME,
                    format!("invalid request: {error}"),
                );
            }
        };
        if request.timeout_seconds == 0 {
            return ToolResult::error(SUBPROCESS_TOOL_NAME, "timeout_seconds must be positive");
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(&request.code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                return ToolResult::error(
                    SUBPROCESS_TOOL_NAME,
                    format!("failed to spawn {}: {error}", self.program),
                );
            }
        };

        let timeout = Duration::from_secs(request.timeout_seconds);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => CodeOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().map(i64::from).unwrap_or(-1),
                execution_time_ms: started.elapsed().as_millis() as u64,
            },
            Ok(Err(error)) => {
                return ToolResult::error(
                    SUBPROCESS_TOOL_NAME,
                    format!("failed to collect output: {error}"),
                );
            }
            // Dropping the wait future kills the child (kill_on_drop).
            Err(_) => CodeOutput {
                stdout: String::new(),
                stderr: format!(
                    "[timeout] execution exceeded {}s",
                    request.timeout_seconds
                ),
                exit_code: -1,
                execution_time_ms: started.elapsed().as_millis() as u64,
            },
        };

        match serde_json::to_value(&output) {
            Ok(data) => ToolResult::success(SUBPROCESS_TOOL_NAME, data),
            Err(error) => ToolResult::error(
                SUBPROCESS_TOOL_NAME,
                format!("failed to encode output: {error}"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> SubprocessExecutor {
        SubprocessExecutor::new("sh", ["-c"])
    }

    async fn run(tool: &SubprocessExecutor, code: &str, timeout_seconds: u64) -> CodeOutput {
        let result = tool
            .invoke(serde_json::json!({ "code": code, "timeout_seconds": timeout_seconds }))
            .await;
        assert!(result.is_success(), "{:?}", result.message);
        serde_json::from_value(result.data).unwrap()
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let output = run(&shell(), "echo hello", 5).await;
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_still_a_completed_run() {
        let output = run(&shell(), "echo oops >&2; exit 3", 5).await;
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn timeout_reports_negative_exit_and_marker() {
        let output = run(&shell(), "sleep 5", 1).await;
        assert_eq!(output.exit_code, -1);
        assert!(output.stderr.contains("[timeout]"), "{}", output.stderr);
    }

    #[tokio::test]
    async fn spawn_failure_is_a_tool_error() {
        let tool = SubprocessExecutor::new("definitely-not-a-real-binary", Vec::<String>::new());
        let result = tool
            .invoke(serde_json::json!({ "code": "x", "timeout_seconds": 1 }))
            .await;
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn zero_timeout_is_rejected() {
        let result = shell()
            .invoke(serde_json::json!({ "code": "echo hi", "timeout_seconds": 0 }))
            .await;
        assert!(result.is_error());
    }
}
