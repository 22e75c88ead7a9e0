//! Bash tool: run a shell command in the workspace.
//!
//! Commands run under `sh -c` (or `cmd /C` on Windows) with the workspace as
//! working directory. A timeout bounds each call and cancellation kills the
//! child process.

use async_trait::async_trait;
use rivet_core::error::ToolError;
use rivet_core::tool::{Tool, ToolContext, ToolOutput};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{MAX_OUTPUT_CHARS, required_str, truncate};

const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const MAX_TIMEOUT_MS: u64 = 600_000;

pub struct BashTool {
    root: PathBuf,
}

impl BashTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.root).kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Tool for BashTool {
    fn id(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the project directory and return stdout/stderr. Use this for builds, tests, git operations, etc."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in milliseconds (default 120000, max 600000)"
                },
                "description": {
                    "type": "string",
                    "description": "Five-word summary of what the command does"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let command = required_str(&args, "command")?;
        let timeout_ms = args["timeout"]
            .as_u64()
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .min(MAX_TIMEOUT_MS);
        let title = args["description"]
            .as_str()
            .unwrap_or(command)
            .to_string();

        ctx.ask("bash", command, serde_json::json!({"command": command}))
            .await?;

        let mut live = Map::new();
        live.insert("command".into(), Value::String(command.into()));
        ctx.update_metadata(Some(title.clone()), live).await;

        debug!(command = %command, timeout_ms, "Executing shell command");

        let run = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.command(command).output(),
        );
        let output = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(ToolError::Aborted),
            result = run => match result {
                Ok(output) => output.map_err(|e| ToolError::failed("bash", e.to_string()))?,
                Err(_) => {
                    return Err(ToolError::Timeout {
                        tool_name: "bash".into(),
                        timeout_secs: timeout_ms / 1000,
                    });
                }
            },
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().unwrap_or(-1);

        let mut text = stdout.trim_end().to_string();
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr.trim_end());
        }
        if !output.status.success() {
            warn!(command = %command, exit_code = code, "Command failed");
            text = format!("[exit code: {code}]\n{text}");
        }

        Ok(ToolOutput::new(title, truncate(text.trim(), MAX_OUTPUT_CHARS))
            .with_metadata("exit", code)
            .with_metadata("command", command))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rivet_core::permission::DenyAll;
    use rivet_core::tool::ToolMetadataSink;
    use std::sync::{Arc, Mutex};

    fn ctx() -> ToolContext {
        ToolContext::new("ses_1", "msg_1", "call_1", "build")
    }

    #[derive(Default)]
    struct Capture(Mutex<Vec<Option<String>>>);

    #[async_trait]
    impl ToolMetadataSink for Capture {
        async fn update(&self, title: Option<String>, _metadata: Map<String, Value>) {
            self.0.lock().unwrap().push(title);
        }
    }

    #[tokio::test]
    async fn execute_echo() {
        let dir = tempfile::tempdir().unwrap();
        let tool = BashTool::new(dir.path());
        let out = tool
            .execute(serde_json::json!({"command": "echo hello"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out.output, "hello");
        assert_eq!(out.metadata["exit"], 0);
    }

    #[tokio::test]
    async fn runs_in_workspace_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let tool = BashTool::new(dir.path());
        let out = tool
            .execute(serde_json::json!({"command": "ls"}), &ctx())
            .await
            .unwrap();
        assert!(out.output.contains("marker.txt"));
    }

    #[tokio::test]
    async fn nonzero_exit_reported_in_output() {
        let tool = BashTool::new(".");
        let out = tool
            .execute(serde_json::json!({"command": "echo oops >&2; exit 3"}), &ctx())
            .await
            .unwrap();
        assert!(out.output.starts_with("[exit code: 3]"));
        assert!(out.output.contains("oops"));
    }

    #[tokio::test]
    async fn timeout_fails() {
        let tool = BashTool::new(".");
        let err = tool
            .execute(serde_json::json!({"command": "sleep 5", "timeout": 100}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[tokio::test]
    async fn cancellation_aborts() {
        let tool = BashTool::new(".");
        let ctx = ctx();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let err = tool
            .execute(serde_json::json!({"command": "sleep 5"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Aborted));
    }

    #[tokio::test]
    async fn denied_command_never_runs() {
        let dir = tempfile::tempdir().unwrap();
        let tool = BashTool::new(dir.path());
        let ctx = ctx().with_permission(Arc::new(DenyAll));
        let err = tool
            .execute(serde_json::json!({"command": "touch created"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
        assert!(!dir.path().join("created").exists());
    }

    #[tokio::test]
    async fn publishes_live_title() {
        let sink = Arc::new(Capture::default());
        let tool = BashTool::new(".");
        let ctx = ctx().with_metadata_sink(sink.clone());
        tool.execute(
            serde_json::json!({"command": "true", "description": "No-op check"}),
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(sink.0.lock().unwrap().as_slice(), &[Some("No-op check".to_string())]);
    }
}
