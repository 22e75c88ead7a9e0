//! Write tool: create or overwrite a file.

use async_trait::async_trait;
use rivet_core::error::ToolError;
use rivet_core::tool::{Tool, ToolContext, ToolOutput};
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

use crate::{display, required_str, resolve};

pub struct WriteTool {
    root: PathBuf,
}

impl WriteTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for WriteTool {
    fn id(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed. Overwrites existing files."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write to"
                },
                "content": {
                    "type": "string",
                    "description": "The full content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let path = resolve(&self.root, required_str(&args, "path")?);
        let content = required_str(&args, "content")?;
        let title = display(&self.root, &path);
        let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);

        ctx.ask(
            "write",
            format!("Write {title}"),
            serde_json::json!({"path": path.display().to_string(), "exists": exists}),
        )
        .await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::failed("write", format!("Failed to create directory: {e}")))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::failed("write", format!("Failed to write file: {e}")))?;

        debug!(path = %path.display(), bytes = content.len(), "File written");

        let verb = if exists { "Overwrote" } else { "Created" };
        Ok(
            ToolOutput::new(title, format!("{verb} {} ({} bytes)", path.display(), content.len()))
                .with_metadata("exists", exists),
        )
    }
}
