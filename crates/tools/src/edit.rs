//! Edit tool: exact string replacement inside a file.

use async_trait::async_trait;
use rivet_core::error::ToolError;
use rivet_core::tool::{Tool, ToolContext, ToolOutput};
use serde_json::Value;
use std::path::PathBuf;

use crate::{display, required_str, resolve};

pub struct EditTool {
    root: PathBuf,
}

impl EditTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for EditTool {
    fn id(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Replace old_string with new_string in a file. old_string must match exactly and be unique unless replace_all is set."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "The file to edit" },
                "old_string": { "type": "string", "description": "Exact text to replace" },
                "new_string": { "type": "string", "description": "Replacement text" },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence (default false)"
                }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let path = resolve(&self.root, required_str(&args, "path")?);
        let old = required_str(&args, "old_string")?;
        let new = required_str(&args, "new_string")?;
        let replace_all = args["replace_all"].as_bool().unwrap_or(false);

        if old.is_empty() {
            return Err(ToolError::InvalidArguments("old_string must not be empty".into()));
        }
        if old == new {
            return Err(ToolError::InvalidArguments(
                "old_string and new_string are identical".into(),
            ));
        }

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::failed("edit", format!("file not found: {}", path.display()))
            } else {
                ToolError::failed("edit", format!("Failed to read file: {e}"))
            }
        })?;

        let occurrences = content.matches(old).count();
        if occurrences == 0 {
            return Err(ToolError::failed("edit", "old_string not found in file"));
        }
        if occurrences > 1 && !replace_all {
            return Err(ToolError::failed(
                "edit",
                format!(
                    "old_string appears {occurrences} times; add surrounding context or set replace_all"
                ),
            ));
        }

        let title = display(&self.root, &path);
        ctx.ask(
            "edit",
            format!("Edit {title}"),
            serde_json::json!({"path": path.display().to_string(), "old": old, "new": new}),
        )
        .await?;

        let updated = if replace_all {
            content.replace(old, new)
        } else {
            content.replacen(old, new, 1)
        };
        tokio::fs::write(&path, &updated)
            .await
            .map_err(|e| ToolError::failed("edit", format!("Failed to write file: {e}")))?;

        let replaced = if replace_all { occurrences } else { 1 };
        Ok(
            ToolOutput::new(title, format!("Replaced {replaced} occurrence(s) in {}", path.display()))
                .with_metadata("replacements", replaced),
        )
    }
}
