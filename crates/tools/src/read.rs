//! Read tool: file contents with line numbers, paged by offset/limit.

use async_trait::async_trait;
use rivet_core::error::ToolError;
use rivet_core::tool::{Tool, ToolContext, ToolOutput};
use serde_json::Value;
use std::path::PathBuf;

use crate::{display, required_str, resolve};

const DEFAULT_LIMIT: usize = 2000;
const MAX_LINE_CHARS: usize = 2000;

pub struct ReadTool {
    root: PathBuf,
}

impl ReadTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for ReadTool {
    fn id(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a file. Returns numbered lines. Use offset (0-based line) and limit to page through large files."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start from (0-based)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Number of lines to read (default 2000)"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let path = resolve(&self.root, required_str(&args, "path")?);
        let offset = args["offset"].as_u64().unwrap_or(0) as usize;
        let limit = args["limit"]
            .as_u64()
            .map(|l| l as usize)
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_LIMIT);

        let content = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::failed(
                    "read",
                    format!("file not found: {}", path.display()),
                ));
            }
            Err(e) => return Err(ToolError::failed("read", format!("Failed to read file: {e}"))),
        };
        if content.contains(&0) {
            return Err(ToolError::failed(
                "read",
                format!("cannot read binary file: {}", path.display()),
            ));
        }
        let text = String::from_utf8_lossy(&content);

        let total = text.lines().count();
        let mut output = String::new();
        for (n, line) in text.lines().enumerate().skip(offset).take(limit) {
            let line = match line.char_indices().nth(MAX_LINE_CHARS) {
                Some((idx, _)) => &line[..idx],
                None => line,
            };
            output.push_str(&format!("{:>5}| {line}\n", n + 1));
        }

        let shown_to = (offset + limit).min(total);
        if shown_to < total {
            output.push_str(&format!(
                "\n(file has more lines; use offset={shown_to} to continue)"
            ));
        }

        Ok(ToolOutput::new(display(&self.root, &path), output)
            .with_metadata("lines", total)
            .with_metadata("truncated", shown_to < total))
    }
}
