//! Grep tool: regex search over a directory tree.

use async_trait::async_trait;
use regex_lite::Regex;
use rivet_core::error::ToolError;
use rivet_core::tool::{Tool, ToolContext, ToolOutput};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::{MAX_OUTPUT_CHARS, display, required_str, resolve, truncate};

const MAX_MATCHES: usize = 100;
const MAX_FILE_BYTES: u64 = 1024 * 1024;
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", ".venv", "dist", "build"];

pub struct GrepTool {
    root: PathBuf,
}

impl GrepTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

struct Match {
    path: PathBuf,
    line: usize,
    text: String,
}

/// `*.rs` style filter on the file name. Anything else is a substring match.
fn include_matches(include: Option<&str>, path: &Path) -> bool {
    let Some(pattern) = include else {
        return true;
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    match pattern.strip_prefix('*') {
        Some(suffix) => name.ends_with(suffix),
        None => name.contains(pattern),
    }
}

fn search(
    base: &Path,
    regex: &Regex,
    include: Option<&str>,
    cancel: &CancellationToken,
) -> Result<(Vec<Match>, bool), ToolError> {
    let mut matches = Vec::new();

    let walker = WalkDir::new(base).into_iter().filter_entry(|e| {
        e.depth() == 0
            || !(e.file_type().is_dir()
                && SKIP_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
    });

    for entry in walker.filter_map(|e| e.ok()) {
        if cancel.is_cancelled() {
            return Err(ToolError::Aborted);
        }
        if !entry.file_type().is_file() || !include_matches(include, entry.path()) {
            continue;
        }
        if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue; // binary or unreadable
        };
        for (n, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                if matches.len() == MAX_MATCHES {
                    return Ok((matches, true));
                }
                matches.push(Match {
                    path: entry.path().to_path_buf(),
                    line: n + 1,
                    text: line.trim_end().to_string(),
                });
            }
        }
    }
    Ok((matches, false))
}

#[async_trait]
impl Tool for GrepTool {
    fn id(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Returns matching lines as path:line: text."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regular expression to search for" },
                "path": { "type": "string", "description": "Directory to search (default: workspace root)" },
                "include": { "type": "string", "description": "File name filter, e.g. \"*.rs\"" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let pattern = required_str(&args, "pattern")?;
        let regex = Regex::new(pattern)
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid regex: {e}")))?;
        let base = args["path"]
            .as_str()
            .map(|p| resolve(&self.root, p))
            .unwrap_or_else(|| self.root.clone());
        let include = args["include"].as_str().map(String::from);

        let cancel = ctx.cancel.clone();
        let walk_base = base.clone();
        let (matches, capped) = tokio::task::spawn_blocking(move || {
            search(&walk_base, &regex, include.as_deref(), &cancel)
        })
        .await
        .map_err(|e| ToolError::failed("grep", format!("search task failed: {e}")))??;

        let title = pattern.to_string();
        if matches.is_empty() {
            return Ok(ToolOutput::new(title, "No matches found").with_metadata("matches", 0));
        }

        let mut output = String::new();
        for m in &matches {
            output.push_str(&format!("{}:{}: {}\n", display(&self.root, &m.path), m.line, m.text));
        }
        if capped {
            output.push_str(&format!("\n(showing first {MAX_MATCHES} matches)"));
        }

        Ok(ToolOutput::new(title, truncate(&output, MAX_OUTPUT_CHARS))
            .with_metadata("matches", matches.len())
            .with_metadata("truncated", capped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new("ses_1", "msg_1", "call_1", "build")
    }

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "fn alpha() {}\nfn beta() {}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "alpha docs\n").unwrap();
        std::fs::write(dir.path().join("target/gen.rs"), "fn alpha() {}\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn finds_matches_and_skips_build_dirs() {
        let dir = tree();
        let tool = GrepTool::new(dir.path());
        let out = tool
            .execute(serde_json::json!({"pattern": "alpha"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out.metadata["matches"], 2);
        assert!(out.output.contains("src/lib.rs:1: fn alpha() {}"));
        assert!(!out.output.contains("target"));
    }

    #[tokio::test]
    async fn include_filter() {
        let dir = tree();
        let tool = GrepTool::new(dir.path());
        let out = tool
            .execute(serde_json::json!({"pattern": "alpha", "include": "*.rs"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out.metadata["matches"], 1);
    }

    #[tokio::test]
    async fn no_matches() {
        let dir = tree();
        let tool = GrepTool::new(dir.path());
        let out = tool
            .execute(serde_json::json!({"pattern": "gamma"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out.output, "No matches found");
    }

    #[tokio::test]
    async fn invalid_regex() {
        let tool = GrepTool::new(".");
        let err = tool
            .execute(serde_json::json!({"pattern": "("}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn cancelled_search_aborts() {
        let dir = tree();
        let tool = GrepTool::new(dir.path());
        let ctx = ctx();
        ctx.cancel.cancel();
        let err = tool
            .execute(serde_json::json!({"pattern": "alpha"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Aborted));
    }
}
