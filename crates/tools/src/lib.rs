//! Built-in tool implementations for Rivet.
//!
//! Tools give the agent the ability to work on the user's project:
//! read, write and edit files, search the tree, and run shell commands.
//! Relative paths resolve against the workspace root each tool is
//! constructed with. Side-effecting tools ask for permission first.

pub mod bash;
pub mod edit;
pub mod grep;
pub mod read;
pub mod write;

use rivet_core::error::ToolError;
use rivet_core::tool::ToolRegistry;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Outputs longer than this are cut before reaching the model.
pub const MAX_OUTPUT_CHARS: usize = 30_000;

/// Create a tool registry with all built-in tools rooted at `root`.
pub fn default_registry(root: impl Into<PathBuf>) -> ToolRegistry {
    let root = root.into();
    ToolRegistry::new()
        .with(read::ReadTool::new(&root))
        .with(write::WriteTool::new(&root))
        .with(edit::EditTool::new(&root))
        .with(grep::GrepTool::new(&root))
        .with(bash::BashTool::new(&root))
}

/// Resolve `path` against `root` unless it is already absolute.
pub(crate) fn resolve(root: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

/// `path` relative to `root` when it lies inside it, for titles.
pub(crate) fn display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

/// Cut `text` to at most `max` chars on a char boundary, marking the cut.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}\n\n(output truncated)", &text[..idx]),
        None => text.to_string(),
    }
}

pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args[key]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}
