//! System prompt assembly.

use chrono::{DateTime, Local};
use rivet_core::agent::AgentProfile;
use std::path::{Path, PathBuf};

const CLAUDE_PROMPT: &str = "You are Rivet, an interactive coding assistant embedded in the user's editor.

Use the available tools to inspect and change the project. Read files before editing them. \
Keep answers short and direct. When you change code, say which files you touched.";

const GPT_PROMPT: &str = "You are Rivet, a coding agent working inside the user's project.

Keep going until the request is fully handled before yielding back to the user. \
Prefer calling tools over guessing about file contents. Be concise.";

const GEMINI_PROMPT: &str = "You are Rivet, a software engineering assistant.

Follow the project's existing conventions. Verify assumptions with the read and grep tools \
before making changes. Never invent file paths.";

const DEFAULT_PROMPT: &str = "You are Rivet, a helpful coding assistant. \
Use the provided tools to read, search, and modify files in the user's project.";

/// Default instructions for a model family.
pub fn family_prompt(family: &str) -> &'static str {
    match family {
        "claude" => CLAUDE_PROMPT,
        "gpt" => GPT_PROMPT,
        "gemini" => GEMINI_PROMPT,
        _ => DEFAULT_PROMPT,
    }
}

/// Facts about the machine the assistant runs on.
#[derive(Debug, Clone)]
pub struct Environment {
    pub cwd: PathBuf,
    pub is_git: bool,
    pub platform: String,
    pub date: DateTime<Local>,
}

impl Environment {
    /// Probe the current process environment.
    pub fn detect() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::for_dir(&cwd)
    }

    /// Environment rooted at `cwd`. A repository is detected by a `.git`
    /// entry in `cwd` or any ancestor.
    pub fn for_dir(cwd: &Path) -> Self {
        let is_git = cwd.ancestors().any(|dir| dir.join(".git").exists());
        Self {
            cwd: cwd.to_path_buf(),
            is_git,
            platform: std::env::consts::OS.to_string(),
            date: Local::now(),
        }
    }

    fn render(&self) -> String {
        format!(
            "<env>\n  Working directory: {}\n  Is directory a git repo: {}\n  Platform: {}\n  Today's date: {}\n</env>",
            self.cwd.display(),
            if self.is_git { "yes" } else { "no" },
            self.platform,
            self.date.format("%a %b %d %Y"),
        )
    }
}

/// Agent instructions (or the family default), then caller-supplied text,
/// then the environment block.
pub fn system_prompt(
    agent: &AgentProfile,
    family: &str,
    caller: Option<&str>,
    env: &Environment,
) -> Vec<String> {
    let mut sections = vec![
        agent
            .prompt
            .clone()
            .unwrap_or_else(|| family_prompt(family).to_string()),
    ];
    if let Some(text) = caller.map(str::trim).filter(|t| !t.is_empty()) {
        sections.push(text.to_string());
    }
    sections.push(env.render());
    sections
}
