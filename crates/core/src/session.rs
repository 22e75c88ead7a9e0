//! Session domain types.
//!
//! A session is a persistent conversation scoped to one model/agent selection.
//! It owns an ordered list of messages, each of which owns ordered parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{self, IdKind};
use crate::message::MessageWithParts;

/// A `provider/model` pair, e.g. `anthropic/claude-sonnet-4-20250514`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider_id: String,
    pub model_id: String,
}

impl ModelRef {
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
        }
    }

    /// Parse `provider/model`. The model part may itself contain slashes
    /// (`openrouter/anthropic/claude-sonnet-4`).
    pub fn parse(s: &str) -> Option<Self> {
        let (provider, model) = s.split_once('/')?;
        if provider.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self::new(provider, model))
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider_id, self.model_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTime {
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// A persistent conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,

    pub title: String,

    pub time: SessionTime,

    /// Model selected for this session, if the caller picked one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,

    /// Agent profile name.
    pub agent: String,
}

impl Session {
    /// Create a new session with a generated ascending id.
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id::ascending(IdKind::Session),
            title: title.into(),
            time: SessionTime {
                created: now,
                updated: now,
            },
            model: None,
            agent: crate::agent::DEFAULT_AGENT.to_string(),
        }
    }

    /// Default title for sessions created without one.
    pub fn default_title() -> String {
        format!("New session - {}", Utc::now().format("%Y-%m-%dT%H:%M:%S"))
    }

    pub fn touch(&mut self) {
        self.time.updated = Utc::now();
    }
}

/// Metadata block of an exported session document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub session: Session,
}

/// Serialized `{metadata, messages: [{info, parts}]}` session document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionExport {
    pub metadata: ExportMetadata,
    pub messages: Vec<MessageWithParts>,
}

pub const EXPORT_VERSION: u32 = 1;

impl SessionExport {
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_ref_parse() {
        let m = ModelRef::parse("anthropic/claude-sonnet-4").unwrap();
        assert_eq!(m.provider_id, "anthropic");
        assert_eq!(m.model_id, "claude-sonnet-4");

        let nested = ModelRef::parse("openrouter/anthropic/claude-sonnet-4").unwrap();
        assert_eq!(nested.provider_id, "openrouter");
        assert_eq!(nested.model_id, "anthropic/claude-sonnet-4");
        assert_eq!(nested.to_string(), "openrouter/anthropic/claude-sonnet-4");

        assert!(ModelRef::parse("no-slash").is_none());
        assert!(ModelRef::parse("/model").is_none());
    }

    #[test]
    fn new_session_defaults() {
        let session = Session::new("hello");
        assert!(session.id.starts_with("ses_"));
        assert_eq!(session.agent, "build");
        assert!(session.model.is_none());
        assert_eq!(session.time.created, session.time.updated);
    }

    #[test]
    fn export_document_parses_back() {
        let export = SessionExport {
            metadata: ExportMetadata {
                version: EXPORT_VERSION,
                exported_at: Utc::now(),
                session: Session::new("exported"),
            },
            messages: vec![],
        };
        let json = export.to_json_pretty().unwrap();
        let parsed = SessionExport::from_json(&json).unwrap();
        assert_eq!(parsed.metadata.session.id, export.metadata.session.id);
        assert!(parsed.messages.is_empty());
    }

    #[test]
    fn malformed_export_is_a_serialization_error() {
        let err = SessionExport::from_json("{\"metadata\": 3}").unwrap_err();
        assert!(matches!(err, crate::Error::Serialization(_)));
        assert!(err.to_string().starts_with("Serialization error"));
    }

    #[test]
    fn touch_advances_updated() {
        let mut session = Session::new("t");
        let created = session.time.created;
        session.touch();
        assert!(session.time.updated >= created);
    }
}
