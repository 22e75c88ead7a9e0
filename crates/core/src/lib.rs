//! # Rivet Core
//!
//! Domain types, traits, and error definitions for the Rivet coding assistant.
//! This crate has **no I/O of its own**: it defines the domain model that all
//! other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the agent loop is a trait here (`Provider`, `Tool`,
//! `PermissionGate`, `MessageStore`). Implementations live in their respective
//! crates, so the loop can be driven by scripted providers and in-memory
//! storage in tests.

pub mod agent;
pub mod error;
pub mod event;
pub mod id;
pub mod message;
pub mod permission;
pub mod provider;
pub mod session;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentProfile, AgentRegistry};
pub use error::{Error, ProviderError, Result, StoreError, ToolError};
pub use event::{EventBus, SessionEvent};
pub use message::{
    AssistantMessage, Completion, MessageError, MessageInfo, MessageWithParts, Part, PartKind,
    Role, TokenUsage, ToolState, UserMessage,
};
pub use permission::{PermissionAction, PermissionGate, PermissionPolicy};
pub use provider::{
    ChatMessage, FinishReason, ModelInfo, Provider, ProviderRequest, StreamEvent, ToolDefinition,
};
pub use session::{ModelRef, Session};
pub use store::MessageStore;
pub use tool::{Tool, ToolContext, ToolOutput, ToolRegistry};
