//! The session agent loop for Rivet.
//!
//! A prompt runs as a sequence of steps:
//!
//! 1. **Record** the user message and its parts
//! 2. **Rebuild** the conversation from the store and add any reminders
//! 3. **Stream** one model call through the provider
//! 4. **Process** the events: persist text, run tools, settle the message
//! 5. **Repeat** while the model keeps calling tools, up to the agent's step limit
//!
//! Everything the loop does is written to the [`MessageStore`] first and then
//! announced on the [`EventBus`].
//!
//! [`MessageStore`]: rivet_core::store::MessageStore
//! [`EventBus`]: rivet_core::event::EventBus

pub mod error;
pub mod history;
pub mod loop_runner;
pub mod processor;
pub mod reminders;

pub use error::AgentError;
pub use loop_runner::{AgentLoop, PromptInput};
pub use processor::{SessionProcessor, StepOutcome, Verdict};
