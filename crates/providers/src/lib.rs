//! LLM provider adapters and the stream client for Rivet.
//!
//! All adapters implement the `rivet_core::Provider` trait. The registry
//! resolves `provider/model` references; the stream client builds the
//! request (system prompt, vendor quirks, token limits) and forwards events.

pub mod anthropic;
pub mod models;
pub mod openai_compat;
pub mod quirks;
pub mod router;
pub mod schema;
pub mod stream_client;
pub mod system;
mod transport;

pub use anthropic::AnthropicProvider;
pub use models::ModelCatalog;
pub use openai_compat::OpenAiCompatProvider;
pub use quirks::VendorQuirks;
pub use router::{ProviderRegistry, ResolvedModel, build_from_config};
pub use stream_client::{StreamClient, StreamInput};
pub use system::Environment;
