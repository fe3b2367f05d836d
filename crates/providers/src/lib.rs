//! LLM provider layer: the unified provider trait, the failover
//! registry with purpose routing and streaming adaptation, and the
//! OpenAI-compatible reference adapter.

pub mod mock;
pub mod openai_compat;
pub mod registry;
pub mod retry;
mod sse;
pub mod traits;

pub use openai_compat::{default_api_base, OpenAiCompatProvider};
pub use registry::{mask_secrets, ProviderEntry, ProviderRegistry};
pub use traits::{ChatRequest, ChatResponse, Provider};
