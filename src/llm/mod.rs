pub mod cache;
pub mod client;
pub mod generator;
pub mod prompts;

pub use cache::{CacheStatistics, ResponseCache, ResponseStore};
pub use client::{LlmClient, LlmError, LlmProvider, LlmRequest, LlmStatistics, RequestLogEntry, TextGenerator};
pub use generator::ThreatNarrator;
pub use prompts::{PromptKind, PromptTemplates};
