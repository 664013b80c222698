pub mod embedder;
pub mod prompts;
pub mod provider;
pub mod runner;
pub mod schema;

pub use embedder::EmbeddingClient;
pub use provider::{
    AgentError, DeterministicEmbeddingProvider, EmbeddingProvider, FinishReason, Generation,
    LlmProvider, ScriptedLlm,
};
pub use runner::AgentRunner;
