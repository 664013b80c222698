pub mod anomaly;
pub mod cluster;
pub mod engine;
pub mod transitive;

pub use engine::{run_reasoning_batch, ReasoningError, ReasoningOutcome};
