//! mm-forge: Multimodal synthetic training-data generator.
//!
//! This library turns a handful of reference item/question/answer samples
//! into large synthetic datasets. A prompt set is built from a task
//! description, split into shards run by independent worker processes, and
//! the shard manifests are merged into one dataset.

pub mod cli;
pub mod diversity;
pub mod error;
pub mod export;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod scheduler;
pub mod utils;

// Re-export commonly used error types
pub use error::{DispatchError, GenerationError, LlmError, ManifestError, PromptBuildError};
