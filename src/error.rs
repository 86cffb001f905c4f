//! Error types for mm-forge operations.
//!
//! Each pipeline stage has its own error enum:
//! - Completion service calls (`LlmError`)
//! - Worker setup and fatal per-slice failures (`GenerationError`)
//! - Shard manifest I/O and merging (`ManifestError`)
//! - Shard partitioning and process launch (`DispatchError`)
//! - Prompt-set construction (`PromptBuildError`)

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a generation worker.
///
/// Setup variants (`PromptFile`, `InvalidPromptFile`, `InvalidMode`,
/// `InvalidSlice`) stop the worker before any output exists. `Llm` and
/// `Interrupted` abort a running slice and trigger the checkpoint path.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Failed to read prompt file '{path}': {source}")]
    PromptFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid prompt file '{path}': {source}")]
    InvalidPromptFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown generation mode: {0}")]
    InvalidMode(String),

    #[error("Invalid slice: {0}")]
    InvalidSlice(String),

    #[error("Completion service failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Interrupted before prompt {index}")]
    Interrupted { index: usize },

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while reading, writing or merging manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("No shard manifests for run '{run_id}' in '{dir}'")]
    NoShards { run_id: String, dir: PathBuf },

    #[error("Failed to read manifest '{path}': {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while partitioning and launching shards.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Parallelism must be at least 1")]
    ZeroParallelism,

    #[error("Concurrency ceiling must be at least 1")]
    ZeroCeiling,

    #[error("Wave {wave} is empty: {slices} slices with ceiling {ceiling} give {waves} waves")]
    EmptyWave {
        wave: usize,
        slices: usize,
        ceiling: usize,
        waves: usize,
    },

    #[error("Failed to launch shard {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while building a prompt set from a task description.
#[derive(Debug, Error)]
pub enum PromptBuildError {
    #[error("Subgroup '{keyword}' has no {what}")]
    EmptySubgroup { keyword: String, what: &'static str },

    #[error("Task description has no reference samples")]
    NoReferences,

    #[error("Reference sample {index} is out of range ({len} samples)")]
    SampleOutOfRange { index: usize, len: usize },

    #[error("Reference sample {index} has no human/gpt turn pair")]
    MalformedSample { index: usize },

    #[error("Too many in-context examples: {0} (at most 10)")]
    TooManyExamples(usize),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
