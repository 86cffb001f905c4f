//! Prompt sets and model prompt templates.
//!
//! - [`templates`] - System, generation and repair prompts per mode
//! - [`prompt_set`] - The prompt file format and the slices handed to workers
//! - [`builder`] - Prompt-set construction from a task description

pub mod builder;
pub mod prompt_set;
pub mod templates;

pub use builder::{
    ordinal, prompt_file_path, PromptSetBuilder, Subgroup, TaskDescription, TaskSample,
    PROMPTS_SUBDIR,
};
pub use prompt_set::{
    is_item_reference, item_mime, resolve_in, PromptFile, PromptObject, PromptSegment, PromptSlice,
};
