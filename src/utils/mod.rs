//! Shared utility functions for mm-forge.
//!
//! Currently holds the JSON extraction helpers used to pull record arrays out
//! of free-text model replies.

pub mod json_extraction;

pub use json_extraction::{escape_stray_backslashes, extract_json_array, JsonExtractionError};
