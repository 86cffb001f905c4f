//! Command-line interface for mm-forge.
//!
//! Provides commands for task-file and prompt-set construction, sharded
//! generation, and merging of shard manifests.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
