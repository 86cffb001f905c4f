//! Output manifests.
//!
//! Each worker writes one [`ShardManifest`]; [`ShardMerger`] concatenates the
//! shards of a run into the final manifest.

pub mod manifest;
pub mod merge;

pub use manifest::ShardManifest;
pub use merge::{shard_index, MergedRun, ShardMerger};
