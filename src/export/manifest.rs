//! Shard and merged manifest files.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;
use crate::pipeline::formatter::FormattedExample;

/// JSON document written by one worker, and by the merger for a whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardManifest {
    /// Shared directory of the subject references. Empty in shard files.
    #[serde(default)]
    pub image_folder: String,
    pub len_samples: usize,
    pub start_idx: usize,
    pub end_idx: usize,
    pub num_prompts: usize,
    pub samples: Vec<FormattedExample>,
}

impl ShardManifest {
    pub fn new(
        start_idx: usize,
        end_idx: usize,
        num_prompts: usize,
        samples: Vec<FormattedExample>,
    ) -> Self {
        Self {
            image_folder: String::new(),
            len_samples: samples.len(),
            start_idx,
            end_idx,
            num_prompts,
            samples,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|e| ManifestError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| ManifestError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Write the manifest, creating parent directories as needed.
    pub fn write(&self, path: &Path) -> Result<(), ManifestError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
