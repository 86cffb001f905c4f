//! Prompt files: the unit of work handed to generation workers.
//!
//! A prompt file is produced once (see [`super::builder`]) and never mutated
//! afterwards. Workers receive an owned [`PromptSlice`] copied out of it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::pipeline::mode::GenerationMode;
use crate::scheduler::partition::SliceLen;

const ITEM_EXTENSIONS: [&str; 5] = [".png", ".jpg", ".jpeg", ".bmp", ".gif"];

/// Whether a prompt segment names an item file rather than text.
pub fn is_item_reference(segment: &str) -> bool {
    let lower = segment.to_lowercase();
    ITEM_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// MIME type used when sending an item inline.
pub fn item_mime(reference: &str) -> &'static str {
    let lower = reference.to_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else if lower.ends_with(".bmp") {
        "image/bmp"
    } else {
        "image/jpeg"
    }
}

/// One typed prompt segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSegment<'a> {
    Text(&'a str),
    Item(&'a str),
}

/// One unit of work: in-context examples followed by the subject item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptObject {
    pub prompt: Vec<String>,
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    pub icl_indices: Vec<usize>,
}

impl PromptObject {
    pub fn segments(&self) -> impl Iterator<Item = PromptSegment<'_>> {
        self.prompt.iter().map(|s| {
            if is_item_reference(s) {
                PromptSegment::Item(s)
            } else {
                PromptSegment::Text(s)
            }
        })
    }

    /// The subject item: the last segment, when it is an item reference.
    pub fn subject(&self) -> Option<&str> {
        self.prompt
            .last()
            .map(String::as_str)
            .filter(|s| is_item_reference(s))
    }
}

/// A prompt set as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptFile {
    #[serde(default)]
    pub task_desc_path: String,
    pub dataset_description: String,
    #[serde(default)]
    pub num_icl_samples: usize,
    pub mode: GenerationMode,
    /// Records requested per subject item.
    pub min_gen_per_candidate: usize,
    #[serde(default)]
    pub total_gen: usize,
    pub prompts: Vec<PromptObject>,
}

impl PromptFile {
    pub fn load(path: &Path) -> Result<Self, GenerationError> {
        let content = std::fs::read_to_string(path).map_err(|source| GenerationError::PromptFile {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| GenerationError::InvalidPromptFile {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Copy out the prompts in `[start, start + len)`, clamped to the set.
    pub fn slice(&self, start: usize, len: SliceLen) -> PromptSlice {
        let total = self.prompts.len();
        let begin = start.min(total);
        let end = match len {
            SliceLen::Count(n) => start.saturating_add(n).min(total),
            SliceLen::ToEnd => total,
        };
        PromptSlice {
            start_idx: start,
            requested: len,
            mode: self.mode,
            dataset_description: self.dataset_description.clone(),
            records_per_subject: self.min_gen_per_candidate,
            prompts: self.prompts[begin..end].to_vec(),
        }
    }
}

/// An owned, immutable slice of a prompt set plus the metadata a worker needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSlice {
    pub start_idx: usize,
    pub requested: SliceLen,
    pub mode: GenerationMode,
    pub dataset_description: String,
    pub records_per_subject: usize,
    pub prompts: Vec<PromptObject>,
}

impl PromptSlice {
    /// Number of prompts recorded in the manifest's `num_prompts`.
    pub fn num_prompts(&self) -> usize {
        match self.requested {
            SliceLen::Count(n) => n,
            SliceLen::ToEnd => self.prompts.len(),
        }
    }
}

/// Resolve a prompt-file path against the input folder.
pub fn resolve_in(input_folder: &Path, reference: &str) -> PathBuf {
    input_folder.join(reference)
}
