//! Prompt-set construction from a task description.
//!
//! Each subgroup of the task description gets a share of the requested
//! generation volume proportional to its number of reference samples. Every
//! prompt interleaves `num_icl_samples` reference examples from the subgroup
//! with their question and answer, then ends with one candidate item.

use std::path::{Path, PathBuf};

use chrono::Local;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::diversity::sampling::{create_rng, SubsetBatchSampler};
use crate::error::PromptBuildError;
use crate::pipeline::formatter::ConversationTurn;
use crate::pipeline::mode::GenerationMode;
use crate::pipeline::worker::strip_control_tags;

use super::prompt_set::{PromptFile, PromptObject};

/// Directory under the output folder receiving prompt files.
pub const PROMPTS_SUBDIR: &str = "generated_prompts";

const ITEM_TAG_PATTERN: &str = r"<image.?.?.?>";

const ORDINALS: [&str; 10] = [
    "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth", "tenth",
];

/// English ordinal for 1..=10.
pub fn ordinal(n: usize) -> Option<&'static str> {
    n.checked_sub(1).and_then(|i| ORDINALS.get(i)).copied()
}

/// One reference sample of the source dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSample {
    pub image_1: String,
    pub conversations: Vec<ConversationTurn>,
}

/// Keyword subgroup: its reference samples and the candidate items to
/// generate for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subgroup {
    pub keyword: String,
    pub reference_sample_idx: Vec<usize>,
    #[serde(default)]
    pub candidate_image_paths: Vec<String>,
}

/// Task description: a reference dataset split into keyword subgroups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescription {
    pub image_folder: String,
    pub dataset_description: String,
    pub subgroups: Vec<Subgroup>,
    pub samples: Vec<TaskSample>,
}

impl TaskDescription {
    pub fn load(path: &Path) -> Result<Self, PromptBuildError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), PromptBuildError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Builds a [`PromptFile`] from a [`TaskDescription`].
#[derive(Debug, Clone)]
pub struct PromptSetBuilder {
    task: TaskDescription,
    task_desc_path: String,
    mode: GenerationMode,
    num_icl_samples: usize,
    min_gen_per_candidate: usize,
    total_gen: usize,
    seed: Option<u64>,
}

impl PromptSetBuilder {
    pub fn new(task: TaskDescription, task_desc_path: impl Into<String>, mode: GenerationMode) -> Self {
        Self {
            task,
            task_desc_path: task_desc_path.into(),
            mode,
            num_icl_samples: 3,
            min_gen_per_candidate: 5,
            total_gen: 100,
            seed: None,
        }
    }

    pub fn with_num_icl_samples(mut self, n: usize) -> Self {
        self.num_icl_samples = n;
        self
    }

    pub fn with_min_gen_per_candidate(mut self, n: usize) -> Self {
        self.min_gen_per_candidate = n;
        self
    }

    pub fn with_total_gen(mut self, n: usize) -> Self {
        self.total_gen = n;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Prompts per subgroup: `ceil(total_gen * share / min_gen_per_candidate)`,
    /// where `share` is the subgroup's fraction of all reference samples.
    pub fn subgroup_sizes(&self) -> Result<Vec<usize>, PromptBuildError> {
        if self.min_gen_per_candidate == 0 {
            return Err(PromptBuildError::InvalidSetting(
                "min_gen_per_candidate must be greater than 0".to_string(),
            ));
        }
        let total_refs: usize = self
            .task
            .subgroups
            .iter()
            .map(|s| s.reference_sample_idx.len())
            .sum();
        if total_refs == 0 {
            return Err(PromptBuildError::NoReferences);
        }

        let denominator = total_refs * self.min_gen_per_candidate;
        Ok(self
            .task
            .subgroups
            .iter()
            .map(|s| (self.total_gen * s.reference_sample_idx.len()).div_ceil(denominator))
            .collect())
    }

    fn validate(&self, sizes: &[usize]) -> Result<(), PromptBuildError> {
        if self.num_icl_samples > ORDINALS.len() {
            return Err(PromptBuildError::TooManyExamples(self.num_icl_samples));
        }
        let len = self.task.samples.len();
        for (subgroup, &size) in self.task.subgroups.iter().zip(sizes) {
            if let Some(&index) = subgroup.reference_sample_idx.iter().find(|&&i| i >= len) {
                return Err(PromptBuildError::SampleOutOfRange { index, len });
            }
            if size == 0 {
                continue;
            }
            if subgroup.candidate_image_paths.is_empty() {
                return Err(PromptBuildError::EmptySubgroup {
                    keyword: subgroup.keyword.clone(),
                    what: "candidate items",
                });
            }
            if subgroup.reference_sample_idx.is_empty() && self.num_icl_samples > 0 {
                return Err(PromptBuildError::EmptySubgroup {
                    keyword: subgroup.keyword.clone(),
                    what: "reference samples",
                });
            }
        }
        Ok(())
    }

    /// Generate the prompt set.
    pub fn build(&self) -> Result<PromptFile, PromptBuildError> {
        let sizes = self.subgroup_sizes()?;
        self.validate(&sizes)?;

        let item_tag = Regex::new(ITEM_TAG_PATTERN)
            .map_err(|e| PromptBuildError::InvalidSetting(e.to_string()))?;
        let mut rng = create_rng(self.seed);
        let mut prompts = Vec::with_capacity(sizes.iter().sum());

        info!(mode = %self.mode, subgroups = sizes.len(), "Generating prompts");

        for (subgroup, &size) in self.task.subgroups.iter().zip(&sizes) {
            debug!(keyword = %subgroup.keyword, prompts = size, "Subgroup");
            let mut candidates = SubsetBatchSampler::new(&subgroup.candidate_image_paths, 1);
            let mut references = SubsetBatchSampler::with_subset(
                &self.task.samples,
                self.num_icl_samples,
                subgroup.reference_sample_idx.clone(),
            );

            for _ in 0..size {
                let Some((_, candidate)) = candidates.next_one(&mut rng) else {
                    break;
                };
                let batch = references.next_batch(&mut rng);

                let mut segments = Vec::with_capacity(batch.items.len() * 3 + 1);
                for (i, (sample, &index)) in batch.items.iter().zip(&batch.indices).enumerate() {
                    let example_num = i + 1;
                    let (query, answer) = match sample.conversations.as_slice() {
                        [q, a, ..] => (q.value.as_str(), a.value.as_str()),
                        _ => return Err(PromptBuildError::MalformedSample { index }),
                    };
                    let ordinal = ordinal(example_num)
                        .ok_or(PromptBuildError::TooManyExamples(example_num))?;
                    let query = item_tag.replace_all(query, format!("the {} image", ordinal));
                    let query = strip_control_tags(&query);

                    segments.push(format!("Example {}", example_num));
                    segments.push(
                        Path::new(&self.task.image_folder)
                            .join(&sample.image_1)
                            .to_string_lossy()
                            .into_owned(),
                    );
                    segments.push(format!("Q: {}\n A: {}", query, answer));
                }
                segments.push(candidate.clone());

                prompts.push(PromptObject {
                    prompt: segments,
                    keyword: subgroup.keyword.clone(),
                    icl_indices: batch.indices,
                });
            }
        }

        info!(prompts = prompts.len(), "Prompt generation complete");

        Ok(PromptFile {
            task_desc_path: self.task_desc_path.clone(),
            dataset_description: self.task.dataset_description.clone(),
            num_icl_samples: self.num_icl_samples,
            mode: self.mode,
            min_gen_per_candidate: self.min_gen_per_candidate,
            total_gen: sizes.iter().sum(),
            prompts,
        })
    }
}

/// `<output>/generated_prompts/<prefix>_prompts_<timestamp>.json`
pub fn prompt_file_path(output_folder: &Path, file_prefix: &str) -> PathBuf {
    output_folder.join(PROMPTS_SUBDIR).join(format!(
        "{}_prompts_{}.json",
        file_prefix,
        Local::now().format("%Y%m%d_%H%M%S")
    ))
}
