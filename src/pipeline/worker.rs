//! Generation worker: one prompt slice in, one shard manifest out.
//!
//! Items are processed strictly in order with at most one completion call in
//! flight. Malformed replies go through the [`RepairLoop`]; an item whose
//! reply cannot be repaired, or whose files cannot be read, is skipped. Any
//! other failure (exhausted service retries, an interrupt) stops the slice,
//! and the worker still writes a manifest with everything accumulated so far.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use chrono::Local;
use regex::Regex;
use tracing::{debug, error, info, warn};

use super::config::GenerationConfig;
use super::formatter::{format_record, ExampleContext, FormattedExample};
use super::repair::{FormatRepairer, RepairError, RepairLoop, ServiceRepairer};
use super::validator::{RawRecord, ResponseValidator};
use crate::error::GenerationError;
use crate::export::manifest::ShardManifest;
use crate::llm::{CompletionSegment, CompletionService, LlmProvider};
use crate::prompts::prompt_set::{item_mime, resolve_in, PromptObject, PromptSegment, PromptSlice};

/// Angle-bracket control tags echoed back by some models (`<image>`, `<option_a>`).
static CONTROL_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<>\n]*>").expect("control tag pattern is valid"));

/// Remove control tags from a reply.
pub fn strip_control_tags(text: &str) -> String {
    CONTROL_TAG.replace_all(text, "").into_owned()
}

/// Where a worker reads items and writes its manifest.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Base directory of the item references in the prompt set.
    pub input_folder: PathBuf,
    /// Directory receiving the shard manifest.
    pub output_dir: PathBuf,
    pub file_prefix: String,
    pub shard_index: usize,
}

impl WorkerSettings {
    /// Manifest path: `<output_dir>/<prefix>_<shard>_<timestamp>.json`.
    pub fn manifest_path(&self) -> PathBuf {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        self.output_dir.join(format!(
            "{}_{}_{}.json",
            self.file_prefix, self.shard_index, timestamp
        ))
    }
}

/// Four index-aligned accumulators: entry `i` of each describes record `i`.
#[derive(Debug, Default)]
pub struct GenerationAccumulator {
    records: Vec<RawRecord>,
    subject_refs: Vec<Option<String>>,
    icl_indices: Vec<Vec<usize>>,
    keywords: Vec<String>,
}

impl GenerationAccumulator {
    /// Append every record of one prompt together with its prompt metadata.
    pub fn push_batch(
        &mut self,
        records: Vec<RawRecord>,
        subject_ref: Option<&str>,
        icl_indices: &[usize],
        keyword: &str,
    ) {
        for record in records {
            self.records.push(record);
            self.subject_refs.push(subject_ref.map(str::to_string));
            self.icl_indices.push(icl_indices.to_vec());
            self.keywords.push(keyword.to_string());
        }
    }

    pub fn lens(&self) -> [usize; 4] {
        [
            self.records.len(),
            self.subject_refs.len(),
            self.icl_indices.len(),
            self.keywords.len(),
        ]
    }

    /// Truncate all accumulators to their shortest common length.
    pub fn align(&mut self) -> usize {
        let min_len = self.lens().into_iter().min().unwrap_or(0);
        self.records.truncate(min_len);
        self.subject_refs.truncate(min_len);
        self.icl_indices.truncate(min_len);
        self.keywords.truncate(min_len);
        min_len
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Summary of one worker run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub manifest_path: PathBuf,
    pub start_idx: usize,
    pub end_idx: usize,
    /// Prompts that produced records.
    pub processed: usize,
    pub skipped: usize,
    pub records: usize,
    pub examples: usize,
    /// Why the slice stopped early, if it did.
    pub aborted: Option<String>,
}

enum ItemOutcome {
    Records(Vec<RawRecord>),
    Skipped,
}

pub struct GenerationWorker {
    settings: WorkerSettings,
    generator: CompletionService,
    repairer: Arc<dyn FormatRepairer>,
    max_repairs: usize,
    interrupted: Arc<AtomicBool>,
}

impl GenerationWorker {
    pub fn new(
        settings: WorkerSettings,
        generator: CompletionService,
        repairer: Arc<dyn FormatRepairer>,
        max_repairs: usize,
    ) -> Self {
        Self {
            settings,
            generator,
            repairer,
            max_repairs,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Build a worker whose generation and repair endpoints share `provider`.
    pub fn with_provider(
        settings: WorkerSettings,
        provider: Arc<dyn LlmProvider>,
        model: &str,
        slice: &PromptSlice,
        config: &GenerationConfig,
    ) -> Self {
        let profile = slice.mode.profile();
        let generator = CompletionService::new(
            provider.clone(),
            model,
            slice.mode.system_prompt(&slice.dataset_description),
        )
        .with_policy(config.retry.clone())
        .with_temperature(config.temperature);
        let repair_service =
            CompletionService::new(provider, model, profile.repair_system_prompt)
                .with_policy(config.retry.clone());

        Self::new(
            settings,
            generator,
            Arc::new(ServiceRepairer::new(repair_service)),
            config.max_repair_attempts,
        )
    }

    /// Flag checked between items; setting it stops the slice.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    /// Set the interrupt flag when the process receives Ctrl-C.
    pub fn listen_for_interrupt(&self) -> tokio::task::JoinHandle<()> {
        let flag = self.interrupted.clone();
        let shard = self.settings.shard_index;
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(shard, "Interrupt received, stopping after the current item");
                flag.store(true, Ordering::SeqCst);
            }
        })
    }

    /// Process the slice and write its manifest.
    ///
    /// Only a failure to write the manifest is returned as an error; item and
    /// slice failures are logged and reflected in the report.
    pub async fn run(&self, slice: PromptSlice) -> Result<WorkerReport, GenerationError> {
        let shard = self.settings.shard_index;
        info!(
            shard,
            start_idx = slice.start_idx,
            prompts = slice.prompts.len(),
            mode = %slice.mode,
            target = slice.records_per_subject * slice.prompts.len(),
            "Starting generation"
        );

        let mut acc = GenerationAccumulator::default();
        let mut processed = 0;
        let mut skipped = 0;
        let mut reached = slice.prompts.len();
        let mut aborted = None;

        for (offset, prompt) in slice.prompts.iter().enumerate() {
            let index = slice.start_idx + offset;
            let result = if self.interrupted.load(Ordering::SeqCst) {
                Err(GenerationError::Interrupted { index })
            } else {
                self.process_prompt(&slice, index, prompt).await
            };

            match result {
                Ok(ItemOutcome::Records(records)) => {
                    let subject = prompt
                        .subject()
                        .map(|s| resolve_in(&self.settings.input_folder, s))
                        .map(|p| p.to_string_lossy().into_owned());
                    acc.push_batch(records, subject.as_deref(), &prompt.icl_indices, &prompt.keyword);
                    processed += 1;
                }
                Ok(ItemOutcome::Skipped) => skipped += 1,
                Err(err) => {
                    error!(shard, index, error = %err, "Aborting slice, saving progress");
                    reached = offset;
                    aborted = Some(err.to_string());
                    break;
                }
            }
        }

        let kept = acc.align();
        let examples = self.format_examples(&slice, &acc);
        let end_idx = slice.start_idx + reached;
        let manifest = ShardManifest::new(slice.start_idx, end_idx, slice.num_prompts(), examples);
        let manifest_path = self.settings.manifest_path();
        manifest.write(&manifest_path)?;

        info!(
            shard,
            processed,
            skipped,
            records = kept,
            examples = manifest.len_samples,
            path = %manifest_path.display(),
            "Saved shard manifest"
        );

        Ok(WorkerReport {
            manifest_path,
            start_idx: slice.start_idx,
            end_idx,
            processed,
            skipped,
            records: kept,
            examples: manifest.len_samples,
            aborted,
        })
    }

    async fn process_prompt(
        &self,
        slice: &PromptSlice,
        index: usize,
        prompt: &PromptObject,
    ) -> Result<ItemOutcome, GenerationError> {
        let profile = slice.mode.profile();

        let Some(subject) = prompt.subject() else {
            error!(index, "Prompt does not end with a subject item, skipping");
            return Ok(ItemOutcome::Skipped);
        };
        debug!(index, subject, "Processing subject item");

        let segment_count = if profile.sends_subject {
            prompt.prompt.len()
        } else {
            prompt.prompt.len() - 1
        };
        let mut segments = Vec::with_capacity(segment_count);
        for segment in prompt.segments().take(segment_count) {
            match segment {
                PromptSegment::Text(text) => segments.push(CompletionSegment::Text(text.to_string())),
                PromptSegment::Item(reference) => {
                    let path = resolve_in(&self.settings.input_folder, reference);
                    match tokio::fs::read(&path).await {
                        Ok(bytes) => segments.push(CompletionSegment::Binary {
                            bytes,
                            mime: item_mime(reference).to_string(),
                        }),
                        Err(e) => {
                            error!(index, path = %path.display(), error = %e, "Failed to load item, skipping");
                            return Ok(ItemOutcome::Skipped);
                        }
                    }
                }
            }
        }

        let instruction = slice.mode.generation_instruction(slice.records_per_subject);
        let reply = self.generator.generate(segments, &instruction).await?;
        let cleaned = strip_control_tags(&reply);

        let repair_loop = RepairLoop::new(ResponseValidator::new(profile.required_keys), self.max_repairs);
        let outcome = match repair_loop.run(&cleaned, self.repairer.as_ref()).await {
            Ok(outcome) => outcome,
            Err(RepairError::Exhausted { repairs, last_error }) => {
                error!(index, repairs, error = %last_error, "Reply could not be repaired, skipping");
                return Ok(ItemOutcome::Skipped);
            }
            Err(RepairError::Service(e)) => return Err(e.into()),
        };

        if outcome.records.len() != slice.records_per_subject {
            warn!(
                index,
                got = outcome.records.len(),
                expected = slice.records_per_subject,
                "Record count differs from target"
            );
        }

        Ok(ItemOutcome::Records(outcome.records))
    }

    fn format_examples(&self, slice: &PromptSlice, acc: &GenerationAccumulator) -> Vec<FormattedExample> {
        let layout = slice.mode.profile().layout;
        let mut examples = Vec::with_capacity(acc.len() * 2);

        for (id, record) in acc.records.iter().enumerate() {
            let ctx = ExampleContext {
                subject_reference: acc.subject_refs[id].as_deref(),
                icl_indices: &acc.icl_indices[id],
                keyword: &acc.keywords[id],
                dataset_description: &slice.dataset_description,
            };
            match format_record(layout, record, id, &ctx) {
                Ok(formatted) => examples.extend(formatted),
                Err(e) => error!(id, error = %e, "Dropping record that cannot be formatted"),
            }
        }

        examples
    }
}
