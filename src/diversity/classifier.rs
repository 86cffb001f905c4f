//! Zero-shot keyword classification of items.
//!
//! Labels and items are embedded into a shared space by an
//! [`EmbeddingBackend`]; each item goes to the label with the highest cosine
//! similarity. [`TaskFileBuilder`] uses this to turn a source dataset and a
//! keyword list into the task description consumed by the prompt builder.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::prompts::builder::{Subgroup, TaskDescription, TaskSample};
use crate::prompts::prompt_set::is_item_reference;

/// Default number of items embedded per backend call.
pub const DEFAULT_BATCH_SIZE: usize = 512;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("No labels given")]
    NoLabels,

    #[error("Batch size must be greater than 0")]
    ZeroBatchSize,

    #[error("Embedding backend returned {got} {what} rows, expected {expected}")]
    RowCount {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Label embeddings have dimension {labels} but item embeddings have {items}")]
    DimensionMismatch { labels: usize, items: usize },

    #[error("Embedding backend failed: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Source of label and item embeddings. Rows are in input order.
pub trait EmbeddingBackend: Send + Sync {
    fn embed_labels(&self, labels: &[String]) -> Result<Array2<f64>, ClassifierError>;

    fn embed_items(&self, items: &[PathBuf]) -> Result<Array2<f64>, ClassifierError>;
}

/// Item indices grouped by label, in label order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelPartition {
    groups: Vec<(String, Vec<usize>)>,
}

impl LabelPartition {
    fn with_labels(labels: &[String]) -> Self {
        Self {
            groups: labels.iter().map(|l| (l.clone(), Vec::new())).collect(),
        }
    }

    pub fn get(&self, label: &str) -> Option<&[usize]> {
        self.groups
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, idx)| idx.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.groups.iter().map(|(l, idx)| (l.as_str(), idx.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of classified items across all labels.
    pub fn total_items(&self) -> usize {
        self.groups.iter().map(|(_, idx)| idx.len()).sum()
    }

    pub fn into_inner(self) -> Vec<(String, Vec<usize>)> {
        self.groups
    }
}

/// Assigns items to their best-matching label.
#[derive(Debug, Clone)]
pub struct ZeroShotClassifier<B> {
    backend: B,
    batch_size: usize,
}

impl<B: EmbeddingBackend> ZeroShotClassifier<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Classify `items` against `labels`.
    ///
    /// Every item index lands in exactly one group. Ties go to the earlier
    /// label; an item whose embedding is zero therefore lands in the first.
    pub fn classify(
        &self,
        labels: &[String],
        items: &[PathBuf],
    ) -> Result<LabelPartition, ClassifierError> {
        if labels.is_empty() {
            return Err(ClassifierError::NoLabels);
        }
        if self.batch_size == 0 {
            return Err(ClassifierError::ZeroBatchSize);
        }

        info!(labels = labels.len(), items = items.len(), "Performing zero-shot classification");

        let mut label_embeddings = self.backend.embed_labels(labels)?;
        check_rows("label", labels.len(), &label_embeddings)?;
        normalize_rows(&mut label_embeddings);

        let mut partition = LabelPartition::with_labels(labels);

        for (batch_idx, batch) in items.chunks(self.batch_size).enumerate() {
            let offset = batch_idx * self.batch_size;
            let mut item_embeddings = self.backend.embed_items(batch)?;
            check_rows("item", batch.len(), &item_embeddings)?;
            if item_embeddings.ncols() != label_embeddings.ncols() {
                return Err(ClassifierError::DimensionMismatch {
                    labels: label_embeddings.ncols(),
                    items: item_embeddings.ncols(),
                });
            }
            normalize_rows(&mut item_embeddings);

            let similarities = item_embeddings.dot(&label_embeddings.t());
            for (i, row) in similarities.rows().into_iter().enumerate() {
                let mut best = 0;
                for (j, sim) in row.iter().enumerate() {
                    if *sim > row[best] {
                        best = j;
                    }
                }
                partition.groups[best].1.push(offset + i);
            }
            debug!(batch = batch_idx, size = batch.len(), "Classified batch");
        }

        Ok(partition)
    }
}

fn check_rows(what: &'static str, expected: usize, m: &Array2<f64>) -> Result<(), ClassifierError> {
    if m.nrows() != expected {
        return Err(ClassifierError::RowCount {
            what,
            expected,
            got: m.nrows(),
        });
    }
    Ok(())
}

fn normalize_rows(m: &mut Array2<f64>) {
    for mut row in m.rows_mut() {
        let norm = row.dot(&row).sqrt();
        if norm > 1e-10 {
            row.mapv_inplace(|x| x / norm);
        }
    }
}

/// Reference dataset a task description is derived from.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SourceDataset {
    pub image_folder: String,
    #[serde(alias = "skill")]
    pub dataset_description: String,
    pub samples: Vec<TaskSample>,
}

impl SourceDataset {
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Builds task descriptions by keyword classification.
pub struct TaskFileBuilder<B> {
    classifier: ZeroShotClassifier<B>,
}

impl<B: EmbeddingBackend> TaskFileBuilder<B> {
    pub fn new(classifier: ZeroShotClassifier<B>) -> Self {
        Self { classifier }
    }

    /// Split the dataset's reference samples into one subgroup per keyword.
    ///
    /// Sample items are resolved as `input_folder/image_folder/image_1`.
    /// Candidate lists start empty; see [`Self::assign_candidates`].
    pub fn build(
        &self,
        dataset: SourceDataset,
        keywords: &[String],
        input_folder: &Path,
    ) -> Result<TaskDescription, ClassifierError> {
        let items: Vec<PathBuf> = dataset
            .samples
            .iter()
            .map(|s| input_folder.join(&dataset.image_folder).join(&s.image_1))
            .collect();

        let partition = self.classifier.classify(keywords, &items)?;
        let subgroups = partition
            .into_inner()
            .into_iter()
            .map(|(keyword, reference_sample_idx)| {
                debug!(keyword = %keyword, samples = reference_sample_idx.len(), "Reference subgroup");
                Subgroup {
                    keyword,
                    reference_sample_idx,
                    candidate_image_paths: Vec::new(),
                }
            })
            .collect();

        Ok(TaskDescription {
            image_folder: dataset.image_folder,
            dataset_description: dataset.dataset_description,
            subgroups,
            samples: dataset.samples,
        })
    }

    /// Distribute candidate items over the task's subgroups by keyword.
    pub fn assign_candidates(
        &self,
        task: &mut TaskDescription,
        candidates: &[PathBuf],
    ) -> Result<(), ClassifierError> {
        let keywords: Vec<String> = task.subgroups.iter().map(|s| s.keyword.clone()).collect();
        let partition = self.classifier.classify(&keywords, candidates)?;

        for (subgroup, (_, indices)) in task.subgroups.iter_mut().zip(partition.iter()) {
            subgroup.candidate_image_paths = indices
                .iter()
                .map(|&i| candidates[i].to_string_lossy().into_owned())
                .collect();
            info!(
                keyword = %subgroup.keyword,
                candidates = subgroup.candidate_image_paths.len(),
                "Assigned candidates"
            );
        }
        Ok(())
    }
}

/// Item files directly inside `dir`, sorted by path.
pub fn collect_candidates(dir: &Path) -> Result<Vec<PathBuf>, ClassifierError> {
    let mut candidates = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| ClassifierError::Backend(e.to_string()))?;
        if entry.file_type().is_file()
            && is_item_reference(&entry.file_name().to_string_lossy())
        {
            candidates.push(entry.into_path());
        }
    }
    candidates.sort();
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diversity::HashingEmbedder;
    use crate::pipeline::formatter::ConversationTurn;

    /// Labels are one-hot; items point at the label named by their stem prefix.
    struct OneHotBackend {
        labels: Vec<String>,
    }

    impl OneHotBackend {
        fn row(&self, name: &str) -> Vec<f64> {
            self.labels
                .iter()
                .map(|l| if name.starts_with(l.as_str()) { 1.0 } else { 0.0 })
                .collect()
        }
    }

    impl EmbeddingBackend for OneHotBackend {
        fn embed_labels(&self, labels: &[String]) -> Result<Array2<f64>, ClassifierError> {
            let flat: Vec<f64> = labels.iter().flat_map(|l| self.row(l)).collect();
            Array2::from_shape_vec((labels.len(), self.labels.len()), flat)
                .map_err(|e| ClassifierError::Backend(e.to_string()))
        }

        fn embed_items(&self, items: &[PathBuf]) -> Result<Array2<f64>, ClassifierError> {
            let flat: Vec<f64> = items
                .iter()
                .flat_map(|p| self.row(&p.file_stem().unwrap().to_string_lossy()))
                .collect();
            Array2::from_shape_vec((items.len(), self.labels.len()), flat)
                .map_err(|e| ClassifierError::Backend(e.to_string()))
        }
    }

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn one_hot(names: &[&str]) -> ZeroShotClassifier<OneHotBackend> {
        ZeroShotClassifier::new(OneHotBackend {
            labels: labels(names),
        })
    }

    #[test]
    fn test_classify_assigns_every_item_once() {
        let classifier = one_hot(&["cat", "dog", "bird"]).with_batch_size(2);
        let items: Vec<PathBuf> = ["dog1.png", "cat1.png", "bird1.png", "cat2.png", "dog2.png"]
            .iter()
            .map(PathBuf::from)
            .collect();

        let partition = classifier
            .classify(&labels(&["cat", "dog", "bird"]), &items)
            .unwrap();

        assert_eq!(partition.get("cat").unwrap(), &[1, 3]);
        assert_eq!(partition.get("dog").unwrap(), &[0, 4]);
        assert_eq!(partition.get("bird").unwrap(), &[2]);
        assert_eq!(partition.total_items(), 5);

        let order: Vec<&str> = partition.iter().map(|(l, _)| l).collect();
        assert_eq!(order, vec!["cat", "dog", "bird"]);
    }

    #[test]
    fn test_unmatched_item_goes_to_first_label() {
        let classifier = one_hot(&["cat", "dog"]);
        let partition = classifier
            .classify(&labels(&["cat", "dog"]), &[PathBuf::from("fish.png")])
            .unwrap();
        assert_eq!(partition.get("cat").unwrap(), &[0]);
        assert!(partition.get("dog").unwrap().is_empty());
    }

    #[test]
    fn test_classify_errors() {
        let classifier = one_hot(&["cat"]);
        assert!(matches!(
            classifier.classify(&[], &[]),
            Err(ClassifierError::NoLabels)
        ));

        let zero = one_hot(&["cat"]).with_batch_size(0);
        assert!(matches!(
            zero.classify(&labels(&["cat"]), &[]),
            Err(ClassifierError::ZeroBatchSize)
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        struct Skewed;
        impl EmbeddingBackend for Skewed {
            fn embed_labels(&self, labels: &[String]) -> Result<Array2<f64>, ClassifierError> {
                Ok(Array2::ones((labels.len(), 3)))
            }
            fn embed_items(&self, items: &[PathBuf]) -> Result<Array2<f64>, ClassifierError> {
                Ok(Array2::ones((items.len(), 4)))
            }
        }

        let result = ZeroShotClassifier::new(Skewed)
            .classify(&labels(&["a"]), &[PathBuf::from("x.png")]);
        assert!(matches!(
            result,
            Err(ClassifierError::DimensionMismatch { labels: 3, items: 4 })
        ));
    }

    #[test]
    fn test_hashing_backend_matches_exact_stems() {
        let classifier = ZeroShotClassifier::new(HashingEmbedder::default());
        let partition = classifier
            .classify(
                &labels(&["golden retriever", "tabby cat"]),
                &[
                    PathBuf::from("c/tabby_cat.jpg"),
                    PathBuf::from("c/golden-retriever.png"),
                ],
            )
            .unwrap();
        assert_eq!(partition.get("golden retriever").unwrap(), &[1]);
        assert_eq!(partition.get("tabby cat").unwrap(), &[0]);
    }

    fn sample(image: &str) -> TaskSample {
        TaskSample {
            image_1: image.to_string(),
            conversations: vec![ConversationTurn::human("<image> q"), ConversationTurn::gpt("a")],
        }
    }

    #[test]
    fn test_task_file_builder() {
        let builder = TaskFileBuilder::new(one_hot(&["cat", "dog"]));
        let dataset = SourceDataset {
            image_folder: "refs".to_string(),
            dataset_description: "pets".to_string(),
            samples: vec![sample("dog_a.png"), sample("cat_a.png"), sample("dog_b.png")],
        };

        let mut task = builder
            .build(dataset, &labels(&["cat", "dog"]), Path::new("/in"))
            .unwrap();
        assert_eq!(task.dataset_description, "pets");
        assert_eq!(task.subgroups.len(), 2);
        assert_eq!(task.subgroups[0].keyword, "cat");
        assert_eq!(task.subgroups[0].reference_sample_idx, vec![1]);
        assert_eq!(task.subgroups[1].reference_sample_idx, vec![0, 2]);

        let candidates = vec![PathBuf::from("/c/dog9.png"), PathBuf::from("/c/cat9.png")];
        builder.assign_candidates(&mut task, &candidates).unwrap();
        assert_eq!(task.subgroups[0].candidate_image_paths, vec!["/c/cat9.png"]);
        assert_eq!(task.subgroups[1].candidate_image_paths, vec!["/c/dog9.png"]);
    }

    #[test]
    fn test_source_dataset_accepts_skill_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(
            &path,
            r#"{"image_folder": "imgs", "skill": "charts", "samples": []}"#,
        )
        .unwrap();
        let dataset = SourceDataset::load(&path).unwrap();
        assert_eq!(dataset.dataset_description, "charts");
    }

    #[test]
    fn test_collect_candidates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.PNG"), b"x").unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub.png")).unwrap();

        let found = collect_candidates(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.PNG"]);
    }
}
