//! Keyword partitioning and sampling for prompt-set construction.
//!
//! This module provides three components:
//!
//! 1. **Embeddings** - Hash-based text vectors for keywords and item names
//! 2. **Classifier** - Zero-shot assignment of items to keywords, and the
//!    task-description builder that uses it
//! 3. **Sampling** - Epoch-shuffled batch draws of references and candidates
//!
//! # Usage
//!
//! ```rust,ignore
//! use mm_forge::diversity::{HashingEmbedder, ZeroShotClassifier};
//!
//! let classifier = ZeroShotClassifier::new(HashingEmbedder::default()).with_batch_size(64);
//! let partition = classifier.classify(&keywords, &candidate_paths)?;
//! for (keyword, indices) in partition.iter() {
//!     println!("{}: {} items", keyword, indices.len());
//! }
//! ```

pub mod classifier;
pub mod embeddings;
pub mod sampling;

pub use classifier::{
    collect_candidates, ClassifierError, EmbeddingBackend, LabelPartition, SourceDataset,
    TaskFileBuilder, ZeroShotClassifier, DEFAULT_BATCH_SIZE,
};
pub use embeddings::{normalize, HashingEmbedder};
pub use sampling::{create_rng, Batch, SubsetBatchSampler};
