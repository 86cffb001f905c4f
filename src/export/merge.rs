//! Merging of shard manifests into a single run manifest.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::ManifestError;

use super::manifest::ShardManifest;

/// Shard index embedded in a manifest file name: the leading digits after the
/// last `<run_id>_`.
pub fn shard_index(file_name: &str, run_id: &str) -> Option<usize> {
    let marker = format!("{}_", run_id);
    let (_, rest) = file_name.rsplit_once(&marker)?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Result of a merge.
#[derive(Debug)]
pub struct MergedRun {
    pub manifest: ShardManifest,
    pub output_path: PathBuf,
    /// Shard files in merge order.
    pub shard_files: Vec<PathBuf>,
    /// Shards whose `start_idx` differs from the running prompt offset, with
    /// the offset expected at that point.
    pub misaligned: Vec<(PathBuf, usize)>,
}

/// Concatenates the shard manifests of one run.
#[derive(Debug, Clone)]
pub struct ShardMerger {
    folder: PathBuf,
    run_id: String,
    output_folder: PathBuf,
    strip_prefix: Option<String>,
    renumber_ids: bool,
}

impl ShardMerger {
    pub fn new(
        folder: impl Into<PathBuf>,
        run_id: impl Into<String>,
        output_folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            folder: folder.into(),
            run_id: run_id.into(),
            output_folder: output_folder.into(),
            strip_prefix: None,
            renumber_ids: false,
        }
    }

    /// Remove a leading prefix from the computed shared base directory.
    pub fn with_strip_prefix(mut self, prefix: Option<String>) -> Self {
        self.strip_prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    /// Renumber example ids `0..n` across the merged run. Off by default:
    /// each shard's ids start at 0.
    pub fn with_renumber_ids(mut self, renumber: bool) -> Self {
        self.renumber_ids = renumber;
        self
    }

    /// `<output>/<run_id>.json`
    pub fn output_path(&self) -> PathBuf {
        self.output_folder.join(format!("{}.json", self.run_id))
    }

    /// Shard manifests of the run, sorted by numeric shard index.
    pub fn find_shards(&self) -> Result<Vec<PathBuf>, ManifestError> {
        let merged_name = format!("{}.json", self.run_id);
        let mut shards = Vec::new();

        for entry in WalkDir::new(&self.folder).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| ManifestError::Unreadable {
                path: self.folder.clone(),
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".json") || !name.contains(&self.run_id) || name == merged_name {
                continue;
            }
            match shard_index(&name, &self.run_id) {
                Some(index) => shards.push((index, entry.into_path())),
                None => warn!(file = %name, "Skipping file without a shard index"),
            }
        }

        shards.sort();
        Ok(shards.into_iter().map(|(_, path)| path).collect())
    }

    /// Merge every shard of the run and write the merged manifest.
    pub fn merge(&self) -> Result<MergedRun, ManifestError> {
        let shard_files = self.find_shards()?;
        let Some((first, rest)) = shard_files.split_first() else {
            return Err(ManifestError::NoShards {
                run_id: self.run_id.clone(),
                dir: self.folder.clone(),
            });
        };

        let mut merged = ShardManifest::load(first)?;
        let mut offset = merged.start_idx + merged.num_prompts;
        let mut misaligned = Vec::new();
        debug!(file = %first.display(), samples = merged.samples.len(), "Loaded first shard");

        for path in rest {
            let shard = ShardManifest::load(path)?;
            if shard.start_idx != offset {
                warn!(
                    file = %path.display(),
                    start_idx = shard.start_idx,
                    expected = offset,
                    "Shard does not start where the previous one ended"
                );
                misaligned.push((path.clone(), offset));
            }
            offset += shard.num_prompts;
            merged.end_idx = shard.end_idx;
            merged.num_prompts += shard.num_prompts;
            merged.samples.extend(shard.samples);
            debug!(file = %path.display(), total = merged.samples.len(), "Merged shard");
        }

        self.rebase_subjects(&mut merged);

        if self.renumber_ids {
            for (id, example) in merged.samples.iter_mut().enumerate() {
                example.id = id;
            }
        }
        merged.len_samples = merged.samples.len();

        let output_path = self.output_path();
        merged.write(&output_path)?;
        info!(
            run_id = %self.run_id,
            shards = shard_files.len(),
            samples = merged.len_samples,
            image_folder = %merged.image_folder,
            output = %output_path.display(),
            "Merged run manifest written"
        );

        Ok(MergedRun {
            manifest: merged,
            output_path,
            shard_files,
            misaligned,
        })
    }

    /// Set the shared base directory from the first subject reference and
    /// make every subject reference relative to it.
    fn rebase_subjects(&self, merged: &mut ShardManifest) {
        let base = merged
            .samples
            .iter()
            .find_map(|s| s.subject_reference.as_deref())
            .and_then(|s| Path::new(s).parent())
            .map(Path::to_path_buf)
            .unwrap_or_default();

        for example in &mut merged.samples {
            if let Some(subject) = example.subject_reference.take() {
                let path = Path::new(&subject);
                let relative = match path.strip_prefix(&base) {
                    Ok(rel) if !base.as_os_str().is_empty() => Some(rel.to_path_buf()),
                    _ => path.file_name().map(PathBuf::from),
                };
                example.subject_reference = Some(
                    relative
                        .map(|r| r.to_string_lossy().into_owned())
                        .unwrap_or(subject),
                );
            }
        }

        let mut image_folder = base.to_string_lossy().into_owned();
        if let Some(prefix) = &self.strip_prefix {
            if let Some(stripped) = image_folder.strip_prefix(prefix.as_str()) {
                image_folder = stripped.to_string();
            }
        }
        merged.image_folder = image_folder;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::formatter::{ConversationTurn, FormattedExample};

    fn example(id: usize, subject: Option<&str>) -> FormattedExample {
        FormattedExample {
            id,
            subject_reference: subject.map(str::to_string),
            conversations: vec![ConversationTurn::human("q"), ConversationTurn::gpt("a")],
            icl_indices: vec![0],
            keyword: "k".to_string(),
        }
    }

    fn write_shard(dir: &Path, name: &str, start: usize, num: usize, subjects: &[&str]) {
        let samples = subjects
            .iter()
            .enumerate()
            .map(|(i, s)| example(i, Some(s)))
            .collect();
        ShardManifest::new(start, start + num, num, samples)
            .write(&dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_shard_index() {
        assert_eq!(shard_index("birds_10_20240101_120000.json", "birds"), Some(10));
        assert_eq!(shard_index("x_birds_3_now.json", "birds"), Some(3));
        assert_eq!(shard_index("birds_final.json", "birds"), None);
        assert_eq!(shard_index("other_1.json", "birds"), None);
    }

    #[test]
    fn test_shards_sort_numerically() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(dir.path(), "run_10_20240101_000000.json", 20, 10, &["/i/c.png"]);
        write_shard(dir.path(), "run_2_20240101_000000.json", 10, 10, &["/i/b.png"]);
        write_shard(dir.path(), "run_1_20240101_000000.json", 0, 10, &["/i/a.png"]);
        std::fs::write(dir.path().join("notes_run.txt"), "x").unwrap();

        let merger = ShardMerger::new(dir.path(), "run", dir.path());
        let names: Vec<String> = merger
            .find_shards()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "run_1_20240101_000000.json",
                "run_2_20240101_000000.json",
                "run_10_20240101_000000.json"
            ]
        );

        let merged = merger.merge().unwrap();
        let subjects: Vec<_> = merged
            .manifest
            .samples
            .iter()
            .map(|s| s.subject_reference.clone().unwrap())
            .collect();
        assert_eq!(subjects, vec!["a.png", "b.png", "c.png"]);

        // the merged file itself is not picked up as a shard on a re-run
        assert_eq!(merger.find_shards().unwrap().len(), 3);
    }

    #[test]
    fn test_merge_concatenates_and_rebases() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("merged");
        write_shard(
            dir.path(),
            "birds_0_t.json",
            0,
            4,
            &["/data/in/cands/a.png", "/data/in/cands/b.png", "/data/in/cands/sub/c.png"],
        );
        write_shard(
            dir.path(),
            "birds_1_t.json",
            4,
            6,
            &["/data/in/cands/d.png", "/elsewhere/e.png", "/data/in/cands/f.png", "/data/in/cands/g.png", "/data/in/cands/h.png"],
        );

        let merged = ShardMerger::new(dir.path(), "birds", &out)
            .with_strip_prefix(Some("/data/".to_string()))
            .merge()
            .unwrap();
        let m = &merged.manifest;

        assert_eq!(m.samples.len(), 8);
        assert_eq!(m.len_samples, 8);
        assert_eq!(m.start_idx, 0);
        assert_eq!(m.end_idx, 10);
        assert_eq!(m.num_prompts, 10);
        assert_eq!(m.image_folder, "in/cands");
        assert_eq!(m.samples[2].subject_reference.as_deref(), Some("sub/c.png"));
        assert_eq!(m.samples[4].subject_reference.as_deref(), Some("e.png"));

        // per-shard ids are kept
        let ids: Vec<usize> = m.samples.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 0, 1, 2, 3, 4]);

        assert_eq!(merged.output_path, out.join("birds.json"));
        assert_eq!(ShardManifest::load(&merged.output_path).unwrap(), *m);
    }

    #[test]
    fn test_offset_accumulates_across_shards() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(dir.path(), "gap_0_t.json", 0, 2, &["/x/a.png"]);
        write_shard(dir.path(), "gap_1_t.json", 5, 2, &["/x/b.png"]);
        write_shard(dir.path(), "gap_2_t.json", 7, 2, &["/x/c.png"]);

        let merged = ShardMerger::new(dir.path(), "gap", dir.path()).merge().unwrap();
        let misaligned: Vec<(String, usize)> = merged
            .misaligned
            .iter()
            .map(|(p, expected)| (p.file_name().unwrap().to_string_lossy().into_owned(), *expected))
            .collect();
        // the gap after shard 0 is not absorbed: shard 2 is still checked against 4
        assert_eq!(
            misaligned,
            vec![("gap_1_t.json".to_string(), 2), ("gap_2_t.json".to_string(), 4)]
        );
        assert_eq!(merged.manifest.num_prompts, 6);
    }

    #[test]
    fn test_contiguous_shards_are_aligned() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(dir.path(), "ok_0_t.json", 0, 3, &["/x/a.png"]);
        write_shard(dir.path(), "ok_1_t.json", 3, 4, &["/x/b.png"]);

        let merged = ShardMerger::new(dir.path(), "ok", dir.path()).merge().unwrap();
        assert!(merged.misaligned.is_empty());
    }

    #[test]
    fn test_renumber_ids_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        write_shard(dir.path(), "r_0_t.json", 0, 1, &["/x/a.png", "/x/b.png"]);
        write_shard(dir.path(), "r_1_t.json", 1, 1, &["/x/c.png"]);

        let merged = ShardMerger::new(dir.path(), "r", dir.path())
            .with_renumber_ids(true)
            .merge()
            .unwrap();
        let ids: Vec<usize> = merged.manifest.samples.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_subjectless_examples_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        ShardManifest::new(
            0,
            1,
            1,
            vec![example(0, None), example(0, Some("/items/cand.png"))],
        )
        .write(&dir.path().join("tqa_0_t.json"))
        .unwrap();

        let merged = ShardMerger::new(dir.path(), "tqa", dir.path()).merge().unwrap();
        assert_eq!(merged.manifest.image_folder, "/items");
        assert_eq!(merged.manifest.samples[0].subject_reference, None);
        assert_eq!(
            merged.manifest.samples[1].subject_reference.as_deref(),
            Some("cand.png")
        );
    }

    #[test]
    fn test_no_shards_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = ShardMerger::new(dir.path(), "missing", dir.path()).merge();
        assert!(matches!(result, Err(ManifestError::NoShards { .. })));
    }
}
