//! Prompt-set partitioning into shard slices and launch waves.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Length of a shard slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceLen {
    Count(usize),
    /// Through the end of the prompt set.
    ToEnd,
}

impl SliceLen {
    /// Command-line form: the count, or `-1` for [`SliceLen::ToEnd`].
    pub fn as_arg(self) -> i64 {
        match self {
            SliceLen::Count(n) => n as i64,
            SliceLen::ToEnd => -1,
        }
    }

    /// Parse the command-line form. Negative values other than `-1` are rejected.
    pub fn from_arg(value: i64) -> Option<Self> {
        match value {
            -1 => Some(SliceLen::ToEnd),
            n if n >= 0 => Some(SliceLen::Count(n as usize)),
            _ => None,
        }
    }
}

/// One contiguous shard of a prompt set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSlice {
    pub index: usize,
    pub start: usize,
    pub len: SliceLen,
}

impl ShardSlice {
    /// Concrete index range for a set of `total` prompts, clamped to the set.
    pub fn resolve(&self, total: usize) -> Range<usize> {
        let start = self.start.min(total);
        let end = match self.len {
            SliceLen::Count(n) => self.start.saturating_add(n).min(total),
            SliceLen::ToEnd => total,
        };
        start..end
    }

    /// Wave this slice is launched in under concurrency ceiling `ceiling`.
    pub fn wave(&self, ceiling: usize) -> usize {
        self.index / ceiling.max(1)
    }
}

/// Split `total` prompts into `parallelism` contiguous slices.
///
/// Every slice but the last holds `total / parallelism` prompts; the last one
/// runs to the end of the set and absorbs the remainder.
pub fn partition(total: usize, parallelism: usize) -> Result<Vec<ShardSlice>, DispatchError> {
    if parallelism == 0 {
        return Err(DispatchError::ZeroParallelism);
    }
    let chunk = total / parallelism;

    Ok((0..parallelism)
        .map(|index| ShardSlice {
            index,
            start: index * chunk,
            len: if index + 1 == parallelism {
                SliceLen::ToEnd
            } else {
                SliceLen::Count(chunk)
            },
        })
        .collect())
}

/// Number of waves needed for `slices` slices under `ceiling`.
pub fn wave_count(slices: usize, ceiling: usize) -> usize {
    slices.div_ceil(ceiling.max(1))
}

/// The slices belonging to wave `wave`.
pub fn select_wave(
    slices: &[ShardSlice],
    ceiling: usize,
    wave: usize,
) -> Result<Vec<ShardSlice>, DispatchError> {
    if ceiling == 0 {
        return Err(DispatchError::ZeroCeiling);
    }
    let selected: Vec<ShardSlice> = slices
        .iter()
        .filter(|s| s.wave(ceiling) == wave)
        .copied()
        .collect();

    if selected.is_empty() {
        return Err(DispatchError::EmptyWave {
            wave,
            slices: slices.len(),
            ceiling,
            waves: wave_count(slices.len(), ceiling),
        });
    }
    Ok(selected)
}
