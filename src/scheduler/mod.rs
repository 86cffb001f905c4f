//! Shard scheduling.
//!
//! A prompt set is split into contiguous slices ([`partition`]), grouped into
//! launch waves under a concurrency ceiling, and each slice of the selected
//! wave is run by its own worker process ([`dispatcher`]). Workers share
//! nothing but the output directory.
//!
//! ```text
//!                 ┌──────────────┐
//!                 │  Prompt set  │
//!                 └──────┬───────┘
//!                        │ partition(T, P)
//!         ┌──────────────┼──────────────┐
//!         ▼              ▼              ▼
//!    ┌─────────┐    ┌─────────┐    ┌─────────┐
//!    │ Shard 0 │    │ Shard 1 │    │ Shard N │   one process each,
//!    └────┬────┘    └────┬────┘    └────┬────┘   at most C per wave
//!         ▼              ▼              ▼
//!   <prefix>_0_*.json  <prefix>_1_*.json  ...    merged afterwards
//! ```

pub mod dispatcher;
pub mod partition;

pub use dispatcher::{
    current_program, DispatchConfig, DispatchHandle, ShardDispatcher, ShardOutcome,
    WorkerInvocation,
};
pub use partition::{partition, select_wave, wave_count, ShardSlice, SliceLen};
