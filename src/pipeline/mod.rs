//! Record generation pipeline.
//!
//! - [`mode`]: generation modes and their static profiles
//! - [`validator`]: reply text → schema-checked records
//! - [`repair`]: bounded parse-repair state machine
//! - [`formatter`]: records → conversation examples
//! - [`worker`]: one prompt slice → one shard manifest
//! - [`config`]: shared tunables

pub mod config;
pub mod formatter;
pub mod mode;
pub mod repair;
pub mod validator;
pub mod worker;

pub use config::{ConfigError, GenerationConfig};
pub use formatter::{ConversationTurn, FormattedExample, Speaker};
pub use mode::{ConversationLayout, GenerationMode, ModeProfile};
pub use repair::{FormatRepairer, RepairError, RepairLoop, RepairOutcome, RepairState, ServiceRepairer};
pub use validator::{RawRecord, RecordError, ResponseValidator};
pub use worker::{GenerationAccumulator, GenerationWorker, WorkerReport, WorkerSettings};
