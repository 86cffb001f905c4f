//! Bounded parse-repair loop for model replies.
//!
//! A reply that fails validation is sent to a format-repair endpoint and
//! parsed again, at most `max_repairs` times. The loop is an explicit state
//! machine:
//!
//! ```text
//!   Attempt ──valid──▶ done
//!      │ invalid, repairs < max
//!      ▼
//!   Repair ──repaired text──▶ Attempt
//!      │ invalid, repairs == max
//!      ▼
//!   Exhausted
//! ```

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use super::validator::{RawRecord, RecordError, ResponseValidator};
use crate::error::LlmError;
use crate::llm::{CompletionSegment, CompletionService};
use crate::prompts::templates::REPAIR_INSTRUCTION;

/// Default number of repair calls per item.
pub const DEFAULT_MAX_REPAIRS: usize = 3;

#[derive(Debug, Error)]
pub enum RepairError {
    /// The reply never became valid within the repair budget.
    #[error("Reply still invalid after {repairs} repair attempts: {last_error}")]
    Exhausted {
        repairs: usize,
        last_error: RecordError,
    },

    /// The repair call itself failed.
    #[error("Repair call failed: {0}")]
    Service(#[from] LlmError),
}

/// Something that can reformat a malformed reply.
#[async_trait]
pub trait FormatRepairer: Send + Sync {
    async fn repair(&self, malformed: &str) -> Result<String, LlmError>;
}

/// Repairs replies through a completion service whose system prompt only
/// asks for reformatting.
pub struct ServiceRepairer {
    service: CompletionService,
}

impl ServiceRepairer {
    pub fn new(service: CompletionService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl FormatRepairer for ServiceRepairer {
    async fn repair(&self, malformed: &str) -> Result<String, LlmError> {
        self.service
            .generate(
                vec![CompletionSegment::Text(malformed.to_string())],
                REPAIR_INSTRUCTION,
            )
            .await
    }
}

/// State of one repair loop run.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairState {
    /// Parse `text`; `repairs` repair calls have been made so far.
    Attempt { text: String, repairs: usize },
    /// Ask the repairer to fix `text`, which failed with `error`.
    Repair {
        text: String,
        repairs: usize,
        error: RecordError,
    },
    /// Budget spent; `error` is the last validation failure.
    Exhausted { repairs: usize, error: RecordError },
}

/// Successful outcome of a repair loop run.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairOutcome {
    pub records: Vec<RawRecord>,
    /// Repair calls made before the reply validated.
    pub repairs: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RepairLoop {
    validator: ResponseValidator,
    max_repairs: usize,
}

impl RepairLoop {
    pub fn new(validator: ResponseValidator, max_repairs: usize) -> Self {
        Self {
            validator,
            max_repairs,
        }
    }

    pub fn max_repairs(&self) -> usize {
        self.max_repairs
    }

    /// Transition taken after an `Attempt` failed validation.
    pub fn after_failure(&self, text: String, repairs: usize, error: RecordError) -> RepairState {
        if repairs < self.max_repairs {
            RepairState::Repair {
                text,
                repairs,
                error,
            }
        } else {
            RepairState::Exhausted { repairs, error }
        }
    }

    /// Drive the loop until the reply validates or the budget is spent.
    pub async fn run<R>(&self, text: &str, repairer: &R) -> Result<RepairOutcome, RepairError>
    where
        R: FormatRepairer + ?Sized,
    {
        let mut state = RepairState::Attempt {
            text: text.to_string(),
            repairs: 0,
        };

        loop {
            state = match state {
                RepairState::Attempt { text, repairs } => match self.validator.parse(&text) {
                    Ok(records) => return Ok(RepairOutcome { records, repairs }),
                    Err(error) => self.after_failure(text, repairs, error),
                },
                RepairState::Repair {
                    text,
                    repairs,
                    error,
                } => {
                    warn!(
                        attempt = repairs + 1,
                        max_repairs = self.max_repairs,
                        error = %error,
                        "Reply failed validation, requesting format repair"
                    );
                    let fixed = repairer.repair(&text).await?;
                    debug!(chars = fixed.len(), "Repaired reply received");
                    RepairState::Attempt {
                        text: fixed,
                        repairs: repairs + 1,
                    }
                }
                RepairState::Exhausted { repairs, error } => {
                    return Err(RepairError::Exhausted {
                        repairs,
                        last_error: error,
                    })
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const INVALID: &str = "Sorry, here are the pairs: {Q: broken";
    const VALID: &str = r#"[{"Q": "What color?", "R": "It is red because...", "A": "Red"}]"#;

    struct ScriptedRepairer {
        replies: Mutex<VecDeque<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedRepairer {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FormatRepairer for ScriptedRepairer {
        async fn repair(&self, malformed: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| malformed.to_string()))
        }
    }

    struct FailingRepairer;

    #[async_trait]
    impl FormatRepairer for FailingRepairer {
        async fn repair(&self, _malformed: &str) -> Result<String, LlmError> {
            Err(LlmError::RequestFailed("connection refused".to_string()))
        }
    }

    fn vqa_loop(max_repairs: usize) -> RepairLoop {
        RepairLoop::new(ResponseValidator::new(&["Q", "R", "A"]), max_repairs)
    }

    #[tokio::test]
    async fn test_valid_reply_needs_no_repair() {
        let repairer = ScriptedRepairer::new(&[]);
        let outcome = vqa_loop(3).run(VALID, &repairer).await.unwrap();

        assert_eq!(outcome.repairs, 0);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(repairer.calls(), 0);
    }

    #[tokio::test]
    async fn test_valid_after_k_repairs() {
        for k in 1..3 {
            let mut script = vec![INVALID; k - 1];
            script.push(VALID);
            let repairer = ScriptedRepairer::new(&script);

            let outcome = vqa_loop(3).run(INVALID, &repairer).await.unwrap();
            assert_eq!(outcome.repairs, k);
            assert_eq!(repairer.calls(), k);
            assert_eq!(outcome.records[0].get("A"), Some("Red"));
        }
    }

    #[tokio::test]
    async fn test_never_valid_exhausts_budget() {
        let repairer = ScriptedRepairer::new(&[INVALID, INVALID, INVALID, VALID]);
        let err = vqa_loop(3).run(INVALID, &repairer).await.unwrap_err();

        assert_eq!(repairer.calls(), 3);
        match err {
            RepairError::Exhausted { repairs, .. } => assert_eq!(repairs, 3),
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_valid_on_last_repair() {
        let repairer = ScriptedRepairer::new(&[INVALID, INVALID, VALID]);
        let outcome = vqa_loop(3).run(INVALID, &repairer).await.unwrap();
        assert_eq!(outcome.repairs, 3);
        assert_eq!(repairer.calls(), 3);
    }

    #[tokio::test]
    async fn test_missing_key_triggers_repair() {
        let repairer = ScriptedRepairer::new(&[VALID]);
        let outcome = vqa_loop(3)
            .run(r#"[{"Q": "What color?", "A": "Red"}]"#, &repairer)
            .await
            .unwrap();
        assert_eq!(outcome.repairs, 1);
    }

    #[tokio::test]
    async fn test_zero_budget() {
        let repairer = ScriptedRepairer::new(&[VALID]);
        let err = vqa_loop(0).run(INVALID, &repairer).await.unwrap_err();
        assert!(matches!(err, RepairError::Exhausted { repairs: 0, .. }));
        assert_eq!(repairer.calls(), 0);
    }

    #[tokio::test]
    async fn test_repair_call_failure_surfaces_as_service_error() {
        let err = vqa_loop(3).run(INVALID, &FailingRepairer).await.unwrap_err();
        assert!(matches!(err, RepairError::Service(LlmError::RequestFailed(_))));
    }

    #[test]
    fn test_after_failure_transitions() {
        let repair_loop = vqa_loop(2);
        let error = RecordError::NotAnArray;

        assert!(matches!(
            repair_loop.after_failure("x".into(), 1, error.clone()),
            RepairState::Repair { repairs: 1, .. }
        ));
        assert!(matches!(
            repair_loop.after_failure("x".into(), 2, error),
            RepairState::Exhausted { repairs: 2, .. }
        ));
    }
}
