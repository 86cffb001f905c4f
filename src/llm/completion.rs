//! Completion service: multimodal prompt in, raw reply text out.
//!
//! Wraps an [`LlmProvider`] with a fixed system prompt and a bounded retry
//! policy. Rate limits back off linearly, authentication failures wait a fixed
//! credential-refresh window, and every other error is returned immediately.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, warn};

use super::litellm::{ContentPart, GenerationRequest, LlmProvider, Message};
use crate::error::LlmError;

/// Default number of attempts per completion call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default base delay for rate-limit retries, multiplied by the attempt number.
pub const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(2);
/// Default fixed delay after an authentication failure.
pub const DEFAULT_AUTH_BACKOFF: Duration = Duration::from_secs(120);

/// One segment of a multimodal prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionSegment {
    Text(String),
    /// Raw item bytes; encoded to base64 when the request is built.
    Binary { bytes: Vec<u8>, mime: String },
    /// Item data that is already base64-encoded.
    Encoded { data: String, mime: String },
}

impl CompletionSegment {
    fn into_part(self) -> ContentPart {
        match self {
            CompletionSegment::Text(text) => ContentPart::text(text),
            CompletionSegment::Binary { bytes, mime } => {
                ContentPart::image_base64(&mime, &BASE64.encode(bytes))
            }
            CompletionSegment::Encoded { data, mime } => ContentPart::image_base64(&mime, &data),
        }
    }
}

/// Bounded retry policy for transient service errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub rate_limit_backoff: Duration,
    pub auth_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            rate_limit_backoff: DEFAULT_RATE_LIMIT_BACKOFF,
            auth_backoff: DEFAULT_AUTH_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failed_attempts` attempts have
    /// failed with `error`, or `None` when the error must be returned.
    pub fn backoff_for(&self, error: &LlmError, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts >= self.max_attempts {
            return None;
        }
        match error {
            LlmError::RateLimited(_) => Some(self.rate_limit_backoff * failed_attempts),
            LlmError::AuthenticationFailed(_) => Some(self.auth_backoff),
            _ => None,
        }
    }
}

/// A model endpoint bound to one system prompt.
#[derive(Clone)]
pub struct CompletionService {
    provider: Arc<dyn LlmProvider>,
    model: String,
    system_prompt: String,
    policy: RetryPolicy,
    temperature: Option<f64>,
}

impl CompletionService {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompt: system_prompt.into(),
            policy: RetryPolicy::default(),
            temperature: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn build_request(&self, segments: Vec<CompletionSegment>, instruction: &str) -> GenerationRequest {
        let mut parts: Vec<ContentPart> =
            segments.into_iter().map(CompletionSegment::into_part).collect();
        parts.push(ContentPart::text(instruction));

        let request = GenerationRequest::new(
            self.model.clone(),
            vec![
                Message::system(self.system_prompt.clone()),
                Message::user_parts(parts),
            ],
        );
        match self.temperature {
            Some(t) => request.with_temperature(t),
            None => request,
        }
    }

    /// Send `segments` followed by `instruction` and return the reply text.
    pub async fn generate(
        &self,
        segments: Vec<CompletionSegment>,
        instruction: &str,
    ) -> Result<String, LlmError> {
        let request = self.build_request(segments, instruction);
        let mut failed_attempts = 0u32;

        loop {
            match self.provider.generate(request.clone()).await {
                Ok(response) => {
                    debug!(
                        model = %self.model,
                        total_tokens = response.usage.total_tokens,
                        "Completion received"
                    );
                    return response
                        .first_content()
                        .map(str::to_string)
                        .ok_or_else(|| LlmError::ParseError("No content in LLM response".to_string()));
                }
                Err(err) => {
                    failed_attempts += 1;
                    match self.policy.backoff_for(&err, failed_attempts) {
                        Some(delay) => {
                            warn!(
                                attempt = failed_attempts,
                                max_attempts = self.policy.max_attempts,
                                delay_secs = delay.as_secs_f64(),
                                error = %err,
                                "Completion failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(err),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::litellm::{Choice, GenerationResponse, MessageContent, Usage};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::RequestFailed("script exhausted".into())))?;
            Ok(GenerationResponse {
                id: "r".to_string(),
                model: "m".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(reply),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage::default(),
            })
        }
    }

    fn instant_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            rate_limit_backoff: Duration::ZERO,
            auth_backoff: Duration::ZERO,
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        let limited = LlmError::RateLimited("429".into());
        let auth = LlmError::AuthenticationFailed("401".into());
        let other = LlmError::ApiError {
            code: 500,
            message: "boom".into(),
        };

        assert_eq!(policy.backoff_for(&limited, 1), Some(Duration::from_secs(2)));
        assert_eq!(policy.backoff_for(&limited, 3), Some(Duration::from_secs(6)));
        assert_eq!(policy.backoff_for(&auth, 1), Some(Duration::from_secs(120)));
        assert_eq!(policy.backoff_for(&auth, 4), Some(Duration::from_secs(120)));
        assert_eq!(policy.backoff_for(&limited, 5), None);
        assert_eq!(policy.backoff_for(&other, 1), None);
    }

    #[tokio::test]
    async fn test_rate_limit_retried_until_success() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(LlmError::RateLimited("slow".into())),
            Err(LlmError::AuthenticationFailed("expired".into())),
            Ok("[]".to_string()),
        ]));
        let service =
            CompletionService::new(provider.clone(), "m", "sys").with_policy(instant_policy(5));

        let reply = service.generate(vec![], "go").await.unwrap();
        assert_eq!(reply, "[]");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_gives_up_at_ceiling() {
        let provider = Arc::new(ScriptedProvider::new(
            (0..10)
                .map(|_| Err(LlmError::RateLimited("slow".into())))
                .collect(),
        ));
        let service =
            CompletionService::new(provider.clone(), "m", "sys").with_policy(instant_policy(3));

        let err = service.generate(vec![], "go").await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited(_)));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_other_errors_propagate_immediately() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(LlmError::RequestFailed("connection reset".into())),
            Ok("unused".to_string()),
        ]));
        let service =
            CompletionService::new(provider.clone(), "m", "sys").with_policy(instant_policy(5));

        let err = service.generate(vec![], "go").await.unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_request_layout() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("ok".to_string())]));
        let service = CompletionService::new(provider.clone(), "vision-model", "You label images.");

        service
            .generate(
                vec![
                    CompletionSegment::Text("Example 1".into()),
                    CompletionSegment::Binary {
                        bytes: b"foo".to_vec(),
                        mime: "image/png".into(),
                    },
                    CompletionSegment::Encoded {
                        data: "YmFy".into(),
                        mime: "image/jpeg".into(),
                    },
                ],
                "Generate 2 records.",
            )
            .await
            .unwrap();

        let requests = provider.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.model, "vision-model");
        assert_eq!(request.messages[0].content.as_text(), Some("You label images."));
        match &request.messages[1].content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 4);
                assert_eq!(parts[1], ContentPart::image_base64("image/png", "Zm9v"));
                assert_eq!(parts[2], ContentPart::image_base64("image/jpeg", "YmFy"));
                assert_eq!(parts[3], ContentPart::text("Generate 2 records."));
            }
            other => panic!("expected content parts, got {:?}", other),
        }
    }
}
