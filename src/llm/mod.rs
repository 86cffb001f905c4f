//! LLM integration for mm-forge.
//!
//! [`LiteLlmClient`] talks to any OpenAI-compatible chat-completions endpoint
//! (a LiteLLM proxy or OpenRouter). [`CompletionService`] binds a provider to a
//! system prompt and adds the bounded retry policy used by generation workers.
//!
//! ```ignore
//! use mm_forge::llm::{CompletionSegment, CompletionService, LiteLlmClient};
//! use std::sync::Arc;
//!
//! let client = Arc::new(LiteLlmClient::from_env()?);
//! let service = CompletionService::new(client, "openai/gpt-4o", "You are an image annotator.");
//! let reply = service
//!     .generate(vec![CompletionSegment::Text("Example 1".into())], "Generate 3 records.")
//!     .await?;
//! ```

pub mod completion;
pub mod litellm;

pub use completion::{CompletionSegment, CompletionService, RetryPolicy};
pub use litellm::{
    Choice, ContentPart, GenerationRequest, GenerationResponse, ImageUrl, LiteLlmClient,
    LlmProvider, Message, MessageContent, Usage,
};
