//! Model Client seam.
//!
//! The agent loop only sees a stream of [`ResponseEvent`]s per request and
//! folds it into one `ModelResponse`. [`OpenAiClient`] is the reference
//! implementation for OpenAI-compatible chat-completions endpoints.

pub mod error;
pub mod openai;

pub use error::{ModelError, Result};
pub use openai::OpenAiClient;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tether_protocol::{ResponseEvent, ToolDefinition, TranscriptItem};

/// Everything the model sees for one exchange.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
  pub system_prompt: Option<String>,
  pub transcript: Vec<TranscriptItem>,
  pub tools: Vec<ToolDefinition>,
}

pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ResponseEvent>> + Send>>;

#[async_trait]
pub trait ModelClient: Send + Sync {
  async fn stream(&self, request: ModelRequest) -> Result<ResponseStream>;
}
