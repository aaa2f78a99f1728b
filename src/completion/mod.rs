//! # Completion Module
//!
//! Everything needed to turn an inbound event into response text:
//!
//! - **client**: Messages API client (streaming and non-streaming) behind the
//!   `CompletionService` trait
//! - **sse**: Incremental Server-Sent Events parser for streamed responses
//! - **prompts**: System instruction profiles and context templates
//! - **segmenter**: Cuts the streamed text into speakable units as it arrives

pub mod client;
pub mod prompts;
pub mod segmenter;
pub mod sse;

pub use client::{AnthropicClient, ChatMessage, CompletionEvent, CompletionRequest, CompletionService};
pub use prompts::PromptLibrary;
pub use segmenter::{Segmenter, SpeakableUnit};

#[cfg(test)]
pub mod testing;
