//! Scripted completion service for tests.

use crate::completion::client::{CompletionEvent, CompletionRequest, CompletionService, CompletionStream};
use crate::error::{ResponderError, ResponderResult};
use async_trait::async_trait;
use futures_util::stream;
use std::sync::Mutex;

/// Streams a fixed list of deltas and records every request it receives.
pub struct FakeCompletion {
    deltas: Vec<String>,
    fail_after: Option<usize>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeCompletion {
    pub fn new(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            fail_after: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Yield `n` deltas, then a stream error.
    pub fn failing_after(deltas: &[&str], n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new(deltas)
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for FakeCompletion {
    async fn stream(&self, request: CompletionRequest) -> ResponderResult<CompletionStream> {
        self.requests.lock().unwrap().push(request);

        let mut items: Vec<ResponderResult<CompletionEvent>> = Vec::new();
        for (i, delta) in self.deltas.iter().enumerate() {
            if self.fail_after == Some(i) {
                items.push(Err(ResponderError::UpstreamError("stream reset".into())));
                return Ok(Box::pin(stream::iter(items)));
            }
            items.push(Ok(CompletionEvent::TextDelta(delta.clone())));
        }
        items.push(Ok(CompletionEvent::StreamEnd));
        Ok(Box::pin(stream::iter(items)))
    }

    async fn complete(&self, request: CompletionRequest) -> ResponderResult<String> {
        self.requests.lock().unwrap().push(request);
        Ok(self.deltas.concat())
    }
}
