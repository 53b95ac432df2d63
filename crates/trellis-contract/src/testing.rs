//! Shared test fixtures for crates that depend on `trellis-contract`.
//!
//! Gated behind the `test-support` cargo feature so production builds are
//! unaffected. Enable via `[dev-dependencies] trellis-contract = { ...,
//! features = ["test-support"] }`.

use crate::model::{ModelError, ModelExecutor, ModelReply, ModelRequest};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Model executor that plays back a fixed script of replies and records
/// every request it saw. Once the script runs out, every further call fails
/// with `fallback_error`.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<String, String>>>,
    fallback_error: String,
    calls: AtomicUsize,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    /// Succeed with each reply in turn.
    pub fn replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            fallback_error: "scripted model exhausted".to_string(),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail every call with the given error.
    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback_error: error.into(),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelExecutor for ScriptedModel {
    async fn complete(&self, request: ModelRequest) -> Result<ModelReply, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(ModelReply {
                response,
                latency_ms: 1,
            }),
            Some(Err(error)) => Err(ModelError::Call(error)),
            None => Err(ModelError::Call(self.fallback_error.clone())),
        }
    }

    fn name(&self) -> &'static str {
        "scripted_model"
    }
}
