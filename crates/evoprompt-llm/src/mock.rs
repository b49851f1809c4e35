//! Mock LLM provider for testing

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::provider::{LlmError, LlmProvider, LlmRequest, LlmResponse};

type Script = Box<dyn Fn(&LlmRequest) -> Result<String, LlmError> + Send + Sync>;

enum Behavior {
    /// Cycle through canned responses
    Canned(Vec<String>),
    /// Respond based on what the request asks for
    Smart,
    /// Fail with a non-retryable error
    Failing(String),
    /// Fail with a connection error for the first N calls
    Flaky { failures: usize, response: String },
    /// Caller-provided closure
    Scripted(Script),
}

/// A mock LLM provider that returns predefined responses
/// Perfect for testing without needing actual LLM access
pub struct MockProvider {
    /// Name of this mock
    pub name: String,
    behavior: Behavior,
    /// Number of `complete` calls so far
    calls: AtomicUsize,
    /// Simulated latency
    latency: Duration,
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("name", &self.name)
            .field("calls", &self.calls())
            .field("latency", &self.latency)
            .finish()
    }
}

impl MockProvider {
    fn with_behavior(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            calls: AtomicUsize::new(0),
            latency: Duration::ZERO,
        }
    }

    /// Create a new mock provider with given responses
    pub fn new(responses: Vec<String>) -> Self {
        Self::with_behavior("mock", Behavior::Canned(responses))
    }

    /// Create a mock that always returns the same response
    pub fn constant(response: &str) -> Self {
        Self::new(vec![response.to_string()])
    }

    /// Create a smart mock that responds based on prompt content
    pub fn smart() -> Self {
        Self::with_behavior("smart-mock", Behavior::Smart)
    }

    /// Always fails with `LlmError::RequestFailed`
    pub fn failing(message: &str) -> Self {
        Self::with_behavior("failing-mock", Behavior::Failing(message.to_string()))
    }

    /// Fails with a transient error `failures` times, then answers
    pub fn flaky(failures: usize, response: &str) -> Self {
        Self::with_behavior(
            "flaky-mock",
            Behavior::Flaky {
                failures,
                response: response.to_string(),
            },
        )
    }

    /// Answer with a closure over the request
    pub fn scripted<F>(script: F) -> Self
    where
        F: Fn(&LlmRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self::with_behavior("scripted-mock", Behavior::Scripted(Box::new(script)))
    }

    /// Simulate network latency on every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn generate_smart_response(request: &LlmRequest) -> String {
        let system = request.system_prompt().unwrap_or("").to_lowercase();
        let prompt = request.user_prompt();
        let prompt_lower = prompt.to_lowercase();

        // Evaluation request
        if system.contains("evaluat") || prompt_lower.contains("score:") {
            return "Score: 3.5\n\
                    Feedback: The content addresses the input but lacks concrete detail.\n\
                    Improved Output: A more specific version of the content.\n\
                    Summary: Adequate, with room for improvement."
                .to_string();
        }

        // Optimization request
        if system.contains("optimi") || prompt_lower.contains("improve") {
            let head: String = prompt.chars().take(60).collect();
            return format!("Be specific and concrete. {}", head.trim());
        }

        let head: String = prompt.chars().take(50).collect();
        format!("Generated response for: \"{}\"", head)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        !matches!(self.behavior, Behavior::Failing(_))
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = Instant::now();
        let call = self.calls.fetch_add(1, Ordering::Relaxed);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let content = match &self.behavior {
            Behavior::Canned(responses) if responses.is_empty() => String::new(),
            Behavior::Canned(responses) => responses[call % responses.len()].clone(),
            Behavior::Smart => Self::generate_smart_response(&request),
            Behavior::Failing(message) => return Err(LlmError::RequestFailed(message.clone())),
            Behavior::Flaky { failures, response } => {
                if call < *failures {
                    return Err(LlmError::ConnectionFailed(format!(
                        "simulated failure {}",
                        call + 1
                    )));
                }
                response.clone()
            }
            Behavior::Scripted(script) => script(&request)?,
        };

        let tokens_used = (request.user_prompt().len() / 4) as u32 + 100;
        Ok(LlmResponse {
            content,
            model: request.model.unwrap_or_else(|| self.name.clone()),
            tokens_used: Some(tokens_used),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}
