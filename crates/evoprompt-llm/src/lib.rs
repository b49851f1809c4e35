//! # evoprompt LLM
//!
//! The remote-call collaborator used by generators, evaluators and optimizers.
//!
//! ## Supported Backends
//!
//! | Provider | Type | Key Required |
//! |----------|------|--------------|
//! | OpenAI-compatible | API | `OPENAI_API_KEY` |
//! | Mock | Testing | None |
//!
//! ## Quick Start
//!
//! ```rust
//! use evoprompt_llm::{MockProvider, LlmProvider};
//!
//! #[tokio::main]
//! async fn main() {
//!     let llm = MockProvider::smart();
//!     let response = llm.ask("Write a tagline for a bakery").await.unwrap();
//!     println!("{}", response);
//! }
//! ```
//!
//! ## With retries
//!
//! ```rust,ignore
//! use evoprompt_llm::{LlmConfig, OpenAICompatibleProvider, RetryingProvider};
//!
//! let config = LlmConfig::from_env()?;
//! let provider = OpenAICompatibleProvider::new(config.require_api_key()?, &config.generator_model)
//!     .with_base_url(&config.base_url);
//! let llm = RetryingProvider::new(provider, config.retry_config());
//! ```

pub mod config;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod retry_provider;

pub use config::{ConfigError, LlmConfig};
pub use mock::MockProvider;
pub use openai::OpenAICompatibleProvider;
pub use provider::{LlmError, LlmProvider, LlmRequest, LlmResponse, Message, ResponseFormat, Role};
pub use retry_provider::{RetryConfig, RetryingProvider};
