//! Geoloc Clients: HTTP implementations of the pipeline collaborators.
//!
//! - [`ChatCompletionsClient`]: OpenAI-compatible chat completions (DeepSeek,
//!   Qwen through DashScope compatible mode, or any custom endpoint)
//! - [`HttpObjectDetector`]: vision service returning labelled boxes
//! - [`HttpQueryExecutor`]: spatial query service returning result rows

pub mod detector;
pub mod executor;
pub mod llm;

pub use detector::{DetectorConfig, HttpObjectDetector};
pub use executor::{HttpQueryExecutor, QueryExecutorConfig};
pub use llm::{ChatClientConfig, ChatCompletionsClient};

use anyhow::{Context, Result};
use std::time::Duration;

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to create HTTP client")
}
