use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use geoloc_core::{GeolocError, QueryExecutor, Row};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryExecutorConfig {
    /// URL accepting `POST {"query": "<sql>"}`
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for QueryExecutorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8600/query".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
}

/// The one-row shape executors use to report failure.
pub fn error_row(message: impl Into<String>) -> Vec<Row> {
    let mut row = Row::new();
    row.insert("error".to_string(), Value::String(message.into()));
    vec![row]
}

/// Parses a query service reply: a list of rows, `{"rows": [...]}`, or
/// `{"error": "..."}`.
pub fn parse_rows(body: Value) -> Result<Vec<Row>> {
    let rows = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            if let Some(error) = map.remove("error") {
                let message = match error {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                return Ok(error_row(message));
            }
            match map.remove("rows") {
                Some(Value::Array(items)) => items,
                _ => return Err(anyhow!("query response has no rows")),
            }
        }
        other => return Err(anyhow!("unexpected query response: {}", other)),
    };

    rows.into_iter()
        .map(|item| match item {
            Value::Object(row) => Ok(row),
            other => Err(anyhow!("query row is not an object: {}", other)),
        })
        .collect()
}

/// Spatial database reached through an HTTP query service.
///
/// Failures are reported in-band as a single `{"error": ...}` row.
pub struct HttpQueryExecutor {
    config: QueryExecutorConfig,
    client: Client,
}

impl HttpQueryExecutor {
    pub fn new(config: QueryExecutorConfig) -> Result<Self> {
        let client = crate::http_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }

    async fn request(&self, query: &str) -> Result<Vec<Row>> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&QueryRequest { query })
            .send()
            .await
            .context(format!("Failed to reach query service at {}", self.config.endpoint))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .context(format!("Failed to read query response ({})", status))?;
        if !status.is_success() && body.get("error").is_none() {
            return Err(anyhow!("query service error ({}): {}", status, body));
        }
        parse_rows(body)
    }
}

#[async_trait]
impl QueryExecutor for HttpQueryExecutor {
    async fn execute(&self, query: &str) -> Result<Vec<Row>, GeolocError> {
        match self.request(query).await {
            Ok(rows) => Ok(rows),
            Err(err) => {
                tracing::warn!(endpoint = %self.config.endpoint, error = %format!("{:#}", err), "query failed");
                Ok(error_row(format!("{:#}", err)))
            }
        }
    }

    fn name(&self) -> &str {
        "http-query-executor"
    }
}
