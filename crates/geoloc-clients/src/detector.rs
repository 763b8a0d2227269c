use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use geoloc_core::{DetectedObject, GeolocError, ObjectDetector};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// URL accepting `POST {"image": "<ref>"}`
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8500/detect".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    image: &'a str,
}

/// Detections come back either as a bare list or wrapped in `{"objects": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum DetectResponse {
    List(Vec<DetectedObject>),
    Wrapped { objects: Vec<DetectedObject> },
}

/// Parses a detector reply body.
pub fn parse_detections(body: Value) -> Result<Vec<DetectedObject>> {
    let response: DetectResponse =
        serde_json::from_value(body).context("Unexpected detector response shape")?;
    Ok(match response {
        DetectResponse::List(objects) | DetectResponse::Wrapped { objects } => objects,
    })
}

/// Object detector served over HTTP
pub struct HttpObjectDetector {
    config: DetectorConfig,
    client: Client,
}

impl HttpObjectDetector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        let client = crate::http_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }

    async fn request(&self, image_ref: &str) -> Result<Vec<DetectedObject>> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&DetectRequest { image: image_ref })
            .send()
            .await
            .context(format!("Failed to reach detector at {}", self.config.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!("detector error ({}): {}", status, error_text));
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to read detector response")?;
        parse_detections(body)
    }
}

#[async_trait]
impl ObjectDetector for HttpObjectDetector {
    async fn detect(&self, image_ref: &str) -> Result<Vec<DetectedObject>, GeolocError> {
        self.request(image_ref)
            .await
            .map_err(|e| GeolocError::collaborator(self.name(), format!("{:#}", e)))
    }

    fn name(&self) -> &str {
        "http-detector"
    }
}
