//! Client for the asynchronous layout-analysis service.
//!
//! Analysis is a two-phase protocol: [`LayoutClient::submit`] posts a
//! document by URL and receives a correlation id, then
//! [`LayoutClient::poll`] is called until the result reaches a settled
//! state. The client only classifies outcomes ([`StageError`] for
//! failures, [`PollStatus`] for progress); scheduling the retries is the
//! worker's job.

use anyhow::Context;
use serde::Deserialize;
use std::time::Duration;

use crate::config::LayoutConfig;
use crate::docmap::AnalyzeResult;
use crate::error::{classify_status, transport_error, StageError};

pub struct LayoutClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

/// Settled or in-flight state of one analysis operation.
#[derive(Debug)]
pub enum PollStatus {
    /// Not finished yet; poll again later.
    Running,
    Succeeded(Box<AnalyzeResult>),
}

#[derive(Debug, Deserialize)]
struct PollBody {
    status: String,
    #[serde(default, rename = "analyzeResult")]
    analyze_result: Option<AnalyzeResult>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl LayoutClient {
    pub fn new(config: &LayoutConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build layout HTTP client")?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Submit a document for analysis. Returns the correlation id used to
    /// poll for the result.
    pub async fn submit(&self, source_url: &str) -> Result<String, StageError> {
        let mut request = self
            .http
            .post(format!("{}/analyze", self.endpoint))
            .json(&serde_json::json!({ "urlSource": source_url }));
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error("layout submit", e))?;
        let status = response.status();
        if !(status.is_success() || status.as_u16() == 202) {
            return Err(classify_status(status, "layout submit"));
        }

        // The service answers 202 with the result location; the id is its
        // trailing path segment.
        let location = response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        match location.as_deref().and_then(result_id_from_location) {
            Some(id) => Ok(id),
            None => Err(StageError::terminal(
                "layout submit response carried no operation-location",
            )),
        }
    }

    /// Fetch the current state of a submitted analysis.
    pub async fn poll(&self, result_id: &str) -> Result<PollStatus, StageError> {
        let mut request = self
            .http
            .get(format!("{}/analyzeResults/{}", self.endpoint, result_id));
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error("layout poll", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, "layout poll"));
        }

        let body: PollBody = response
            .json()
            .await
            .map_err(|e| StageError::terminal(format!("malformed layout result: {e}")))?;
        match body.status.as_str() {
            "notStarted" | "running" => Ok(PollStatus::Running),
            "succeeded" => match body.analyze_result {
                Some(result) => Ok(PollStatus::Succeeded(Box::new(result))),
                None => Err(StageError::terminal(
                    "layout result succeeded without an analyzeResult payload",
                )),
            },
            other => Err(StageError::terminal(format!(
                "layout analysis failed with status {other:?}: {}",
                body.error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no error detail".to_string()),
            ))),
        }
    }
}

fn result_id_from_location(location: &str) -> Option<String> {
    let path = location.split('?').next()?;
    let id = path.rsplit('/').next()?;
    (!id.is_empty()).then(|| id.to_string())
}
