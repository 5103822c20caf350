//! Chunk enrichment: language detection, translation, and image analysis.
//!
//! Text chunks get their language detected from a bounded content prefix;
//! when it differs from the configured target language the content, title,
//! and section are translated into `translated_*` fields alongside the
//! untouched originals. Image uploads are analyzed into a caption, tag
//! list, and OCR text that together form the document's single synthetic
//! chunk.
//!
//! Both services are optional: with no translation endpoint chunks pass
//! through untouched, and with no vision endpoint image uploads fail
//! terminally at this stage.

use anyhow::Context;
use serde::Deserialize;
use std::time::Duration;

use crate::config::{TranslationConfig, VisionConfig};
use crate::error::{classify_status, transport_error, StageError};
use crate::models::Chunk;

pub struct Enricher {
    http: reqwest::Client,
    translation: TranslationConfig,
    vision: VisionConfig,
}

/// What the vision service reported for one image.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageAnalysis {
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Text recognized in the image (OCR).
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetectBody {
    language: String,
}

#[derive(Debug, Deserialize)]
struct TranslateBody {
    text: String,
}

impl Enricher {
    pub fn new(translation: &TranslationConfig, vision: &VisionConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(translation.timeout_secs.max(vision.timeout_secs)))
            .build()
            .context("Failed to build enrichment HTTP client")?;
        Ok(Self {
            http,
            translation: translation.clone(),
            vision: vision.clone(),
        })
    }

    /// Detect language and attach translations to one text chunk.
    ///
    /// No-op when translation is unconfigured or the chunk has no prose to
    /// detect from.
    pub async fn enrich_chunk(&self, chunk: &mut Chunk) -> Result<(), StageError> {
        let Some(endpoint) = self.translation.endpoint.clone() else {
            return Ok(());
        };
        let prefix: String = chunk
            .content
            .chars()
            .take(self.translation.detect_prefix_chars)
            .collect();
        if prefix.trim().is_empty() {
            return Ok(());
        }

        let language = self.detect_language(&endpoint, &prefix).await?;
        chunk.language = Some(language.clone());
        if language == self.translation.target_language {
            return Ok(());
        }

        chunk.translated_content =
            Some(self.translate(&endpoint, &chunk.content, &language).await?);
        if !chunk.title.is_empty() {
            chunk.translated_title =
                Some(self.translate(&endpoint, &chunk.title, &language).await?);
        }
        if !chunk.section.is_empty() {
            chunk.translated_section =
                Some(self.translate(&endpoint, &chunk.section, &language).await?);
        }
        Ok(())
    }

    async fn detect_language(&self, endpoint: &str, text: &str) -> Result<String, StageError> {
        let mut request = self
            .http
            .post(format!("{}/detect", endpoint.trim_end_matches('/')))
            .json(&serde_json::json!({ "text": text }));
        if let Some(key) = &self.translation.api_key {
            request = request.header("api-key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| transport_error("language detect", e))?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), "language detect"));
        }
        let body: DetectBody = response
            .json()
            .await
            .map_err(|e| StageError::terminal(format!("malformed detect response: {e}")))?;
        Ok(body.language)
    }

    async fn translate(
        &self,
        endpoint: &str,
        text: &str,
        from: &str,
    ) -> Result<String, StageError> {
        let mut request = self
            .http
            .post(format!("{}/translate", endpoint.trim_end_matches('/')))
            .json(&serde_json::json!({
                "text": text,
                "from": from,
                "to": self.translation.target_language,
            }));
        if let Some(key) = &self.translation.api_key {
            request = request.header("api-key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| transport_error("translate", e))?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), "translate"));
        }
        let body: TranslateBody = response
            .json()
            .await
            .map_err(|e| StageError::terminal(format!("malformed translate response: {e}")))?;
        Ok(body.text)
    }

    /// Analyze an image by URL.
    ///
    /// When the configured region has no caption model, the caption feature
    /// is left out of the request and analysis degrades to tags and OCR.
    pub async fn analyze_image(&self, image_url: &str) -> Result<ImageAnalysis, StageError> {
        let Some(endpoint) = &self.vision.endpoint else {
            return Err(StageError::terminal(
                "image upload received but no vision endpoint is configured",
            ));
        };
        let features = if self.vision.captions_supported {
            "caption,tags,read"
        } else {
            "tags,read"
        };

        let mut request = self
            .http
            .post(format!("{}/analyze", endpoint.trim_end_matches('/')))
            .query(&[("features", features)])
            .json(&serde_json::json!({ "url": image_url }));
        if let Some(key) = &self.vision.api_key {
            request = request.header("api-key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| transport_error("image analyze", e))?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), "image analyze"));
        }
        response
            .json()
            .await
            .map_err(|e| StageError::terminal(format!("malformed analyze response: {e}")))
    }
}

/// Retrievable text for an image's synthetic chunk.
pub fn image_content(analysis: &ImageAnalysis) -> String {
    let mut parts = Vec::new();
    if let Some(caption) = analysis.caption.as_deref().filter(|c| !c.is_empty()) {
        parts.push(caption.to_string());
    }
    if !analysis.tags.is_empty() {
        parts.push(format!("Tags: {}", analysis.tags.join(", ")));
    }
    if let Some(text) = analysis.text.as_deref().filter(|t| !t.is_empty()) {
        parts.push(format!("Text in image: {text}"));
    }
    parts.join("\n")
}
