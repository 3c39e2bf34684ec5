//! Configuration for the invoice-structuring pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Keeping every knob — endpoints, credentials,
//! timeouts, fan-out — in one struct makes it trivial to share configs across
//! tasks, serialise them for logging, and substitute fake endpoints in tests.
//!
//! Credentials are plain fields on an explicitly constructed value whose
//! lifetime the caller owns. There is no process-global state.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default extraction-service API base (MinerU online API).
pub const DEFAULT_EXTRACTION_BASE_URL: &str = "https://mineru.net/api/v4";

/// Default structuring-service API base (Zhipu open platform,
/// OpenAI-compatible chat completions).
pub const DEFAULT_STRUCTURING_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";

/// Default structuring model.
pub const DEFAULT_MODEL: &str = "glm-4-flash";

/// Configuration for one batch submission.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::from_env()`].
///
/// # Example
/// ```rust
/// use pdf2invoice::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .extraction_token("mineru-token")
///     .structuring_api_key("zhipu-key")
///     .poll_interval_secs(5)
///     .poll_deadline_secs(300)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Extraction-service API base URL. Default: [`DEFAULT_EXTRACTION_BASE_URL`].
    pub extraction_base_url: String,

    /// Bearer token for the extraction service. Sent on every request
    /// except the pre-signed byte upload.
    pub extraction_token: String,

    /// Structuring-service (chat completions) API base URL.
    /// Default: [`DEFAULT_STRUCTURING_BASE_URL`].
    pub structuring_base_url: String,

    /// API key for the structuring service.
    pub structuring_api_key: String,

    /// Structuring model identifier. Default: [`DEFAULT_MODEL`].
    pub model: String,

    /// Sampling temperature for the structuring completion. Default: 0.1.
    ///
    /// Low temperature keeps the model deterministic and faithful to the
    /// invoice text — exactly what you want for field extraction.
    pub temperature: f32,

    /// Seconds between batch status polls. Default: 5.
    pub poll_interval_secs: u64,

    /// Wall-clock deadline for the whole poll phase, in seconds. Default: 300.
    ///
    /// Distinct from the per-request timeouts below: a batch may need many
    /// short status requests before every entry is terminal. Exceeding the
    /// deadline fails the whole batch — correlation cannot be trusted on a
    /// partially resolved batch.
    pub poll_deadline_secs: u64,

    /// Per-request timeout for slot, upload, status, and structuring
    /// requests, in seconds. Default: 30.
    pub request_timeout_secs: u64,

    /// Timeout for downloading a result bundle, in seconds. Default: 120.
    ///
    /// Bundles can run to tens of megabytes for long documents, so they get
    /// a wider window than the JSON round-trips.
    pub download_timeout_secs: u64,

    /// Bounded fan-out for per-document work (uploads, bundle decoding,
    /// structuring calls). Default: 4.
    ///
    /// Both remote services rate-limit; a modest bound keeps a large batch
    /// from tripping 429s while still overlapping network waits.
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extraction_base_url: DEFAULT_EXTRACTION_BASE_URL.to_string(),
            extraction_token: String::new(),
            structuring_base_url: DEFAULT_STRUCTURING_BASE_URL.to_string(),
            structuring_api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.1,
            poll_interval_secs: 5,
            poll_deadline_secs: 300,
            request_timeout_secs: 30,
            download_timeout_secs: 120,
            concurrency: 4,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("extraction_base_url", &self.extraction_base_url)
            .field("extraction_token", &redact(&self.extraction_token))
            .field("structuring_base_url", &self.structuring_base_url)
            .field("structuring_api_key", &redact(&self.structuring_api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("poll_deadline_secs", &self.poll_deadline_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build a config from the deployment environment.
    ///
    /// Reads `MINERU_API_BASE`, `MINERU_API_TOKEN`, `ZHIPU_API_BASE`,
    /// `ZHIPU_API_KEY`, and `ZHIPU_MODEL`; unset variables keep their
    /// defaults. Credential presence is validated by `build()`.
    pub fn from_env() -> Result<Self, PipelineError> {
        let mut builder = Self::builder();
        if let Ok(base) = std::env::var("MINERU_API_BASE") {
            builder = builder.extraction_base_url(base);
        }
        if let Ok(token) = std::env::var("MINERU_API_TOKEN") {
            builder = builder.extraction_token(token);
        }
        if let Ok(base) = std::env::var("ZHIPU_API_BASE") {
            builder = builder.structuring_base_url(base);
        }
        if let Ok(key) = std::env::var("ZHIPU_API_KEY") {
            builder = builder.structuring_api_key(key);
        }
        if let Ok(model) = std::env::var("ZHIPU_MODEL") {
            builder = builder.model(model);
        }
        builder.build()
    }

    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Poll deadline as a [`Duration`].
    pub fn poll_deadline(&self) -> Duration {
        Duration::from_secs(self.poll_deadline_secs)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn extraction_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.extraction_base_url = trim_trailing_slash(url.into());
        self
    }

    pub fn extraction_token(mut self, token: impl Into<String>) -> Self {
        self.config.extraction_token = token.into();
        self
    }

    pub fn structuring_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.structuring_base_url = trim_trailing_slash(url.into());
        self
    }

    pub fn structuring_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.structuring_api_key = key.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poll_interval_secs = secs.max(1);
        self
    }

    pub fn poll_deadline_secs(mut self, secs: u64) -> Self {
        self.config.poll_deadline_secs = secs.max(1);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.extraction_token.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "extraction token is not set (MINERU_API_TOKEN)".into(),
            ));
        }
        if c.structuring_api_key.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "structuring API key is not set (ZHIPU_API_KEY)".into(),
            ));
        }
        if c.poll_interval_secs > c.poll_deadline_secs {
            return Err(PipelineError::InvalidConfig(format!(
                "poll interval ({}s) exceeds poll deadline ({}s)",
                c.poll_interval_secs, c.poll_deadline_secs
            )));
        }
        Ok(self.config)
    }
}

fn trim_trailing_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> PipelineConfigBuilder {
        PipelineConfig::builder()
            .extraction_token("t")
            .structuring_api_key("k")
    }

    #[test]
    fn defaults() {
        let c = minimal().build().unwrap();
        assert_eq!(c.model, DEFAULT_MODEL);
        assert_eq!(c.poll_interval_secs, 5);
        assert_eq!(c.poll_deadline_secs, 300);
        assert_eq!(c.concurrency, 4);
        assert!((c.temperature - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn missing_credentials_rejected() {
        assert!(PipelineConfig::builder().build().is_err());
        assert!(PipelineConfig::builder()
            .extraction_token("t")
            .build()
            .is_err());
    }

    #[test]
    fn interval_beyond_deadline_rejected() {
        let err = minimal()
            .poll_interval_secs(60)
            .poll_deadline_secs(10)
            .build();
        assert!(matches!(err, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn base_urls_lose_trailing_slash() {
        let c = minimal()
            .extraction_base_url("https://example.com/api/v4/")
            .build()
            .unwrap();
        assert_eq!(c.extraction_base_url, "https://example.com/api/v4");
    }

    #[test]
    fn debug_redacts_credentials() {
        let c = minimal()
            .extraction_token("sk-secret-token")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret-token"));
        assert!(dbg.contains("<redacted>"));
    }
}
