//! `OpenAI` moderation adapter.

use std::collections::BTreeMap;
use std::{env, fmt, time::Duration};

use async_trait::async_trait;
use hyper::Uri;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http_client::{HttpTransport, sanitize_base_url};
use crate::traits::{AdapterError, AdapterResult, Classification, ModerationClient};

/// Environment variable used when loading configuration automatically.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Default moderation model.
pub const DEFAULT_MODERATION_MODEL: &str = "omni-moderation-latest";

/// Configuration for the `OpenAI` moderation adapter.
#[derive(Clone)]
pub struct OpenAiModerationConfig {
    api_key: Option<String>,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl fmt::Debug for OpenAiModerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiModerationConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl OpenAiModerationConfig {
    /// Creates a configuration using the default moderation model.
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODERATION_MODEL.to_owned(),
            base_url: "https://api.openai.com/".to_owned(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Loads the API key from the `OPENAI_API_KEY` environment variable.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::new();
        cfg.api_key = env::var(OPENAI_API_KEY_ENV).ok();
        cfg
    }

    /// Overrides the base URL used for API calls.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the supplied URL is invalid.
    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> AdapterResult<Self> {
        self.base_url = sanitize_base_url(base_url.as_ref())?;
        Ok(self)
    }

    /// Overrides the moderation model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Supplies an explicit API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

impl Default for OpenAiModerationConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Moderation client backed by the `OpenAI` `/v1/moderations` endpoint.
pub struct OpenAiModerationAdapter {
    transport: HttpTransport,
    endpoint: Uri,
    model: String,
    api_key: String,
}

impl fmt::Debug for OpenAiModerationAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiModerationAdapter")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl OpenAiModerationAdapter {
    /// Constructs a new adapter with the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the API key is missing or the
    /// endpoint cannot be formed.
    pub fn new(config: OpenAiModerationConfig) -> AdapterResult<Self> {
        let api_key = config
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| AdapterError::configuration("OpenAI moderation requires an API key"))?;

        let endpoint = format!("{}v1/moderations", config.base_url)
            .parse::<Uri>()
            .map_err(|err| {
                AdapterError::configuration(format!("invalid OpenAI endpoint: {err}"))
            })?;

        Ok(Self {
            transport: HttpTransport::new(config.timeout),
            endpoint,
            model: config.model,
            api_key,
        })
    }
}

#[async_trait]
impl ModerationClient for OpenAiModerationAdapter {
    fn provider(&self) -> &'static str {
        "openai"
    }

    async fn classify(&self, text: &str) -> AdapterResult<Classification> {
        let payload = ModerationRequest {
            model: &self.model,
            input: text,
        };
        let body = serde_json::to_vec(&payload).map_err(|err| {
            AdapterError::invalid_request(format!("failed to encode moderation request: {err}"))
        })?;

        let bytes = self
            .transport
            .post_json(&self.endpoint, body, Some(&self.api_key))
            .await?;

        let response: ModerationResponse = serde_json::from_slice(&bytes).map_err(|err| {
            AdapterError::response(format!("failed to decode moderation response: {err}"))
        })?;

        let classification = response.into_classification()?;
        debug!(
            model = %self.model,
            flagged = classification.flagged,
            max_score = classification.max_score(),
            "moderation classified"
        );
        Ok(classification)
    }
}

#[derive(Debug, Serialize)]
struct ModerationRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    #[serde(default)]
    results: Vec<ModerationEntry>,
}

#[derive(Debug, Deserialize)]
struct ModerationEntry {
    #[serde(default)]
    flagged: bool,
    #[serde(default)]
    categories: BTreeMap<String, Option<bool>>,
    #[serde(default)]
    category_scores: BTreeMap<String, Option<f64>>,
}

impl ModerationResponse {
    fn into_classification(self) -> AdapterResult<Classification> {
        let entry = self
            .results
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::response("moderation response contained no results"))?;

        Ok(Classification {
            flagged: entry.flagged,
            categories: entry
                .categories
                .into_iter()
                .map(|(name, flag)| (name, flag.unwrap_or(false)))
                .collect(),
            scores: entry
                .category_scores
                .into_iter()
                .filter_map(|(name, score)| score.map(|score| (name, score)))
                .collect(),
        })
    }
}
