//! Hosted inference API backend
//!
//! `POST {base}/{model}` with a bearer token. The endpoint answers either
//! with server-sent `token` events or with one JSON body holding
//! `generated_text`; both are handled by [`ChunkFormat::TextGeneration`].
//!
//! Every call is a single prompt. Nothing is remembered between calls.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::http::{build_client, ensure_success, send_or_stop, spawn_pump, InFlight};
use super::traits::{BackendAdapter, BackendKind, GenerationRequest, StreamingToken};
use crate::config::CloudConfig;
use crate::error::GenerationError;
use crate::streaming::ChunkFormat;

/// Timeout for the key validation call
const WHOAMI_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the hosted text-generation API
pub struct CloudAdapter {
    api_key: String,
    base_url: String,
    whoami_url: String,
    client: reqwest::Client,
    in_flight: InFlight,
}

impl std::fmt::Debug for CloudAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudAdapter")
            .field("base_url", &self.base_url)
            .field("whoami_url", &self.whoami_url)
            .finish_non_exhaustive()
    }
}

impl CloudAdapter {
    /// Create an adapter from the cloud config section
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Configuration`] when no API key is set.
    pub fn new(config: &CloudConfig, request_timeout: Duration) -> Result<Self, GenerationError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| GenerationError::configuration("cloud backend requires an API key"))?;
        if !api_key.starts_with("hf_") {
            warn!("Cloud API key does not start with 'hf_'");
        }

        Ok(Self {
            api_key: api_key.to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            whoami_url: config.whoami_url.clone(),
            client: build_client(request_timeout)?,
            in_flight: InFlight::default(),
        })
    }

    fn model_url(&self, model: &str) -> String {
        format!("{}/{}", self.base_url, model.trim().trim_start_matches('/'))
    }

    fn request_body(request: &GenerationRequest) -> serde_json::Value {
        let mut parameters = serde_json::json!({
            "max_new_tokens": request.max_tokens,
            "return_full_text": false,
        });
        // The API rejects temperature 0; greedy decoding is requested instead.
        if request.temperature > 0.0 {
            parameters["temperature"] = serde_json::json!(request.temperature);
        } else {
            parameters["do_sample"] = serde_json::json!(false);
        }

        serde_json::json!({
            "inputs": request.prompt,
            "parameters": parameters,
            "options": {
                "use_cache": false,
                "wait_for_model": true,
            },
            "stream": true,
        })
    }

    /// Ask the identity endpoint whether the key is accepted
    ///
    /// # Errors
    ///
    /// Returns [`GenerationError::Transport`] when the endpoint cannot be
    /// reached or answers with anything but 200 or 401.
    pub async fn validate_api_key(&self) -> Result<bool, GenerationError> {
        let response = self
            .client
            .get(&self.whoami_url)
            .bearer_auth(&self.api_key)
            .timeout(WHOAMI_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::UNAUTHORIZED => Ok(false),
            status => Err(GenerationError::transport(format!(
                "key validation returned {status}"
            ))),
        }
    }
}

#[async_trait]
impl BackendAdapter for CloudAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    fn name(&self) -> &str {
        "cloud inference"
    }

    async fn health_check(&self) -> bool {
        match self.validate_api_key().await {
            Ok(valid) => valid,
            Err(err) => {
                debug!(error = %err, "Cloud health check failed");
                false
            }
        }
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
    ) -> Result<mpsc::Receiver<StreamingToken>, GenerationError> {
        request.validate()?;
        if !request.history.is_empty() {
            debug!(
                turns = request.history.len(),
                "Cloud backend sends the prompt only; history ignored"
            );
        }
        let stop = self.in_flight.begin();

        let url = self.model_url(&request.model);
        debug!(url = %url, "Sending cloud generation request");
        let http_request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&Self::request_body(request));
        let response = send_or_stop(http_request, &stop).await?;
        let response = ensure_success(response, self.name()).await?;

        Ok(spawn_pump(response, ChunkFormat::TextGeneration, stop, |_| {}))
    }

    async fn stop_generation(&self) {
        if self.in_flight.stop() {
            info!("Stopping cloud generation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(key: Option<&str>) -> CloudConfig {
        CloudConfig {
            api_key: key.map(str::to_string),
            base_url: "https://inference.example/models/".to_string(),
            ..CloudConfig::default()
        }
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        for key in [None, Some("  ")] {
            let result = CloudAdapter::new(&config(key), Duration::from_secs(5));
            assert!(matches!(result, Err(GenerationError::Configuration(_))));
        }
    }

    #[test]
    fn test_model_url_joins_base() {
        let adapter = CloudAdapter::new(&config(Some("hf_abc")), Duration::from_secs(5)).unwrap();
        assert_eq!(
            adapter.model_url("gpt2"),
            "https://inference.example/models/gpt2"
        );
    }

    #[test]
    fn test_request_body_parameters() {
        let request = GenerationRequest::new("Once upon", "gpt2").with_max_tokens(32);
        let body = CloudAdapter::request_body(&request);
        assert_eq!(body["inputs"], "Once upon");
        assert_eq!(body["parameters"]["max_new_tokens"], 32);
        assert_eq!(body["parameters"]["return_full_text"], false);
        assert_eq!(body["options"]["wait_for_model"], true);
        assert!(body["parameters"]["temperature"].is_number());

        let greedy = CloudAdapter::request_body(&request.with_temperature(0.0));
        assert_eq!(greedy["parameters"]["do_sample"], false);
        assert!(greedy["parameters"].get("temperature").is_none());
    }

    #[test]
    fn test_debug_hides_key() {
        let adapter = CloudAdapter::new(&config(Some("hf_secret")), Duration::from_secs(5)).unwrap();
        assert!(!format!("{adapter:?}").contains("hf_secret"));
    }
}
