//! Thin JSON-over-HTTP client shared by the embedding and chat-completion providers.

use crate::config::OpenAiConfig;
use crate::error::ServiceError;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
    retry_backoff: Duration,
}

impl OpenAiClient {
    pub fn new(config: &OpenAiConfig) -> Result<Self, ServiceError> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|error| {
            ServiceError::Config(format!("invalid api base url {}: {error}", config.base_url))
        })?;

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| ServiceError::Config(error.to_string()))?;

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
            retry_backoff: config.retry_backoff,
        })
    }

    /// POSTs `body` to `path` below the base URL. A transient failure is
    /// retried exactly once after the configured backoff.
    pub async fn post_json<B, R>(&self, service: &str, path: &str, body: &B) -> Result<R, ServiceError>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(path)
            .map_err(|error| ServiceError::Config(format!("invalid api path {path}: {error}")))?;

        match self.send_once(service, &url, body).await {
            Err(error) if error.is_transient() => {
                warn!(service, url = %url, error = %error, "transient failure, retrying once");
                tokio::time::sleep(self.retry_backoff).await;
                self.send_once(service, &url, body).await
            }
            other => other,
        }
    }

    async fn send_once<B, R>(&self, service: &str, url: &Url, body: &B) -> Result<R, ServiceError>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self.http.post(url.clone()).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|error| ServiceError::from_reqwest(service, error))?;

        let status = response.status();
        debug!(service, status = status.as_u16(), "upstream responded");

        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(ServiceError::Rejected {
                service: service.to_string(),
                status: status.as_u16(),
                details: details.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|error| ServiceError::BadResponse {
                service: service.to_string(),
                details: error.to_string(),
            })
    }
}
