//! HTTP client for pushing outbox mutations to the backend.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use comanda_core::sync::{SyncEntity, SyncOperation};

use crate::error::{Result, SyncApiError};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";

/// One mutation push. The idempotency key travels as a header so a retried
/// call the backend already processed is acknowledged instead of re-applied.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPushRequest {
    pub entity_type: SyncEntity,
    pub entity_id: String,
    pub operation: SyncOperation,
    pub payload: serde_json::Value,
    #[serde(skip)]
    pub idempotency_key: String,
}

/// What the backend did with the pushed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPushOutcome {
    /// Mutation accepted and applied.
    Applied,
    /// The idempotency key was seen before; the mutation is already in.
    AlreadyApplied,
    /// Semantic rejection (version conflict, validation). Terminal for the
    /// queue item; never retried automatically.
    Rejected { reason: String },
}

/// Remote surface the engine pushes to. Mocked in engine tests.
#[async_trait]
pub trait SyncEndpoint: Send + Sync {
    async fn push(&self, request: SyncPushRequest) -> Result<SyncPushOutcome>;
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushResponseBody {
    #[serde(default)]
    already_applied: bool,
}

/// Client for the comanda sync backend.
#[derive(Debug, Clone)]
pub struct RemoteSyncClient {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteSyncClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the backend (e.g., "https://api.comanda.app")
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn headers(&self, idempotency_key: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let key_value = HeaderValue::from_str(idempotency_key)
            .map_err(|_| SyncApiError::invalid_request("Invalid idempotency key format"))?;
        headers.insert(IDEMPOTENCY_KEY_HEADER, key_value);
        Ok(headers)
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {}", status);
            return;
        }
        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({}): {}", status, preview);
    }

    fn error_from_body(status: reqwest::StatusCode, body: &str) -> SyncApiError {
        if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(body) {
            return SyncApiError::api(
                status.as_u16(),
                format!("{}: {}", error.code, error.message),
            );
        }
        SyncApiError::api(status.as_u16(), format!("Request failed: {}", body))
    }
}

#[async_trait]
impl SyncEndpoint for RemoteSyncClient {
    /// Push one mutation.
    ///
    /// POST /api/v1/sync/{entity_type}
    async fn push(&self, request: SyncPushRequest) -> Result<SyncPushOutcome> {
        let url = format!(
            "{}/api/v1/sync/{}",
            self.base_url,
            request.entity_type.as_str()
        );

        let response = self
            .client
            .post(&url)
            .headers(self.headers(&request.idempotency_key)?)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if status.is_success() {
            let parsed = serde_json::from_str::<PushResponseBody>(&body).unwrap_or(
                // An empty or unversioned success body still means applied.
                PushResponseBody {
                    already_applied: false,
                },
            );
            return Ok(if parsed.already_applied {
                SyncPushOutcome::AlreadyApplied
            } else {
                SyncPushOutcome::Applied
            });
        }

        // Semantic rejections are outcomes, not transport errors; anything
        // else surfaces as an API error for the retry classifier.
        if status.as_u16() == 409 || status.as_u16() == 422 {
            let reason = match serde_json::from_str::<ApiErrorResponse>(&body) {
                Ok(error) => format!("{}: {}", error.code, error.message),
                Err(_) => format!("Rejected with HTTP {}", status.as_u16()),
            };
            return Ok(SyncPushOutcome::Rejected { reason });
        }

        Err(Self::error_from_body(status, &body))
    }
}
