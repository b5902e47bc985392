//! HTTP client for the remote attendance authority.

use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use domain::errors::FetchError;
use domain::models::{GeoPoint, GeofencePayload};
use domain::services::{
    AttendanceSubmission, ContainmentCheck, LocationBatchItem, RemoteAuthority, SubmitOutcome,
};

use crate::config::RemoteConfig;

// ============================================================================
// Wire Types
// ============================================================================

/// Response envelope shared by every remote endpoint.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct ContainmentRequest {
    latitude: f64,
    longitude: f64,
}

// ============================================================================
// Client
// ============================================================================

/// [`RemoteAuthority`] over HTTPS with a bearer token.
pub struct HttpRemoteAuthority {
    client: Client,
    base_url: String,
    access_token: String,
    timeout_ms: u64,
}

impl HttpRemoteAuthority {
    pub fn new(config: &RemoteConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            timeout_ms: config.timeout_ms,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        if self.access_token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.access_token)
        }
    }

    async fn send(&self, endpoint: &'static str, builder: RequestBuilder) -> Result<reqwest::Response, FetchError> {
        let start = Instant::now();
        let result = self.authorized(builder).send().await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                debug!(
                    endpoint,
                    status = response.status().as_u16(),
                    elapsed_ms,
                    "Remote call completed"
                );
                Ok(response)
            }
            Err(e) => {
                let err = if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Network(e.to_string())
                };
                warn!(
                    endpoint,
                    error = %err,
                    elapsed_ms,
                    timeout_ms = self.timeout_ms,
                    "Remote call failed"
                );
                Err(err)
            }
        }
    }

    /// Reads the envelope of a 2xx response; any other status is a rejection.
    async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<ApiEnvelope<T>, FetchError> {
        let status = response.status();
        if !status.is_success() {
            return Err(rejection(response).await);
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;

        if !envelope.success {
            return Err(FetchError::Rejected {
                status: status.as_u16(),
                message: envelope
                    .message
                    .unwrap_or_else(|| "Request was not successful".to_string()),
            });
        }
        Ok(envelope)
    }

    async fn submit_attendance(
        &self,
        endpoint: &'static str,
        submission: &AttendanceSubmission,
    ) -> Result<SubmitOutcome, FetchError> {
        let response = self
            .send(endpoint, self.client.post(self.url(endpoint)).json(submission))
            .await?;

        if response.status() == StatusCode::CONFLICT {
            debug!(endpoint, "Remote already holds attendance event");
            return Ok(SubmitOutcome::AlreadyRecorded);
        }

        Self::read_envelope::<serde_json::Value>(response).await?;
        Ok(SubmitOutcome::Accepted)
    }
}

async fn rejection(response: reqwest::Response) -> FetchError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body)
        .ok()
        .and_then(|envelope| envelope.message)
        .unwrap_or(body);
    FetchError::Rejected { status, message }
}

#[async_trait::async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
    async fn fetch_geofences(&self) -> Result<Vec<GeofencePayload>, FetchError> {
        let response = self
            .send("/geofences", self.client.get(self.url("/geofences")))
            .await?;
        let envelope = Self::read_envelope::<Vec<GeofencePayload>>(response).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    async fn check_containment(&self, point: GeoPoint) -> Result<ContainmentCheck, FetchError> {
        let body = ContainmentRequest {
            latitude: point.latitude,
            longitude: point.longitude,
        };
        let response = self
            .send("/geofences/check", self.client.post(self.url("/geofences/check")).json(&body))
            .await?;
        let envelope = Self::read_envelope::<ContainmentCheck>(response).await?;
        envelope
            .data
            .ok_or_else(|| FetchError::InvalidResponse("Missing containment data".to_string()))
    }

    async fn submit_check_in(&self, submission: &AttendanceSubmission) -> Result<SubmitOutcome, FetchError> {
        self.submit_attendance("/attendance/check-in", submission).await
    }

    async fn submit_check_out(&self, submission: &AttendanceSubmission) -> Result<SubmitOutcome, FetchError> {
        self.submit_attendance("/attendance/check-out", submission).await
    }

    async fn submit_location_batch(&self, items: &[LocationBatchItem]) -> Result<(), FetchError> {
        let response = self
            .send("/location/batch", self.client.post(self.url("/location/batch")).json(items))
            .await?;
        Self::read_envelope::<serde_json::Value>(response).await?;
        Ok(())
    }
}
