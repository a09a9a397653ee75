// libs/booking-cell/src/services/onec_client.rs
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::{debug, error};

use shared_models::scheduling::IntegrationEndpoint;

use crate::models::{ExternalBookingError, OnecBooking, OnecBookingRequest};

/// HTTP client for the 1C appointment API. Calls are bounded by the client
/// timeout and never retried here.
#[derive(Clone)]
pub struct OnecClient {
    client: Client,
}

impl OnecClient {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                error!("Falling back to default 1C HTTP client: {}", e);
                Client::new()
            });

        Self { client }
    }

    fn url(endpoint: &IntegrationEndpoint, path: &str) -> String {
        format!("{}{}", endpoint.base_url.trim_end_matches('/'), path)
    }

    async fn send(
        &self,
        method: Method,
        url: String,
        endpoint: &IntegrationEndpoint,
        body: Option<&OnecBookingRequest>,
    ) -> Result<(StatusCode, String), ExternalBookingError> {
        debug!("1C request: {} {}", method, url);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&endpoint.api_token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExternalBookingError::transport(format!("1C request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExternalBookingError::transport(format!("Failed to read 1C response: {}", e)))?;

        if !status.is_success() {
            error!("1C request to {} failed with {}: {}", url, status, text);
            return Err(ExternalBookingError::from_response(status.as_u16(), text));
        }

        Ok((status, text))
    }

    pub async fn book(
        &self,
        endpoint: &IntegrationEndpoint,
        request: &OnecBookingRequest,
    ) -> Result<OnecBooking, ExternalBookingError> {
        let url = Self::url(endpoint, "/appointments");
        let (status, text) = self.send(Method::POST, url, endpoint, Some(request)).await?;

        let raw: Value = serde_json::from_str(&text).map_err(|e| ExternalBookingError {
            status: Some(status.as_u16()),
            body: text.clone(),
            message: format!("Unreadable 1C booking response: {}", e),
        })?;

        let appointment_id = ["appointment_id", "id", "booking_uuid"]
            .iter()
            .find_map(|key| match raw.get(*key) {
                Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
                Some(Value::Number(id)) => Some(id.to_string()),
                _ => None,
            })
            .ok_or_else(|| ExternalBookingError {
                status: Some(status.as_u16()),
                body: text.clone(),
                message: "1C booking response carries no appointment id".to_string(),
            })?;

        let status = raw.get("status").and_then(Value::as_str).map(str::to_string);

        Ok(OnecBooking {
            appointment_id,
            status,
            raw,
        })
    }

    pub async fn cancel(
        &self,
        endpoint: &IntegrationEndpoint,
        appointment_id: &str,
    ) -> Result<(), ExternalBookingError> {
        let url = Self::url(endpoint, &format!("/appointments/{}", urlencoding::encode(appointment_id)));
        self.send(Method::DELETE, url, endpoint, None).await?;
        Ok(())
    }
}
