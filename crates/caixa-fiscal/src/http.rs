//! # HTTP Fiscal Authority
//!
//! REST adapter for the NFC-e authority.
//!
//! ```text
//! POST   {base}/invoices              body: InvoicePayload + reference
//!                                     ◄── { "correlation_id": "..." }
//! GET    {base}/invoices/{corr}       ◄── { "status": "...", "document_ref": ..., "message": ... }
//! DELETE {base}/invoices/{corr}       body: { "justification": "..." }
//! ```
//!
//! The authority deduplicates on `reference`, so a repeated POST for the same
//! settlement answers with the original correlation id.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::authority::{AuthorityStatus, FiscalAuthority, InvoicePayload};
use crate::config::FiscalSettings;
use crate::error::{FiscalError, FiscalResult};

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    correlation_id: String,
}

#[derive(Debug, Clone)]
pub struct HttpFiscalAuthority {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
    timeout_secs: u64,
}

impl HttpFiscalAuthority {
    pub fn new(settings: &FiscalSettings) -> FiscalResult<Self> {
        let mut base_url = settings.base_url()?;
        // Url::join drops the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| FiscalError::Config(format!("HTTP client: {}", e)))?;

        Ok(HttpFiscalAuthority {
            client,
            base_url,
            api_token: settings.api_token.clone(),
            timeout_secs: settings.request_timeout_secs,
        })
    }

    fn endpoint(&self, path: &str) -> FiscalResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> FiscalResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, body = %body, "Fiscal authority returned an error status");
        Err(FiscalError::ExternalFailure(format!(
            "authority answered {}: {}",
            status,
            body.trim()
        )))
    }

    fn transport_error(&self, err: reqwest::Error) -> FiscalError {
        if err.is_timeout() {
            FiscalError::Timeout(self.timeout_secs)
        } else if err.is_decode() {
            FiscalError::ExternalFailure(format!("unexpected response body: {}", err))
        } else {
            FiscalError::ExternalFailure(err.to_string())
        }
    }
}

#[async_trait]
impl FiscalAuthority for HttpFiscalAuthority {
    async fn submit(&self, reference: &str, payload: &InvoicePayload) -> FiscalResult<String> {
        debug!(reference = %reference, "Submitting invoice");
        let url = self.endpoint("invoices")?;
        let response = self.send(self.client.post(url).json(payload)).await?;
        let body: SubmitResponse = response.json().await.map_err(|e| self.transport_error(e))?;
        Ok(body.correlation_id)
    }

    async fn query_status(&self, correlation_id: &str) -> FiscalResult<AuthorityStatus> {
        let url = self.endpoint(&format!("invoices/{}", correlation_id))?;
        let response = self.send(self.client.get(url)).await?;
        response.json().await.map_err(|e| self.transport_error(e))
    }

    async fn request_cancellation(&self, correlation_id: &str, reason: &str) -> FiscalResult<()> {
        debug!(correlation_id = %correlation_id, "Requesting invoice cancellation");
        let url = self.endpoint(&format!("invoices/{}", correlation_id))?;
        self.send(
            self.client
                .delete(url)
                .json(&json!({ "justification": reason })),
        )
        .await?;
        Ok(())
    }
}
