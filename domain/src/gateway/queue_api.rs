use crate::error::{DomainErrorKind, Error, PullErrorKind};
use async_trait::async_trait;
use channel::message::TicketPayload;
use log::*;
use service::config::Config;
use std::time::Duration;

/// Source of authoritative ticket records for periodic refreshes.
#[async_trait]
pub trait TicketSource: Send + Sync {
    async fn fetch_ticket(&self, ticket_number: &str) -> Result<TicketPayload, Error>;
}

/// HTTP client for the queue API's ticket status endpoint.
#[derive(Debug, Clone)]
pub struct QueueApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl QueueApiClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        Self::with_base_url(&config.api_base_url, config.http_timeout())
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, Error> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn status_url(&self, ticket_number: &str) -> String {
        format!("{}/tickets/{}/status", self.base_url, ticket_number)
    }
}

#[async_trait]
impl TicketSource for QueueApiClient {
    /// `GET {api_base}/tickets/{number}/status`
    async fn fetch_ticket(&self, ticket_number: &str) -> Result<TicketPayload, Error> {
        let url = self.status_url(ticket_number);
        debug!("Refreshing ticket {ticket_number} from {url}");

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!("Failed to refresh ticket {ticket_number}: {e:?}");
            Error::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!("Ticket status request failed: {status} - {error_text}");
            return Err(Error {
                source: None,
                error_kind: DomainErrorKind::Pull(PullErrorKind::Status(status.as_u16())),
            });
        }

        let body = response.text().await?;
        let record: TicketPayload = serde_json::from_str(&body).map_err(|e| {
            warn!("Invalid ticket status response for {ticket_number}: {e}");
            Error::from(e)
        })?;
        Ok(record)
    }
}
