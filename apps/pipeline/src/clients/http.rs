//! JSON-over-HTTP adapters for the search, scraping and send providers.
//!
//! Status classification is shared by every adapter (and the LLM client):
//! 429 → RateLimited (honouring `Retry-After`), 408/5xx → Transient, other 4xx → Permanent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clients::{
    CandidateSearch, ExternalError, MessageSender, ProfileScraper, ProviderLimits, SearchCriteria,
    SearchPage,
};
use crate::models::{Channel, OutreachMessage, ProfilePatch};

pub fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    message: String,
) -> ExternalError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ExternalError::RateLimited { retry_after }
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ExternalError::Transient(format!("status {}: {message}", status.as_u16()))
    } else {
        ExternalError::Permanent(format!("status {}: {message}", status.as_u16()))
    }
}

/// Parses a delta-seconds `Retry-After` header. HTTP-date values are ignored.
pub fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn transport_error(e: reqwest::Error) -> ExternalError {
    if e.is_timeout() {
        ExternalError::Transient(format!("request timed out: {e}"))
    } else if e.is_decode() {
        ExternalError::Permanent(format!("undecodable response: {e}"))
    } else {
        ExternalError::Transient(format!("HTTP error: {e}"))
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, ExternalError> {
    let status = response.status();
    if !status.is_success() {
        let retry_after = retry_after_header(response.headers());
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, retry_after, body));
    }
    response.json::<T>().await.map_err(transport_error)
}

fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).build()
}

// ────────────────────────────────────────────────────────────────────────────
// Search
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    criteria: &'a SearchCriteria,
    cursor: Option<&'a str>,
}

/// Cursor-paginated search provider. One `page` call is one POST to `{base}/search`.
#[derive(Clone)]
pub struct HttpSearch {
    client: Client,
    url: String,
}

impl HttpSearch {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let base_url = base_url.into();
        Ok(Self {
            client: build_client(timeout)?,
            url: format!("{}/search", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl CandidateSearch for HttpSearch {
    async fn page(
        &self,
        criteria: &SearchCriteria,
        cursor: Option<&str>,
    ) -> Result<SearchPage, ExternalError> {
        let response = self
            .client
            .post(&self.url)
            .json(&SearchRequest { criteria, cursor })
            .send()
            .await
            .map_err(transport_error)?;
        let page: SearchPage = read_json(response).await?;
        debug!(
            "Search page returned {} leads (more: {})",
            page.leads.len(),
            page.next_cursor.is_some()
        );
        Ok(page)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scraping
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct HttpScraper {
    client: Client,
    base_url: String,
}

impl HttpScraper {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ProfileScraper for HttpScraper {
    async fn enrich(&self, profile_url: &str) -> Result<ProfilePatch, ExternalError> {
        let url = format!("{}/profiles", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(url)
            .query(&[("url", profile_url)])
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sending
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    channel: Channel,
    recipient: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    delivery_id: String,
}

/// Send provider for one channel. The message id doubles as the idempotency key so a
/// resend after a crash between dispatch and bookkeeping is collapsed by the provider.
#[derive(Clone)]
pub struct HttpSender {
    client: Client,
    base_url: String,
    channel: Channel,
    limits: ProviderLimits,
}

impl HttpSender {
    pub fn new(
        channel: Channel,
        base_url: impl Into<String>,
        timeout: Duration,
        max_concurrency: usize,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into(),
            channel,
            limits: ProviderLimits { max_concurrency },
        })
    }
}

#[async_trait]
impl MessageSender for HttpSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn limits(&self) -> ProviderLimits {
        self.limits
    }

    async fn send(&self, message: &OutreachMessage) -> Result<String, ExternalError> {
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .header("Idempotency-Key", message.id.to_string())
            .json(&SendRequest {
                channel: self.channel,
                recipient: &message.recipient,
                content: &message.content,
            })
            .send()
            .await
            .map_err(transport_error)?;
        let sent: SendResponse = read_json(response).await?;
        Ok(sent.delivery_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_classify_rate_limit() {
        let err = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(7)),
            String::new(),
        );
        assert!(matches!(
            err,
            ExternalError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(7)
        ));
    }

    #[test]
    fn test_classify_server_error_is_transient() {
        let err = classify_status(StatusCode::BAD_GATEWAY, None, "upstream".to_string());
        assert!(matches!(err, ExternalError::Transient(_)));
        let err = classify_status(StatusCode::REQUEST_TIMEOUT, None, String::new());
        assert!(matches!(err, ExternalError::Transient(_)));
    }

    #[test]
    fn test_classify_client_error_is_permanent() {
        let err = classify_status(StatusCode::UNPROCESSABLE_ENTITY, None, "bad".to_string());
        assert!(matches!(err, ExternalError::Permanent(m) if m.contains("422")));
    }

    #[test]
    fn test_retry_after_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_header(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(retry_after_header(&headers), Some(Duration::from_secs(12)));
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after_header(&headers), None);
    }
}
