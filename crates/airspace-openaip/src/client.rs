//! OpenAIP API HTTP client.

use airspace_core::BoundingBox;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

const API_KEY_HEADER: &str = "x-openaip-api-key";
const DEFAULT_PAGE_LIMIT: u32 = 1000;
/// Hard stop so a misbehaving server cannot page forever.
const MAX_PAGES: u32 = 50;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// One page of the `/airspaces` listing.
#[derive(Debug, Deserialize)]
struct AirspacePage {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default = "first_page")]
    page: u32,
    #[serde(default = "first_page", rename = "totalPages")]
    total_pages: u32,
}

fn first_page() -> u32 {
    1
}

/// HTTP client for the OpenAIP core API.
pub struct OpenAipClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAipClient {
    /// Create a new client. An empty key sends unauthenticated requests.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let api_key = api_key.into();
        let api_key = if api_key.trim().is_empty() {
            None
        } else {
            Some(api_key.trim().to_string())
        };
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch every airspace record intersecting `bounds`, following pagination.
    pub async fn fetch_airspaces(&self, bounds: &BoundingBox) -> Result<Vec<Value>, FetchError> {
        let url = format!("{}/airspaces", self.base_url);
        let bbox = bbox_param(bounds);
        let mut records = Vec::new();
        let mut page = 1u32;

        loop {
            let mut request = self.client.get(&url).query(&[
                ("bbox", bbox.clone()),
                ("page", page.to_string()),
                ("limit", DEFAULT_PAGE_LIMIT.to_string()),
            ]);
            if let Some(key) = &self.api_key {
                request = request.header(API_KEY_HEADER, key);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::Http { status, body });
            }

            let body = response.bytes().await?;
            let parsed = parse_page(&body)?;
            tracing::debug!(
                page = parsed.page,
                total_pages = parsed.total_pages,
                items = parsed.items.len(),
                "Fetched airspace page"
            );
            records.extend(parsed.items);

            if parsed.page >= parsed.total_pages || page >= MAX_PAGES {
                break;
            }
            page += 1;
        }

        tracing::info!(records = records.len(), bbox = %bbox, "Fetched airspaces");
        Ok(records)
    }
}

/// `min_lon,min_lat,max_lon,max_lat`, the order the API expects.
fn bbox_param(bounds: &BoundingBox) -> String {
    format!(
        "{},{},{},{}",
        bounds.min_lon, bounds.min_lat, bounds.max_lon, bounds.max_lat
    )
}

fn parse_page(body: &[u8]) -> Result<AirspacePage, FetchError> {
    serde_json::from_slice(body).map_err(|err| FetchError::Decode(err.to_string()))
}
