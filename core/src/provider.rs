//! External rating provider.
//!
//! The provider is a rate-limited HTTP API reporting the public star rating
//! and review count of an Amazon product. [`RainforestClient`] is the real
//! implementation; tests plug in their own [`RatingProvider`].

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.rainforestapi.com";
const USER_AGENT: &str = "shelf-ratings/0.1";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider API key is not configured")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {0}")]
    Status(u16),
    #[error("provider response has no product record")]
    MissingProduct,
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// Rating data for one item as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderRating {
    pub rating: f64,
    pub review_count: u32,
}

#[async_trait]
pub trait RatingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the provider has what it needs (credentials) to be called at all.
    fn is_configured(&self) -> bool { true }

    async fn fetch(&self, item_id: &str) -> Result<ProviderRating, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct ProductEnvelope {
    product: Option<ProductRecord>,
}

#[derive(Debug, Deserialize)]
struct ProductRecord {
    /// Only a JSON number counts; anything else reads as "no rating".
    rating: Option<serde_json::Value>,
    ratings_total: Option<u32>,
}

impl From<ProductRecord> for ProviderRating {
    fn from(p: ProductRecord) -> Self {
        // zero reviews is a valid answer, not a miss
        Self { rating: p.rating.and_then(|r| r.as_f64()).unwrap_or(0.0), review_count: p.ratings_total.unwrap_or(0) }
    }
}

/// Parse a provider response body into a rating.
pub fn parse_product(body: &str) -> Result<ProviderRating, ProviderError> {
    let envelope: ProductEnvelope = serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    envelope.product.map(ProviderRating::from).ok_or(ProviderError::MissingProduct)
}

/// Client for the Rainforest product API.
pub struct RainforestClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl RainforestClient {
    pub fn new(api_key: Option<String>, base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).timeout(timeout).build()?;
        let mut base_url = Url::parse(base_url)?;
        // keep any path prefix when joining the endpoint onto it
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        Ok(Self { client, base_url, api_key })
    }

    fn request_url(&self, api_key: &str, item_id: &str) -> Result<Url, ProviderError> {
        let mut url = self.base_url.join("request").map_err(|e| ProviderError::Malformed(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("api_key", api_key)
            .append_pair("type", "product")
            .append_pair("amazon_domain", "amazon.com")
            .append_pair("asin", item_id);
        Ok(url)
    }
}

#[async_trait]
impl RatingProvider for RainforestClient {
    fn name(&self) -> &str { "rainforest" }

    fn is_configured(&self) -> bool { self.api_key.is_some() }

    async fn fetch(&self, item_id: &str) -> Result<ProviderRating, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or(ProviderError::MissingApiKey)?;
        let url = self.request_url(api_key, item_id)?;
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(ProviderError::Status(resp.status().as_u16()));
        }
        let body = resp.text().await?;
        let rating = parse_product(&body)?;
        debug!(item_id, rating = rating.rating, reviews = rating.review_count, "fetched rating");
        Ok(rating)
    }
}
