//! External BTC-USD quote source
//!
//! The engine never prices against stale or zero data: every failure
//! mode here is an error the caller surfaces as "quote unavailable"
//! and retries later.

use async_trait::async_trait;
use thiserror::Error;

const COINDESK_URL: &str = "https://api.coindesk.com/v1/bpi/currentprice.json";

#[derive(Error, Debug)]
pub enum QuoteFeedError {
    #[error("quote request failed: {0}")]
    Request(String),
    #[error("quote response malformed: {0}")]
    Malformed(String),
    #[error("quote source returned unusable rate: {0}")]
    BadRate(f64),
}

/// Supplies the current BTC-USD reference rate on demand
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn current_rate(&self) -> Result<f64, QuoteFeedError>;
}

/// Coindesk BPI price index client
pub struct CoindeskSource {
    client: reqwest::Client,
    url: String,
}

impl CoindeskSource {
    pub fn new() -> Self {
        Self::with_url(COINDESK_URL)
    }

    pub fn with_url(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

impl Default for CoindeskSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuoteSource for CoindeskSource {
    async fn current_rate(&self) -> Result<f64, QuoteFeedError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| QuoteFeedError::Request(e.to_string()))?;

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| QuoteFeedError::Malformed(e.to_string()))?;

        parse_rate(&data)
    }
}

/// Pull `bpi.USD.rate_float` out of the index payload and refuse
/// anything that cannot be priced against.
fn parse_rate(data: &serde_json::Value) -> Result<f64, QuoteFeedError> {
    let rate = data
        .get("bpi")
        .and_then(|v| v.get("USD"))
        .and_then(|v| v.get("rate_float"))
        .and_then(|v| v.as_f64())
        .ok_or_else(|| QuoteFeedError::Malformed("missing bpi.USD.rate_float".into()))?;

    if !rate.is_finite() || rate <= 0.0 {
        return Err(QuoteFeedError::BadRate(rate));
    }
    Ok(rate)
}
