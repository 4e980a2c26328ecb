use crate::price_provider::RateProvider;
use async_trait::async_trait;
use coin_rates_common::{PriceRecord, PriceSelector, RateError, RateResult};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, error, info};

const FROM_SYMBOLS: &str = "fsyms";
const TO_SYMBOLS: &str = "tsyms";
const ERROR_MARKER: &str = "Error";

/// Body of a `pricemultifull` response.
///
/// `RAW` maps title -> quote currency -> quote. An upstream failure (for example
/// an unknown symbol) is signalled by `"Response": "Error"` instead.
#[derive(Debug, Deserialize)]
struct PriceMultiFull {
    #[serde(rename = "Response")]
    response: Option<String>,
    #[serde(rename = "Message")]
    message: Option<String>,
    #[serde(rename = "RAW", default)]
    raw: HashMap<String, HashMap<String, RawQuote>>,
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    #[serde(rename = "PRICE")]
    price: f64,
    #[serde(rename = "HIGHDAY")]
    high_day: f64,
    #[serde(rename = "LOWDAY")]
    low_day: f64,
}

impl RawQuote {
    fn select(&self, selector: PriceSelector) -> f64 {
        match selector {
            PriceSelector::Latest => self.price,
            PriceSelector::Max => self.high_day,
            PriceSelector::Min => self.low_day,
            PriceSelector::Average => (self.price + self.high_day + self.low_day) / 3.0,
        }
    }
}

/// Client for the CryptoCompare `pricemultifull` endpoint.
pub struct CryptoCompareClient {
    client: Client,
    base_url: Url,
    api_key: String,
    currency: String,
}

impl CryptoCompareClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        currency: &str,
        timeout: Duration,
    ) -> RateResult<Self> {
        if base_url.trim().is_empty() || api_key.trim().is_empty() {
            return Err(RateError::invalid("base-url/api-key is empty"));
        }

        let base_url = Url::parse(base_url)
            .map_err(|e| RateError::invalid(format!("invalid base url {}: {}", base_url, e)))?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent("coin-rates/0.1")
            .build()
            .map_err(|e| RateError::wrap("failed to create HTTP client", e))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.to_string(),
            currency: currency.to_ascii_uppercase(),
        })
    }

    fn request_url(&self, titles: &[String]) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair(FROM_SYMBOLS, &titles.join(","))
            .append_pair(TO_SYMBOLS, &self.currency);
        url
    }

    /// Turns a response body into records, one per distinct requested title,
    /// in request order.
    fn parse_rates(
        &self,
        body: &[u8],
        titles: &[String],
        selector: PriceSelector,
    ) -> RateResult<Vec<PriceRecord>> {
        let data: PriceMultiFull = serde_json::from_slice(body)
            .map_err(|e| RateError::wrap("failed to parse response body, invalid JSON format", e))?;

        if data.response.as_deref() == Some(ERROR_MARKER) {
            error!(
                "CryptoCompare rejected titles {:?}: {}",
                titles,
                data.message.as_deref().unwrap_or("no message")
            );
            return Err(RateError::not_found(format!(
                "coin {:?} does not exist",
                titles
            )));
        }

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(titles.len());
        for title in titles {
            if !seen.insert(title.as_str()) {
                continue;
            }

            let quote = data
                .raw
                .get(title)
                .and_then(|quotes| quotes.get(&self.currency))
                .ok_or_else(|| RateError::not_found(format!("coin {} does not exist", title)))?;

            // Upstream data, not caller input: a bad quote is an internal failure.
            let record = PriceRecord::new(title, quote.select(selector)).map_err(|e| {
                error!("CryptoCompare sent an unusable {} for {}: {}", selector, title, e);
                RateError::internal(format!("invalid quote for {} from provider: {}", title, e))
            })?;
            records.push(record);
        }

        Ok(records)
    }
}

#[async_trait]
impl RateProvider for CryptoCompareClient {
    async fn get_actual_rates(
        &self,
        titles: &[String],
        selector: PriceSelector,
    ) -> RateResult<Vec<PriceRecord>> {
        if titles.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.request_url(titles);
        debug!("Calling CryptoCompare: {} ({})", url, selector);

        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Apikey {}", self.api_key))
            .send()
            .await
            .map_err(|e| {
                error!("Failed to execute CryptoCompare request: {}", e);
                RateError::wrap("failed to execute request", e)
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            error!("CryptoCompare returned unexpected status: {}", status);
            return Err(RateError::internal(format!(
                "unexpected status code: {}",
                status.as_u16()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RateError::wrap("failed to read response body", e))?;

        let records = self.parse_rates(&body, titles, selector)?;
        info!(
            "Fetched {} rate(s) from CryptoCompare ({})",
            records.len(),
            selector
        );

        Ok(records)
    }
}
