use coin_rates_common::PriceRecord;
use serde::{Deserialize, Serialize};

/// Wire shape of one rate in `/rates/*` responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinPrice {
    pub title: String,
    pub price: f64,
}

impl From<&PriceRecord> for CoinPrice {
    fn from(record: &PriceRecord) -> Self {
        Self {
            title: record.title().to_string(),
            price: record.price(),
        }
    }
}

/// JSON body returned with every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}
