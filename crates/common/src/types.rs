use crate::error::{RateError, RateResult};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// One observed spot price for an asset.
///
/// Immutable after construction. The title is trimmed and uppercased and the
/// price must be a finite positive number.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRecord {
    title: String,
    price: f64,
    observed_at: DateTime<Utc>,
}

impl PriceRecord {
    /// Creates a record observed now.
    pub fn new(title: impl AsRef<str>, price: f64) -> RateResult<Self> {
        Self::observed(title, price, Utc::now())
    }

    /// Creates a record with an explicit capture time (used when rehydrating stored rows).
    pub fn observed(
        title: impl AsRef<str>,
        price: f64,
        observed_at: DateTime<Utc>,
    ) -> RateResult<Self> {
        let title = normalize_title(title.as_ref());
        if title.is_empty() {
            return Err(RateError::invalid("empty title"));
        }

        if !price.is_finite() || price <= 0.0 {
            return Err(RateError::invalid(format!(
                "price for {} must be positive, got {}",
                title, price
            )));
        }

        Ok(Self {
            title,
            price,
            observed_at,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

/// Which price variant the provider should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceSelector {
    Latest,
    Max,
    Min,
    Average,
}

impl fmt::Display for PriceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Latest => "latest price",
            Self::Max => "max",
            Self::Min => "min",
            Self::Average => "average",
        };
        f.write_str(name)
    }
}

/// Aggregate applied over today's stored observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunc {
    Max,
    Min,
    Avg,
}

impl AggregateFunc {
    /// Provider selector that yields an already aggregated value.
    pub fn selector(self) -> PriceSelector {
        match self {
            Self::Max => PriceSelector::Max,
            Self::Min => PriceSelector::Min,
            Self::Avg => PriceSelector::Average,
        }
    }

    /// SQL aggregate keyword. Closed set, safe to splice into a statement.
    pub fn sql_name(self) -> &'static str {
        match self {
            Self::Max => "MAX",
            Self::Min => "MIN",
            Self::Avg => "AVG",
        }
    }
}

impl fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

impl FromStr for AggregateFunc {
    type Err = RateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MAX" => Ok(Self::Max),
            "MIN" => Ok(Self::Min),
            "AVG" => Ok(Self::Avg),
            other => Err(RateError::invalid(format!(
                "unknown aggregate function '{}', expected one of MAX, MIN, AVG",
                other
            ))),
        }
    }
}

pub(crate) fn normalize_title(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}
