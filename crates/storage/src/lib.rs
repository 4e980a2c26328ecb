pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use coin_rates_common::{AggregateFunc, PriceRecord, RateResult};
use std::collections::HashMap;

pub use memory::InMemoryPriceStore;
pub use postgres::PostgresPriceStore;

/// Durable append-only log of price observations keyed by title.
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Appends a batch of records. All or nothing.
    async fn store(&self, records: &[PriceRecord]) -> RateResult<()>;

    /// Distinct titles that have ever been recorded.
    async fn list_known_titles(&self) -> RateResult<Vec<String>>;

    /// Latest of today's observations per title. Titles without one are omitted.
    async fn get_latest(&self, titles: &[String]) -> RateResult<Vec<PriceRecord>>;

    /// `func` over today's observations per title. Titles without one are omitted.
    async fn get_aggregate(
        &self,
        titles: &[String],
        func: AggregateFunc,
    ) -> RateResult<Vec<PriceRecord>>;
}

/// Midnight UTC of the day containing `now`.
pub(crate) fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::default()))
}

/// Orders per-title results like the request, dropping repeats and misses.
pub(crate) fn in_request_order(
    titles: &[String],
    mut by_title: HashMap<String, PriceRecord>,
) -> Vec<PriceRecord> {
    titles
        .iter()
        .filter_map(|title| by_title.remove(title))
        .collect()
}
