use crate::{in_request_order, start_of_day, PriceStore};
use async_trait::async_trait;
use chrono::Utc;
use coin_rates_common::{AggregateFunc, PriceRecord, RateError, RateResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory price store.
///
/// Keeps every record in insertion order, like an append-only table.
pub struct InMemoryPriceStore {
    data: RwLock<Vec<PriceRecord>>,
}

impl InMemoryPriceStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Vec::new()),
        }
    }

    pub fn with_records(records: Vec<PriceRecord>) -> Self {
        Self {
            data: RwLock::new(records),
        }
    }

    /// Total number of stored observations.
    ///
    /// Counts through a poisoned lock: appends never leave the log half written.
    pub fn len(&self) -> usize {
        match self.data.read() {
            Ok(data) => data.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn todays_records(&self, titles: &[String]) -> RateResult<HashMap<String, Vec<PriceRecord>>> {
        let data = self
            .data
            .read()
            .map_err(|_| RateError::internal("price store lock poisoned"))?;
        let since = start_of_day(Utc::now());

        let mut grouped: HashMap<String, Vec<PriceRecord>> = HashMap::new();
        for record in data.iter() {
            if record.observed_at() >= since && titles.iter().any(|t| t == record.title()) {
                grouped
                    .entry(record.title().to_string())
                    .or_default()
                    .push(record.clone());
            }
        }

        Ok(grouped)
    }
}

impl Default for InMemoryPriceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceStore for InMemoryPriceStore {
    async fn store(&self, records: &[PriceRecord]) -> RateResult<()> {
        let mut data = self
            .data
            .write()
            .map_err(|_| RateError::internal("price store lock poisoned"))?;
        data.extend_from_slice(records);
        Ok(())
    }

    async fn list_known_titles(&self) -> RateResult<Vec<String>> {
        let data = self
            .data
            .read()
            .map_err(|_| RateError::internal("price store lock poisoned"))?;

        let mut titles: Vec<String> = Vec::new();
        for record in data.iter() {
            if !titles.iter().any(|t| t == record.title()) {
                titles.push(record.title().to_string());
            }
        }

        Ok(titles)
    }

    async fn get_latest(&self, titles: &[String]) -> RateResult<Vec<PriceRecord>> {
        let grouped = self.todays_records(titles)?;

        let latest = grouped
            .into_iter()
            .filter_map(|(title, records)| {
                // Later insertions win ties on the timestamp.
                let mut newest: Option<PriceRecord> = None;
                for record in records {
                    match &newest {
                        Some(current) if current.observed_at() > record.observed_at() => {}
                        _ => newest = Some(record),
                    }
                }
                newest.map(|record| (title, record))
            })
            .collect();

        Ok(in_request_order(titles, latest))
    }

    async fn get_aggregate(
        &self,
        titles: &[String],
        func: AggregateFunc,
    ) -> RateResult<Vec<PriceRecord>> {
        let grouped = self.todays_records(titles)?;

        let mut aggregated = HashMap::with_capacity(grouped.len());
        for (title, records) in grouped {
            let Some(observed_at) = records.iter().map(|r| r.observed_at()).max() else {
                continue;
            };
            let prices = records.iter().map(|r| r.price());
            let value = match func {
                AggregateFunc::Max => prices.fold(f64::MIN, f64::max),
                AggregateFunc::Min => prices.fold(f64::MAX, f64::min),
                AggregateFunc::Avg => prices.sum::<f64>() / records.len() as f64,
            };

            aggregated.insert(title.clone(), PriceRecord::observed(&title, value, observed_at)?);
        }

        Ok(in_request_order(titles, aggregated))
    }
}
