use async_trait::async_trait;
use coin_rates_common::{PriceRecord, PriceSelector, RateResult};

/// Source of current price observations for a set of asset titles.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Fetch one observation per requested title using `selector`.
    ///
    /// Fails with a not-found error when any requested title is unknown to the
    /// upstream source, and with an internal error on network or decoding failures.
    async fn get_actual_rates(
        &self,
        titles: &[String],
        selector: PriceSelector,
    ) -> RateResult<Vec<PriceRecord>>;
}
