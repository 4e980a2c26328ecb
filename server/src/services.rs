use coin_rates_common::{
    split_titles, AggregateFunc, PriceRecord, PriceSelector, RateError, RateResult,
};
use coin_rates_provider::RateProvider;
use coin_rates_storage::PriceStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Decides per request which titles are served from the store and which are
/// fetched from the provider and backfilled.
///
/// Stateless between calls. Concurrent requests for the same missing title are
/// not coordinated: each may call the provider and append its own record.
pub struct RateService {
    store: Arc<dyn PriceStore>,
    provider: Arc<dyn RateProvider>,
}

#[derive(Default)]
pub struct RateServiceBuilder {
    store: Option<Arc<dyn PriceStore>>,
    provider: Option<Arc<dyn RateProvider>>,
}

impl RateServiceBuilder {
    pub fn store(mut self, store: Arc<dyn PriceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn RateProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn build(self) -> RateResult<RateService> {
        let store = self
            .store
            .ok_or_else(|| RateError::invalid("price store not set"))?;
        let provider = self
            .provider
            .ok_or_else(|| RateError::invalid("rate provider not set"))?;

        Ok(RateService { store, provider })
    }
}

impl RateService {
    pub fn builder() -> RateServiceBuilder {
        RateServiceBuilder::default()
    }

    /// Latest price per requested title.
    pub async fn get_last_rates(&self, titles: &[String]) -> RateResult<Vec<PriceRecord>> {
        let existing = self.store.list_known_titles().await?;
        let split = split_titles(titles, &existing);
        debug!(
            "Last rates: {} known {:?}, {} unknown {:?}",
            split.known.len(),
            split.known,
            split.unknown.len(),
            split.unknown
        );

        if split.unknown.is_empty() {
            return self.store.get_latest(&split.known).await;
        }

        if split.known.is_empty() {
            return self
                .fetch_and_store(&split.unknown, PriceSelector::Latest)
                .await;
        }

        let mut rates = self
            .fetch_and_store(&split.unknown, PriceSelector::Latest)
            .await?;
        // The unknown subset is already persisted if this read fails.
        let known = self.store.get_latest(&split.known).await?;
        rates.extend(known);

        Ok(rates)
    }

    /// Aggregated price per requested title. `agg_func` is MAX, MIN or AVG in any case.
    pub async fn get_aggregate_rates(
        &self,
        titles: &[String],
        agg_func: &str,
    ) -> RateResult<Vec<PriceRecord>> {
        let func: AggregateFunc = agg_func.parse()?;

        let existing = self.store.list_known_titles().await?;
        let split = split_titles(titles, &existing);
        debug!(
            "{} rates: {} known {:?}, {} unknown {:?}",
            func,
            split.known.len(),
            split.known,
            split.unknown.len(),
            split.unknown
        );

        if split.unknown.is_empty() {
            return self.store.get_aggregate(&split.known, func).await;
        }

        // Fresh values come back from the provider already aggregated.
        if split.known.is_empty() {
            return self.fetch_and_store(&split.unknown, func.selector()).await;
        }

        let mut rates = self.fetch_and_store(&split.unknown, func.selector()).await?;
        let known = self.store.get_aggregate(&split.known, func).await?;
        rates.extend(known);

        Ok(rates)
    }

    /// Re-fetches the latest price of every known title and appends it to the store.
    ///
    /// Returns `Cancelled` if `cancel` fires before the refresh completes.
    pub async fn actualize_rates(&self, cancel: &CancellationToken) -> RateResult<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RateError::Cancelled),
            result = self.refresh_known_titles() => result,
        }
    }

    async fn refresh_known_titles(&self) -> RateResult<()> {
        let titles = self.store.list_known_titles().await?;
        if titles.is_empty() {
            debug!("No known titles, nothing to actualize");
            return Ok(());
        }

        let rates = self.fetch_and_store(&titles, PriceSelector::Latest).await?;
        info!("Actualized {} rate(s)", rates.len());

        Ok(())
    }

    async fn fetch_and_store(
        &self,
        titles: &[String],
        selector: PriceSelector,
    ) -> RateResult<Vec<PriceRecord>> {
        let rates = self.provider.get_actual_rates(titles, selector).await?;
        self.store.store(&rates).await?;
        Ok(rates)
    }
}
