use crate::services::RateService;
use coin_rates_common::RateError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Periodically re-fetches every known title so the store keeps growing a
/// price history.
pub struct RateUpdater {
    service: Arc<RateService>,
    interval: Duration,
}

impl RateUpdater {
    pub fn new(service: Arc<RateService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Runs the refresh loop on its own task until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Refresh loop. The first refresh happens immediately, then once per interval.
    ///
    /// A failed refresh is logged and the loop keeps going.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Rate updater started, interval {:?}", self.interval);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            debug!("Actualizing rates");
            match self.service.actualize_rates(&cancel).await {
                Ok(()) => {}
                Err(RateError::Cancelled) => break,
                Err(e) => warn!("Failed to actualize rates: {}", e),
            }
        }

        info!("Rate updater stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use coin_rates_common::{PriceRecord, PriceSelector, RateResult};
    use coin_rates_provider::RateProvider;
    use coin_rates_storage::{InMemoryPriceStore, PriceStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every title with a fixed price and counts calls.
    struct CountingProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RateProvider for CountingProvider {
        async fn get_actual_rates(
            &self,
            titles: &[String],
            _selector: PriceSelector,
        ) -> RateResult<Vec<PriceRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RateError::internal("unexpected status code: 503"));
            }
            titles.iter().map(|t| PriceRecord::new(t, 42.0)).collect()
        }
    }

    /// Never answers.
    struct StalledProvider;

    #[async_trait]
    impl RateProvider for StalledProvider {
        async fn get_actual_rates(
            &self,
            _titles: &[String],
            _selector: PriceSelector,
        ) -> RateResult<Vec<PriceRecord>> {
            std::future::pending().await
        }
    }

    fn seeded_store() -> Arc<InMemoryPriceStore> {
        Arc::new(InMemoryPriceStore::with_records(vec![
            PriceRecord::new("BTC", 70000.0).unwrap(),
            PriceRecord::new("ETH", 3000.0).unwrap(),
        ]))
    }

    fn service(store: Arc<InMemoryPriceStore>, provider: Arc<dyn RateProvider>) -> Arc<RateService> {
        Arc::new(
            RateService::builder()
                .store(store)
                .provider(provider)
                .build()
                .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_on_every_tick() {
        // Given
        let store = seeded_store();
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let updater = RateUpdater::new(
            service(store.clone(), provider.clone()),
            Duration::from_secs(60),
        );
        let cancel = CancellationToken::new();

        // When
        let handle = updater.spawn(cancel.clone());
        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();
        handle.await.unwrap();

        // Then - ticks at 0s, 60s and 120s, two titles appended each time
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.len(), 2 + 3 * 2);
        let latest = store
            .get_latest(&["BTC".to_string()])
            .await
            .unwrap();
        assert_eq!(latest[0].price(), 42.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_does_not_stop_the_loop() {
        // Given
        let store = seeded_store();
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let updater = RateUpdater::new(
            service(store.clone(), provider.clone()),
            Duration::from_secs(10),
        );
        let cancel = CancellationToken::new();

        // When
        let handle = updater.spawn(cancel.clone());
        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        handle.await.unwrap();

        // Then
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_refresh() {
        // Given
        let store = seeded_store();
        let updater = RateUpdater::new(
            service(store.clone(), Arc::new(StalledProvider)),
            Duration::from_secs(60),
        );
        let cancel = CancellationToken::new();
        let handle = updater.spawn(cancel.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;

        // When
        cancel.cancel();
        let joined = tokio::time::timeout(Duration::from_secs(5), handle).await;

        // Then
        tokio_test::assert_ok!(joined);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_exits_without_refresh() {
        let store = seeded_store();
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let updater = RateUpdater::new(service(store, provider.clone()), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();

        updater.run(cancel).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
