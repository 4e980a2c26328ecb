use coin_rates_common::{AggregateFunc, PriceRecord};
use coin_rates_storage::{InMemoryPriceStore, PriceStore};
use std::sync::Arc;
use tokio_test::assert_ok;

fn titles(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_store_is_shared_behind_trait_object() {
    // Given
    let store: Arc<dyn PriceStore> = Arc::new(InMemoryPriceStore::new());
    let writer = store.clone();

    // When
    assert_ok!(
        writer
            .store(&[
                PriceRecord::new("btc", 70000.0).unwrap(),
                PriceRecord::new("eth", 3000.0).unwrap(),
            ])
            .await
    );

    // Then - titles are stored normalized
    let known = assert_ok!(store.list_known_titles().await);
    assert_eq!(known, titles(&["BTC", "ETH"]));
}

#[tokio::test]
async fn test_concurrent_writers_append() {
    // Given - two refreshes writing the same title
    let store = Arc::new(InMemoryPriceStore::new());

    // When
    let a = {
        let store = store.clone();
        tokio::spawn(async move { store.store(&[PriceRecord::new("BTC", 1.0).unwrap()]).await })
    };
    let b = {
        let store = store.clone();
        tokio::spawn(async move { store.store(&[PriceRecord::new("BTC", 3.0).unwrap()]).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    // Then - both observations are kept, nothing is overwritten
    assert_eq!(store.len(), 2);
    let avg = store
        .get_aggregate(&titles(&["BTC"]), AggregateFunc::Avg)
        .await
        .unwrap();
    assert_eq!(avg[0].price(), 2.0);
}
