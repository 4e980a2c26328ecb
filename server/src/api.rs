//! HTTP front door for the rate service.

use crate::models::{CoinPrice, ErrorBody, HealthStatus};
use crate::services::RateService;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use coin_rates_common::{parse_titles, ErrorKind, PriceRecord, RateError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};

type Params = HashMap<String, String>;

pub fn router(service: Arc<RateService>) -> Router {
    Router::new()
        .route("/rates/last", get(get_last_rates))
        .route("/rates/agg", get(get_aggregate_rates))
        .route("/health", get(health))
        .with_state(service)
}

/// Maps engine errors onto status codes with a JSON body.
#[derive(Debug)]
pub struct ApiError(RateError);

impl From<RateError> for ApiError {
    fn from(err: RateError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::InvalidParameter => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal | ErrorKind::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed: {:?}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }

        (status, Json(ErrorBody::new(self.0.to_string()))).into_response()
    }
}

fn required<'a>(params: &'a Params, name: &str) -> Result<&'a str, ApiError> {
    params
        .get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| RateError::invalid(format!("missing query parameter '{}'", name)).into())
}

fn requested_titles(params: &Params) -> Result<Vec<String>, ApiError> {
    let titles = parse_titles(required(params, "titles")?);
    if titles.is_empty() {
        return Err(RateError::invalid("no titles requested").into());
    }
    Ok(titles)
}

fn to_body(rates: &[PriceRecord]) -> Json<Vec<CoinPrice>> {
    Json(rates.iter().map(CoinPrice::from).collect())
}

async fn get_last_rates(
    State(service): State<Arc<RateService>>,
    Query(params): Query<Params>,
) -> Result<Json<Vec<CoinPrice>>, ApiError> {
    let titles = requested_titles(&params)?;
    let rates = service.get_last_rates(&titles).await?;
    Ok(to_body(&rates))
}

async fn get_aggregate_rates(
    State(service): State<Arc<RateService>>,
    Query(params): Query<Params>,
) -> Result<Json<Vec<CoinPrice>>, ApiError> {
    let titles = requested_titles(&params)?;
    let agg_func = required(&params, "aggFunc")?;
    let rates = service.get_aggregate_rates(&titles, agg_func).await?;
    Ok(to_body(&rates))
}

async fn health() -> Json<HealthStatus> {
    Json(HealthStatus::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use coin_rates_common::{PriceSelector, RateResult};
    use coin_rates_provider::RateProvider;
    use coin_rates_storage::InMemoryPriceStore;
    use serde::de::DeserializeOwned;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    /// Knows BTC, ETH and DOGE; anything else does not exist.
    #[derive(Default)]
    struct FixedProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RateProvider for FixedProvider {
        async fn get_actual_rates(
            &self,
            titles: &[String],
            selector: PriceSelector,
        ) -> RateResult<Vec<PriceRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            titles
                .iter()
                .map(|title| {
                    let base = match title.as_str() {
                        "BTC" => 70000.0,
                        "ETH" => 3000.0,
                        "DOGE" => 0.1,
                        other => {
                            return Err(RateError::not_found(format!(
                                "coin [\"{}\"] does not exist",
                                other
                            )))
                        }
                    };
                    let price = match selector {
                        PriceSelector::Max => base * 1.1,
                        PriceSelector::Min => base * 0.9,
                        _ => base,
                    };
                    PriceRecord::new(title, price)
                })
                .collect()
        }
    }

    struct Harness {
        app: Router,
        store: Arc<InMemoryPriceStore>,
        provider: Arc<FixedProvider>,
    }

    fn harness(seed: Vec<PriceRecord>) -> Harness {
        let store = Arc::new(InMemoryPriceStore::with_records(seed));
        let provider = Arc::new(FixedProvider::default());
        let service = RateService::builder()
            .store(store.clone())
            .provider(provider.clone())
            .build()
            .unwrap();

        Harness {
            app: router(Arc::new(service)),
            store,
            provider,
        }
    }

    async fn get<T: DeserializeOwned>(app: Router, uri: &str) -> (StatusCode, T) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_last_rates_fetches_unknown_and_backfills() {
        // Given
        let h = harness(Vec::new());

        // When
        let (status, body): (_, Vec<CoinPrice>) = get(h.app, "/rates/last?titles=btc,eth").await;

        // Then
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            vec![
                CoinPrice {
                    title: "BTC".into(),
                    price: 70000.0
                },
                CoinPrice {
                    title: "ETH".into(),
                    price: 3000.0
                },
            ]
        );
        assert_eq!(h.store.len(), 2);
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_last_rates_known_titles_skip_provider() {
        // Given
        let h = harness(vec![PriceRecord::new("BTC", 65000.0).unwrap()]);

        // When
        let (status, body): (_, Vec<CoinPrice>) = get(h.app, "/rates/last?titles=BTC").await;

        // Then
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0].price, 65000.0);
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_titles_is_bad_request() {
        for uri in ["/rates/last", "/rates/last?titles=", "/rates/agg?aggFunc=MAX"] {
            let h = harness(Vec::new());

            let (status, body): (_, ErrorBody) = get(h.app, uri).await;

            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert!(body.error.contains("titles"), "{}: {}", uri, body.error);
        }
    }

    #[tokio::test]
    async fn test_invalid_agg_func_is_bad_request_without_provider_call() {
        for uri in ["/rates/agg?titles=BTC", "/rates/agg?titles=BTC&aggFunc=SUM"] {
            // Given
            let h = harness(Vec::new());

            // When
            let (status, body): (_, ErrorBody) = get(h.app, uri).await;

            // Then
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert!(!body.error.is_empty());
            assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_unknown_coin_is_not_found() {
        // Given
        let h = harness(Vec::new());

        // When
        let (status, body): (_, ErrorBody) = get(h.app, "/rates/last?titles=BTC,NOPE").await;

        // Then
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.error.contains("NOPE"));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_aggregate_over_stored_history() {
        // Given
        let h = harness(vec![
            PriceRecord::new("ETH", 2900.0).unwrap(),
            PriceRecord::new("ETH", 3100.0).unwrap(),
        ]);

        // When
        let (status, body): (_, Vec<CoinPrice>) =
            get(h.app, "/rates/agg?titles=eth&aggFunc=avg").await;

        // Then
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            vec![CoinPrice {
                title: "ETH".into(),
                price: 3000.0
            }]
        );
    }

    #[tokio::test]
    async fn test_aggregate_mixed_returns_union() {
        // Given
        let h = harness(vec![PriceRecord::new("BTC", 60000.0).unwrap()]);

        // When
        let (status, body): (_, Vec<CoinPrice>) =
            get(h.app, "/rates/agg?titles=BTC,DOGE&aggFunc=MAX").await;

        // Then
        let mut titles: Vec<_> = body.iter().map(|p| p.title.as_str()).collect();
        titles.sort();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(titles, vec!["BTC", "DOGE"]);
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness(Vec::new());

        let (status, body): (_, HealthStatus) = get(h.app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, HealthStatus::ok());
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = vec![
            (RateError::invalid("bad"), StatusCode::BAD_REQUEST),
            (RateError::not_found("gone"), StatusCode::NOT_FOUND),
            (RateError::internal("boom"), StatusCode::INTERNAL_SERVER_ERROR),
            (RateError::Cancelled, StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }
}
