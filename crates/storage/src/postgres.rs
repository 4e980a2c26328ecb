//! PostgreSQL price store backed by `sqlx`.

use crate::{in_request_order, start_of_day, PriceStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coin_rates_common::{AggregateFunc, PriceRecord, RateError, RateResult};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const CREATE_COINS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS coins (
        id BIGSERIAL PRIMARY KEY,
        title TEXT NOT NULL,
        price DOUBLE PRECISION NOT NULL CHECK (price > 0),
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
"#;

const CREATE_COINS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS coins_title_created_at_idx ON coins (title, created_at DESC)";

type PriceRow = (String, f64, DateTime<Utc>);

pub struct PostgresPriceStore {
    pool: PgPool,
}

impl PostgresPriceStore {
    /// Opens a pool and makes sure the `coins` table exists.
    ///
    /// `acquire_timeout` bounds the wait for a pooled connection and
    /// `statement_timeout` bounds each query on the server side.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
        statement_timeout: Duration,
    ) -> RateResult<Self> {
        let options = connect_options(url, statement_timeout)?;

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| RateError::wrap("failed to connect to DB", e))?;

        let store = Self::from_pool(pool);
        store.ensure_schema().await?;
        info!("Connected to PostgreSQL price store");

        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> RateResult<()> {
        sqlx::query(CREATE_COINS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| RateError::wrap("failed to create coins table", e))?;
        sqlx::query(CREATE_COINS_INDEX)
            .execute(&self.pool)
            .await
            .map_err(|e| RateError::wrap("failed to create coins index", e))?;
        Ok(())
    }

    fn rows_to_records(titles: &[String], rows: Vec<PriceRow>) -> RateResult<Vec<PriceRecord>> {
        let mut by_title = HashMap::with_capacity(rows.len());
        for (title, price, observed_at) in rows {
            let record = PriceRecord::observed(&title, price, observed_at)?;
            by_title.insert(record.title().to_string(), record);
        }
        Ok(in_request_order(titles, by_title))
    }
}

fn connect_options(url: &str, statement_timeout: Duration) -> RateResult<PgConnectOptions> {
    if url.trim().is_empty() {
        return Err(RateError::invalid("empty connection string"));
    }

    let options = PgConnectOptions::from_str(url)
        .map_err(|e| RateError::invalid(format!("invalid connection string: {}", e)))?;

    Ok(options.options([(
        "statement_timeout",
        statement_timeout_setting(statement_timeout),
    )]))
}

/// Postgres reads a bare `statement_timeout` as milliseconds; 0 would disable it.
fn statement_timeout_setting(timeout: Duration) -> String {
    timeout.as_millis().max(1).to_string()
}

#[async_trait]
impl PriceStore for PostgresPriceStore {
    async fn store(&self, records: &[PriceRecord]) -> RateResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RateError::wrap("failed to begin transaction", e))?;

        for record in records {
            let result =
                sqlx::query("INSERT INTO coins (title, price, created_at) VALUES ($1, $2, $3)")
                    .bind(record.title())
                    .bind(record.price())
                    .bind(record.observed_at())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| RateError::wrap("failed to execute query", e))?;

            if result.rows_affected() != 1 {
                return Err(RateError::internal(format!(
                    "expected to affect 1 row, affected {} row(s)",
                    result.rows_affected()
                )));
            }
        }

        tx.commit()
            .await
            .map_err(|e| RateError::wrap("failed to commit transaction", e))?;

        debug!("Stored {} price record(s)", records.len());
        Ok(())
    }

    async fn list_known_titles(&self) -> RateResult<Vec<String>> {
        sqlx::query_scalar::<_, String>("SELECT DISTINCT title FROM coins ORDER BY title")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RateError::wrap("failed to list coin titles", e))
    }

    async fn get_latest(&self, titles: &[String]) -> RateResult<Vec<PriceRecord>> {
        if titles.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, PriceRow>(
            r#"
            SELECT DISTINCT ON (title) title, price, created_at
            FROM coins
            WHERE title = ANY($1) AND created_at >= $2
            ORDER BY title, created_at DESC, id DESC
            "#,
        )
        .bind(titles)
        .bind(start_of_day(Utc::now()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RateError::wrap("failed to fetch latest prices", e))?;

        Self::rows_to_records(titles, rows)
    }

    async fn get_aggregate(
        &self,
        titles: &[String],
        func: AggregateFunc,
    ) -> RateResult<Vec<PriceRecord>> {
        if titles.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            r#"
            SELECT title, {}(price) AS price, MAX(created_at) AS created_at
            FROM coins
            WHERE title = ANY($1) AND created_at >= $2
            GROUP BY title
            "#,
            func.sql_name()
        );

        let rows = sqlx::query_as::<_, PriceRow>(&query)
            .bind(titles)
            .bind(start_of_day(Utc::now()))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RateError::wrap(format!("failed to fetch {} prices", func), e))?;

        Self::rows_to_records(titles, rows)
    }
}
