//! Postgres implementation of [`TableSource`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pg_escape::quote_identifier;
use serde_json::Value;
use snafu::prelude::*;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::debug;

use floe_core::record::{LAST_UPDATED, Record};

use super::TableSource;
use crate::config::SourceConfig;
use crate::error::{ExtractionError, ListTablesSnafu, QuerySnafu, RowShapeSnafu, SourceConnectSnafu};

/// Reads table rows as JSON objects, one per row, in column order.
pub struct PostgresSource {
    pool: PgPool,
    schema: String,
}

impl PostgresSource {
    pub async fn connect(config: &SourceConfig) -> Result<Self, ExtractionError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .context(SourceConnectSnafu)?;

        Ok(Self::from_pool(pool, &config.schema))
    }

    pub fn from_pool(pool: PgPool, schema: &str) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
        }
    }

    fn relation(&self, table: &str) -> String {
        format!("{}.{}", quote_identifier(&self.schema), quote_identifier(table))
    }
}

fn into_records(table: &str, rows: Vec<Value>) -> Result<Vec<Record>, ExtractionError> {
    rows.into_iter()
        .map(|row| match row {
            Value::Object(record) => Ok(record),
            _ => RowShapeSnafu { table }.fail(),
        })
        .collect()
}

#[async_trait]
impl TableSource for PostgresSource {
    async fn list_tables(&self) -> Result<Vec<String>, ExtractionError> {
        sqlx::query_scalar::<_, String>(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' \
             ORDER BY table_name",
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await
        .context(ListTablesSnafu)
    }

    async fn fetch(
        &self,
        table: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Record>, ExtractionError> {
        let relation = self.relation(table);
        // row_to_json keeps column order; jsonb would reorder keys.
        let rows: Vec<Value> = match since {
            None => {
                let sql = format!("SELECT row_to_json(t) FROM {relation} t");
                sqlx::query_scalar(&sql)
                    .fetch_all(&self.pool)
                    .await
                    .context(QuerySnafu { table })?
            }
            Some(cutoff) => {
                let sql = format!(
                    "SELECT row_to_json(t) FROM {relation} t WHERE t.{column} > $1 ORDER BY t.{column}",
                    column = quote_identifier(LAST_UPDATED),
                );
                sqlx::query_scalar(&sql)
                    .bind(cutoff.naive_utc())
                    .fetch_all(&self.pool)
                    .await
                    .context(QuerySnafu { table })?
            }
        };

        debug!(table, rows = rows.len(), "Source query returned");
        into_records(table, rows)
    }
}
