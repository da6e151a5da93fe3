//! Postgres implementation of [`Warehouse`].

use async_trait::async_trait;
use pg_escape::quote_identifier;
use snafu::prelude::*;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};

use floe_core::Record;

use super::Warehouse;
use crate::config::WarehouseConfig;
use crate::error::{LoadError, WarehouseConnectSnafu, WarehouseSnafu};

/// Inserts rows through `jsonb_populate_record`, so column mapping follows
/// the target table definition rather than the file's column order.
pub struct PostgresWarehouse {
    pool: PgPool,
    schema: String,
}

impl PostgresWarehouse {
    pub async fn connect(config: &WarehouseConfig) -> Result<Self, LoadError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&config.database_url)
            .await
            .context(WarehouseConnectSnafu)?;

        Ok(Self::from_pool(pool, &config.schema))
    }

    pub fn from_pool(pool: PgPool, schema: &str) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
        }
    }

    fn insert_statement(&self, table: &str) -> String {
        let relation = format!("{}.{}", quote_identifier(&self.schema), quote_identifier(table));
        format!("INSERT INTO {relation} SELECT * FROM jsonb_populate_record(NULL::{relation}, $1)")
    }
}

async fn insert_rows(
    tx: &mut Transaction<'_, Postgres>,
    statement: &str,
    rows: &[Record],
) -> Result<u64, sqlx::Error> {
    let mut inserted = 0;
    for row in rows {
        let result = sqlx::query(statement)
            .bind(Json(row))
            .execute(&mut **tx)
            .await?;
        inserted += result.rows_affected();
    }
    Ok(inserted)
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn load(&self, table: &str, rows: &[Record]) -> Result<u64, LoadError> {
        let statement = self.insert_statement(table);
        let mut tx = self.pool.begin().await.context(WarehouseSnafu { table })?;

        match insert_rows(&mut tx, &statement, rows).await {
            Ok(inserted) => {
                tx.commit().await.context(WarehouseSnafu { table })?;
                debug!(table, inserted, "Committed load");
                Ok(inserted)
            }
            Err(source) => {
                if let Err(err) = tx.rollback().await {
                    warn!(table, error = %err, "Rollback failed");
                }
                Err(source).context(WarehouseSnafu { table })
            }
        }
    }
}
