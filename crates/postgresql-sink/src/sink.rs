//! [`TableSink`] implementation for PostgreSQL.

use crate::error::{classify, timed_out};
use crate::pool::{PgPool, PooledClient};
use crate::sql::{
    copy_statement, count_statement, insert_statement, max_rows_per_statement,
    truncate_statement, PostgresDdl,
};
use crate::value::{column_types, row_params, to_boxed};
use futures::pin_mut;
use ingest_core::{TableSpec, TypedRow, TypedValue};
use postgres_types::ToSql;
use std::future::Future;
use std::time::Duration;
use table_sink::{OnConflict, SinkError, TableSink};
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tracing::debug;

/// Default time limit for a single write round trip.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(600);

pub struct PostgresSink {
    pool: PgPool,
    write_timeout: Duration,
}

impl PostgresSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Run a write against a checked-out client under the write timeout.
    async fn timed<T, F>(&self, epoch: u64, fut: F) -> Result<T, SinkError>
    where
        F: Future<Output = Result<T, tokio_postgres::Error>>,
    {
        match tokio::time::timeout(self.write_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify(&e, epoch)),
            Err(_) => Err(timed_out(self.write_timeout, epoch)),
        }
    }

    async fn copy_with(
        client: &PooledClient,
        spec: &TableSpec,
        rows: &[TypedRow],
    ) -> Result<u64, tokio_postgres::Error> {
        let sink = client.client.copy_in(copy_statement(spec).as_str()).await?;
        let writer = BinaryCopyInWriter::new(sink, &column_types(spec));
        pin_mut!(writer);

        let mut values: Vec<Box<dyn ToSql + Sync + Send>> = Vec::with_capacity(spec.columns.len());
        for row in rows {
            values.clear();
            for (index, column) in spec.columns.iter().enumerate() {
                let value = row.get(index).unwrap_or(&TypedValue::Null);
                values.push(to_boxed(value, &column.column_type));
            }
            let refs: Vec<&(dyn ToSql + Sync)> = values
                .iter()
                .map(|v| v.as_ref() as &(dyn ToSql + Sync))
                .collect();
            writer.as_mut().write(&refs).await?;
        }

        writer.finish().await
    }
}

#[async_trait::async_trait]
impl TableSink for PostgresSink {
    async fn insert_rows(
        &self,
        spec: &TableSpec,
        rows: &[TypedRow],
        on_conflict: OnConflict,
    ) -> Result<u64, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }
        if rows.len() > max_rows_per_statement(spec) {
            return Err(SinkError::Rejected {
                message: format!(
                    "{} rows exceed the bind parameter limit for table {}",
                    rows.len(),
                    spec.name
                ),
            });
        }

        let sql = insert_statement(spec, rows.len(), on_conflict);
        let params = row_params(spec, rows);
        let param_refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let client = self.pool.checkout().await;
        self.timed(client.epoch, client.client.execute(sql.as_str(), &param_refs))
            .await
    }

    async fn copy_rows(&self, spec: &TableSpec, rows: &[TypedRow]) -> Result<u64, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let client = self.pool.checkout().await;
        debug!("{}: copying {} rows", spec.name, rows.len());
        self.timed(client.epoch, Self::copy_with(&client, spec, rows))
            .await
    }

    async fn reconnect(&self, stale_epoch: u64) -> Result<(), SinkError> {
        self.pool.reconnect(stale_epoch).await
    }

    async fn truncate(&self, spec: &TableSpec) -> Result<(), SinkError> {
        let client = self.pool.checkout().await;
        self.timed(
            client.epoch,
            client.client.batch_execute(&truncate_statement(&spec.name)),
        )
        .await
    }

    async fn row_count(&self, table: &str) -> Result<u64, SinkError> {
        let client = self.pool.checkout().await;
        let row = self
            .timed(
                client.epoch,
                client.client.query_one(count_statement(table).as_str(), &[]),
            )
            .await?;
        let count: i64 = row.try_get(0).map_err(|e| classify(&e, client.epoch))?;
        Ok(count.max(0) as u64)
    }

    async fn create_table(&self, spec: &TableSpec) -> Result<(), SinkError> {
        let sql = PostgresDdl.create_table(spec);
        debug!("DDL: {}", sql);
        let client = self.pool.checkout().await;
        self.timed(client.epoch, client.client.batch_execute(&sql))
            .await
    }

    fn max_insert_rows(&self, spec: &TableSpec) -> Option<usize> {
        Some(max_rows_per_statement(spec))
    }
}
