use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::application::ports::client_provider::{ClientProvider, ClientTx, DocEntry, TxMode};
use crate::domain::errors::{SyncError, SyncResult};
use crate::domain::ids::{Clock, DocId};
use crate::domain::ops::OpBatch;

/// SQLite-backed `ClientProvider`, the client-side persistence adapter named
/// in SPEC_FULL.md §4.2. Mirrors the reference server's
/// `SqlxDocPersistenceAdapter` (same bind-and-execute style over a pool) with
/// the doc/operation log shape from §6's "Persisted layout" instead of the
/// reference's yrs update/snapshot tables. `S` and `O` round-trip through the
/// `docs.serialized_doc` / `operations.batch` TEXT columns as JSON, since the
/// provider itself has no notion of their structure.
pub struct SqliteClientProvider<S, O> {
    pool: SqlitePool,
    _marker: PhantomData<fn() -> (S, O)>,
}

impl<S, O> SqliteClientProvider<S, O> {
    pub async fn connect(database_url: &str) -> SyncResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| SyncError::Storage(e.into()))?;
        let provider = Self {
            pool,
            _marker: PhantomData,
        };
        provider.migrate().await?;
        Ok(provider)
    }

    async fn migrate(&self) -> SyncResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS docs (
                doc_id TEXT PRIMARY KEY,
                serialized_doc TEXT NOT NULL,
                clock INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Storage(e.into()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS operations (
                doc_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                batch TEXT NOT NULL,
                PRIMARY KEY (doc_id, seq)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Storage(e.into()))?;

        Ok(())
    }
}

pub struct SqliteClientTx<'a, S, O> {
    tx: Transaction<'a, Sqlite>,
    _marker: PhantomData<fn() -> (S, O)>,
}

#[async_trait]
impl<'a, S, O> ClientTx<S, O> for SqliteClientTx<'a, S, O>
where
    S: Clone + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
    O: Clone + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    async fn get_serialized_doc(&mut self, doc_id: &DocId) -> SyncResult<Option<DocEntry<S>>> {
        let row = sqlx::query("SELECT serialized_doc, clock FROM docs WHERE doc_id = ?1")
            .bind(doc_id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| SyncError::Storage(e.into()))?;

        let Some(row) = row else { return Ok(None) };
        let json: String = row.try_get("serialized_doc").map_err(|e| SyncError::Storage(e.into()))?;
        let clock: i64 = row.try_get("clock").map_err(|e| SyncError::Storage(e.into()))?;
        let serialized_doc: S =
            serde_json::from_str(&json).map_err(|e| SyncError::Storage(e.into()))?;
        Ok(Some(DocEntry {
            serialized_doc,
            clock: Clock(clock as u64),
        }))
    }

    async fn save_serialized_doc(&mut self, doc_id: &DocId, entry: DocEntry<S>) -> SyncResult<()> {
        let json =
            serde_json::to_string(&entry.serialized_doc).map_err(|e| SyncError::Storage(e.into()))?;
        sqlx::query(
            "INSERT INTO docs (doc_id, serialized_doc, clock) VALUES (?1, ?2, ?3)
             ON CONFLICT (doc_id) DO UPDATE SET serialized_doc = excluded.serialized_doc, clock = excluded.clock",
        )
        .bind(doc_id.as_str())
        .bind(json)
        .bind(entry.clock.0 as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| SyncError::Storage(e.into()))?;
        Ok(())
    }

    async fn save_operations(&mut self, doc_id: &DocId, operations: OpBatch<O>) -> SyncResult<()> {
        let next_seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM operations WHERE doc_id = ?1",
        )
        .bind(doc_id.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| SyncError::Storage(e.into()))?;

        let json = serde_json::to_string(&operations.0).map_err(|e| SyncError::Storage(e.into()))?;
        sqlx::query("INSERT INTO operations (doc_id, seq, batch) VALUES (?1, ?2, ?3)")
            .bind(doc_id.as_str())
            .bind(next_seq)
            .bind(json)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| SyncError::Storage(e.into()))?;
        Ok(())
    }

    async fn get_operations(&mut self, doc_id: &DocId) -> SyncResult<Vec<OpBatch<O>>> {
        let rows = sqlx::query("SELECT batch FROM operations WHERE doc_id = ?1 ORDER BY seq ASC")
            .bind(doc_id.as_str())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| SyncError::Storage(e.into()))?;

        rows.into_iter()
            .map(|row| {
                let json: String = row.try_get("batch").map_err(|e| SyncError::Storage(e.into()))?;
                let ops: Vec<O> = serde_json::from_str(&json).map_err(|e| SyncError::Storage(e.into()))?;
                Ok(OpBatch::new(ops))
            })
            .collect()
    }

    async fn delete_operations(&mut self, doc_id: &DocId, count: usize) -> SyncResult<()> {
        sqlx::query(
            "DELETE FROM operations WHERE doc_id = ?1 AND seq IN (
                SELECT seq FROM operations WHERE doc_id = ?1 ORDER BY seq ASC LIMIT ?2
            )",
        )
        .bind(doc_id.as_str())
        .bind(count as i64)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| SyncError::Storage(e.into()))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> SyncResult<()> {
        self.tx.commit().await.map_err(|e| SyncError::Storage(e.into()))
    }
}

#[async_trait]
impl<S, O> ClientProvider for SqliteClientProvider<S, O>
where
    S: Clone + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
    O: Clone + serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    type Serialized = S;
    type Op = O;

    async fn begin(&self, _mode: TxMode) -> SyncResult<Box<dyn ClientTx<S, O> + '_>> {
        let tx = self.pool.begin().await.map_err(|e| SyncError::Storage(e.into()))?;
        Ok(Box::new(SqliteClientTx {
            tx,
            _marker: PhantomData,
        }))
    }
}
