//! Durable category store backed by LanceDB
//!
//! All records live in one table. Consolidation commits are staged: the
//! summary row is appended with `committed = false`, the inputs are marked
//! consumed and the superseded records deactivated, then the summary row is
//! flipped to `committed = true`. Readers only ever see committed rows. A
//! commit interrupted between staging and the flip is rolled forward on the
//! spot when possible, otherwise by [`CategoryStore::recover`], which runs on
//! open, before every commit and at the start of every consolidation cycle.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arrow_array::{
    Array, BooleanArray, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator,
    StringArray, TimestampMicrosecondArray, UInt64Array,
};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::TryStreamExt;
use lancedb::DistanceType;
use lancedb::Table;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedding::{EMBEDDING_DIMENSION, Embedder};
use crate::error::{MemoryError, Result};
use crate::memory::types::{Category, MemoryRecord, Tier};
use crate::storage::{
    CategoryStore, CommitOutcome, ConsolidationCommit, RecordFilter, ScoredRecord,
    SimilaritySearch, commit_conflict,
};

const RECORDS_TABLE: &str = "records";
const COMMITTED: &str = "committed = true";

/// A decoded table row
struct StoredRow {
    record: MemoryRecord,
    supersedes: Vec<Uuid>,
    /// Insertion order, breaks ties between identical timestamps
    seq: u64,
}

/// A row about to be appended
struct NewRow<'a> {
    record: &'a MemoryRecord,
    supersedes: &'a [Uuid],
    committed: bool,
    embedding: Vec<f32>,
}

pub struct LanceStore {
    connection: Connection,
    table: Table,
    embedder: Arc<dyn Embedder>,
    /// Serializes every check-then-write sequence against the table
    write_lock: Mutex<()>,
    next_seq: AtomicU64,
    #[cfg(test)]
    fail_deactivate_once: std::sync::atomic::AtomicBool,
}

impl LanceStore {
    /// Open the store at `path`, creating the table on first use and rolling
    /// forward any consolidation left staged by an earlier crash
    pub async fn open(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if embedder.dimension() != EMBEDDING_DIMENSION {
            return Err(MemoryError::Config(format!(
                "LanceStore needs {EMBEDDING_DIMENSION}-dim embeddings, embedder produces {}",
                embedder.dimension()
            )));
        }

        let uri = path
            .to_str()
            .ok_or_else(|| MemoryError::StoreUnavailable("Invalid path encoding".to_string()))?;

        let connection = lancedb::connect(uri).execute().await.map_err(|e| {
            MemoryError::StoreUnavailable(format!("Failed to connect to LanceDB: {e}"))
        })?;

        let names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| MemoryError::StoreUnavailable(format!("Failed to list tables: {e}")))?;

        let table = if names.iter().any(|n| n == RECORDS_TABLE) {
            connection
                .open_table(RECORDS_TABLE)
                .execute()
                .await
                .map_err(|e| {
                    MemoryError::StoreUnavailable(format!("Failed to open records table: {e}"))
                })?
        } else {
            let schema = Self::records_schema();
            let batch = Self::rows_to_batch(&[], 0, schema.clone())?;
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            connection
                .create_table(RECORDS_TABLE, Box::new(batches))
                .execute()
                .await
                .map_err(|e| {
                    MemoryError::StoreUnavailable(format!("Failed to create records table: {e}"))
                })?
        };

        let next_seq = Self::max_seq(&table).await?.map_or(0, |seq| seq + 1);
        let store = Self {
            connection,
            table,
            embedder,
            write_lock: Mutex::new(()),
            next_seq: AtomicU64::new(next_seq),
            #[cfg(test)]
            fail_deactivate_once: std::sync::atomic::AtomicBool::new(false),
        };

        let recovered = store.recover().await?;
        if recovered > 0 {
            info!("Recovered {} staged consolidation(s)", recovered);
        }
        Ok(store)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Highest insertion sequence number in the table
    async fn max_seq(table: &Table) -> Result<Option<u64>> {
        let batches: Vec<RecordBatch> = table
            .query()
            .select(Select::Columns(vec!["seq".to_string()]))
            .execute()
            .await
            .map_err(|e| MemoryError::StoreUnavailable(format!("Failed to scan sequence: {e}")))?
            .try_collect()
            .await
            .map_err(|e| MemoryError::StoreUnavailable(format!("Failed to scan sequence: {e}")))?;

        let mut max = None;
        for batch in &batches {
            let seqs = batch
                .column_by_name("seq")
                .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
                .ok_or_else(|| missing_column("seq"))?;
            for seq in seqs.iter().flatten() {
                max = max.max(Some(seq));
            }
        }
        Ok(max)
    }

    fn records_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("category", DataType::Utf8, false),
            Field::new("tier", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("consolidated_from", DataType::Utf8, false),
            Field::new("supersedes", DataType::Utf8, false),
            Field::new("consumed_by", DataType::Utf8, true),
            Field::new(
                "created_at",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("active", DataType::Boolean, false),
            Field::new("committed", DataType::Boolean, false),
            Field::new("session_id", DataType::Utf8, true),
            Field::new("source_seq", DataType::UInt64, true),
            Field::new("seq", DataType::UInt64, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    EMBEDDING_DIMENSION as i32,
                ),
                false,
            ),
        ]))
    }

    /// Convert new rows to a RecordBatch, numbering them from `first_seq`
    fn rows_to_batch(rows: &[NewRow<'_>], first_seq: u64, schema: Arc<Schema>) -> Result<RecordBatch> {
        let ids: Vec<String> = rows.iter().map(|r| r.record.id.to_string()).collect();
        let categories: Vec<String> = rows.iter().map(|r| r.record.category.key()).collect();
        let tiers: Vec<&str> = rows.iter().map(|r| r.record.tier.as_str()).collect();
        let texts: Vec<&str> = rows.iter().map(|r| r.record.text.as_str()).collect();
        let consolidated_from: Vec<String> = rows
            .iter()
            .map(|r| join_ids(&r.record.consolidated_from))
            .collect();
        let supersedes: Vec<String> = rows.iter().map(|r| join_ids(r.supersedes)).collect();
        let consumed_by: Vec<Option<String>> = rows
            .iter()
            .map(|r| r.record.consumed_by.map(|id| id.to_string()))
            .collect();
        let created_at: Vec<i64> = rows
            .iter()
            .map(|r| r.record.created_at.timestamp_micros())
            .collect();
        let active: Vec<bool> = rows.iter().map(|r| r.record.active).collect();
        let committed: Vec<bool> = rows.iter().map(|r| r.committed).collect();
        let session_ids: Vec<Option<&str>> =
            rows.iter().map(|r| r.record.session_id.as_deref()).collect();
        let source_seqs: Vec<Option<u64>> = rows.iter().map(|r| r.record.source_seq).collect();
        let seqs: Vec<u64> = (first_seq..).take(rows.len()).collect();
        let embeddings: Vec<Option<Vec<Option<f32>>>> = rows
            .iter()
            .map(|r| Some(r.embedding.iter().map(|&v| Some(v)).collect()))
            .collect();

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(categories)),
                Arc::new(StringArray::from(tiers)),
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(consolidated_from)),
                Arc::new(StringArray::from(supersedes)),
                Arc::new(StringArray::from(consumed_by)),
                Arc::new(TimestampMicrosecondArray::from(created_at).with_timezone("UTC")),
                Arc::new(BooleanArray::from(active)),
                Arc::new(BooleanArray::from(committed)),
                Arc::new(StringArray::from(session_ids)),
                Arc::new(UInt64Array::from(source_seqs)),
                Arc::new(UInt64Array::from(seqs)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<
                    arrow_array::types::Float32Type,
                    _,
                    _,
                >(embeddings, EMBEDDING_DIMENSION as i32)),
            ],
        )
        .map_err(|e| MemoryError::StoreUnavailable(format!("Failed to create RecordBatch: {e}")))
    }

    /// Convert an Arrow RecordBatch row back to a record plus its bookkeeping
    fn batch_to_row(batch: &RecordBatch, row: usize) -> Result<StoredRow> {
        let id_array = string_column(batch, "id")?;
        let category_array = string_column(batch, "category")?;
        let tier_array = string_column(batch, "tier")?;
        let text_array = string_column(batch, "text")?;
        let consolidated_array = string_column(batch, "consolidated_from")?;
        let supersedes_array = string_column(batch, "supersedes")?;
        let consumed_array = string_column(batch, "consumed_by")?;
        let session_array = string_column(batch, "session_id")?;
        let active_array = batch
            .column_by_name("active")
            .and_then(|c| c.as_any().downcast_ref::<BooleanArray>())
            .ok_or_else(|| missing_column("active"))?;
        let source_seq_array = u64_column(batch, "source_seq")?;
        let seq_array = u64_column(batch, "seq")?;
        let created_at_array = batch
            .column_by_name("created_at")
            .and_then(|c| c.as_any().downcast_ref::<TimestampMicrosecondArray>())
            .ok_or_else(|| missing_column("created_at"))?;

        let id = parse_id(id_array.value(row))?;
        let category = Category::from_key(category_array.value(row)).ok_or_else(|| {
            MemoryError::Serialization(format!(
                "Unknown category: {}",
                category_array.value(row)
            ))
        })?;
        let tier: Tier = tier_array.value(row).parse()?;
        let created_at = Utc
            .timestamp_micros(created_at_array.value(row))
            .single()
            .ok_or_else(|| {
                MemoryError::Serialization("Failed to parse created_at timestamp".to_string())
            })?;

        let consumed_by = if consumed_array.is_null(row) {
            None
        } else {
            Some(parse_id(consumed_array.value(row))?)
        };
        let session_id = if session_array.is_null(row) {
            None
        } else {
            Some(session_array.value(row).to_string())
        };

        let source_seq = if source_seq_array.is_null(row) {
            None
        } else {
            Some(source_seq_array.value(row))
        };

        Ok(StoredRow {
            record: MemoryRecord {
                id,
                category,
                tier,
                text: text_array.value(row).to_string(),
                consolidated_from: split_ids(consolidated_array.value(row))?,
                created_at,
                active: active_array.value(row),
                consumed_by,
                session_id,
                source_seq,
            },
            supersedes: split_ids(supersedes_array.value(row))?,
            seq: seq_array.value(row),
        })
    }

    async fn fetch(&self, predicate: String) -> Result<Vec<(StoredRow, Option<f32>)>> {
        let stream = self
            .table
            .query()
            .only_if(predicate)
            .execute()
            .await
            .map_err(|e| MemoryError::StoreUnavailable(format!("Failed to query records: {e}")))?;

        collect_rows(stream).await
    }

    async fn append(&self, rows: &[NewRow<'_>]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let first_seq = self.next_seq.fetch_add(rows.len() as u64, Ordering::SeqCst);
        let schema = Self::records_schema();
        let batch = Self::rows_to_batch(rows, first_seq, schema.clone())?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        self.table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| MemoryError::StoreUnavailable(format!("Failed to insert records: {e}")))?;
        Ok(())
    }

    async fn active_longs(&self, category: &Category) -> Result<Vec<Uuid>> {
        let filter = RecordFilter::for_category(category.clone())
            .with_tier(Tier::Long)
            .active_only();
        Ok(self.list(&filter).await?.into_iter().map(|r| r.id).collect())
    }

    /// Any row with this id, committed or staged
    async fn row_exists(&self, id: Uuid) -> Result<bool> {
        let count = self
            .table
            .count_rows(Some(format!("id = '{id}'")))
            .await
            .map_err(|e| MemoryError::StoreUnavailable(format!("Failed to count rows: {e}")))?;
        Ok(count > 0)
    }

    async fn row_exists_committed(&self, id: Uuid) -> Result<bool> {
        let count = self
            .table
            .count_rows(Some(format!("id = '{id}' AND {COMMITTED}")))
            .await
            .map_err(|e| MemoryError::StoreUnavailable(format!("Failed to count rows: {e}")))?;
        Ok(count > 0)
    }

    /// Append the summary row with `committed = false`
    async fn stage(&self, commit: &ConsolidationCommit) -> Result<()> {
        let embedding = self.embedder.embed(&commit.summary.text)?;
        self.append(&[NewRow {
            record: &commit.summary,
            supersedes: &commit.deactivate,
            committed: false,
            embedding,
        }])
        .await
    }

    /// Mark the staged summary's inputs, deactivate superseded records, and
    /// flip the summary to committed. Each step is safe to repeat.
    async fn apply_staged(&self, summary_id: Uuid, inputs: &[Uuid], supersedes: &[Uuid]) -> Result<()> {
        if !inputs.is_empty() {
            self.table
                .update()
                .only_if(format!(
                    "id IN ({}) AND consumed_by IS NULL",
                    quote_ids(inputs)
                ))
                .column("consumed_by", format!("'{summary_id}'"))
                .execute()
                .await
                .map_err(|e| {
                    MemoryError::StoreUnavailable(format!("Failed to mark inputs consumed: {e}"))
                })?;
        }

        #[cfg(test)]
        {
            if self.fail_deactivate_once.swap(false, Ordering::SeqCst) {
                return Err(MemoryError::StoreUnavailable(
                    "Failed to deactivate records: injected".to_string(),
                ));
            }
        }

        if !supersedes.is_empty() {
            self.table
                .update()
                .only_if(format!("id IN ({})", quote_ids(supersedes)))
                .column("active", "false")
                .execute()
                .await
                .map_err(|e| {
                    MemoryError::StoreUnavailable(format!("Failed to deactivate records: {e}"))
                })?;
        }

        self.table
            .update()
            .only_if(format!("id = '{summary_id}'"))
            .column("committed", "true")
            .execute()
            .await
            .map_err(|e| MemoryError::StoreUnavailable(format!("Failed to commit summary: {e}")))?;
        Ok(())
    }

    /// Roll staged consolidations forward, or discard them when an input was
    /// meanwhile consumed by a different summary. Returns how many were
    /// rolled forward. Callers hold `write_lock`.
    async fn settle_staged(&self) -> Result<usize> {
        let staged = self.fetch("committed = false".to_string()).await?;
        let mut recovered = 0;

        for (row, _) in staged {
            let summary = row.record;
            let mut foreign = false;
            for input in &summary.consolidated_from {
                let owner = self
                    .fetch(format!("id = '{input}'"))
                    .await?
                    .into_iter()
                    .next()
                    .and_then(|(r, _)| r.record.consumed_by);
                if owner.is_some_and(|by| by != summary.id) {
                    foreign = true;
                }
            }

            if foreign {
                warn!(id = %summary.id, "Discarding staged summary whose inputs were consumed elsewhere");
                self.table
                    .update()
                    .only_if(format!(
                        "id IN ({}) AND consumed_by = '{}'",
                        quote_ids(&summary.consolidated_from),
                        summary.id
                    ))
                    .column("consumed_by", "NULL")
                    .execute()
                    .await
                    .map_err(|e| {
                        MemoryError::StoreUnavailable(format!("Failed to release staged inputs: {e}"))
                    })?;
                self.table
                    .delete(&format!("id = '{}'", summary.id))
                    .await
                    .map_err(|e| {
                        MemoryError::StoreUnavailable(format!("Failed to discard staged row: {e}"))
                    })?;
                continue;
            }

            debug!(id = %summary.id, category = %summary.category, "Rolling staged summary forward");
            self.apply_staged(summary.id, &summary.consolidated_from, &row.supersedes)
                .await?;
            recovered += 1;
        }

        Ok(recovered)
    }
}

#[async_trait]
impl CategoryStore for LanceStore {
    async fn write(&self, record: MemoryRecord) -> Result<()> {
        self.write_all(vec![record]).await
    }

    async fn write_all(&self, records: Vec<MemoryRecord>) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut seen = BTreeSet::new();
        let mut fresh = Vec::new();
        for record in records {
            if !seen.insert(record.id) || self.row_exists(record.id).await? {
                debug!(id = %record.id, "Record already stored, skipping write");
                continue;
            }
            if record.tier == Tier::Long && record.active {
                let taken = fresh
                    .iter()
                    .any(|r: &MemoryRecord| r.tier == Tier::Long && r.active && r.category == record.category);
                if taken || !self.active_longs(&record.category).await?.is_empty() {
                    return Err(MemoryError::Conflict(format!(
                        "{} already has an active long summary",
                        record.category
                    )));
                }
            }
            fresh.push(record);
        }

        let texts: Vec<String> = fresh.iter().map(|r| r.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;
        let rows: Vec<NewRow<'_>> = fresh
            .iter()
            .zip(embeddings)
            .map(|(record, embedding)| NewRow {
                record,
                supersedes: &[],
                committed: true,
                embedding,
            })
            .collect();

        // One append is one table version, so the batch lands whole or not at all
        self.append(&rows).await
    }

    async fn mark_consumed(&self, ids: &[Uuid], consumed_by: Uuid) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        for id in ids {
            let record = self.get(*id).await?.ok_or(MemoryError::NotFound(*id))?;
            if let Some(by) = record.consumed_by {
                return Err(MemoryError::Conflict(format!(
                    "record {id} already consumed by {by}"
                )));
            }
        }
        if ids.is_empty() {
            return Ok(());
        }

        self.table
            .update()
            .only_if(format!("id IN ({}) AND consumed_by IS NULL", quote_ids(ids)))
            .column("consumed_by", format!("'{consumed_by}'"))
            .execute()
            .await
            .map_err(|e| MemoryError::StoreUnavailable(format!("Failed to mark consumed: {e}")))?;
        Ok(())
    }

    async fn set_inactive(&self, id: Uuid) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.get(id).await?.is_none() {
            return Err(MemoryError::NotFound(id));
        }

        self.table
            .update()
            .only_if(format!("id = '{id}'"))
            .column("active", "false")
            .execute()
            .await
            .map_err(|e| MemoryError::StoreUnavailable(format!("Failed to deactivate: {e}")))?;
        Ok(())
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<MemoryRecord>> {
        let predicate = match filter.to_sql_clause() {
            Some(clause) => format!("{clause} AND {COMMITTED}"),
            None => COMMITTED.to_string(),
        };
        let mut rows: Vec<StoredRow> = self
            .fetch(predicate)
            .await?
            .into_iter()
            .map(|(row, _)| row)
            .collect();
        rows.sort_by_key(|r| (r.record.created_at, r.seq));
        Ok(rows.into_iter().map(|r| r.record).collect())
    }

    async fn commit_consolidation(&self, commit: ConsolidationCommit) -> Result<CommitOutcome> {
        let _guard = self.write_lock.lock().await;
        // Inputs held by an interrupted commit would otherwise look consumed
        self.settle_staged().await?;

        let mut inputs = Vec::with_capacity(commit.inputs().len());
        for id in commit.inputs() {
            inputs.push(self.get(*id).await?);
        }
        let mut deactivated = Vec::with_capacity(commit.deactivate.len());
        for id in &commit.deactivate {
            deactivated.push(self.get(*id).await?);
        }
        let active_longs = self.active_longs(&commit.summary.category).await?;
        let summary_exists = self.row_exists(commit.summary.id).await?;

        if let Some(reason) = commit_conflict(
            &commit,
            summary_exists,
            &inputs,
            &deactivated,
            &active_longs,
        ) {
            debug!(category = %commit.summary.category, "Consolidation commit rejected: {}", reason);
            return Ok(CommitOutcome::Conflict(reason));
        }

        self.stage(&commit).await?;
        if let Err(e) = self
            .apply_staged(commit.summary.id, commit.inputs(), &commit.deactivate)
            .await
        {
            warn!(id = %commit.summary.id, "Consolidation commit interrupted, rolling forward: {}", e);
            // Still staged on failure; the next recover settles it
            self.settle_staged().await.map_err(|_| e)?;
            if !self.row_exists_committed(commit.summary.id).await? {
                return Ok(CommitOutcome::Conflict(format!(
                    "summary {} was discarded while rolling forward",
                    commit.summary.id
                )));
            }
        }
        Ok(CommitOutcome::Committed)
    }

    async fn get(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        Ok(self
            .fetch(format!("id = '{id}' AND {COMMITTED}"))
            .await?
            .into_iter()
            .next()
            .map(|(row, _)| row.record))
    }

    async fn recover(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        self.settle_staged().await
    }

    async fn categories(&self) -> Result<Vec<Category>> {
        let categories: BTreeSet<Category> = self
            .list(&RecordFilter::new())
            .await?
            .into_iter()
            .map(|r| r.category)
            .collect();
        Ok(categories.into_iter().collect())
    }
}

#[async_trait]
impl SimilaritySearch for LanceStore {
    async fn query(
        &self,
        text: &str,
        filter: &RecordFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(text)?;
        let predicate = match filter.to_sql_clause() {
            Some(clause) => format!("{clause} AND {COMMITTED}"),
            None => COMMITTED.to_string(),
        };

        let stream = self
            .table
            .query()
            .nearest_to(embedding.as_slice())
            .map_err(|e| {
                MemoryError::StoreUnavailable(format!("Failed to create vector query: {e}"))
            })?
            .distance_type(DistanceType::Cosine)
            .only_if(predicate)
            .limit(top_k)
            .execute()
            .await
            .map_err(|e| MemoryError::StoreUnavailable(format!("Failed to execute search: {e}")))?;

        let mut scored: Vec<ScoredRecord> = collect_rows(stream)
            .await?
            .into_iter()
            .map(|(row, distance)| ScoredRecord {
                record: row.record,
                score: 1.0 - distance.unwrap_or(1.0),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(scored)
    }
}

async fn collect_rows<S, E>(stream: S) -> Result<Vec<(StoredRow, Option<f32>)>>
where
    S: futures::Stream<Item = std::result::Result<RecordBatch, E>>,
    E: std::fmt::Display,
{
    let batches: Vec<RecordBatch> = stream.try_collect().await.map_err(|e| {
        MemoryError::StoreUnavailable(format!("Failed to collect query results: {e}"))
    })?;

    let mut rows = Vec::new();
    for batch in &batches {
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>());
        for row in 0..batch.num_rows() {
            let distance = distances.map(|d| d.value(row));
            rows.push((LanceStore::batch_to_row(batch, row)?, distance));
        }
    }
    Ok(rows)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| missing_column(name))
}

fn u64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt64Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
        .ok_or_else(|| missing_column(name))
}

fn missing_column(name: &str) -> MemoryError {
    MemoryError::StoreUnavailable(format!("Failed to get {name} column"))
}

fn parse_id(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| MemoryError::Serialization(format!("Failed to parse UUID: {e}")))
}

fn join_ids(ids: &[Uuid]) -> String {
    ids.iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn split_ids(value: &str) -> Result<Vec<Uuid>> {
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(parse_id)
        .collect()
}

fn quote_ids(ids: &[Uuid]) -> String {
    ids.iter()
        .map(|id| format!("'{id}'"))
        .collect::<Vec<_>>()
        .join(", ")
}
