//! Session — the façade the outside world consumes: open or create a
//! database, add points, bulk-ingest, range-query, and evolve the schema.
//!
//! ## Concurrency Model
//!
//! All session state is protected by a single `Arc<RwLock<SessionInner>>`.
//! Reads (`query`) acquire a **read lock**; writes (`add`, `bulk_add`,
//! `add_key`, `set_index_interval`) acquire a **write lock**, even though
//! the underlying [`Catalog`](crate::catalog::Catalog) already serializes
//! its own mutations internally — the outer lock is what lets an
//! embedding application share one `Session` across threads behind its
//! own synchronization.
//!
//! ## Data Flow
//!
//! `add`/`bulk_add` resolve the owning shard via the catalog (creating it
//! on first write), then append records to that shard's archive store.
//! `query` computes every shard intersecting the requested range and
//! concatenates their filtered rows in shard order.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, warn};

use crate::archive::{ArchiveError, ArchiveRange, ArchiveStore, Column, ColumnType, Row, Value};
use crate::catalog::{Catalog, CatalogError};
use crate::encoding::EncodingError;

#[cfg(test)]
mod tests;

/// A single point's named field values, keyed by column name.
///
/// A value of `None` means the field was explicitly supplied as empty
/// (rejected with [`SessionError::InvalidValue`]); a name simply absent
/// from the map means "not supplied", which is backfilled with a zero
/// value for that column instead.
pub type FieldMap = HashMap<String, Option<Value>>;

/// Configuration passed to [`Session::new`] when creating a database.
pub struct SessionConfig {
    /// The shard period every archive in the new database is aligned to.
    pub archive_range: ArchiveRange,
    /// Minimum spacing, in seconds, between sparse index checkpoints in
    /// newly created shards.
    pub index_interval: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            archive_range: ArchiveRange::Week,
            index_interval: 3600,
        }
    }
}

/// Errors returned by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Underlying catalog error.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Underlying archive store error.
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// `add`/`bulk_add` was called with no fields at all.
    #[error("empty payload")]
    EmptyPayload,

    /// A supplied field was `None`, or did not match its column's type.
    #[error("invalid value for field {0:?}")]
    InvalidValue(String),

    /// Internal invariant violation (poisoned lock).
    #[error("internal error: {0}")]
    Internal(String),
}

/// The result of a [`Session::query`] call, shaped by its `key`/`raw`/
/// `as_arrays` flags.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// `key` was set: one `(timestamp, value)` pair per matching row for
    /// that single column.
    KeyedSeries(Vec<(u32, Value)>),
    /// `as_arrays` was set: column-oriented output, `"time"` plus one
    /// entry per schema column, each holding one value per matching row.
    Arrays {
        /// One timestamp per matching row, in query order.
        time: Vec<u32>,
        /// `columnName -> list[value]`, aligned with `time`.
        columns: HashMap<String, Vec<Value>>,
    },
    /// `raw` was set: the matching rows themselves, unlabeled.
    Raw(Vec<Row>),
    /// Neither `raw` nor `as_arrays`: one named record per matching row.
    Records(Vec<HashMap<String, Value>>),
}

struct SessionInner {
    dir: PathBuf,
    catalog: Catalog,
    shards: HashMap<u32, ArchiveStore>,
}

impl SessionInner {
    /// Returns the shard covering `timestamp`, creating it via the
    /// catalog if it does not yet exist.
    fn shard_mut(&mut self, timestamp: u32) -> Result<&mut ArchiveStore, SessionError> {
        let shard_key = self.catalog.shard_key(timestamp)?;
        if !self.shards.contains_key(&shard_key) {
            let store = if self.catalog.has_archive(shard_key)? {
                self.catalog.load_archive(shard_key)?
            } else {
                self.catalog.create_archive(timestamp)?
            };
            self.shards.insert(shard_key, store);
        }
        Ok(self.shards.get_mut(&shard_key).expect("just inserted above"))
    }

    /// Projects a [`FieldMap`] into a [`Row`] against the catalog's
    /// current column order, substituting a zero value for any column
    /// not present in `fields`. Extra keys not present in the schema are
    /// ignored.
    fn build_row(
        &self,
        timestamp: u32,
        fields: &FieldMap,
        columns: &[Column],
    ) -> Result<Row, SessionError> {
        let mut values = Vec::with_capacity(columns.len());
        for column in columns {
            match fields.get(&column.name) {
                Some(Some(value)) => {
                    if value.col_type() != column.col_type {
                        return Err(SessionError::InvalidValue(column.name.clone()));
                    }
                    values.push(*value);
                }
                Some(None) => return Err(SessionError::InvalidValue(column.name.clone())),
                None => values.push(Value::zero(column.col_type)),
            }
        }
        Ok(Row::new(timestamp, values))
    }
}

/// An open time-series database.
///
/// Cloneable — clones share the same underlying state via `Arc`.
pub struct Session {
    inner: Arc<RwLock<SessionInner>>,
}

impl Clone for Session {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Session {
    /// Creates a brand-new database directory `base_dir/name`.
    pub fn new(base_dir: impl AsRef<Path>, name: &str, config: SessionConfig) -> Result<Self, SessionError> {
        let dir = base_dir.as_ref().join(name);
        let catalog = Catalog::create(&dir, name, config.archive_range)?;
        if config.index_interval != 3600 {
            catalog.set_index_interval(config.index_interval)?;
        }
        debug!(path = ?dir, name, "opened new session");
        Ok(Session {
            inner: Arc::new(RwLock::new(SessionInner {
                dir,
                catalog,
                shards: HashMap::new(),
            })),
        })
    }

    /// Opens an existing database directory `base_dir/name`, eagerly
    /// loading every known shard.
    ///
    /// If the catalog is corrupt it is recovered via
    /// [`Catalog::load`]'s backup/rebuild chain automatically.
    pub fn load(base_dir: impl AsRef<Path>, name: &str) -> Result<Self, SessionError> {
        let dir = base_dir.as_ref().join(name);
        let catalog = Catalog::load(&dir)?;
        let shards = catalog.load_archives()?;
        debug!(path = ?dir, shards = shards.len(), "loaded session");
        Ok(Session {
            inner: Arc::new(RwLock::new(SessionInner {
                dir,
                catalog,
                shards,
            })),
        })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, SessionInner>, SessionError> {
        self.inner
            .read()
            .map_err(|_| SessionError::Internal("session lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, SessionInner>, SessionError> {
        self.inner
            .write()
            .map_err(|_| SessionError::Internal("session lock poisoned".into()))
    }

    /// Adds a single point at `timestamp`.
    ///
    /// `fields` must not be empty, or this returns
    /// [`SessionError::EmptyPayload`]. Missing columns are backfilled
    /// with a zero value; an explicit `None` or a type mismatch returns
    /// [`SessionError::InvalidValue`].
    pub fn add(&self, timestamp: u32, fields: &FieldMap) -> Result<(), SessionError> {
        if fields.is_empty() {
            return Err(SessionError::EmptyPayload);
        }
        let mut inner = self.write()?;
        let columns = inner.catalog.columns()?;
        let row = inner.build_row(timestamp, fields, &columns)?;
        inner.shard_mut(timestamp)?.write_records(&[row])?;
        Ok(())
    }

    /// Bulk-ingests a time-ordered batch of points, partitioning them
    /// into one contiguous `write_records` call per shard run.
    pub fn bulk_add(&self, points: &BTreeMap<u32, FieldMap>) -> Result<(), SessionError> {
        if points.is_empty() {
            return Err(SessionError::EmptyPayload);
        }
        let mut inner = self.write()?;
        let columns = inner.catalog.columns()?;

        let mut current_shard: Option<u32> = None;
        let mut batch: Vec<Row> = Vec::new();

        for (&timestamp, fields) in points {
            if fields.is_empty() {
                return Err(SessionError::EmptyPayload);
            }
            let row = inner.build_row(timestamp, fields, &columns)?;
            let shard_key = inner.catalog.shard_key(timestamp)?;

            if current_shard != Some(shard_key) {
                if let Some(prev_key) = current_shard {
                    flush_batch(&mut inner, prev_key, &mut batch)?;
                }
                current_shard = Some(shard_key);
            }
            batch.push(row);
        }
        if let Some(prev_key) = current_shard {
            flush_batch(&mut inner, prev_key, &mut batch)?;
        }
        Ok(())
    }

    /// Reads every matching row with `start <= timestamp < end`.
    ///
    /// Shaped by `key`/`raw`/`as_arrays` in that priority order: `key`
    /// returns a single named column's `(timestamp, value)` series;
    /// otherwise `as_arrays` transposes into column-oriented arrays;
    /// otherwise `raw` returns unlabeled [`Row`]s; otherwise one named
    /// record per row.
    pub fn query(
        &self,
        start: u32,
        end: u32,
        key: Option<&str>,
        raw: bool,
        as_arrays: bool,
    ) -> Result<QueryResult, SessionError> {
        let inner = self.read()?;
        let columns = inner.catalog.columns()?;
        let archive_range = inner.catalog.archive_range()?;

        let mut shard_keys = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let shard_key = archive_range.align(cursor);
            if shard_keys.last() != Some(&shard_key) {
                shard_keys.push(shard_key);
            }
            let period = archive_range.period_seconds(cursor) as u32;
            let next = cursor.saturating_add(period);
            if next <= cursor {
                break;
            }
            cursor = next;
        }
        if shard_keys.is_empty() {
            shard_keys.push(archive_range.align(start));
        }

        let mut rows: Vec<Row> = Vec::new();
        for shard_key in shard_keys {
            if !inner.catalog.has_archive(shard_key)? {
                continue;
            }
            let shard_rows = match inner.shards.get(&shard_key) {
                Some(store) => store.read_records(start, end)?,
                None => {
                    warn!(shard_key, "querying an archive not preloaded into this session");
                    inner.catalog.load_archive(shard_key)?.read_records(start, end)?
                }
            };
            rows.extend(shard_rows);
        }

        if let Some(key_name) = key {
            let idx = columns
                .iter()
                .position(|c| c.name == key_name)
                .ok_or_else(|| SessionError::InvalidValue(key_name.to_string()))?;
            // A row from a shard predating this column (never widened)
            // carries fewer values than the catalog's current schema;
            // such rows are simply omitted from this column's series.
            let series = rows
                .iter()
                .filter_map(|row| row.values.get(idx).map(|v| (row.timestamp, *v)))
                .collect();
            return Ok(QueryResult::KeyedSeries(series));
        }

        if as_arrays {
            let mut time = Vec::with_capacity(rows.len());
            let mut arrays: HashMap<String, Vec<Value>> = columns
                .iter()
                .map(|c| (c.name.clone(), Vec::with_capacity(rows.len())))
                .collect();
            for row in &rows {
                time.push(row.timestamp);
                for (column, value) in columns.iter().zip(&row.values) {
                    arrays.get_mut(&column.name).unwrap().push(*value);
                }
            }
            return Ok(QueryResult::Arrays { time, columns: arrays });
        }

        if raw {
            return Ok(QueryResult::Raw(rows));
        }

        let records = rows
            .iter()
            .map(|row| {
                let mut record = HashMap::with_capacity(columns.len());
                for (column, value) in columns.iter().zip(&row.values) {
                    record.insert(column.name.clone(), *value);
                }
                record
            })
            .collect();
        Ok(QueryResult::Records(records))
    }

    /// Adds a new typed column to the schema, then widens only the
    /// currently active shard (the one whose range contains now).
    ///
    /// Older shards are left as-is; a query spanning a schema change
    /// sees fewer columns in its older results.
    pub fn add_key(&self, name: &str, col_type: ColumnType) -> Result<(), SessionError> {
        let mut inner = self.write()?;
        inner.catalog.add_key(Column::new(name, col_type))?;

        let now = current_timestamp();
        let shard_key = inner.catalog.shard_key(now)?;
        if inner.catalog.has_archive(shard_key)? {
            if !inner.shards.contains_key(&shard_key) {
                let store = inner.catalog.load_archive(shard_key)?;
                inner.shards.insert(shard_key, store);
            }
            inner
                .shards
                .get_mut(&shard_key)
                .expect("just inserted above")
                .add_key(Column::new(name, col_type))?;
        }
        Ok(())
    }

    /// Updates the catalog's index interval for shards created from now
    /// on. If `full` is set, also pushes the new interval into the
    /// currently active shard, mirroring `add_key`'s "active shard only"
    /// scope.
    pub fn set_index_interval(&self, seconds: u32, full: bool) -> Result<(), SessionError> {
        let mut inner = self.write()?;
        inner.catalog.set_index_interval(seconds)?;

        if full {
            let now = current_timestamp();
            let shard_key = inner.catalog.shard_key(now)?;
            if let Some(store) = inner.shards.get_mut(&shard_key) {
                store.set_index_interval(seconds)?;
            }
        }
        Ok(())
    }
}

fn flush_batch(inner: &mut SessionInner, shard_key: u32, batch: &mut Vec<Row>) -> Result<(), SessionError> {
    if batch.is_empty() {
        return Ok(());
    }
    let timestamp = batch[0].timestamp;
    debug_assert_eq!(inner.catalog.shard_key(timestamp).ok(), Some(shard_key));
    let store = inner.shard_mut(timestamp)?;
    store.write_records(batch)?;
    batch.clear();
    Ok(())
}

fn current_timestamp() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
