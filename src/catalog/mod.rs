//! Database Catalog — owns a database directory's `db.strdr` metadata
//! file and the collection of archive shard files beneath it.
//!
//! Maps a timestamp to its owning shard via the configured
//! [`ArchiveRange`] alignment function, and materializes new shards on
//! demand. Shard descriptors and the shared column schema live in one
//! `CatalogData` value, serialized whole on every mutation (this format
//! never carries more than a few thousand shards, so a full rewrite per
//! mutation is cheap relative to the archive writes it gates).

pub mod types;

#[cfg(test)]
mod tests;

pub use types::CatalogData;

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, warn};

use crate::archive::types::CURRENT_REVISION;
use crate::archive::{ArchiveError, ArchiveHeader, ArchiveRange, ArchiveStore, Column, ShardDescriptor};
use crate::encoding::{self, EncodingError};
use crate::fsutil;
use types::CATALOG_MAGIC;

const CATALOG_FILENAME: &str = "db.strdr";
const CATALOG_BACKUP_FILENAME: &str = "db.strdr.old";

/// Errors returned by catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// No `db.strdr` exists at the requested database directory.
    #[error("database not found at {0:?}")]
    DatabaseNotFound(PathBuf),

    /// A database directory already exists where a new one was requested.
    #[error("database already exists at {0:?}")]
    DatabaseExists(PathBuf),

    /// `addKey` was called with a column name already present.
    #[error("key already exists: {0}")]
    KeyAlreadyExists(String),

    /// No shard descriptor matches the requested shard key.
    #[error("no archive for shard key {0}")]
    ArchiveNotFound(u32),

    /// The catalog file failed to parse (bad magic, bad revision, or a
    /// decode error) at approximately the given byte offset.
    #[error("catalog corrupt at byte offset {0}")]
    Corrupt(u64),

    /// Underlying archive store error.
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Internal invariant violation (poisoned lock).
    #[error("internal error: {0}")]
    Internal(String),
}

/// An open database directory: its catalog metadata plus the ability to
/// create and load the archive shards it describes.
pub struct Catalog {
    dir: PathBuf,
    data: Mutex<CatalogData>,
}

impl Catalog {
    /// Creates a brand-new, empty database directory.
    ///
    /// Fails with [`CatalogError::DatabaseExists`] if `dir` already
    /// exists.
    pub fn create(
        dir: &Path,
        name: &str,
        archive_range: ArchiveRange,
    ) -> Result<Self, CatalogError> {
        if dir.exists() {
            return Err(CatalogError::DatabaseExists(dir.to_path_buf()));
        }
        fs::create_dir_all(dir)?;

        let catalog = Catalog {
            dir: dir.to_path_buf(),
            data: Mutex::new(CatalogData::new(name, archive_range)),
        };
        catalog.save()?;
        debug!(path = ?dir, name, "created database catalog");
        Ok(catalog)
    }

    /// Opens an existing database directory.
    ///
    /// If `db.strdr` is missing, fails with
    /// [`CatalogError::DatabaseNotFound`]. If it fails to parse, the
    /// backup `db.strdr.old` is restored over it and parsing is retried
    /// once. A backup that parses but whose archive count doesn't match
    /// the `.strdridx` shard files actually present in `dir` is treated
    /// as stale rather than trusted — `.old` is always one generation
    /// behind the live file it backs up, so restoring it can silently
    /// forget shards created since. Any of these failure paths (parse
    /// failure, no backup, stale backup) falls through to reconstructing
    /// the catalog from the archive shards on disk via [`Self::rebuild`].
    pub fn load(dir: &Path) -> Result<Self, CatalogError> {
        let live = dir.join(CATALOG_FILENAME);
        if !live.exists() {
            return Err(CatalogError::DatabaseNotFound(dir.to_path_buf()));
        }

        let data = match Self::read_catalog_file(&live) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, path = ?live, "catalog corrupt, attempting recovery");
                let old = dir.join(CATALOG_BACKUP_FILENAME);
                if old.exists() {
                    fs::copy(&old, &live)?;
                    match Self::read_catalog_file(&live) {
                        Ok(data) if Self::shards_consistent_with_disk(&data, dir) => data,
                        Ok(data) => {
                            warn!(
                                archives = data.archives.len(),
                                "restored backup catalog is stale relative to archive shards on disk, rebuilding"
                            );
                            return Self::rebuild(dir);
                        }
                        Err(e2) => {
                            warn!(error = %e2, "backup catalog also corrupt, rebuilding from shards");
                            return Self::rebuild(dir);
                        }
                    }
                } else {
                    warn!("no backup catalog present, rebuilding from shards");
                    return Self::rebuild(dir);
                }
            }
        };

        debug!(path = ?live, archives = data.archives.len(), "loaded catalog");
        Ok(Catalog {
            dir: dir.to_path_buf(),
            data: Mutex::new(data),
        })
    }

    fn read_catalog_file(path: &Path) -> Result<CatalogData, CatalogError> {
        let bytes = fs::read(path)?;
        let (data, _) =
            encoding::decode_from_slice::<CatalogData>(&bytes).map_err(|_| CatalogError::Corrupt(0))?;
        if data.magic != CATALOG_MAGIC {
            return Err(CatalogError::Corrupt(0));
        }
        if data.revision != CURRENT_REVISION {
            return Err(CatalogError::Corrupt(0));
        }
        Ok(data)
    }

    /// `true` if `data`'s archive descriptors match the `.strdridx` shard
    /// files actually present in `dir` — the signal that a restored
    /// `.old` backup is not stale relative to shards written after its
    /// own last save.
    fn shards_consistent_with_disk(data: &CatalogData, dir: &Path) -> bool {
        let on_disk = match fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().and_then(|ext| ext.to_str()) == Some("strdridx"))
                .count(),
            Err(_) => return false,
        };
        on_disk == data.archives.len()
    }

    fn lock_data(&self) -> Result<std::sync::MutexGuard<'_, CatalogData>, CatalogError> {
        self.data
            .lock()
            .map_err(|_| CatalogError::Internal("catalog mutex poisoned".into()))
    }

    /// Persists the catalog: if a live `db.strdr` exists, it is backed
    /// up to `db.strdr.old` (replacing any prior backup) before being
    /// rewritten from scratch.
    pub fn save(&self) -> Result<(), CatalogError> {
        let data = self.lock_data()?;
        let live = self.dir.join(CATALOG_FILENAME);
        let old = self.dir.join(CATALOG_BACKUP_FILENAME);

        if live.exists() {
            if old.exists() {
                fs::remove_file(&old)?;
            }
            fsutil::safe_overwrite(&old, &live)?;
        }

        let bytes = encoding::encode_to_vec(&*data)?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&live)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fsutil::fsync_dir(&self.dir)?;
        Ok(())
    }

    /// Appends a column to the catalog's shared schema.
    ///
    /// Rejects a duplicate name with [`CatalogError::KeyAlreadyExists`].
    /// Does not touch any existing archive shard — widening an archive's
    /// own record layout is the caller's separate responsibility (see
    /// `Session::add_key`).
    pub fn add_key(&self, column: Column) -> Result<(), CatalogError> {
        {
            let mut data = self.lock_data()?;
            if data.keys.iter().any(|k| k.name == column.name) {
                return Err(CatalogError::KeyAlreadyExists(column.name));
            }
            data.keys.push(column);
            data.key_count = data.keys.len() as u16;
        }
        self.save()
    }

    /// Updates the index interval newly created shards will use.
    pub fn set_index_interval(&self, seconds: u32) -> Result<(), CatalogError> {
        {
            let mut data = self.lock_data()?;
            data.index_interval = seconds;
        }
        self.save()
    }

    /// This database's shard period.
    pub fn archive_range(&self) -> Result<ArchiveRange, CatalogError> {
        Ok(self.lock_data()?.archive_range)
    }

    /// The index interval newly created shards are given.
    pub fn index_interval(&self) -> Result<u32, CatalogError> {
        Ok(self.lock_data()?.index_interval)
    }

    /// The shared column schema.
    pub fn columns(&self) -> Result<Vec<Column>, CatalogError> {
        Ok(self.lock_data()?.keys.clone())
    }

    /// Aligns `timestamp` down to its containing shard's key.
    pub fn shard_key(&self, timestamp: u32) -> Result<u32, CatalogError> {
        Ok(self.archive_range()?.align(timestamp))
    }

    /// `true` if a shard descriptor with `min_range == shard_key` exists.
    pub fn has_archive(&self, shard_key: u32) -> Result<bool, CatalogError> {
        Ok(self
            .lock_data()?
            .archives
            .iter()
            .any(|a| a.min_range == shard_key))
    }

    /// Opens the archive store for the shard keyed by `shard_key`.
    pub fn load_archive(&self, shard_key: u32) -> Result<ArchiveStore, CatalogError> {
        let descriptor = {
            let data = self.lock_data()?;
            data.archives
                .iter()
                .find(|a| a.min_range == shard_key)
                .copied()
                .ok_or(CatalogError::ArchiveNotFound(shard_key))?
        };
        Ok(ArchiveStore::load(&self.dir, &descriptor)?)
    }

    /// Eagerly opens every known shard, keyed by shard key.
    pub fn load_archives(&self) -> Result<HashMap<u32, ArchiveStore>, CatalogError> {
        let descriptors = self.lock_data()?.archives.clone();
        let mut out = HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let store = ArchiveStore::load(&self.dir, &descriptor)?;
            out.insert(descriptor.min_range, store);
        }
        Ok(out)
    }

    /// Creates a brand-new shard covering the period containing
    /// `timestamp`, persists its descriptor, and returns the opened
    /// store.
    pub fn create_archive(&self, timestamp: u32) -> Result<ArchiveStore, CatalogError> {
        let (descriptor, keys, index_interval) = {
            let data = self.lock_data()?;
            let min_range = data.archive_range.align(timestamp);
            let period = data.archive_range.period_seconds(timestamp);
            let max_range = min_range + period as u32;
            let index = data.archive_count + 1;
            (
                ShardDescriptor {
                    min_range,
                    max_range,
                    index,
                    resolution: 0,
                },
                data.keys.clone(),
                data.index_interval,
            )
        };

        let store = ArchiveStore::create(&self.dir, &descriptor, &keys, index_interval)?;

        {
            let mut data = self.lock_data()?;
            data.archives.push(descriptor);
            data.archive_count = data.archives.len() as u16;
        }
        self.save()?;

        debug!(min_range = descriptor.min_range, index = descriptor.index, "created archive shard");
        Ok(store)
    }

    /// Best-effort recovery when a catalog's `db.strdr` (and its backup)
    /// are both unreadable: scans every `achv_*.strdridx` header in
    /// `dir`, infers the shared schema from the shard with the largest
    /// `min_range`, infers the shard period from that shard's span, and
    /// writes a fresh catalog named `"rebuilt"` listing every recovered
    /// shard.
    ///
    /// This is explicitly lossy for the original database name, and may
    /// misclassify a month shard whose span is not exactly one of the
    /// day/week lengths — logged as a warning rather than guessed at.
    pub fn rebuild(dir: &Path) -> Result<Self, CatalogError> {
        let mut headers: Vec<ArchiveHeader> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("strdridx") {
                continue;
            }
            match fs::read(&path).and_then(|bytes| {
                encoding::decode_from_slice::<ArchiveHeader>(&bytes)
                    .map(|(header, _)| header)
                    .map_err(|e| io::Error::other(e.to_string()))
            }) {
                Ok(header) => headers.push(header),
                Err(e) => warn!(path = ?path, error = %e, "skipping unreadable archive header during rebuild"),
            }
        }

        if headers.is_empty() {
            warn!(dir = ?dir, "rebuild found no archive headers, producing an empty catalog");
        }

        let schema_source = headers.iter().max_by_key(|h| h.min_range);
        let keys = schema_source.map(|h| h.keys.clone()).unwrap_or_default();
        let index_interval = schema_source.map(|h| h.index_interval).unwrap_or(3600);

        let archives: Vec<ShardDescriptor> = headers
            .iter()
            .map(|h| ShardDescriptor {
                min_range: h.min_range,
                max_range: h.max_range,
                index: h.index,
                resolution: h.resolution,
            })
            .collect();

        let archive_range = infer_archive_range(&archives);

        let mut data = CatalogData::new("rebuilt", archive_range);
        data.keys = keys;
        data.key_count = data.keys.len() as u16;
        data.index_interval = index_interval;
        data.archives = archives;
        data.archive_count = data.archives.len() as u16;

        let catalog = Catalog {
            dir: dir.to_path_buf(),
            data: Mutex::new(data),
        };
        catalog.save()?;
        warn!(dir = ?dir, archives = catalog.lock_data()?.archives.len(), "catalog rebuilt from archive shards");
        Ok(catalog)
    }
}

/// Infers the shard period from the span of the shard with the largest
/// `min_range`, since the catalog being rebuilt carries no other record
/// of which [`ArchiveRange`] was configured.
fn infer_archive_range(archives: &[ShardDescriptor]) -> ArchiveRange {
    let Some(shard) = archives.iter().max_by_key(|a| a.min_range) else {
        return ArchiveRange::Week;
    };
    let span = shard.max_range.saturating_sub(shard.min_range);
    match span {
        86_400 => ArchiveRange::Day,
        604_800 => ArchiveRange::Week,
        other => {
            warn!(
                span = other,
                "rebuild: shard span matches neither day nor week length, assuming Month"
            );
            ArchiveRange::Month
        }
    }
}

