//! Archive Store — a single shard's on-disk, append-only record file plus
//! its sparse index.
//!
//! An archive pairs two files under a database's directory:
//!
//! ```text
//! achv_i{index}_r{resolution}.strdridx   — header: schema + sparse index
//! achv_i{index}_r{resolution}.strdrdata  — fixed-width records, append-only
//! ```
//!
//! Records are written in strictly non-decreasing timestamp order; the
//! header's sparse index maps a timestamp to a byte offset in the data
//! file no more often than once per `indexInterval` seconds, so a range
//! read seeks once and then scans forward instead of reading the whole
//! shard.
//!
//! # Sub-modules
//!
//! - [`types`] — on-disk structures ([`ArchiveHeader`], [`Column`], …).
//! - [`record`] — the dynamic, runtime-schema record codec ([`Row`], [`Value`]).

pub mod record;
pub mod types;


pub use record::{Row, Value};
pub use types::{ArchiveHeader, ArchiveRange, Column, ColumnType, IndexEntry, IndexKind, ShardDescriptor};

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::encoding::{self, EncodingError};
use crate::fsutil;

/// Number of records read per batch while scanning forward from an
/// index checkpoint, mirroring the read-ahead window used by this
/// format historically — large enough to amortize syscalls, small
/// enough not to over-read past a narrow query window.
const READ_BATCH_RECORDS: usize = 50;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by archive store operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// No archive header file exists at the expected path.
    #[error("archive not found at {0:?}")]
    ArchiveNotFound(PathBuf),

    /// A record was written with a timestamp earlier than the last
    /// record already on disk.
    #[error("sequence violation: record timestamp {new} is before last written timestamp {last}")]
    SequenceViolation {
        /// Timestamp of the record that violated ordering.
        new: u32,
        /// Timestamp of the last record already on disk.
        last: u32,
    },

    /// The data file's length is not a whole multiple of the record
    /// width, or a decoded value fails a sanity check.
    #[error("archive corrupt at byte offset {0}")]
    Corrupt(u64),

    /// A value did not match its column's declared type.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

// ------------------------------------------------------------------------------------------------
// Path helpers
// ------------------------------------------------------------------------------------------------

/// Computes the `(header_path, data_path)` pair for a shard, following
/// this format's fixed naming convention.
pub fn archive_paths(dir: &Path, index: u16, resolution: u8) -> (PathBuf, PathBuf) {
    let stem = format!("achv_i{index}_r{resolution}");
    (
        dir.join(format!("{stem}.strdridx")),
        dir.join(format!("{stem}.strdrdata")),
    )
}

// ------------------------------------------------------------------------------------------------
// ArchiveStore
// ------------------------------------------------------------------------------------------------

/// An open shard: its header (schema + sparse index) and the path to its
/// append-only record file.
pub struct ArchiveStore {
    header: ArchiveHeader,
    header_path: PathBuf,
    data_path: PathBuf,
    record_schema: Vec<ColumnType>,
    last_entry_timestamp: u32,
    last_index_timestamp: u32,
}

impl ArchiveStore {
    /// Creates a brand-new archive on disk for `shard`, with the given
    /// initial column schema and index interval.
    pub fn create(
        dir: &Path,
        shard: &ShardDescriptor,
        keys: &[Column],
        index_interval: u32,
    ) -> Result<Self, ArchiveError> {
        let (header_path, data_path) = archive_paths(dir, shard.index, shard.resolution);
        let header = ArchiveHeader::new(shard, keys.to_vec(), index_interval);
        let record_schema = header.record_schema();

        let mut store = ArchiveStore {
            header,
            header_path,
            data_path,
            record_schema,
            last_entry_timestamp: 0,
            last_index_timestamp: 0,
        };
        store.save_header()?;
        File::create(&store.data_path)?;
        debug!(path = ?store.data_path, "created archive");
        Ok(store)
    }

    /// Opens an existing archive described by `shard`.
    pub fn load(dir: &Path, shard: &ShardDescriptor) -> Result<Self, ArchiveError> {
        let (header_path, data_path) = archive_paths(dir, shard.index, shard.resolution);

        let bytes = match fs::read(&header_path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArchiveError::ArchiveNotFound(header_path));
            }
            Err(e) => return Err(e.into()),
        };
        let (header, _) = encoding::decode_from_slice::<ArchiveHeader>(&bytes)?;
        let record_schema = header.record_schema();

        let last_index_timestamp = header
            .indices
            .last()
            .map(|e| e.timestamp)
            .unwrap_or(header.min_range);

        let last_entry_timestamp =
            Self::read_last_record_timestamp(&data_path, &record_schema)?.unwrap_or(header.min_range);

        debug!(path = ?header_path, records_indexed = header.indices.len(), "loaded archive");

        Ok(ArchiveStore {
            header,
            header_path,
            data_path,
            record_schema,
            last_entry_timestamp,
            last_index_timestamp,
        })
    }

    /// Reads the timestamp of the actual last record in the data file,
    /// or `None` if the file is empty.
    ///
    /// This reads the correct, final record exactly once. An earlier
    /// revision of this format's writer seeded its "last timestamp"
    /// state by seeking one record-width before EOF and then reading
    /// *two* records in a row — which ran past EOF in the common case.
    /// That is not replicated here.
    fn read_last_record_timestamp(
        data_path: &Path,
        schema: &[ColumnType],
    ) -> Result<Option<u32>, ArchiveError> {
        let width = record::record_width(schema);
        if width == 0 {
            return Ok(None);
        }
        let mut file = match File::open(data_path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(None);
        }
        let whole_records = len / width as u64;
        if whole_records == 0 {
            warn!(len, width, "archive data file shorter than one record, treating as empty");
            return Ok(None);
        }
        let last_offset = (whole_records - 1) * width as u64;
        if whole_records * (width as u64) != len {
            warn!(
                declared_len = len,
                aligned_len = whole_records * width as u64,
                "archive data file length is not a whole number of records, trailing bytes ignored"
            );
        }
        file.seek(SeekFrom::Start(last_offset))?;
        let mut buf = vec![0u8; width];
        file.read_exact(&mut buf)?;
        let (row, _) = record::unpack_record(schema, &buf)?;
        Ok(Some(row.timestamp))
    }

    /// This shard's inclusive start timestamp.
    pub fn min_range(&self) -> u32 {
        self.header.min_range
    }

    /// This shard's exclusive end timestamp.
    pub fn max_range(&self) -> u32 {
        self.header.max_range
    }

    /// The archive's current column schema, in on-disk order.
    pub fn columns(&self) -> &[Column] {
        &self.header.keys
    }

    /// Appends `rows` to the data file. `rows` must be in non-decreasing
    /// timestamp order and every timestamp must be `>=` the last record
    /// already on disk, or this returns
    /// [`ArchiveError::SequenceViolation`] without writing anything.
    pub fn write_records(&mut self, rows: &[Row]) -> Result<(), ArchiveError> {
        if rows.is_empty() {
            return Ok(());
        }

        let width = record::record_width(&self.record_schema) as u64;
        let base_offset = fs::metadata(&self.data_path)?.len();

        let mut last_entry_timestamp = self.last_entry_timestamp;
        let mut last_index_timestamp = self.last_index_timestamp;
        let mut new_indices = Vec::new();
        let has_existing_data = !self.header.indices.is_empty() || base_offset > 0;

        for (i, row) in rows.iter().enumerate() {
            if (has_existing_data || i > 0) && row.timestamp < last_entry_timestamp {
                return Err(ArchiveError::SequenceViolation {
                    new: row.timestamp,
                    last: last_entry_timestamp,
                });
            }

            let is_first_ever = !has_existing_data && new_indices.is_empty() && i == 0;
            let due_for_checkpoint = is_first_ever
                || u64::from(row.timestamp.saturating_sub(last_index_timestamp))
                    >= u64::from(self.header.index_interval);

            if due_for_checkpoint {
                let offset = base_offset + (i as u64) * width;
                new_indices.push(IndexEntry {
                    timestamp: row.timestamp,
                    offset: offset as u32,
                    kind: if is_first_ever {
                        IndexKind::Start
                    } else {
                        IndexKind::Default
                    },
                });
                last_index_timestamp = row.timestamp;
            }

            last_entry_timestamp = row.timestamp;
        }

        let packed = record::pack_records(&self.record_schema, rows)?;
        let mut file = OpenOptions::new().append(true).open(&self.data_path)?;
        file.write_all(&packed)?;
        file.sync_all()?;

        self.header.indices.extend(new_indices);
        self.header.index_count = self.header.indices.len() as u16;
        self.last_entry_timestamp = last_entry_timestamp;
        self.last_index_timestamp = last_index_timestamp;
        self.save_header()?;

        trace!(count = rows.len(), base_offset, "appended records to archive");
        Ok(())
    }

    /// Finds the last sparse index checkpoint at or before `time`, or
    /// `None` if `time` is before this archive's first indexed record.
    fn get_index(&self, time: u32) -> Option<&IndexEntry> {
        let mut last: Option<&IndexEntry> = None;
        for entry in &self.header.indices {
            if entry.timestamp > time {
                break;
            }
            last = Some(entry);
        }
        last
    }

    /// Reads every record with `start <= timestamp < end`.
    ///
    /// Seeks once to the nearest sparse-index checkpoint at or before
    /// `start`, then scans forward in batches, stopping as soon as a
    /// record's timestamp reaches `end`.
    pub fn read_records(&self, start: u32, end: u32) -> Result<Vec<Row>, ArchiveError> {
        let mut file = match File::open(&self.data_path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let width = record::record_width(&self.record_schema);
        if width == 0 {
            return Ok(Vec::new());
        }

        let start_offset = self.get_index(start).map(|e| u64::from(e.offset)).unwrap_or(0);
        file.seek(SeekFrom::Start(start_offset))?;

        let batch_bytes = width * READ_BATCH_RECORDS;
        let mut out = Vec::new();
        let mut buf = vec![0u8; batch_bytes];

        loop {
            let mut filled = 0;
            while filled < buf.len() {
                let n = file.read(&mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }

            let rows = record::unpack_records(&self.record_schema, &buf[..filled])?;
            let mut done = false;
            for row in rows {
                if row.timestamp >= end {
                    done = true;
                    break;
                }
                if row.timestamp >= start {
                    out.push(row);
                }
            }
            if done || filled < buf.len() {
                break;
            }
        }

        Ok(out)
    }

    /// Widens every existing record with a zero value for `column`, then
    /// adds it to the schema for subsequent writes.
    ///
    /// Rewrites the entire data file to a `.new` sibling and swaps it
    /// into place via [`fsutil::safe_overwrite`] — there is no partial,
    /// in-place column append for a fixed-width record format.
    pub fn add_key(&mut self, column: Column) -> Result<(), ArchiveError> {
        let old_schema = self.record_schema.clone();
        let old_width = record::record_width(&old_schema) as u64;
        let existing = fs::read(&self.data_path)?;
        let rows = record::unpack_records(&old_schema, &existing)?;

        let new_schema: Vec<ColumnType> = old_schema
            .iter()
            .copied()
            .chain(std::iter::once(column.col_type))
            .collect();
        let new_width = record::record_width(&new_schema) as u64;

        let widened: Vec<Row> = rows
            .into_iter()
            .map(|mut row| {
                row.values.push(Value::zero(column.col_type));
                row
            })
            .collect();

        let new_bytes = record::pack_records(&new_schema, &widened)?;
        let tmp_path = self.data_path.with_extension("strdrdata.new");
        fs::write(&tmp_path, &new_bytes)?;
        fsutil::safe_overwrite(&self.data_path, &tmp_path)?;

        // Every index entry's offset was computed against the old record
        // width (`write_records`'s `base_offset + i * width`); the file on
        // disk now holds the same records at `new_width` each, so rescale
        // each checkpoint to the record boundary it still points at.
        for entry in &mut self.header.indices {
            entry.offset = ((u64::from(entry.offset) / old_width) * new_width) as u32;
        }

        self.header.keys.push(column);
        self.header.key_count = self.header.keys.len() as u16;
        self.record_schema = new_schema;
        self.save_header()?;

        debug!(path = ?self.data_path, rows = widened.len(), "widened archive schema");
        Ok(())
    }

    /// Updates this archive's minimum spacing between sparse index
    /// checkpoints for records written from now on.
    pub fn set_index_interval(&mut self, seconds: u32) -> Result<(), ArchiveError> {
        self.header.index_interval = seconds;
        self.save_header()
    }

    fn save_header(&self) -> Result<(), ArchiveError> {
        let bytes = encoding::encode_to_vec(&self.header)?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.header_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    }
}
