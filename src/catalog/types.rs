//! On-disk structure for the `db.strdr` catalog file.

use crate::archive::types::{ArchiveRange, Column, ShardDescriptor, CURRENT_REVISION};
use crate::encoding::{self, Decode, Encode, EncodingError};

/// Magic string identifying a catalog file (`db.strdr`).
pub const CATALOG_MAGIC: &str = "strdrdb";

/// The full contents of a database's `db.strdr` catalog file: identity,
/// shard period, every known shard descriptor, and the shared column
/// schema every shard's records are written against.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogData {
    /// Format magic, always [`CATALOG_MAGIC`].
    pub magic: String,
    /// Format revision, always [`CURRENT_REVISION`] for catalogs this
    /// crate writes.
    pub revision: u32,
    /// Name the database was created with.
    pub database_name: String,
    /// Number of entries in `archives` (the on-disk wire field).
    pub archive_count: u16,
    /// Number of entries in `keys`.
    pub key_count: u16,
    /// Minimum spacing, in seconds, between consecutive sparse index
    /// checkpoints in newly created shards.
    pub index_interval: u32,
    /// The shard period every archive in this database is aligned to.
    pub archive_range: ArchiveRange,
    /// Every shard ever created in this database, in creation order.
    pub archives: Vec<ShardDescriptor>,
    /// The column schema shared by every shard's records.
    pub keys: Vec<Column>,
}

impl CatalogData {
    /// Builds a fresh, empty catalog for a newly created database.
    pub fn new(database_name: impl Into<String>, archive_range: ArchiveRange) -> Self {
        Self {
            magic: CATALOG_MAGIC.to_string(),
            revision: CURRENT_REVISION,
            database_name: database_name.into(),
            archive_count: 0,
            key_count: 0,
            index_interval: 3600,
            archive_range,
            archives: Vec::new(),
            keys: Vec::new(),
        }
    }
}

impl Encode for CatalogData {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.revision.encode_to(buf)?;
        self.database_name.encode_to(buf)?;
        self.archive_count.encode_to(buf)?;
        self.key_count.encode_to(buf)?;
        self.index_interval.encode_to(buf)?;
        self.archive_range.encode_to(buf)?;
        encoding::encode_items(&self.archives, buf)?;
        encoding::encode_items(&self.keys, buf)?;
        Ok(())
    }
}

impl Decode for CatalogData {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (magic, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (revision, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (database_name, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (archive_count, n) = u16::decode_from(&buf[offset..])?;
        offset += n;
        let (key_count, n) = u16::decode_from(&buf[offset..])?;
        offset += n;
        let (index_interval, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (archive_range, n) = ArchiveRange::decode_from(&buf[offset..])?;
        offset += n;
        let (archives, n) =
            encoding::decode_items::<ShardDescriptor>(buf, offset, archive_count as usize)?;
        offset += n;
        let (keys, n) = encoding::decode_items::<Column>(buf, offset, key_count as usize)?;
        offset += n;
        Ok((
            CatalogData {
                magic,
                revision,
                database_name,
                archive_count,
                key_count,
                index_interval,
                archive_range,
                archives,
                keys,
            },
            offset,
        ))
    }
}
