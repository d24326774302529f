//! Tests for the `db.strdr` catalog wire structure.

use crate::archive::{ArchiveRange, Column, ColumnType, ShardDescriptor};
use crate::catalog::types::*;
use crate::encoding::{decode_from_slice, encode_to_vec};

#[test]
fn new_catalog_has_expected_defaults() {
    let data = CatalogData::new("mydb", ArchiveRange::Week);
    assert_eq!(data.magic, CATALOG_MAGIC);
    assert_eq!(data.database_name, "mydb");
    assert_eq!(data.archive_count, 0);
    assert_eq!(data.key_count, 0);
    assert_eq!(data.index_interval, 3600);
    assert_eq!(data.archive_range, ArchiveRange::Week);
    assert!(data.archives.is_empty());
    assert!(data.keys.is_empty());
}

#[test]
fn roundtrip_catalog_data() {
    let mut data = CatalogData::new("sensors", ArchiveRange::Day);
    data.keys.push(Column::new("temp", ColumnType::Float32));
    data.keys.push(Column::new("active", ColumnType::Bool));
    data.key_count = data.keys.len() as u16;
    data.archives.push(ShardDescriptor {
        min_range: 0,
        max_range: 86_400,
        index: 1,
        resolution: 0,
    });
    data.archive_count = data.archives.len() as u16;

    let bytes = encode_to_vec(&data).unwrap();
    let (decoded, consumed) = decode_from_slice::<CatalogData>(&bytes).unwrap();
    assert_eq!(decoded, data);
    assert_eq!(consumed, bytes.len());
}
