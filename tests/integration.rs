//! End-to-end tests against a real on-disk database directory, covering
//! the documented worked examples: single insert, sequence violation,
//! cross-shard bulk insert, corrupted catalog recovery, invalid
//! payloads, and schema evolution across a reload.

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::TempDir;

use strydb::archive::{ArchiveError, ArchiveRange, ColumnType, Value};
use strydb::session::{QueryResult, Session, SessionConfig, SessionError};

const MAY_10_1530_30: u32 = 1_715_355_030;
const MAY_10_1500_00: u32 = 1_715_353_200;
const MAY_10_1600_00: u32 = 1_715_356_800;
const MAY_10_1430_30: u32 = 1_715_351_430;
const MAY_11_1530_30: u32 = 1_715_441_430;
const MAY_12_1530_30: u32 = 1_715_527_830;
const MAY_13_1530_30: u32 = 1_715_614_230;
const MAY_13_1600_00: u32 = 1_715_616_000;
const MAY_11_1600_00: u32 = 1_715_443_200;

fn open_week_db(root: &TempDir, name: &str) -> Session {
    Session::new(
        root.path(),
        name,
        SessionConfig {
            archive_range: ArchiveRange::Week,
            index_interval: 3600,
        },
    )
    .unwrap()
}

fn point(v: f32) -> HashMap<String, Option<Value>> {
    let mut fields = HashMap::new();
    fields.insert("v".to_string(), Some(Value::Float32(v)));
    fields
}

fn raw_rows(session: &Session, start: u32, end: u32) -> Vec<strydb::archive::Row> {
    match session.query(start, end, None, true, false).unwrap() {
        QueryResult::Raw(rows) => rows,
        other => panic!("expected Raw, got {other:?}"),
    }
}

#[test]
fn add_key_single_insert_query() {
    let root = TempDir::new().unwrap();
    let session = open_week_db(&root, "db1");
    session.add_key("v", ColumnType::Float32).unwrap();
    session.add(MAY_10_1530_30, &point(5.0)).unwrap();

    let rows = raw_rows(&session, MAY_10_1500_00, MAY_10_1600_00);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].timestamp, MAY_10_1530_30);
    assert_eq!(rows[0].values, vec![Value::Float32(5.0)]);
}

#[test]
fn out_of_order_insert_raises_sequence_violation() {
    let root = TempDir::new().unwrap();
    let session = open_week_db(&root, "db1");
    session.add_key("v", ColumnType::Float32).unwrap();
    session.add(MAY_10_1530_30, &point(5.0)).unwrap();

    let err = session.add(MAY_10_1430_30, &point(5.0)).unwrap_err();
    assert!(matches!(
        err,
        SessionError::Archive(ArchiveError::SequenceViolation { new, last })
            if new == MAY_10_1430_30 && last == MAY_10_1530_30
    ));
}

#[test]
fn cross_shard_bulk_insert_and_subrange_query() {
    let root = TempDir::new().unwrap();
    let session = open_week_db(&root, "db1");
    session.add_key("v", ColumnType::Float32).unwrap();

    let mut batch = BTreeMap::new();
    batch.insert(MAY_10_1530_30, point(5.0));
    batch.insert(MAY_11_1530_30, point(5.0));
    batch.insert(MAY_12_1530_30, point(5.0));
    batch.insert(MAY_13_1530_30, point(5.0));
    session.bulk_add(&batch).unwrap();

    assert_eq!(raw_rows(&session, MAY_10_1500_00, MAY_13_1600_00).len(), 4);
    assert_eq!(raw_rows(&session, MAY_10_1500_00, MAY_11_1600_00).len(), 2);
}

#[test]
fn corrupted_catalog_recovers_via_backup_or_rebuild() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("db1");
    {
        let session = open_week_db(&root, "db1");
        session.add_key("v", ColumnType::Float32).unwrap();

        let mut batch = BTreeMap::new();
        batch.insert(MAY_10_1530_30, point(5.0));
        batch.insert(MAY_11_1530_30, point(5.0));
        batch.insert(MAY_12_1530_30, point(5.0));
        batch.insert(MAY_13_1530_30, point(5.0));
        session.bulk_add(&batch).unwrap();
    }

    let catalog_path = dir.join("db.strdr");
    let bytes = std::fs::read(&catalog_path).unwrap();
    std::fs::write(&catalog_path, &bytes[..bytes.len() / 2]).unwrap();

    let recovered = Session::load(root.path(), "db1").unwrap();
    assert_eq!(raw_rows(&recovered, MAY_10_1500_00, MAY_13_1600_00).len(), 4);
}

#[test]
fn corrupted_catalog_and_backup_falls_back_to_rebuild_from_shards() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("db1");
    {
        let session = open_week_db(&root, "db1");
        session.add_key("v", ColumnType::Float32).unwrap();
        session.add(MAY_10_1530_30, &point(5.0)).unwrap();
        // A second save (schema change) leaves a `.old` backup behind.
        session.add_key("w", ColumnType::Int32).unwrap();
    }

    std::fs::write(dir.join("db.strdr"), b"garbage not a catalog").unwrap();
    let backup = dir.join("db.strdr.old");
    if backup.exists() {
        std::fs::write(&backup, b"also garbage").unwrap();
    }

    let recovered = Session::load(root.path(), "db1").unwrap();
    let rows = raw_rows(&recovered, MAY_10_1500_00, MAY_10_1600_00);
    assert_eq!(rows.len(), 1);
}

#[test]
fn invalid_payloads_are_rejected() {
    let root = TempDir::new().unwrap();
    let session = open_week_db(&root, "db1");
    session.add_key("v", ColumnType::Float32).unwrap();

    let mut none_field = HashMap::new();
    none_field.insert("v".to_string(), None);
    let err = session.add(MAY_10_1530_30, &none_field).unwrap_err();
    assert!(matches!(err, SessionError::InvalidValue(ref name) if name == "v"));

    let err = session.add(MAY_10_1530_30, &HashMap::new()).unwrap_err();
    assert!(matches!(err, SessionError::EmptyPayload));
}

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as u32
}

#[test]
fn schema_evolution_widens_only_the_currently_active_shard() {
    let root = TempDir::new().unwrap();
    let t = now();
    let session = open_week_db(&root, "db1");
    session.add_key("v", ColumnType::Float32).unwrap();
    session.add(t, &point(5.0)).unwrap();

    // A historical shard predates "now" and is never widened; writing
    // the new column's data only works once a point lands in the
    // shard that was active when the column was added.
    session.add_key("w", ColumnType::Int32).unwrap();

    let mut fields = point(6.0);
    fields.insert("w".to_string(), Some(Value::Int32(3)));
    session.add(t, &fields).unwrap();

    let rows = raw_rows(&session, 0, u32::MAX);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].values, vec![Value::Float32(5.0), Value::Int32(0)]);
    assert_eq!(rows[1].values, vec![Value::Float32(6.0), Value::Int32(3)]);

    drop(session);
    let reloaded = Session::load(root.path(), "db1").unwrap();
    let rows = raw_rows(&reloaded, 0, u32::MAX);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].values, vec![Value::Float32(6.0), Value::Int32(3)]);
}
