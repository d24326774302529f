//! Lifecycle and schema-evolution tests for [`Session`].

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::TempDir;

use crate::archive::{ArchiveRange, ColumnType, Value};
use crate::session::{Session, SessionConfig, SessionError};

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as u32
}

fn config(range: ArchiveRange) -> SessionConfig {
    SessionConfig {
        archive_range: range,
        index_interval: 3600,
    }
}

#[test]
fn new_then_load_round_trips_an_empty_database() {
    let root = TempDir::new().unwrap();
    {
        Session::new(root.path(), "db1", config(ArchiveRange::Week)).unwrap();
    }
    Session::load(root.path(), "db1").unwrap();
}

#[test]
fn add_rejects_empty_payload() {
    let root = TempDir::new().unwrap();
    let session = Session::new(root.path(), "db1", config(ArchiveRange::Week)).unwrap();
    let err = session.add(now(), &HashMap::new()).unwrap_err();
    assert!(matches!(err, SessionError::EmptyPayload));
}

#[test]
fn add_rejects_explicit_none_value() {
    let root = TempDir::new().unwrap();
    let session = Session::new(root.path(), "db1", config(ArchiveRange::Week)).unwrap();
    session.add_key("v", ColumnType::Float32).unwrap();

    let mut fields = HashMap::new();
    fields.insert("v".to_string(), None);
    let err = session.add(now(), &fields).unwrap_err();
    assert!(matches!(err, SessionError::InvalidValue(name) if name == "v"));
}

#[test]
fn add_rejects_mismatched_value_type() {
    let root = TempDir::new().unwrap();
    let session = Session::new(root.path(), "db1", config(ArchiveRange::Week)).unwrap();
    session.add_key("v", ColumnType::Float32).unwrap();

    let mut fields = HashMap::new();
    fields.insert("v".to_string(), Some(Value::Int32(5)));
    let err = session.add(now(), &fields).unwrap_err();
    assert!(matches!(err, SessionError::InvalidValue(name) if name == "v"));
}

#[test]
fn add_backfills_missing_columns_with_zero() {
    let root = TempDir::new().unwrap();
    let session = Session::new(root.path(), "db1", config(ArchiveRange::Week)).unwrap();
    session.add_key("v", ColumnType::Float32).unwrap();
    session.add_key("flag", ColumnType::Bool).unwrap();

    let mut fields = HashMap::new();
    fields.insert("v".to_string(), Some(Value::Float32(1.5)));
    session.add(now(), &fields).unwrap();

    let records = match session.query(0, u32::MAX, None, false, false).unwrap() {
        crate::session::QueryResult::Records(records) => records,
        other => panic!("expected Records, got {other:?}"),
    };
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("v"), Some(&Value::Float32(1.5)));
    assert_eq!(records[0].get("flag"), Some(&Value::Bool(false)));
}

#[test]
fn add_key_rejects_duplicate_name() {
    let root = TempDir::new().unwrap();
    let session = Session::new(root.path(), "db1", config(ArchiveRange::Week)).unwrap();
    session.add_key("v", ColumnType::Float32).unwrap();
    let err = session.add_key("v", ColumnType::Int16).unwrap_err();
    assert!(matches!(err, SessionError::Catalog(_)));
}

#[test]
fn add_key_widens_only_the_currently_active_shard() {
    let root = TempDir::new().unwrap();
    let session = Session::new(root.path(), "db1", config(ArchiveRange::Week)).unwrap();
    session.add_key("v", ColumnType::Float32).unwrap();

    let t = now();
    let mut first = HashMap::new();
    first.insert("v".to_string(), Some(Value::Float32(1.0)));
    session.add(t, &first).unwrap();

    session.add_key("w", ColumnType::Int32).unwrap();

    let mut second = HashMap::new();
    second.insert("v".to_string(), Some(Value::Float32(2.0)));
    second.insert("w".to_string(), Some(Value::Int32(7)));
    session.add(t, &second).unwrap();

    let rows = match session.query(0, u32::MAX, None, true, false).unwrap() {
        crate::session::QueryResult::Raw(rows) => rows,
        other => panic!("expected Raw, got {other:?}"),
    };
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].values, vec![Value::Float32(1.0), Value::Int32(0)]);
    assert_eq!(rows[1].values, vec![Value::Float32(2.0), Value::Int32(7)]);
}

#[test]
fn set_index_interval_persists_via_the_catalog() {
    let root = TempDir::new().unwrap();
    let session = Session::new(root.path(), "db1", config(ArchiveRange::Week)).unwrap();
    session.set_index_interval(120, false).unwrap();

    drop(session);
    let reloaded = Session::load(root.path(), "db1").unwrap();
    // A fresh shard created after reload picks up the persisted interval;
    // observable indirectly via add succeeding without error.
    reloaded.add_key("v", ColumnType::Float32).unwrap();
    let mut fields = HashMap::new();
    fields.insert("v".to_string(), Some(Value::Float32(1.0)));
    reloaded.add(now(), &fields).unwrap();
}
