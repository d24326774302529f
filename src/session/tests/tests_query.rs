//! Tests for [`Session::query`]'s four output shapes.

use std::collections::{BTreeMap, HashMap};

use tempfile::TempDir;

use crate::archive::{ArchiveRange, ColumnType, Value};
use crate::session::{QueryResult, Session, SessionConfig};

const DAY: u32 = 86_400;

fn new_session(root: &TempDir) -> Session {
    let session = Session::new(
        root.path(),
        "db1",
        SessionConfig {
            archive_range: ArchiveRange::Week,
            index_interval: 3600,
        },
    )
    .unwrap();
    session.add_key("v", ColumnType::Float32).unwrap();
    session
}

fn points(session: &Session) {
    let mut batch = BTreeMap::new();
    for (t, v) in [(1_000u32, 1.0f32), (2_000, 2.0), (3_000, 3.0)] {
        let mut fields = HashMap::new();
        fields.insert("v".to_string(), Some(Value::Float32(v)));
        batch.insert(t, fields);
    }
    session.bulk_add(&batch).unwrap();
}

#[test]
fn raw_query_returns_unlabeled_rows_in_order() {
    let root = TempDir::new().unwrap();
    let session = new_session(&root);
    points(&session);

    let rows = match session.query(0, DAY, None, true, false).unwrap() {
        QueryResult::Raw(rows) => rows,
        other => panic!("expected Raw, got {other:?}"),
    };
    let timestamps: Vec<u32> = rows.iter().map(|r| r.timestamp).collect();
    assert_eq!(timestamps, vec![1_000, 2_000, 3_000]);
}

#[test]
fn record_query_returns_named_maps() {
    let root = TempDir::new().unwrap();
    let session = new_session(&root);
    points(&session);

    let records = match session.query(0, DAY, None, false, false).unwrap() {
        QueryResult::Records(records) => records,
        other => panic!("expected Records, got {other:?}"),
    };
    assert_eq!(records.len(), 3);
    assert_eq!(records[1].get("v"), Some(&Value::Float32(2.0)));
}

#[test]
fn keyed_query_returns_a_single_columns_series() {
    let root = TempDir::new().unwrap();
    let session = new_session(&root);
    points(&session);

    let series = match session.query(0, DAY, Some("v"), false, false).unwrap() {
        QueryResult::KeyedSeries(series) => series,
        other => panic!("expected KeyedSeries, got {other:?}"),
    };
    assert_eq!(
        series,
        vec![
            (1_000, Value::Float32(1.0)),
            (2_000, Value::Float32(2.0)),
            (3_000, Value::Float32(3.0)),
        ]
    );
}

#[test]
fn array_query_transposes_into_column_oriented_output() {
    let root = TempDir::new().unwrap();
    let session = new_session(&root);
    points(&session);

    match session.query(0, DAY, None, false, true).unwrap() {
        QueryResult::Arrays { time, columns } => {
            assert_eq!(time, vec![1_000, 2_000, 3_000]);
            assert_eq!(
                columns.get("v"),
                Some(&vec![
                    Value::Float32(1.0),
                    Value::Float32(2.0),
                    Value::Float32(3.0)
                ])
            );
        }
        other => panic!("expected Arrays, got {other:?}"),
    }
}

#[test]
fn query_range_is_half_open() {
    let root = TempDir::new().unwrap();
    let session = new_session(&root);
    points(&session);

    let rows = match session.query(1_000, 2_000, None, true, false).unwrap() {
        QueryResult::Raw(rows) => rows,
        other => panic!("expected Raw, got {other:?}"),
    };
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].timestamp, 1_000);
}

#[test]
fn query_with_no_matching_shard_returns_empty() {
    let root = TempDir::new().unwrap();
    let session = new_session(&root);
    points(&session);

    let rows = match session.query(10 * DAY, 11 * DAY, None, true, false).unwrap() {
        QueryResult::Raw(rows) => rows,
        other => panic!("expected Raw, got {other:?}"),
    };
    assert!(rows.is_empty());
}
