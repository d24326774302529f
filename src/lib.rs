//! # strydb
//!
//! An embeddable time-series database: fixed-width columnar shards with a
//! sparse time index, grouped under a per-database catalog.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Session                            │
//! │   new / load / add / bulk_add / query / add_key           │
//! └───────────────────────────┬────────────────────────────────┘
//!                             │ locate / create shard
//! ┌───────────────────────────▼────────────────────────────────┐
//! │                   Catalog (db.strdr)                       │
//! │   shard period alignment, column schema, shard descriptors │
//! └───────────────────────────┬────────────────────────────────┘
//!                             │ append / seek+scan
//! ┌───────────────────────────▼────────────────────────────────┐
//! │                Archive Store (achv_i*_r*.*)                │
//! │   fixed-width record file + sparse index header            │
//! └───────────────────────────┬────────────────────────────────┘
//!                             │ encode / decode
//! ┌───────────────────────────▼────────────────────────────────┐
//! │                         Encoding                            │
//! │   little-endian primitives, length-prefixed strings/vecs   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes flow `Session → Catalog → Archive Store → Encoding`. Reads
//! reverse the flow: the Archive Store seeks to the nearest sparse-index
//! checkpoint at or before the query start, then scans forward.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`session`] | The façade: open/create a database, add points, bulk-ingest, range-query, evolve the schema |
//! | [`catalog`] | Owns `db.strdr`: shard period alignment, column schema, shard descriptors |
//! | [`archive`] | A single shard's fixed-width record file plus its sparse time index |
//! | [`encoding`] | The binary wire codec every on-disk structure is built from |
//! | [`fsutil`] | Crash-safe file swap and directory fsync helpers shared by the catalog and archive layers |
//!
//! ## Key Features
//!
//! - **Fixed-width columnar records** — a shard's schema is known up
//!   front, so every record is `timestamp + Σ(column widths)` bytes,
//!   with no per-record framing overhead.
//! - **Sparse time index** — each shard's header carries checkpoints no
//!   more often than once per `indexInterval` seconds, so a range read
//!   seeks once and scans forward instead of reading the whole shard.
//! - **Crash-safe catalog writes** — every catalog mutation backs up the
//!   previous `db.strdr` to `db.strdr.old` before rewriting, and falls
//!   back to rebuilding from the archive shards themselves if both copies
//!   are unreadable.
//! - **Online schema evolution** — [`session::Session::add_key`] appends
//!   a typed column and widens only the shard covering the current time,
//!   keeping the cost of adding a column independent of history size.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use strydb::archive::{ArchiveRange, ColumnType, Value};
//! use strydb::session::{Session, SessionConfig};
//!
//! let session = Session::new(
//!     "/tmp",
//!     "sensors",
//!     SessionConfig { archive_range: ArchiveRange::Week, index_interval: 3600 },
//! ).unwrap();
//!
//! session.add_key("temperature", ColumnType::Float32).unwrap();
//!
//! let mut fields = HashMap::new();
//! fields.insert("temperature".to_string(), Some(Value::Float32(21.5)));
//! session.add(1_715_355_030, &fields).unwrap();
//!
//! let result = session.query(0, u32::MAX, Some("temperature"), false, false).unwrap();
//! ```

#![allow(dead_code)]

pub mod archive;
pub mod catalog;
pub mod encoding;
pub mod fsutil;
pub mod session;
