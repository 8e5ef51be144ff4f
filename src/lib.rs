//! # sageTSDB
//!
//! A high-throughput **time-series database** optimized for streaming
//! join workloads, built on a **Log-Structured Merge Tree (LSM-tree)**
//! storage engine. Designed for fast appends, crash-safe operation, and
//! windowed joins over multiple event streams.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                       TableManager                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌────────────────────┐  │
//! │  │  Stream      │  │  Stream     │  │  JoinResult        │  │
//! │  │  table S     │  │  table R    │  │  table             │  │
//! │  └──────┬──────┘  └──────┬──────┘  └─────────▲──────────┘  │
//! │         │ insert          │ insert            │ result row  │
//! └─────────┼─────────────────┼───────────────────┼────────────┘
//!           │ notify          │ notify            │
//!           ▼                 ▼                   │
//!   ┌───────────────────────────────┐   ┌─────────┴─────────┐
//!   │        WindowScheduler        │──►│   ComputeEngine   │
//!   │  watermark · triggers · heap  │   │  operator per win │
//!   └───────────────┬───────────────┘   └─────────▲─────────┘
//!                   │ submit_task                 │ workers
//!                   ▼                             │
//!   ┌───────────────────────────────────────────────────────┐
//!   │      ResourceManager  (thread / memory quotas)        │
//!   └───────────────────────────────────────────────────────┘
//!
//!   Every stream table owns an LSM engine:
//!   WAL → memtable → immutable memtable → L0 → leveled SSTables
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`record`] | Record model — timestamps, scalar/vector values, tags, time ranges |
//! | [`encoding`] | Deterministic little-endian wire format behind every on-disk byte |
//! | [`bloom`] | Timestamp bloom filters embedded in each SSTable |
//! | [`wal`] | Write-ahead log with crash-tolerant replay |
//! | [`memtable`] | Bounded in-memory sorted write buffer |
//! | [`sstable`] | Immutable on-disk tables — bloom + index + data blocks |
//! | [`lsm`] | The LSM engine — flush, leveled compaction, recovery, statistics |
//! | [`tsindex`] | Append-then-sort archival index with tag inverted indices |
//! | [`table`] | Multi-table layer — stream tables, join results, compute state |
//! | [`resource`] | Global thread/memory quotas and per-consumer worker pools |
//! | [`compute`] | Stateless windowed-join executor over pluggable operators |
//! | [`scheduler`] | Window lifecycle, watermarks, trigger policies, dispatch |
//! | [`archive`] | Legacy `.tsdb` snapshots and checkpoint management |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every insert is durable in the WAL before
//!   it becomes visible; recovery replays the log on open.
//! - **Leveled compaction** — L0 accepts overlapping flushes; deeper
//!   levels stay range-disjoint, merged by a background worker.
//! - **Bloom-filtered reads** — negative point lookups skip SSTables
//!   without touching their indices.
//! - **Windowed joins** — tumbling, sliding, and session windows over
//!   two streams, with exact and approximate (AQP) join operators and
//!   timeout fallback.
//! - **Resource governance** — all background work flows through
//!   quota-checked worker pools.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sage_tsdb::record::{Record, TimeRange};
//! use sage_tsdb::table::{TableManager, TableManagerConfig};
//!
//! let db = TableManager::new(TableManagerConfig::default());
//! db.create_pecj_tables("demo_").unwrap();
//!
//! let stream = db.get_stream_table("demo_stream_s").unwrap();
//! stream
//!     .insert(Record::new_scalar(1_000, 42.0).with_tag("key", "1"))
//!     .unwrap();
//!
//! let hits = stream
//!     .query(TimeRange::new(0, 2_000), &Default::default())
//!     .unwrap();
//! assert_eq!(hits.len(), 1);
//! ```

pub mod archive;
pub mod bloom;
pub mod compute;
pub mod encoding;
pub mod lsm;
pub mod memtable;
pub mod record;
pub mod resource;
pub mod scheduler;
pub mod sstable;
pub mod table;
pub mod tsindex;
pub mod wal;
