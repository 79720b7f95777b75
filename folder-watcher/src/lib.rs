//! # Folder Watcher
//!
//! This crate keeps a catalog of "materials" (metadata records for files)
//! in sync with a single watched folder and serves uploads, deletions and
//! reads against it.
//!
//! ## Features
//!
//! - **Single Watch**: One folder at a time, persisted across restarts
//! - **Polling Detection**: Periodic snapshots diffed into change events
//! - **Consistent Catalog**: Events applied under one writer lock
//! - **Safe Ingestion**: Uploads land atomically and update the catalog at once
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      WatchController                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  PathRegistry ──► DirectoryScanner ──► ChangeDetector           │
//! │       │                                      │                  │
//! │       ▼                                      ▼                  │
//! │  IngestionPipeline ──► ChangeEvent ──► MaterialCatalog          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod config;
pub mod controller;
pub mod detector;
pub mod error;
pub mod event;
pub mod ingest;
pub mod registry;
pub mod scanner;

pub use catalog::MaterialCatalog;
pub use config::{ScanFilter, WatchConfig};
pub use controller::{WatchController, WatchStatus};
pub use detector::{ChangeDetector, DetectorState, EventSink};
pub use error::{Result, WatcherError};
pub use event::{ChangeEvent, MaterialRecord, material_id};
pub use ingest::IngestionPipeline;
pub use registry::{JsonFileStore, KeyValueStore, MemoryStore, PathRegistry};
pub use scanner::{DirectoryScanner, ScanEntry, Snapshot};
