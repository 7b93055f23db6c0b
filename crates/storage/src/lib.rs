//! Cache tiers for ingested station observations.
//!
//! All tiers live under one filesystem root and are written by a single
//! ingestion process while any number of readers poll them:
//! - `latest/`: the latest snapshot, keyed by station id
//! - `hourly/`: 24 rolling hourly snapshots behind a manifest
//! - `long_term/<station>/<YYYY-MM-DD>.jsonl`: per-station per-day series
//! - `station_status/`: all/online/offline status views
//!
//! Every file is replaced by write-to-temporary, fsync, rename, so a reader
//! sees either the previous or the new version, never a partial one.

pub mod hourly;
pub mod layout;
pub mod long_term;
pub mod publish;
pub mod status_index;
pub mod writer;

pub use hourly::{HourlyManifest, Snapshot, HOURLY_BUCKETS};
pub use layout::{station_file_stem, CacheLayout};
pub use status_index::{StatusEntry, StatusIndex, StatusLocation, StatusViews};
pub use writer::{CacheWriter, CycleState};
