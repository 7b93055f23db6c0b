//! Station observation ingestion.
//!
//! Ties the adapters to the cache tiers. It handles:
//!
//! - Loading and reloading station definitions ([`StationRegistry`])
//! - Deriving online/offline status from observation age ([`StatusTracker`])
//! - Running one ingestion cycle over every station ([`CycleDriver`])
//!
//! Scheduling is left to the caller: the driver only knows how to run a
//! single cycle and whether an hour boundary was crossed since the last one.

pub mod cycle;
pub mod stations;
pub mod status;

pub use cycle::{CycleDriver, CycleOptions, CycleReport, StationFailure, StationOutcome};
pub use stations::{parse_station_file, StationRegistry, StationSet};
pub use status::{StalenessPolicy, StatusTracker};
