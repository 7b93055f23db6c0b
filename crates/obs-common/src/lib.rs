//! Common types and utilities shared by the station ingestion pipeline.

pub mod error;
pub mod observation;
pub mod station;
pub mod time;

pub use error::{ErrorKind, ObsError, ObsResult};
pub use observation::{CanonicalVariable, FeedResult, Observation, Readings, TrackPoint};
pub use station::{GeoPoint, Station, StationKind, StationStatus, Status, DEFAULT_ICON};
pub use time::{hour_boundaries_crossed, render_template, TemplateDates};
