//! Source adapters for station observation feeds.
//!
//! Every provider is wrapped behind the [`Adapter`] trait and registered by
//! name in an [`AdapterRegistry`]. The ingestion driver only ever resolves
//! adapters by the name configured on a station, so adding a provider means
//! registering one more implementation.
//!
//! Built-in adapters:
//! - `netcdf_boat`: vessel-mounted sensors published as daily NetCDF files
//! - `netcdf_lighthouse`: fixed shore sensors published as daily NetCDF files
//! - `frost`, `frost_boat`: MET Norway Frost observations API
//! - `holfuy`: Holfuy live weather station API
//! - `netatmo`: Netatmo public weather station API

pub mod contract;
pub mod frost;
pub mod holfuy;
pub mod http;
pub mod netatmo;
pub mod netcdf_feed;
pub mod registry;
pub mod template;
pub mod window;

pub use contract::{Adapter, FeedRequest};
pub use frost::FrostAdapter;
pub use holfuy::HolfuyAdapter;
pub use netatmo::NetatmoAdapter;
pub use netcdf_feed::{NetCdfBoatAdapter, NetCdfLighthouseAdapter};
pub use registry::{AdapterRegistry, AdapterSettings};
pub use template::resolve_with_fallback;
pub use window::{decimate_track, haversine_m, select_window};
