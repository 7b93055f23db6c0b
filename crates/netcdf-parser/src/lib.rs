//! NetCDF reader for station time-series feeds.
//!
//! Station feeds (vessel-mounted and lighthouse sensors) are published as
//! NetCDF files with a single unlimited `time` dimension and one 1-D
//! variable per measured quantity. Mobile feeds additionally carry
//! `latitude`/`longitude` along the same axis.
//!
//! Reading goes through the native `netcdf` library, which also understands
//! OPeNDAP URLs when libnetcdf was built with DAP support.

pub mod error;
pub mod native;
pub mod units;

pub use error::{NetCdfError, NetCdfResult};
pub use native::{
    read_series, read_series_from_bytes, silence_hdf5_errors, SeriesRequest, TimeSeries,
};
pub use units::TimeUnits;
