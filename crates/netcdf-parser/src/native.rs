//! Time-series reading through libnetcdf.
//!
//! libnetcdf only opens paths and URLs, so downloaded payloads are spilled to
//! a scratch file first, preferring the `/dev/shm` tmpfs when it is writable.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Once;

use chrono::{DateTime, Utc};
use netcdf::AttributeValue;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{NetCdfError, NetCdfResult};
use crate::units::TimeUnits;

/// Values at or above this magnitude are libnetcdf default fill values.
const NC_DEFAULT_FILL_THRESHOLD: f64 = 9.9e36;

/// Turn off HDF5's default error stack printing. Idempotent.
pub fn silence_hdf5_errors() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // SAFETY: a null handler with null client data disables auto printing.
        unsafe {
            hdf5_metno_sys::h5e::H5Eset_auto2(
                hdf5_metno_sys::h5e::H5E_DEFAULT,
                None,
                std::ptr::null_mut(),
            );
        }
    });
}

/// Which variables to pull out of a feed.
#[derive(Debug, Clone)]
pub struct SeriesRequest {
    pub time_var: String,
    /// `(latitude, longitude)` variable names for mobile feeds.
    pub position_vars: Option<(String, String)>,
    /// Source-native names of the measured quantities.
    pub variables: Vec<String>,
}

impl SeriesRequest {
    pub fn new(variables: Vec<String>) -> Self {
        Self {
            time_var: "time".to_string(),
            position_vars: None,
            variables,
        }
    }

    pub fn with_position(mut self, lat: &str, lon: &str) -> Self {
        self.position_vars = Some((lat.to_string(), lon.to_string()));
        self
    }
}

/// Column-oriented samples along the time axis.
///
/// Every column has the same length as `times`. Missing, fill and NaN values
/// are `None`.
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    pub times: Vec<Option<DateTime<Utc>>>,
    pub lat: Option<Vec<Option<f64>>>,
    pub lon: Option<Vec<Option<f64>>>,
    pub columns: HashMap<String, Vec<Option<f64>>>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn value(&self, column: &str, index: usize) -> Option<f64> {
        self.columns.get(column)?.get(index).copied().flatten()
    }

    pub fn position(&self, index: usize) -> Option<(f64, f64)> {
        let lat = self.lat.as_ref()?.get(index).copied().flatten()?;
        let lon = self.lon.as_ref()?.get(index).copied().flatten()?;
        Some((lat, lon))
    }
}

/// Read a time series from a local path or an OPeNDAP URL.
pub fn read_series(location: &str, request: &SeriesRequest) -> NetCdfResult<TimeSeries> {
    silence_hdf5_errors();

    let nc_file = netcdf::open(location).map_err(|e| NetCdfError::Unavailable {
        location: location.to_string(),
        reason: e.to_string(),
    })?;

    extract_series(&nc_file, request)
}

/// Read a time series from in-memory NetCDF bytes.
pub fn read_series_from_bytes(data: &[u8], request: &SeriesRequest) -> NetCdfResult<TimeSeries> {
    silence_hdf5_errors();

    let scratch = spill(data)?;
    let nc_file = netcdf::open(scratch.path())
        .map_err(|e| NetCdfError::InvalidFormat(format!("Failed to open NetCDF: {}", e)))?;

    extract_series(&nc_file, request)
}

fn extract_series(nc_file: &netcdf::File, request: &SeriesRequest) -> NetCdfResult<TimeSeries> {
    let time_var = nc_file
        .variable(&request.time_var)
        .ok_or_else(|| NetCdfError::MissingData(format!("{} variable", request.time_var)))?;

    let units = match attribute(&time_var, "units") {
        Some(AttributeValue::Str(units)) => TimeUnits::parse(&units)?,
        _ => TimeUnits::default(),
    };

    let raw_times: Vec<f64> = time_var
        .get_values(..)
        .map_err(|e| NetCdfError::InvalidFormat(format!("Failed to read time: {}", e)))?;
    let times: Vec<Option<DateTime<Utc>>> =
        raw_times.iter().map(|&v| units.to_datetime(v)).collect();
    let len = times.len();

    let (lat, lon) = match &request.position_vars {
        Some((lat_name, lon_name)) => (
            Some(read_column(nc_file, lat_name, len)?),
            Some(read_column(nc_file, lon_name, len)?),
        ),
        None => (None, None),
    };

    let mut columns = HashMap::with_capacity(request.variables.len());
    for name in &request.variables {
        if columns.contains_key(name) {
            continue;
        }
        columns.insert(name.clone(), read_column(nc_file, name, len)?);
    }

    debug!(samples = len, columns = columns.len(), "Read NetCDF time series");

    Ok(TimeSeries {
        times,
        lat,
        lon,
        columns,
    })
}

/// Read a 1-D variable along the time axis, applying CF packing attributes.
fn read_column(
    nc_file: &netcdf::File,
    name: &str,
    expected_len: usize,
) -> NetCdfResult<Vec<Option<f64>>> {
    let var = nc_file
        .variable(name)
        .ok_or_else(|| NetCdfError::MissingData(format!("{} variable", name)))?;

    let raw: Vec<f64> = var
        .get_values(..)
        .map_err(|e| NetCdfError::InvalidFormat(format!("Failed to read {}: {}", name, e)))?;

    if raw.len() != expected_len {
        return Err(NetCdfError::InvalidFormat(format!(
            "{} has {} values but the time axis has {}",
            name,
            raw.len(),
            expected_len
        )));
    }

    let number = |attr: &str| attribute(&var, attr).and_then(|v| f64::try_from(v).ok());
    let scale_factor = number("scale_factor").unwrap_or(1.0);
    let add_offset = number("add_offset").unwrap_or(0.0);
    let fill_value = number("_FillValue");
    let missing_value = number("missing_value");

    Ok(raw
        .into_iter()
        .map(|val| {
            if !val.is_finite()
                || val.abs() >= NC_DEFAULT_FILL_THRESHOLD
                || Some(val) == fill_value
                || Some(val) == missing_value
            {
                None
            } else {
                Some(val * scale_factor + add_offset)
            }
        })
        .collect())
}

const SHM_DIR: &str = "/dev/shm";

/// Write `data` to a scratch file that is deleted when the handle drops.
fn spill(data: &[u8]) -> NetCdfResult<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("station_feed_").suffix(".nc");

    let mut file = match builder.tempfile_in(SHM_DIR) {
        Ok(file) => file,
        Err(_) => builder.tempfile()?,
    };
    file.write_all(data)?;
    file.flush()?;
    Ok(file)
}

/// Look an attribute up by name without asking HDF5 for one that is absent.
fn attribute(var: &netcdf::Variable, name: &str) -> Option<AttributeValue> {
    var.attributes()
        .find(|attr| attr.name() == name)?
        .value()
        .ok()
}
