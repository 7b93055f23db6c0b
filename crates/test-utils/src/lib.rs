//! Fixtures shared by the ingestion and service test suites.
//!
//! Stations are built with [`StationBuilder`], feeds with [`feed_ending_at`],
//! and adapters are scripted per station with [`MockAdapter`]. Station
//! configuration files can be written into a temporary directory with
//! [`write_station_file`].
//!
//! ```ignore
//! use test_utils::{feed_ending_at, reference_time, MockAdapter, MockReply, StationBuilder};
//!
//! let mock = MockAdapter::new("mock")
//!     .with_reply("pier", MockReply::Feed(feed_ending_at(reference_time(), 3)));
//! ```

pub mod fixtures;
pub mod mock;

pub use fixtures::*;
pub use mock::{MockAdapter, MockReply};

/// Approximate floating-point equality, for readings that went through unit
/// conversion or `scale_factor`/`add_offset` packing.
///
/// ```ignore
/// assert_approx_eq!(result.wind_speed.unwrap(), 6.3, 1e-9);
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                concat!(
                    "assertion failed: `(left ≈ right)`\n",
                    "  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`"
                ),
                left, right, diff, epsilon
            );
        }
    }};
}

/// Approximate equality of two `(lat, lon)` positions.
///
/// ```ignore
/// use test_utils::assert_position_approx_eq;
///
/// assert_position_approx_eq!(result.position(), (60.0, 5.0), 1e-6);
/// ```
#[macro_export]
macro_rules! assert_position_approx_eq {
    ($actual:expr, ($lat:expr, $lon:expr), $epsilon:expr) => {{
        let (lat, lon): (f64, f64) = match $actual {
            Some(position) => position,
            None => panic!("assertion failed: expected a position, got None"),
        };
        $crate::assert_approx_eq!(lat, $lat, $epsilon);
        $crate::assert_approx_eq!(lon, $lon, $epsilon);
    }};
}
