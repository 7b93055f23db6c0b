//! Rolling hourly snapshots.
//!
//! Each rotation writes the current latest snapshot as a new immutable
//! generation file and then atomically publishes a manifest naming which
//! generation backs each of the 24 buckets. Readers resolve a bucket through
//! the manifest, so a rotation is a single rename from their point of view.
//! Generation files evicted by a rotation are deleted one rotation later, so
//! a reader holding the previous manifest can still open them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use obs_common::FeedResult;

/// Number of hourly buckets kept (-1 through -24).
pub const HOURLY_BUCKETS: usize = 24;

/// A full latest-snapshot document, keyed by station id.
pub type Snapshot = BTreeMap<String, FeedResult>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyManifest {
    pub updated_at: Option<DateTime<Utc>>,
    pub next_generation: u64,
    /// Index 0 is bucket -1. `None` is an empty bucket.
    pub buckets: Vec<Option<u64>>,
    /// Generations evicted by the last rotation, deleted on the next one.
    #[serde(default)]
    pub retired: Vec<u64>,
}

impl Default for HourlyManifest {
    fn default() -> Self {
        Self {
            updated_at: None,
            next_generation: 0,
            buckets: vec![None; HOURLY_BUCKETS],
            retired: Vec::new(),
        }
    }
}

/// Outcome of shifting the manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Rotation {
    pub manifest: HourlyManifest,
    /// Generation allocated for the fresh bucket -1.
    pub generation: u64,
    /// Generation files that can now be deleted.
    pub deletable: Vec<u64>,
}

impl HourlyManifest {
    /// Generation backing bucket `-k`, for `k` in `1..=24`.
    pub fn generation_for(&self, k: usize) -> Option<u64> {
        if k == 0 || k > HOURLY_BUCKETS {
            return None;
        }
        self.buckets.get(k - 1).copied().flatten()
    }

    /// Shift every bucket `steps` places toward older ages.
    ///
    /// The fresh generation becomes bucket -1, buckets -2 through
    /// -`steps` become empty, and anything shifted past -24 is evicted.
    /// `steps` larger than 24 behaves like 24.
    pub fn rotate(&self, steps: usize, now: DateTime<Utc>) -> Rotation {
        let steps = steps.clamp(1, HOURLY_BUCKETS);
        let generation = self.next_generation;

        let mut old = self.buckets.clone();
        old.resize(HOURLY_BUCKETS, None);

        let kept = HOURLY_BUCKETS - steps;
        let evicted: Vec<u64> = old[kept..].iter().flatten().copied().collect();

        let mut buckets = Vec::with_capacity(HOURLY_BUCKETS);
        buckets.push(Some(generation));
        buckets.extend(std::iter::repeat(None).take(steps - 1));
        buckets.extend_from_slice(&old[..kept]);

        Rotation {
            manifest: HourlyManifest {
                updated_at: Some(now),
                next_generation: generation + 1,
                buckets,
                retired: evicted,
            },
            generation,
            deletable: self.retired.clone(),
        }
    }
}
