//! On-disk layout of the cache root.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;

/// Resolves every cache artifact path below a root directory.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn latest_snapshot(&self) -> PathBuf {
        self.root.join("latest").join("latest.json")
    }

    pub fn latest_station(&self, station_id: &str) -> PathBuf {
        self.root
            .join("latest")
            .join("stations")
            .join(format!("{}.json", station_file_stem(station_id)))
    }

    pub fn hourly_dir(&self) -> PathBuf {
        self.root.join("hourly")
    }

    pub fn hourly_manifest(&self) -> PathBuf {
        self.hourly_dir().join("manifest.json")
    }

    pub fn hourly_generation(&self, generation: u64) -> PathBuf {
        self.hourly_dir().join(format!("gen-{}.json", generation))
    }

    pub fn long_term_dir(&self, station_id: &str) -> PathBuf {
        self.root.join("long_term").join(station_file_stem(station_id))
    }

    pub fn long_term_day(&self, station_id: &str, day: NaiveDate) -> PathBuf {
        self.long_term_dir(station_id)
            .join(format!("{}.jsonl", day.format("%Y-%m-%d")))
    }

    pub fn status_dir(&self) -> PathBuf {
        self.root.join("station_status")
    }

    pub fn status_view(&self, view: &str) -> PathBuf {
        self.status_dir().join(format!("{}.json", view))
    }

    /// All three status views in one document.
    pub fn status_index(&self) -> PathBuf {
        self.status_dir().join("index.json")
    }

    pub fn cycle_state(&self) -> PathBuf {
        self.root.join("state.json")
    }
}

/// File-name stem used for a station's per-station artifacts.
///
/// Characters outside `[A-Za-z0-9._-]` become `_` and leading dots are
/// dropped, so distinct ids can share a stem; the station registry rejects
/// such sets.
pub fn station_file_stem(station_id: &str) -> String {
    station_id
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
