//! Reader-visible behaviour of the cache tiers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use obs_common::{CanonicalVariable, FeedResult, Observation};
use storage::{CacheWriter, Snapshot, HOURLY_BUCKETS};
use test_utils::{assert_approx_eq, assert_position_approx_eq};

fn feed(wind: f64, points: usize) -> FeedResult {
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let track: Vec<Observation> = (0..points)
        .map(|i| {
            Observation::new(start + Duration::minutes(i as i64))
                .at(60.0 + i as f64 * 0.01, 5.0)
                .with(CanonicalVariable::WindSpeed, Some(wind))
        })
        .collect();
    let latest = track.last().cloned().unwrap();
    FeedResult::new(track, latest)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reader_never_sees_partial_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let writer = Arc::new(CacheWriter::open(dir.path()).await.unwrap());
    let path = writer.layout().latest_snapshot();
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let done = done.clone();
        tokio::task::spawn_blocking(move || {
            let mut reads = 0usize;
            while !done.load(Ordering::Relaxed) {
                match std::fs::read(&path) {
                    Ok(bytes) => {
                        serde_json::from_slice::<Snapshot>(&bytes)
                            .expect("reader observed a partially written snapshot");
                        reads += 1;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => panic!("unexpected read error: {e}"),
                }
            }
            reads
        })
    };

    let mut writers = Vec::new();
    for station in 0..4 {
        let writer = writer.clone();
        writers.push(tokio::spawn(async move {
            for i in 0..50 {
                writer
                    .write_latest(&format!("station_{station}"), &feed(i as f64, 200))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in writers {
        handle.await.unwrap();
    }
    done.store(true, Ordering::Relaxed);
    reader.await.unwrap();

    let snapshot = writer.read_latest().await.unwrap();
    assert_eq!(snapshot.len(), 4);
    for result in snapshot.values() {
        assert_approx_eq!(result.wind_speed.unwrap(), 49.0, 1e-9);
        assert_position_approx_eq!(result.latest.position(), (61.99, 5.0), 1e-9);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rotation_interleaved_with_writes_keeps_whole_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let writer = Arc::new(CacheWriter::open(dir.path()).await.unwrap());

    let writes = {
        let writer = writer.clone();
        tokio::spawn(async move {
            for i in 0..40 {
                writer.write_latest("a", &feed(i as f64, 10)).await.unwrap();
                writer.write_latest("b", &feed(i as f64, 10)).await.unwrap();
            }
        })
    };
    for _ in 0..30 {
        writer.rotate_hourly().await.unwrap();
        tokio::task::yield_now().await;
    }
    writes.await.unwrap();

    for k in 1..=HOURLY_BUCKETS {
        if let Some(bucket) = writer.read_bucket(k).await.unwrap() {
            assert!(bucket.len() <= 2);
        }
    }
}

#[tokio::test]
async fn hourly_tier_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let writer = CacheWriter::open(dir.path()).await.unwrap();
        writer.write_latest("a", &feed(1.0, 1)).await.unwrap();
        writer.rotate_hourly().await.unwrap();
    }

    let writer = CacheWriter::open(dir.path()).await.unwrap();
    writer.write_latest("a", &feed(2.0, 1)).await.unwrap();
    writer.rotate_hourly().await.unwrap();

    assert_eq!(writer.read_bucket(1).await.unwrap().unwrap()["a"].wind_speed, Some(2.0));
    assert_eq!(writer.read_bucket(2).await.unwrap().unwrap()["a"].wind_speed, Some(1.0));
}

#[tokio::test]
async fn corrupt_latest_snapshot_does_not_block_startup() {
    let dir = tempfile::tempdir().unwrap();
    let latest = dir.path().join("latest");
    std::fs::create_dir_all(&latest).unwrap();
    std::fs::write(latest.join("latest.json"), b"{ not json").unwrap();

    let writer = CacheWriter::open(dir.path()).await.unwrap();
    assert!(writer.latest_snapshot().await.is_empty());
    assert!(writer.read_latest().await.is_err());

    writer.write_latest("a", &feed(1.0, 1)).await.unwrap();
    assert_eq!(writer.read_latest().await.unwrap().len(), 1);
}

#[tokio::test]
async fn long_term_spans_midnight() {
    let dir = tempfile::tempdir().unwrap();
    let writer = CacheWriter::open(dir.path()).await.unwrap();

    let before = Utc.with_ymd_and_hms(2024, 6, 1, 23, 50, 0).unwrap();
    let after = Utc.with_ymd_and_hms(2024, 6, 2, 0, 10, 0).unwrap();
    let added = writer
        .append_long_term_all(
            "boat",
            &[Observation::new(before), Observation::new(after)],
            after,
        )
        .await
        .unwrap();
    assert_eq!(added, 2);

    assert!(writer.layout().long_term_day("boat", before.date_naive()).exists());
    assert!(writer.layout().long_term_day("boat", after.date_naive()).exists());

    let first = writer
        .read_long_term("boat", before.date_naive(), before.date_naive())
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].time, before);
}

#[tokio::test]
async fn past_day_series_is_never_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    let writer = CacheWriter::open(dir.path()).await.unwrap();

    let first = Utc.with_ymd_and_hms(2024, 6, 1, 23, 50, 0).unwrap();
    let straggler = Utc.with_ymd_and_hms(2024, 6, 1, 23, 58, 0).unwrap();
    let midnight = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();

    let obs = |time| {
        Observation::new(time).with(CanonicalVariable::AirTemperature, Some(12.5))
    };

    // Written while 2024-06-01 is still the current day.
    let added = writer.append_long_term_all("boat", &[obs(first)], first).await.unwrap();
    assert_eq!(added, 1);
    let day_one = writer.layout().long_term_day("boat", first.date_naive());
    let sealed = std::fs::read(&day_one).unwrap();

    // Next cycle runs after midnight and refetches an overlapping window.
    let added = writer
        .append_long_term_all("boat", &[obs(first), obs(straggler), obs(midnight)], midnight)
        .await
        .unwrap();
    assert_eq!(added, 1);

    assert_eq!(std::fs::read(&day_one).unwrap(), sealed);
    assert!(writer.layout().long_term_day("boat", midnight.date_naive()).exists());

    let day = writer
        .read_long_term("boat", first.date_naive(), first.date_naive())
        .await
        .unwrap();
    assert_eq!(day.len(), 1);
    assert_eq!(day[0].time, first);
    assert_approx_eq!(day[0].readings.air_temperature.unwrap(), 12.5, 1e-9);
}

#[tokio::test]
async fn missing_past_day_is_backfilled_once() {
    let dir = tempfile::tempdir().unwrap();
    let writer = CacheWriter::open(dir.path()).await.unwrap();

    let yesterday = Utc.with_ymd_and_hms(2024, 6, 1, 22, 0, 0).unwrap();
    let later = Utc.with_ymd_and_hms(2024, 6, 1, 22, 10, 0).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 6, 2, 6, 0, 0).unwrap();

    let added = writer
        .append_long_term_all("boat", &[Observation::new(yesterday)], now)
        .await
        .unwrap();
    assert_eq!(added, 1);

    let added = writer
        .append_long_term_all("boat", &[Observation::new(later)], now)
        .await
        .unwrap();
    assert_eq!(added, 0);
    let day = writer
        .read_long_term("boat", yesterday.date_naive(), yesterday.date_naive())
        .await
        .unwrap();
    assert_eq!(day.len(), 1);
}
