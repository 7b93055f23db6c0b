//! Full ingestion cycles against scripted adapters and a temporary cache.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use adapters::AdapterRegistry;
use ingestion::{CycleDriver, CycleOptions, StalenessPolicy, StationRegistry, StationSet};
use obs_common::{ErrorKind, Station, Status};
use storage::CacheWriter;
use test_utils::{
    assert_approx_eq, assert_position_approx_eq, feed_ending_at, reference_time, station_record,
    write_station_file, MockAdapter, MockReply, StationBuilder,
};

struct Harness {
    _dir: tempfile::TempDir,
    mock: Arc<MockAdapter>,
    driver: CycleDriver,
}

async fn harness(stations: Vec<Station>, mock: MockAdapter) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(mock);
    let mut adapters = AdapterRegistry::new();
    adapters.register("mock", mock.clone());

    let cache = Arc::new(CacheWriter::open(dir.path().join("cache")).await.unwrap());
    let registry = Arc::new(StationRegistry::from_set(StationSet::from_stations(stations)));
    let driver = CycleDriver::new(
        registry,
        adapters,
        cache,
        StalenessPolicy::default(),
        CycleOptions::default(),
    )
    .await;

    Harness { _dir: dir, mock, driver }
}

fn at_minutes(minutes: i64) -> DateTime<Utc> {
    reference_time() + Duration::minutes(minutes)
}

#[tokio::test]
async fn unavailable_station_does_not_block_others() {
    let now = reference_time();
    let mock = MockAdapter::new("mock")
        .with_reply("good", MockReply::Feed(feed_ending_at(now - Duration::minutes(5), 3)))
        .with_reply("down", MockReply::Unavailable)
        .with_reply("broken", MockReply::Malformed);
    let h = harness(
        vec![
            StationBuilder::fixed("good").build(),
            StationBuilder::fixed("down").build(),
            StationBuilder::fixed("broken").build(),
        ],
        mock,
    )
    .await;

    h.driver.run_cycle(now - Duration::minutes(30)).await;
    let report = h.driver.run_cycle(now).await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(report.failures_of(ErrorKind::SourceUnavailable), 1);
    assert_eq!(report.failures_of(ErrorKind::MalformedFeed), 1);
    assert_eq!(report.rotated_hours, 1, "11:30 -> 12:00 crosses one boundary");
    assert!(report.errors.is_empty());

    let cache = h.driver.cache();
    let latest = cache.read_latest().await.unwrap();
    assert_eq!(latest.keys().collect::<Vec<_>>(), vec!["good"]);
    assert_approx_eq!(latest["good"].wind_speed.unwrap(), 5.0, 1e-9);
    assert_position_approx_eq!(latest["good"].latest.position(), (60.0, 5.0), 1e-9);

    let status = cache.read_status_index().await.unwrap();
    assert_eq!(status.all.len(), 3);
    assert_eq!(status.online.keys().collect::<Vec<_>>(), vec!["good"]);
    assert_eq!(status.offline.len(), 2);

    let bucket = cache.read_bucket(1).await.unwrap().unwrap();
    assert!(bucket.contains_key("good"));
}

#[tokio::test]
async fn all_failing_cycle_still_indexes_and_rotates() {
    let h = harness(
        vec![StationBuilder::fixed("a").build(), StationBuilder::mobile("b").build()],
        MockAdapter::new("mock"),
    )
    .await;

    h.driver.run_cycle(at_minutes(-10)).await;
    let report = h.driver.run_cycle(at_minutes(70)).await;

    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed, 2);
    assert_eq!(report.rotated_hours, 2);

    let status = h.driver.cache().read_status_index().await.unwrap();
    assert_eq!(status.offline.len(), 2);
    assert!(status.online.is_empty());
    assert!(h.driver.cache().read_bucket(1).await.unwrap().is_some());
    assert!(h.driver.cache().read_bucket(2).await.unwrap().is_none());
}

#[tokio::test]
async fn rotation_happens_once_per_boundary() {
    let mock = MockAdapter::new("mock")
        .with_reply("a", MockReply::Feed(feed_ending_at(reference_time(), 1)));
    let h = harness(vec![StationBuilder::fixed("a").build()], mock).await;

    let first = h.driver.run_cycle(at_minutes(1)).await;
    assert_eq!(first.rotated_hours, 0, "no previous cycle recorded");

    for minutes in [11, 21, 31, 41, 51] {
        assert_eq!(h.driver.run_cycle(at_minutes(minutes)).await.rotated_hours, 0);
    }
    assert_eq!(h.driver.run_cycle(at_minutes(61)).await.rotated_hours, 1);
    assert_eq!(h.driver.run_cycle(at_minutes(71)).await.rotated_hours, 0);

    let manifest = h.driver.cache().read_hourly_manifest().await.unwrap();
    assert_eq!(manifest.next_generation, 1);
    assert_eq!(h.mock.calls(), 8);
}

#[tokio::test]
async fn status_decays_after_failures() {
    let now = reference_time();
    let mock = MockAdapter::new("mock")
        .with_reply("a", MockReply::Feed(feed_ending_at(now, 1)));
    let h = harness(vec![StationBuilder::fixed("a").build()], mock).await;

    let report = h.driver.run_cycle(now).await;
    assert_eq!(report.online, 1);

    h.mock.reply("a", MockReply::Unavailable);

    let report = h.driver.run_cycle(now + Duration::minutes(10)).await;
    assert_eq!(report.online, 1, "one failed cycle keeps the previous observation");

    let report = h.driver.run_cycle(now + Duration::minutes(59)).await;
    assert_eq!(report.online, 1);

    let report = h.driver.run_cycle(now + Duration::minutes(61)).await;
    assert_eq!(report.offline, 1);

    let status = h.driver.cache().read_status_index().await.unwrap();
    assert_eq!(status.all["a"].status, Status::Offline);
    assert_eq!(status.all["a"].last_updated, Some(now));
}

#[tokio::test]
async fn repeated_cycles_do_not_duplicate_long_term_records() {
    let now = reference_time();
    let mock = MockAdapter::new("mock").with_reply("a", MockReply::Feed(feed_ending_at(now, 4)));
    let h = harness(vec![StationBuilder::fixed("a").build()], mock).await;

    let day = now.date_naive();
    h.driver.run_cycle(now).await;
    let first = h.driver.cache().read_long_term("a", day, day).await.unwrap();
    h.driver.run_cycle(now + Duration::minutes(10)).await;
    let second = h.driver.cache().read_long_term("a", day, day).await.unwrap();

    assert_eq!(first.len(), 4);
    assert_eq!(first, second);
}

#[tokio::test]
async fn cycle_after_midnight_leaves_previous_day_untouched() {
    let evening = Utc.with_ymd_and_hms(2024, 6, 1, 23, 50, 0).unwrap();
    let after_midnight = Utc.with_ymd_and_hms(2024, 6, 2, 0, 5, 0).unwrap();
    let mock =
        MockAdapter::new("mock").with_reply("a", MockReply::Feed(feed_ending_at(evening, 2)));
    let h = harness(vec![StationBuilder::fixed("a").build()], mock).await;

    h.driver.run_cycle(evening + Duration::minutes(5)).await;
    let first_day = h.driver.cache().layout().long_term_day("a", evening.date_naive());
    let sealed = std::fs::read(&first_day).unwrap();

    // The refetched window overlaps the previous day with a sample it never stored.
    h.mock.reply("a", MockReply::Feed(feed_ending_at(after_midnight, 3)));
    let report = h.driver.run_cycle(after_midnight + Duration::minutes(1)).await;
    assert_eq!(report.succeeded, 1);

    assert_eq!(std::fs::read(&first_day).unwrap(), sealed);
    let day = after_midnight.date_naive();
    let today = h.driver.cache().read_long_term("a", day, day).await.unwrap();
    assert_eq!(today.len(), 1);
    assert_eq!(today[0].time, after_midnight);
}

#[tokio::test]
async fn restart_resumes_hour_tracking_and_status() {
    let dir = tempfile::tempdir().unwrap();
    let cache_root = dir.path().join("cache");
    let now = reference_time();
    let stations = || StationSet::from_stations(vec![StationBuilder::fixed("a").build()]);

    {
        let mut adapters = AdapterRegistry::new();
        let mock =
            MockAdapter::new("mock").with_reply("a", MockReply::Feed(feed_ending_at(now, 1)));
        adapters.register("mock", Arc::new(mock));
        let driver = CycleDriver::new(
            Arc::new(StationRegistry::from_set(stations())),
            adapters,
            Arc::new(CacheWriter::open(&cache_root).await.unwrap()),
            StalenessPolicy::default(),
            CycleOptions::default(),
        )
        .await;
        driver.run_cycle(now).await;
    }

    let mut adapters = AdapterRegistry::new();
    adapters.register("mock", Arc::new(MockAdapter::new("mock")));
    let driver = CycleDriver::new(
        Arc::new(StationRegistry::from_set(stations())),
        adapters,
        Arc::new(CacheWriter::open(&cache_root).await.unwrap()),
        StalenessPolicy::default(),
        CycleOptions::default(),
    )
    .await;

    let report = driver.run_cycle(now + Duration::minutes(65)).await;
    assert_eq!(report.rotated_hours, 1);
    assert_eq!(report.offline, 1, "65 minutes without data exceeds the fixed threshold");

    let report = driver.run_cycle(now + Duration::minutes(66)).await;
    assert_eq!(report.rotated_hours, 0);
}

#[tokio::test]
async fn reload_is_picked_up_between_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let now = reference_time();
    let records = json!([station_record("a", "mock")]);
    let path = write_station_file(dir.path(), "fixed_stations.json", &records);

    let mock = Arc::new(
        MockAdapter::new("mock")
            .with_reply("a", MockReply::Feed(feed_ending_at(now, 1)))
            .with_reply("b", MockReply::Feed(feed_ending_at(now, 1))),
    );
    let mut adapters = AdapterRegistry::new();
    adapters.register("mock", mock.clone());

    let registry = Arc::new(StationRegistry::load(vec![path.clone()]).await.unwrap());
    let cache = Arc::new(CacheWriter::open(dir.path().join("cache")).await.unwrap());
    let driver = CycleDriver::new(
        registry,
        adapters,
        cache,
        StalenessPolicy::default(),
        CycleOptions::default(),
    )
    .await;

    let report = driver.run_cycle(now).await;
    assert!(!report.reloaded);
    assert_eq!(report.succeeded, 1);

    let records = json!([station_record("b", "mock")]);
    write_station_file(dir.path(), "fixed_stations.json", &records);
    let file = std::fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(5))
        .unwrap();

    let report = driver.run_cycle(now + Duration::minutes(10)).await;
    assert!(report.reloaded);
    assert_eq!(report.stations, 1);

    let latest = driver.cache().read_latest().await.unwrap();
    assert_eq!(latest.keys().collect::<Vec<_>>(), vec!["b"]);
    let status = driver.cache().read_status_index().await.unwrap();
    assert!(status.all.contains_key("b") && !status.all.contains_key("a"));
}

#[tokio::test]
async fn broken_reload_keeps_ingesting_previous_stations() {
    let dir = tempfile::tempdir().unwrap();
    let now = reference_time();
    let records = json!([station_record("a", "mock")]);
    let path = write_station_file(dir.path(), "fixed_stations.json", &records);

    let mut adapters = AdapterRegistry::new();
    let mock = MockAdapter::new("mock").with_reply("a", MockReply::Feed(feed_ending_at(now, 1)));
    adapters.register("mock", Arc::new(mock));
    let driver = CycleDriver::new(
        Arc::new(StationRegistry::load(vec![path.clone()]).await.unwrap()),
        adapters,
        Arc::new(CacheWriter::open(dir.path().join("cache")).await.unwrap()),
        StalenessPolicy::default(),
        CycleOptions::default(),
    )
    .await;

    std::fs::write(&path, "not json").unwrap();
    let file = std::fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(5))
        .unwrap();

    let report = driver.run_cycle(now).await;
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("station reload"));
    assert_eq!(report.succeeded, 1);
}
