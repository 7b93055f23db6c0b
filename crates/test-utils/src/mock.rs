//! Scripted adapter for driving ingestion cycles in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use adapters::{Adapter, FeedRequest};
use obs_common::{FeedResult, ObsError, ObsResult};

/// What a [`MockAdapter`] returns for one station.
#[derive(Debug, Clone)]
pub enum MockReply {
    Feed(FeedResult),
    Unavailable,
    Malformed,
    /// Sleep before answering; used to exercise fetch timeouts.
    Delayed(Duration, Box<MockReply>),
}

/// Adapter whose answers are scripted per station id.
///
/// Stations without a script fail with `SourceUnavailable`.
pub struct MockAdapter {
    name: String,
    replies: Mutex<HashMap<String, MockReply>>,
    calls: AtomicUsize,
}

impl MockAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            replies: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Set the reply for a station, replacing any previous one.
    pub fn reply(&self, station_id: &str, reply: MockReply) -> &Self {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(station_id.to_string(), reply);
        self
    }

    pub fn with_reply(self, station_id: &str, reply: MockReply) -> Self {
        self.reply(station_id, reply);
        self
    }

    /// Number of `fetch` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn scripted(&self, station_id: &str) -> Option<MockReply> {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(station_id)
            .cloned()
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, request: &FeedRequest) -> ObsResult<FeedResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut reply = self.scripted(&request.station_id);
        loop {
            match reply {
                Some(MockReply::Feed(feed)) => return Ok(feed),
                Some(MockReply::Malformed) => {
                    return Err(ObsError::malformed(&request.station_id, "scripted malformed feed"))
                }
                Some(MockReply::Delayed(delay, next)) => {
                    tokio::time::sleep(delay).await;
                    reply = Some(*next);
                }
                Some(MockReply::Unavailable) | None => {
                    return Err(ObsError::source_unavailable(
                        &request.station_id,
                        "scripted unavailable feed",
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{feed_ending_at, reference_time, StationBuilder};
    use obs_common::ErrorKind;

    fn request(id: &str) -> FeedRequest {
        FeedRequest::for_station(&StationBuilder::fixed(id).build(), 24, reference_time())
    }

    #[tokio::test]
    async fn test_scripted_replies() {
        let adapter = MockAdapter::new("mock")
            .with_reply("ok", MockReply::Feed(feed_ending_at(reference_time(), 2)))
            .with_reply("bad", MockReply::Malformed);

        assert!(adapter.fetch(&request("ok")).await.is_ok());
        assert_eq!(
            adapter.fetch(&request("bad")).await.unwrap_err().kind(),
            ErrorKind::MalformedFeed
        );
        assert_eq!(
            adapter.fetch(&request("unknown")).await.unwrap_err().kind(),
            ErrorKind::SourceUnavailable
        );
        assert_eq!(adapter.calls(), 3);
    }

    #[tokio::test]
    async fn test_delayed_reply() {
        let adapter = MockAdapter::new("mock").with_reply(
            "slow",
            MockReply::Delayed(Duration::from_millis(5), Box::new(MockReply::Malformed)),
        );
        assert!(adapter.fetch(&request("slow")).await.is_err());
    }
}
