use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::PollerConfig;
use crate::db::Feed;
use crate::fetcher::{FeedSource, FetchError};
use crate::ingest::{self, IngestStats};
use crate::rss::{self, RssDocument};
use crate::store::FeedStore;

/// How a single feed's turn in a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    FetchFailed,
    DecodeFailed,
    Ingested(IngestStats),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub selected: usize,
    pub fetch_failed: usize,
    pub decode_failed: usize,
    pub ingested: usize,
    /// Workers that panicked before reporting an outcome.
    pub aborted: usize,
    pub items: IngestStats,
}

impl CycleReport {
    fn record(&mut self, outcome: FeedOutcome) {
        match outcome {
            FeedOutcome::FetchFailed => self.fetch_failed += 1,
            FeedOutcome::DecodeFailed => self.decode_failed += 1,
            FeedOutcome::Ingested(stats) => {
                self.ingested += 1;
                self.items.merge(stats);
            }
        }
    }
}

#[derive(Clone)]
pub struct Poller {
    store: Arc<dyn FeedStore>,
    source: Arc<dyn FeedSource>,
    interval: Duration,
    batch_size: u32,
}

impl Poller {
    pub fn new(
        store: Arc<dyn FeedStore>,
        source: Arc<dyn FeedSource>,
        interval: Duration,
        batch_size: u32,
    ) -> Self {
        Self {
            store,
            source,
            interval,
            batch_size,
        }
    }

    pub fn from_config(
        store: Arc<dyn FeedStore>,
        source: Arc<dyn FeedSource>,
        config: &PollerConfig,
    ) -> Self {
        Self::new(store, source, config.interval(), config.batch_size)
    }

    /// Run one cycle per tick, forever. The first cycle starts one interval
    /// after the call; a slow cycle pushes later ticks back instead of
    /// triggering catch-up cycles.
    pub async fn run_forever(&self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Feed poller started: every {:?}, up to {} feeds per cycle",
            self.interval, self.batch_size
        );

        loop {
            ticker.tick().await;
            info!("Starting scheduled feed fetch");

            let report = self.run_cycle().await;
            info!(
                "Feed fetch complete: {} selected, {} ingested, {} fetch failures, {} decode failures, {} new posts, {} duplicates",
                report.selected,
                report.ingested,
                report.fetch_failed,
                report.decode_failed,
                report.items.inserted,
                report.items.duplicates
            );
        }
    }

    /// Fetch one batch of feeds and wait for every worker to finish.
    pub async fn run_cycle(&self) -> CycleReport {
        let Some(feeds) = self.select_batch().await else {
            return CycleReport::default();
        };

        let mut report = CycleReport {
            selected: feeds.len(),
            ..Default::default()
        };

        let mut workers = JoinSet::new();
        for feed in feeds {
            let poller = self.clone();
            workers.spawn(async move { poller.process_feed(feed).await });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    error!("Feed worker did not finish: {}", e);
                    report.aborted += 1;
                }
            }
        }

        report
    }

    async fn select_batch(&self) -> Option<Vec<Feed>> {
        match self.store.get_next_feeds_to_fetch(self.batch_size).await {
            Ok(feeds) => {
                info!("Selected {} feeds to fetch", feeds.len());
                Some(feeds)
            }
            Err(e) => {
                error!("Failed to retrieve feeds to fetch: {}", e);
                None
            }
        }
    }

    /// Fetch, mark and ingest a single feed.
    ///
    /// The feed is marked fetched after every attempt, whether or not the
    /// fetch or decode succeeded.
    pub async fn process_feed(&self, feed: Feed) -> FeedOutcome {
        info!("Fetching feed: {} ({})", feed.name, feed.url);

        let fetched = self.fetch_document(&feed.url).await;

        if let Err(e) = self.store.mark_feed_fetched(feed.id).await {
            warn!("Failed to mark feed '{}' as fetched: {}", feed.name, e);
        }

        let document = match fetched {
            Ok(document) => document,
            Err(e) if e.is_decode() => {
                warn!("Failed to decode feed '{}': {}", feed.name, e);
                return FeedOutcome::DecodeFailed;
            }
            Err(e) => {
                warn!("Failed to fetch feed '{}': {}", feed.name, e);
                return FeedOutcome::FetchFailed;
            }
        };

        debug!(
            "Decoded {} items from feed '{}'",
            document.item_count(),
            feed.name
        );

        let stats = self.ingest_document(&feed, &document).await;
        info!(
            "Feed '{}': {} items, {} new posts, {} already known, {} skipped",
            feed.name,
            stats.total(),
            stats.inserted,
            stats.duplicates,
            stats.rejected + stats.failed
        );

        FeedOutcome::Ingested(stats)
    }

    async fn fetch_document(&self, url: &str) -> Result<RssDocument, FetchError> {
        let body = self.source.fetch(url).await?;
        Ok(rss::decode(&body)?)
    }

    async fn ingest_document(&self, feed: &Feed, document: &RssDocument) -> IngestStats {
        let mut stats = IngestStats::default();

        for channel in &document.channels {
            for item in &channel.items {
                let outcome = ingest::ingest_item(self.store.as_ref(), feed.id, item).await;
                stats.record(outcome);
            }
            debug!("Processed channel: {}", channel.title);
        }

        stats
    }
}
