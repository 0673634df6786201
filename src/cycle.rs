//! One pass over every subscription.
//!
//! [`Runner`] is built once at startup and owns everything a cycle needs.
//! Each call to [`Runner::run_cycle`] walks the subscriptions in order,
//! turning every failure into an outcome value so that one bad feed or item
//! never stops the rest.  Whatever happens, the cycle ends with its feed
//! cache dropped and log housekeeping done.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::cache::FeedCache;
use crate::config::{Config, Subscription};
use crate::download::{ItemOutcome, Pipeline};
use crate::error::{Error, Result};
use crate::logging::LogSink;
use crate::matcher::{Selection, TitleFilter};
use crate::source::Fetcher;
use crate::watermark::WatermarkStore;

/// How one subscription fared in a cycle.
#[derive(Debug)]
pub enum SubscriptionOutcome {
    /// The feed could not be fetched or parsed.
    FeedUnavailable(Error),
    /// The feed parsed but carried no items.
    BadResponse,
    /// Candidates were matched and processed (possibly none).
    Processed(Vec<ItemOutcome>),
}

#[derive(Debug)]
pub struct SubscriptionReport {
    pub name: String,
    pub outcome: SubscriptionOutcome,
}

impl SubscriptionReport {
    /// Number of payloads saved for this subscription.
    pub fn downloaded(&self) -> usize {
        match &self.outcome {
            SubscriptionOutcome::Processed(items) => {
                items.iter().filter(|i| i.is_downloaded()).count()
            }
            _ => 0,
        }
    }

    /// Number of items that were due but failed.
    pub fn failed(&self) -> usize {
        match &self.outcome {
            SubscriptionOutcome::Processed(items) => items.iter().filter(|i| i.is_failed()).count(),
            _ => 0,
        }
    }

    fn log_summary(&self) {
        match &self.outcome {
            SubscriptionOutcome::FeedUnavailable(e) => {
                debug!(subscription = %self.name, error = %e, "Skipped: feed unavailable");
            }
            SubscriptionOutcome::BadResponse => {
                debug!(subscription = %self.name, "Skipped: bad response");
            }
            SubscriptionOutcome::Processed(items) => {
                for item in items {
                    match item {
                        ItemOutcome::Failed { title, error } => debug!(
                            subscription = %self.name,
                            title = %title,
                            error = %error,
                            "Will retry next cycle"
                        ),
                        other => trace!(
                            subscription = %self.name,
                            title = %other.title(),
                            downloaded = other.is_downloaded(),
                            "Item processed"
                        ),
                    }
                }
                debug!(
                    subscription = %self.name,
                    downloaded = self.downloaded(),
                    failed = self.failed(),
                    "Subscription done"
                );
            }
        }
    }
}

/// Aggregated result of one cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub subscriptions: Vec<SubscriptionReport>,
}

impl CycleReport {
    pub fn downloaded(&self) -> usize {
        self.subscriptions.iter().map(SubscriptionReport::downloaded).sum()
    }

    pub fn failed(&self) -> usize {
        self.subscriptions.iter().map(SubscriptionReport::failed).sum()
    }

    /// Subscriptions whose feed was unavailable or empty.
    pub fn unavailable(&self) -> usize {
        self.subscriptions
            .iter()
            .filter(|r| !matches!(r.outcome, SubscriptionOutcome::Processed(_)))
            .count()
    }
}

/// A subscription with its filter compiled.
struct Watch {
    subscription: Subscription,
    filter: TitleFilter,
}

/// The run orchestrator.
pub struct Runner {
    watches: Vec<Watch>,
    fetcher: Arc<dyn Fetcher>,
    pipeline: Pipeline,
    log: LogSink,
    running: AtomicBool,
}

impl Runner {
    /// Build the runner, compiling every subscription filter.
    ///
    /// A filter that does not compile is a startup error.
    pub fn new(config: &Config, fetcher: Arc<dyn Fetcher>, log: LogSink) -> Result<Self> {
        let watches = config
            .subscriptions
            .iter()
            .map(|sub| -> Result<Watch> {
                Ok(Watch {
                    filter: TitleFilter::new(sub)?,
                    subscription: sub.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let watermarks = WatermarkStore::new(&config.done_directory);
        debug!(
            subscriptions = watches.len(),
            done_directory = %watermarks.dir().display(),
            "Runner ready"
        );
        if watches.is_empty() {
            warn!("No subscriptions configured; cycles will do nothing");
        }

        Ok(Self {
            watches,
            pipeline: Pipeline::new(Arc::clone(&fetcher), watermarks),
            fetcher,
            log,
            running: AtomicBool::new(false),
        })
    }

    /// Run one full cycle.
    ///
    /// Returns `None` without doing anything if another cycle is still in
    /// flight.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Previous cycle still running, skipping this one");
            return None;
        }

        let mut cycle = Cycle {
            runner: self,
            cache: FeedCache::new(),
            finished: false,
        };

        info!("Starting run");
        let mut report = CycleReport::default();
        for watch in &self.watches {
            let outcome = self.process(watch, &mut cycle.cache).await;
            let sub_report = SubscriptionReport {
                name: watch.subscription.name.clone(),
                outcome,
            };
            sub_report.log_summary();
            report.subscriptions.push(sub_report);
        }

        info!(
            downloaded = report.downloaded(),
            failed = report.failed(),
            unavailable = report.unavailable(),
            "Finished"
        );
        cycle.finished = true;
        Some(report)
    }

    async fn process(&self, watch: &Watch, cache: &mut FeedCache) -> SubscriptionOutcome {
        let sub = &watch.subscription;

        let feed = match cache.fetch_feed(self.fetcher.as_ref(), &sub.feed_url).await {
            Ok(feed) => feed,
            Err(e) => {
                error!(
                    subscription = %sub.name,
                    url = %sub.feed_url,
                    error = %e,
                    "Failed to fetch feed"
                );
                return SubscriptionOutcome::FeedUnavailable(e);
            }
        };

        let candidates = match watch.filter.select(&sub.name, &feed) {
            Selection::BadResponse => return SubscriptionOutcome::BadResponse,
            Selection::Candidates(items) => items,
        };

        let outcomes = self.pipeline.process(sub, &candidates).await;

        if !outcomes.iter().any(|o| o.is_downloaded() || o.is_failed()) {
            info!(subscription = %sub.name, "No new items");
        }

        SubscriptionOutcome::Processed(outcomes)
    }
}

/// State scoped to a single cycle.
///
/// Dropping it is the cycle's cleanup: it runs on every exit path,
/// including a panic or the cycle future being cancelled mid-await.
struct Cycle<'a> {
    runner: &'a Runner,
    cache: FeedCache,
    finished: bool,
}

impl Drop for Cycle<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Cycle interrupted before completion");
        }
        debug!(feeds = self.cache.feed_count(), "Clearing feed cache");
        self.cache.clear();
        self.runner.log.maintain();
        self.runner.running.store(false, Ordering::Release);
    }
}
