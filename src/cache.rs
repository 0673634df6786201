//! Per-cycle feed memoization.
//!
//! Subscriptions often share a feed.  A [`FeedCache`] lives for exactly one
//! cycle and makes sure each URL is fetched and parsed at most once within
//! it.  Failures are not cached: a later subscription on the same URL
//! retries the fetch.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::source::{parse_feed, Feed, Fetcher};

#[derive(Default)]
pub struct FeedCache {
    feeds: HashMap<String, Arc<Feed>>,
}

impl FeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the parsed feed at `url`, fetching it on first use.
    pub async fn fetch_feed(&mut self, fetcher: &dyn Fetcher, url: &str) -> Result<Arc<Feed>> {
        if let Some(feed) = self.feeds.get(url) {
            debug!(url = %url, "Feed served from cycle cache");
            return Ok(Arc::clone(feed));
        }

        let body = fetcher.fetch_text(url).await?;
        let feed = match parse_feed(body.as_bytes()) {
            Ok(feed) => Arc::new(feed),
            Err(e) => {
                debug!(url = %url, body = %body, "Unparseable feed response");
                return Err(e);
            }
        };
        debug!(url = %url, title = %feed.title, items = feed.items.len(), "Fetched feed");

        self.feeds.insert(url.to_string(), Arc::clone(&feed));
        Ok(feed)
    }

    /// Drop every cached feed.
    pub fn clear(&mut self) {
        self.feeds.clear();
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }
}
