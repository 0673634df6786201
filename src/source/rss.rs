//! RSS 2.0 parsing and the HTTP fetcher.
//!
//! [`parse_feed`] is a pure function (no I/O) so that tests can exercise the
//! parsing logic without hitting the network.  [`HttpFetcher`] is the only
//! type in the crate that talks to the network.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{Feed, FeedItem, Fetcher};
use crate::error::{Error, Result};

/// Parse an RSS document into a [`Feed`].
///
/// A document that is not RSS at all is an error.  A channel without any
/// `<item>` elements parses fine and yields an empty feed; callers treat
/// that as a bad response rather than a failure.
pub fn parse_feed(body: &[u8]) -> Result<Feed> {
    let channel = rss::Channel::read_from(body).map_err(|e| Error::Feed(e.to_string()))?;
    Ok(Feed {
        title: channel.title().to_string(),
        link: channel.link().to_string(),
        items: parse_channel(&channel),
    })
}

/// Convert an already-parsed [`rss::Channel`] into [`FeedItem`]s, keeping
/// document order.
pub fn parse_channel(channel: &rss::Channel) -> Vec<FeedItem> {
    channel
        .items()
        .iter()
        .map(|item| FeedItem {
            title: item.title().unwrap_or_default().to_string(),
            link: item.link().map(String::from),
            published: item.pub_date().and_then(parse_date),
            description: item.description().map(String::from),
        })
        .collect()
}

/// Parse a feed or watermark date.
///
/// RSS mandates RFC 2822, but enough feeds emit RFC 3339 that both are
/// accepted.  Anything else degrades to `None`.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// [`Fetcher`] backed by a shared [`reqwest::Client`].
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a fetcher whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("feedgrab/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        debug!(url = %url, "Fetching feed");
        Ok(self.get(url).await?.text().await?)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url = %url, "Fetching payload");
        Ok(self.get(url).await?.bytes().await?.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
