//! Feed source abstraction layer.
//!
//! This module defines the [`Fetcher`] trait, the network boundary of the
//! crate, together with the parsed [`Feed`] and [`FeedItem`] types.  The
//! concrete HTTP implementation and the RSS parser live in [`rss`].

mod feed_item;
pub mod rss;

pub use feed_item::FeedItem;
pub use self::rss::{parse_date, parse_feed, HttpFetcher};

#[cfg(test)]
pub(crate) use feed_item::tests::make_item;

use async_trait::async_trait;

use crate::error::Result;

/// A parsed feed: channel title and link plus its items in document order.
#[derive(Debug, Clone, Default)]
pub struct Feed {
    pub title: String,
    pub link: String,
    pub items: Vec<FeedItem>,
}

/// Network access used by a run cycle.
///
/// The cycle only ever needs two things from the network: the text of a
/// feed and the bytes of a payload.  Implementations must be [`Send`] and
/// [`Sync`] so a single instance can be shared for the process lifetime.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url` and return the body as text.
    async fn fetch_text(&self, url: &str) -> Result<String>;

    /// GET `url` and return the raw body.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}
