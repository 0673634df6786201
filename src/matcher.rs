//! Title filtering for subscriptions.

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::config::Subscription;
use crate::error::Result;
use crate::source::{Feed, FeedItem};

/// Compiled-size ceiling for a single filter, guarding against patterns
/// whose automaton would blow up.
const PATTERN_SIZE_LIMIT: usize = 1024 * 1024;

/// What a subscription's filter selected from a feed.
#[derive(Debug)]
pub enum Selection<'a> {
    /// The feed carried no items at all.
    BadResponse,
    /// Matching items, in feed order.  May be empty.
    Candidates(Vec<&'a FeedItem>),
}

/// A subscription's filter pattern, compiled once per process.
#[derive(Debug, Clone)]
pub struct TitleFilter {
    regex: Regex,
}

impl TitleFilter {
    /// Compile `sub.filter_pattern`, case-insensitively unless the
    /// subscription opts out.
    pub fn new(sub: &Subscription) -> Result<Self> {
        let regex = RegexBuilder::new(&sub.filter_pattern)
            .case_insensitive(sub.case_insensitive)
            .size_limit(PATTERN_SIZE_LIMIT)
            .build()?;
        Ok(Self { regex })
    }

    /// Whether `title` matches this filter.
    pub fn is_match(&self, title: &str) -> bool {
        self.regex.is_match(title)
    }

    /// Select the candidate items of `feed` for the named subscription.
    ///
    /// An item-less feed is reported as [`Selection::BadResponse`] and
    /// logged; it is never an error.
    pub fn select<'a>(&self, subscription: &str, feed: &'a Feed) -> Selection<'a> {
        if feed.items.is_empty() {
            warn!(
                subscription = %subscription,
                feed = %feed.title,
                link = %feed.link,
                items = feed.items.len(),
                "Bad response from rss feed: no items"
            );
            return Selection::BadResponse;
        }

        Selection::Candidates(
            feed.items
                .iter()
                .filter(|item| self.is_match(&item.title))
                .collect(),
        )
    }
}
