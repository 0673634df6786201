//! The item type produced by every feed fetch.
//!
//! `FeedItem` values are built fresh from each parsed feed and never
//! persisted.  Only the publish date of the last downloaded item survives a
//! cycle, in the watermark store.

use chrono::{DateTime, Utc};

/// A single feed entry.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FeedItem {
    /// Headline; matched against subscription filters and used as the
    /// download file stem.
    pub title: String,

    /// URL of the payload (the `.torrent` file).
    pub link: Option<String>,

    /// Publication timestamp.
    ///
    /// `None` means the feed did not provide a date, or provided one that
    /// could not be parsed.  Such items can never advance a watermark.
    pub published: Option<DateTime<Utc>>,

    /// Optional longer description or summary text.
    pub description: Option<String>,
}

impl FeedItem {
    /// Whether this item is newer than the given watermark.
    ///
    /// An absent watermark makes every dated item due.  A present one
    /// requires a strictly later publish date, so an item that set the
    /// watermark is never due again.
    pub fn is_due(&self, watermark: Option<DateTime<Utc>>) -> bool {
        match (self.published, watermark) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(published), Some(mark)) => published > mark,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
