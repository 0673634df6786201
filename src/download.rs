//! Fetching and saving due items.
//!
//! For each candidate, in feed order, the pipeline re-reads the watermark,
//! downloads the item if it is newer, and only then advances the watermark.
//! A failure is recorded against the item and processing moves on; the
//! watermark stays put, so the item is retried naturally next cycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Subscription;
use crate::error::{Error, Result};
use crate::source::{FeedItem, Fetcher};
use crate::watermark::WatermarkStore;

const PAYLOAD_EXTENSION: &str = "torrent";

/// Characters that are illegal in file names on Windows or Unix.
const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// What happened to one candidate item.
#[derive(Debug)]
pub enum ItemOutcome {
    /// Payload written and watermark advanced.
    Downloaded { title: String },
    /// Not newer than the watermark.
    NotDue { title: String },
    /// Fetch, write or watermark update failed; watermark not advanced.
    Failed { title: String, error: Error },
}

impl ItemOutcome {
    pub fn title(&self) -> &str {
        match self {
            ItemOutcome::Downloaded { title }
            | ItemOutcome::NotDue { title }
            | ItemOutcome::Failed { title, .. } => title,
        }
    }

    pub fn is_downloaded(&self) -> bool {
        matches!(self, ItemOutcome::Downloaded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ItemOutcome::Failed { .. })
    }
}

/// Downloads due items for one subscription at a time.
pub struct Pipeline {
    fetcher: Arc<dyn Fetcher>,
    watermarks: WatermarkStore,
}

impl Pipeline {
    pub fn new(fetcher: Arc<dyn Fetcher>, watermarks: WatermarkStore) -> Self {
        Self {
            fetcher,
            watermarks,
        }
    }

    /// Process `candidates` in order, returning one outcome per item.
    pub async fn process(&self, sub: &Subscription, candidates: &[&FeedItem]) -> Vec<ItemOutcome> {
        let mut outcomes = Vec::with_capacity(candidates.len());

        for item in candidates {
            let watermark = self.watermarks.read(&sub.name).await;
            if !item.is_due(watermark) {
                if item.published.is_none() {
                    warn!(
                        subscription = %sub.name,
                        title = %item.title,
                        "Skipping item without a usable publish date"
                    );
                }
                outcomes.push(ItemOutcome::NotDue {
                    title: item.title.clone(),
                });
                continue;
            }

            match self.download(sub, item).await {
                Ok(path) => {
                    info!(
                        subscription = %sub.name,
                        title = %item.title,
                        path = %path.display(),
                        "Added torrent"
                    );
                    if let Some(description) = item.description.as_deref() {
                        debug!(title = %item.title, description = %description, "Item details");
                    }
                    outcomes.push(ItemOutcome::Downloaded {
                        title: item.title.clone(),
                    });
                }
                Err(error) => {
                    warn!(
                        subscription = %sub.name,
                        title = %item.title,
                        error = %error,
                        "Failed to download item"
                    );
                    outcomes.push(ItemOutcome::Failed {
                        title: item.title.clone(),
                        error,
                    });
                }
            }
        }

        outcomes
    }

    /// Fetch one item's payload, save it, then advance the watermark.
    async fn download(&self, sub: &Subscription, item: &FeedItem) -> Result<PathBuf> {
        let link = item.link.as_deref().ok_or_else(|| Error::MissingField {
            title: item.title.clone(),
            field: "link",
        })?;
        let published = item.published.ok_or_else(|| Error::MissingField {
            title: item.title.clone(),
            field: "publish date",
        })?;
        let path = payload_path(&sub.save_location, &item.title)?;

        let payload = self.fetcher.fetch_bytes(link).await?;
        tokio::fs::create_dir_all(&sub.save_location).await?;
        tokio::fs::write(&path, payload).await?;

        self.watermarks.write(&sub.name, published).await?;
        Ok(path)
    }
}

/// Where an item titled `title` is saved under `save_location`.
pub fn payload_path(save_location: &Path, title: &str) -> Result<PathBuf> {
    let stem = sanitize_title(title).ok_or_else(|| Error::InvalidTitle(title.to_string()))?;
    Ok(save_location.join(format!("{stem}.{PAYLOAD_EXTENSION}")))
}

/// Turn an item title into a single safe path component.
///
/// Illegal and control characters become spaces, whitespace runs collapse,
/// and leading/trailing whitespace and dots are trimmed.  Returns `None`
/// when nothing usable is left.
pub fn sanitize_title(title: &str) -> Option<String> {
    let replaced: String = title
        .chars()
        .map(|c| {
            if ILLEGAL_CHARS.contains(&c) || c.is_control() {
                ' '
            } else {
                c
            }
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c.is_whitespace());

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
