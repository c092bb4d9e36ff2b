use crate::checkpoint::CheckpointStats;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-batch completeness counters reported at the end of every command
#[derive(Default)]
pub struct BatchStats {
    pub pages_fetched: AtomicU64,
    pub posts_fetched: AtomicU64,
    pub posts_merged: AtomicU64,
    pub authors_merged: AtomicU64,
    pub places_merged: AtomicU64,
    pub places_discarded: AtomicU64,
    pub retweets_local: AtomicU64,
    pub retweets_remote: AtomicU64,
    pub retweets_truncated: AtomicU64,
    pub locations_resolved: AtomicU64,
    pub locations_unresolved: AtomicU64,
    pub geocode_requests: AtomicU64,
    pub cache_hits: AtomicU64,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_pages(&self) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_posts_fetched(&self, count: u64) {
        self.posts_fetched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_posts_merged(&self, count: u64) {
        self.posts_merged.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_authors_merged(&self, count: u64) {
        self.authors_merged.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_places_merged(&self, count: u64) {
        self.places_merged.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_places_discarded(&self, count: u64) {
        self.places_discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_retweets_local(&self) {
        self.retweets_local.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retweets_remote(&self) {
        self.retweets_remote.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retweets_truncated(&self) {
        self.retweets_truncated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resolved(&self) {
        self.locations_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unresolved(&self) {
        self.locations_unresolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_geocode_requests(&self) {
        self.geocode_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pages(&self) -> u64 {
        self.pages_fetched.load(Ordering::Relaxed)
    }

    pub fn posts_fetched(&self) -> u64 {
        self.posts_fetched.load(Ordering::Relaxed)
    }

    pub fn posts(&self) -> u64 {
        self.posts_merged.load(Ordering::Relaxed)
    }

    pub fn authors(&self) -> u64 {
        self.authors_merged.load(Ordering::Relaxed)
    }

    pub fn places(&self) -> u64 {
        self.places_merged.load(Ordering::Relaxed)
    }

    pub fn places_discarded(&self) -> u64 {
        self.places_discarded.load(Ordering::Relaxed)
    }

    pub fn retweets_local(&self) -> u64 {
        self.retweets_local.load(Ordering::Relaxed)
    }

    pub fn retweets_remote(&self) -> u64 {
        self.retweets_remote.load(Ordering::Relaxed)
    }

    /// Retweets whose text now comes from the referenced post, by either path
    pub fn retweets_backfilled(&self) -> u64 {
        self.retweets_local() + self.retweets_remote()
    }

    pub fn retweets_truncated(&self) -> u64 {
        self.retweets_truncated.load(Ordering::Relaxed)
    }

    pub fn resolved(&self) -> u64 {
        self.locations_resolved.load(Ordering::Relaxed)
    }

    pub fn unresolved(&self) -> u64 {
        self.locations_unresolved.load(Ordering::Relaxed)
    }

    pub fn geocode_requests(&self) -> u64 {
        self.geocode_requests.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Resume download counters from a checkpoint
    pub fn from_checkpoint(cp: &CheckpointStats) -> Self {
        Self {
            pages_fetched: AtomicU64::new(cp.pages_fetched),
            posts_fetched: AtomicU64::new(cp.posts_fetched),
            ..Self::default()
        }
    }

    /// Download counters for persistence
    pub fn to_checkpoint(&self) -> CheckpointStats {
        CheckpointStats {
            pages_fetched: self.pages(),
            posts_fetched: self.posts_fetched(),
        }
    }
}

/// Bar for per-item passes (backfill fetches, author geolocation).
pub fn make_progress_bar(total: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "    {{spinner:.cyan}} {label:<12} [{{bar:30.cyan/blue}}] {{pos}}/{{len}}"
            ))
            .unwrap()
            .progress_chars("=> "),
    );
    pb
}
