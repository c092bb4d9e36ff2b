//! Retweet text backfill.
//!
//! The search endpoint truncates retweet text. Each retweet is restored from
//! the referenced post: first from the same batch, then with one lookup per
//! distinct missing id. A failed lookup leaves the truncated text in place.

use crate::client::PostLookup;
use crate::models::Post;
use crate::stats::{make_progress_bar, BatchStats};
use rustc_hash::{FxHashMap, FxHashSet};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    pub local: u64,
    pub remote: u64,
    pub truncated: u64,
    /// Lookups attempted, successful or not
    pub lookups: u64,
}

/// Replace truncated retweet text in place. Posts already marked `backfilled`
/// are skipped, so running this twice changes nothing the second time.
/// Without a `lookup`, ids missing from the batch stay truncated.
pub fn backfill(
    posts: &mut [Post],
    lookup: Option<&dyn PostLookup>,
    delay: Duration,
    stats: &BatchStats,
) -> BackfillReport {
    let mut report = BackfillReport::default();

    let originals: FxHashMap<String, String> = posts
        .iter()
        .filter(|p| !p.is_retweet && !p.text.is_empty())
        .map(|p| (p.id.clone(), p.text.clone()))
        .collect();

    let mut waiting: Vec<usize> = Vec::new();
    for (idx, post) in posts.iter_mut().enumerate() {
        if !post.is_retweet || post.backfilled {
            continue;
        }
        let Some(ref_id) = post.referenced_id.as_deref() else {
            report.truncated += 1;
            stats.inc_retweets_truncated();
            continue;
        };
        match originals.get(ref_id) {
            Some(text) => {
                post.text = text.clone();
                post.backfilled = true;
                report.local += 1;
                stats.inc_retweets_local();
            }
            None => waiting.push(idx),
        }
    }

    let mut missing: Vec<&str> = Vec::new();
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    for &idx in &waiting {
        if let Some(id) = posts[idx].referenced_id.as_deref() {
            if seen.insert(id) {
                missing.push(id);
            }
        }
    }

    let fetched = match lookup {
        Some(lookup) if !missing.is_empty() => {
            info!(ids = missing.len(), "Fetching referenced posts");
            let pb = make_progress_bar(missing.len() as u64, "Backfill");
            let mut fetched: FxHashMap<String, String> = FxHashMap::default();
            for (n, id) in missing.iter().enumerate() {
                if n > 0 {
                    thread::sleep(delay);
                }
                report.lookups += 1;
                match lookup.fetch_text(id) {
                    Ok(text) if !text.is_empty() => {
                        fetched.insert(id.to_string(), text);
                    }
                    Ok(_) => debug!(id, "Referenced post has empty text"),
                    Err(e) => warn!(id, error = %e, "Referenced post lookup failed"),
                }
                pb.inc(1);
            }
            pb.finish_and_clear();
            fetched
        }
        _ => FxHashMap::default(),
    };

    for idx in waiting {
        let post = &mut posts[idx];
        let text = post
            .referenced_id
            .as_deref()
            .and_then(|id| fetched.get(id));
        match text {
            Some(text) => {
                post.text = text.clone();
                post.backfilled = true;
                report.remote += 1;
                stats.inc_retweets_remote();
            }
            None => {
                report.truncated += 1;
                stats.inc_retweets_truncated();
            }
        }
    }

    info!(
        local = report.local,
        remote = report.remote,
        truncated = report.truncated,
        lookups = report.lookups,
        "Backfill complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{IngestError, Result};
    use chrono::{TimeZone, Utc};
    use std::cell::RefCell;

    fn post(id: &str, text: &str, referenced: Option<&str>) -> Post {
        Post {
            id: id.into(),
            text: text.into(),
            datetime: Utc.with_ymd_and_hms(2020, 3, 9, 18, 0, 0).unwrap(),
            author_id: "u1".into(),
            geo_place_id: None,
            source: None,
            hashtags: Vec::new(),
            entities: Vec::new(),
            is_retweet: referenced.is_some(),
            referenced_id: referenced.map(str::to_string),
            backfilled: false,
            retweet_count: 0,
            reply_count: 0,
            like_count: 0,
            quote_count: 0,
        }
    }

    struct FakeLookup {
        texts: FxHashMap<String, String>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeLookup {
        fn new(texts: &[(&str, &str)]) -> Self {
            Self {
                texts: texts
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl PostLookup for FakeLookup {
        fn fetch_text(&self, id: &str) -> Result<String> {
            self.calls.borrow_mut().push(id.to_string());
            self.texts
                .get(id)
                .cloned()
                .ok_or(IngestError::HttpFailure {
                    status: 404,
                    body: "Not Found".into(),
                })
        }
    }

    #[test]
    fn failed_lookup_leaves_text_unchanged() {
        let mut posts = vec![post("9", "@user: breaking news", Some("123"))];
        let lookup = FakeLookup::new(&[]);
        let stats = BatchStats::new();

        let report = backfill(&mut posts, Some(&lookup), Duration::ZERO, &stats);

        assert_eq!(*lookup.calls.borrow(), vec!["123".to_string()]);
        assert_eq!(posts[0].text, "@user: breaking news");
        assert!(!posts[0].backfilled);
        assert_eq!(report.truncated, 1);
        assert_eq!(stats.retweets_truncated(), 1);
    }

    #[test]
    fn local_original_is_copied_without_lookup() {
        let mut posts = vec![
            post("123", "full original text", None),
            post("9", "@user: full orig…", Some("123")),
        ];
        let lookup = FakeLookup::new(&[]);
        let report = backfill(&mut posts, Some(&lookup), Duration::ZERO, &BatchStats::new());

        assert_eq!(posts[1].text, "full original text");
        assert!(posts[1].backfilled);
        assert_eq!(report.local, 1);
        assert!(lookup.calls.borrow().is_empty());
    }

    #[test]
    fn one_lookup_per_distinct_id() {
        let mut posts = vec![
            post("1", "@a: trunc…", Some("500")),
            post("2", "@a: trunc…", Some("500")),
            post("3", "@b: other…", Some("600")),
        ];
        let lookup = FakeLookup::new(&[("500", "the whole story"), ("600", "another story")]);
        let stats = BatchStats::new();

        let report = backfill(&mut posts, Some(&lookup), Duration::ZERO, &stats);

        assert_eq!(*lookup.calls.borrow(), vec!["500".to_string(), "600".to_string()]);
        assert_eq!(posts[0].text, "the whole story");
        assert_eq!(posts[1].text, "the whole story");
        assert_eq!(posts[2].text, "another story");
        assert_eq!(report.remote, 3);
        assert_eq!(report.lookups, 2);
        assert_eq!(stats.retweets_backfilled(), 3);
    }

    #[test]
    fn second_run_skips_backfilled_posts() {
        let mut posts = vec![
            post("1", "@a: trunc…", Some("500")),
            post("2", "@b: trunc…", Some("404")),
        ];
        let lookup = FakeLookup::new(&[("500", "the whole story")]);
        backfill(&mut posts, Some(&lookup), Duration::ZERO, &BatchStats::new());
        let after_first = posts.clone();

        let again = FakeLookup::new(&[("500", "something else"), ("404", "late arrival")]);
        let report = backfill(&mut posts, Some(&again), Duration::ZERO, &BatchStats::new());

        assert_eq!(posts[0], after_first[0]);
        assert_eq!(*again.calls.borrow(), vec!["404".to_string()]);
        assert_eq!(posts[1].text, "late arrival");
        assert_eq!(report.remote, 1);
    }

    #[test]
    fn empty_fetched_text_is_ignored() {
        let mut posts = vec![post("1", "@a: trunc…", Some("500"))];
        let lookup = FakeLookup::new(&[("500", "")]);
        backfill(&mut posts, Some(&lookup), Duration::ZERO, &BatchStats::new());
        assert_eq!(posts[0].text, "@a: trunc…");
    }

    #[test]
    fn retweet_without_reference_counts_as_truncated() {
        let mut posts = vec![post("1", "@a: trunc…", None)];
        posts[0].is_retweet = true;
        let report = backfill(&mut posts, None, Duration::ZERO, &BatchStats::new());
        assert_eq!(report.truncated, 1);
        assert_eq!(report.lookups, 0);
    }

    #[test]
    fn without_lookup_missing_ids_stay_truncated() {
        let mut posts = vec![post("1", "@a: trunc…", Some("500"))];
        let report = backfill(&mut posts, None, Duration::ZERO, &BatchStats::new());
        assert_eq!(report.truncated, 1);
        assert_eq!(posts[0].text, "@a: trunc…");
    }
}
