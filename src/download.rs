use crate::checkpoint::CheckpointManager;
use crate::client::{SearchApi, SearchQuery};
use crate::config::{default_request_delay, DEFAULT_PAGE_SIZE};
use crate::stats::BatchStats;
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

const START_COMPONENT: &str = "_start";

/// Pagination position. `Start` never collides with a provider token and is
/// never sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    Start,
    Token(String),
}

impl Cursor {
    pub fn from_option(token: Option<String>) -> Self {
        match token {
            Some(t) => Cursor::Token(t),
            None => Cursor::Start,
        }
    }

    /// Value for the request's `next_token` parameter.
    pub fn token(&self) -> Option<&str> {
        match self {
            Cursor::Start => None,
            Cursor::Token(t) => Some(t),
        }
    }

    /// Injective file-name form. Tokens keep ASCII alphanumerics and `-` and
    /// percent-encode every other byte, so they never contain `_` or `.`;
    /// `Start` is the only component that does.
    fn file_component(&self) -> String {
        match self {
            Cursor::Start => START_COMPONENT.to_string(),
            Cursor::Token(t) => {
                let mut out = String::with_capacity(t.len());
                for b in t.bytes() {
                    if b.is_ascii_alphanumeric() || b == b'-' {
                        out.push(b as char);
                    } else {
                        out.push_str(&format!("%{:02X}", b));
                    }
                }
                out
            }
        }
    }
}

pub struct DownloadConfig {
    pub output_dir: PathBuf,
    pub page_size: u32,
    /// Pause between consecutive requests; encodes the provider's rate ceiling
    pub request_delay: Duration,
}

impl DownloadConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            page_size: DEFAULT_PAGE_SIZE,
            request_delay: default_request_delay(),
        }
    }
}

#[derive(Debug)]
pub struct DownloadOutcome {
    /// Shard files written by this call, in request order
    pub shards: Vec<PathBuf>,
    /// Cursor to resume from; `None` once the stream is exhausted
    pub next_cursor: Option<String>,
    pub exhausted: bool,
}

/// `<prefix>.<cursor>.json` inside `dir`; the first page uses `_start`.
pub fn shard_path(dir: &Path, prefix: &str, cursor: &Cursor) -> PathBuf {
    dir.join(format!("{}.{}.json", prefix, cursor.file_component()))
}

/// True when `name` is a shard of exactly `prefix`. A cursor component never
/// contains `.`, so `covid.x.json` and `covid.v2.x.json` stay apart.
fn is_shard_of(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|rest| rest.strip_suffix(".json"))
        .is_some_and(|cursor| !cursor.is_empty() && !cursor.contains('.'))
}

/// Drives the cursor loop against the search endpoint, one shard file per page.
pub struct Downloader<'a> {
    api: &'a dyn SearchApi,
    config: DownloadConfig,
    checkpoint: Option<CheckpointManager>,
}

impl<'a> Downloader<'a> {
    pub fn new(api: &'a dyn SearchApi, config: DownloadConfig) -> Self {
        Self {
            api,
            config,
            checkpoint: None,
        }
    }

    /// Persist the cursor after every page so an interrupted run can resume.
    pub fn with_checkpoint(mut self, checkpoint: CheckpointManager) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Fetch pages until the provider stops announcing a new cursor or
    /// `max_requests` pages have been written. A non-success response aborts
    /// immediately with the underlying `IngestError`; shards already written stay.
    pub fn download(
        &self,
        query: &SearchQuery,
        prefix: &str,
        start_cursor: Option<String>,
        max_requests: Option<u32>,
        stats: &BatchStats,
    ) -> Result<DownloadOutcome> {
        fs::create_dir_all(&self.config.output_dir).with_context(|| {
            format!(
                "Failed to create shard directory: {:?}",
                self.config.output_dir
            )
        })?;

        let mut current = Cursor::from_option(start_cursor);
        let mut requests = 0u32;
        let mut shards = Vec::new();
        let pb = ProgressBar::new_spinner();

        info!(
            query = %query.expression(),
            from = %query.start,
            to = %query.end,
            resume = current != Cursor::Start,
            "Starting download"
        );

        let exhausted = loop {
            let page = self
                .api
                .search(query, current.token(), self.config.page_size)
                .with_context(|| format!("Search request failed at cursor {:?}", current))?;

            let path = shard_path(&self.config.output_dir, prefix, &current);
            fs::write(&path, &page.body)
                .with_context(|| format!("Failed to write shard: {:?}", path))?;
            debug!(shard = ?path, results = page.result_count, "Shard written");

            shards.push(path);
            requests += 1;
            stats.inc_pages();
            stats.add_posts_fetched(page.result_count);
            pb.set_message(format!("{} pages", stats.pages()));
            pb.tick();

            // No announced token means the cursor stays put, which ends the stream.
            let next = match page.next_token {
                Some(token) => Cursor::Token(token),
                None => current.clone(),
            };
            let previous = std::mem::replace(&mut current, next);
            if current == previous {
                break true;
            }

            if let Some(ref checkpoint) = self.checkpoint {
                if let Some(token) = current.token() {
                    checkpoint.save(token, stats)?;
                }
            }

            if max_requests.is_some_and(|max| requests >= max) {
                info!(requests, "Request cap reached, more data may remain");
                break false;
            }

            thread::sleep(self.config.request_delay);
        };

        pb.finish_and_clear();

        if exhausted {
            if let Some(ref checkpoint) = self.checkpoint {
                checkpoint.clear()?;
            }
        }

        info!(
            pages = shards.len(),
            exhausted,
            "Download finished"
        );

        Ok(DownloadOutcome {
            shards,
            next_cursor: if exhausted {
                None
            } else {
                current.token().map(str::to_string)
            },
            exhausted,
        })
    }
}

/// Shards for `prefix` already on disk, oldest first (ties broken by name).
pub fn discover_shards(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    for entry in
        fs::read_dir(dir).with_context(|| format!("Failed to read shard directory: {:?}", dir))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if is_shard_of(&name, prefix) {
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .with_context(|| format!("Failed to stat shard: {}", name))?;
            found.push((modified, name, entry.path()));
        }
    }

    found.sort();
    Ok(found.into_iter().map(|(_, _, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SearchPage;
    use crate::error::IngestError;
    use chrono::NaiveDate;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Serves a fixed chain of pages keyed by the cursor sent.
    struct FakeSearch {
        pages: Vec<(Option<&'static str>, Option<&'static str>)>,
        fail_at: Option<&'static str>,
        calls: RefCell<Vec<Option<String>>>,
    }

    impl FakeSearch {
        fn chain(pages: Vec<(Option<&'static str>, Option<&'static str>)>) -> Self {
            Self {
                pages,
                fail_at: None,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl SearchApi for FakeSearch {
        fn search(
            &self,
            _query: &SearchQuery,
            cursor: Option<&str>,
            _page_size: u32,
        ) -> crate::error::Result<SearchPage> {
            self.calls.borrow_mut().push(cursor.map(str::to_string));
            if cursor.is_some() && cursor == self.fail_at {
                return Err(IngestError::HttpFailure {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            let (_, next) = self
                .pages
                .iter()
                .find(|(c, _)| *c == cursor)
                .copied()
                .ok_or_else(|| IngestError::MalformedResponse("unknown cursor".into()))?;
            Ok(SearchPage {
                body: format!(r#"{{"data":[],"meta":{{"result_count":10,"next_token":{}}}}}"#,
                    next.map(|n| format!("\"{n}\"")).unwrap_or("null".into())),
                next_token: next.map(str::to_string),
                result_count: 10,
            })
        }
    }

    fn query() -> SearchQuery {
        let d = |s| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        SearchQuery::new(vec!["covid".into()], "it", d("2020-03-01"), d("2020-03-08")).unwrap()
    }

    fn config(dir: &TempDir) -> DownloadConfig {
        DownloadConfig {
            output_dir: dir.path().to_path_buf(),
            page_size: 100,
            request_delay: Duration::ZERO,
        }
    }

    #[test]
    fn follows_cursor_until_exhausted() {
        let dir = TempDir::new().unwrap();
        let api = FakeSearch::chain(vec![(None, Some("p2")), (Some("p2"), Some("p3")), (Some("p3"), None)]);
        let stats = BatchStats::new();

        let outcome = Downloader::new(&api, config(&dir))
            .download(&query(), "covid", None, None, &stats)
            .unwrap();

        assert!(outcome.exhausted);
        assert_eq!(outcome.next_cursor, None);
        assert_eq!(outcome.shards.len(), 3);
        assert_eq!(stats.pages(), 3);
        assert_eq!(stats.posts_fetched(), 30);
        assert_eq!(
            *api.calls.borrow(),
            vec![None, Some("p2".to_string()), Some("p3".to_string())]
        );
        assert!(dir.path().join("covid._start.json").exists());
        assert!(dir.path().join("covid.p2.json").exists());
        assert!(dir.path().join("covid.p3.json").exists());
    }

    #[test]
    fn repeated_cursor_stops_the_loop() {
        let dir = TempDir::new().unwrap();
        let api = FakeSearch::chain(vec![(None, Some("p2")), (Some("p2"), Some("p2"))]);

        let outcome = Downloader::new(&api, config(&dir))
            .download(&query(), "covid", None, None, &BatchStats::new())
            .unwrap();

        assert!(outcome.exhausted);
        assert_eq!(outcome.shards.len(), 2);
    }

    #[test]
    fn request_cap_stops_without_error() {
        let dir = TempDir::new().unwrap();
        let api = FakeSearch::chain(vec![(None, Some("p2")), (Some("p2"), None)]);

        let outcome = Downloader::new(&api, config(&dir))
            .download(&query(), "covid", None, Some(1), &BatchStats::new())
            .unwrap();

        assert!(!outcome.exhausted);
        assert_eq!(outcome.shards.len(), 1);
        assert_eq!(outcome.next_cursor.as_deref(), Some("p2"));
    }

    #[test]
    fn resume_continues_without_refetching_first_page() {
        let dir = TempDir::new().unwrap();
        let api = FakeSearch::chain(vec![(None, Some("p2")), (Some("p2"), Some("p3")), (Some("p3"), None)]);
        let downloader = Downloader::new(&api, config(&dir));

        let first = downloader
            .download(&query(), "covid", None, Some(1), &BatchStats::new())
            .unwrap();
        let second = downloader
            .download(&query(), "covid", first.next_cursor, None, &BatchStats::new())
            .unwrap();

        assert!(second.exhausted);
        assert_eq!(
            second.shards,
            vec![dir.path().join("covid.p2.json"), dir.path().join("covid.p3.json")]
        );
        assert_eq!(api.calls.borrow().iter().filter(|c| c.is_none()).count(), 1);
    }

    #[test]
    fn http_failure_aborts_and_keeps_written_shards() {
        let dir = TempDir::new().unwrap();
        let mut api = FakeSearch::chain(vec![(None, Some("p2")), (Some("p2"), None)]);
        api.fail_at = Some("p2");

        let err = Downloader::new(&api, config(&dir))
            .download(&query(), "covid", None, None, &BatchStats::new())
            .unwrap_err();

        let ingest = err.downcast_ref::<IngestError>().unwrap();
        assert_eq!(ingest.status(), Some(503));
        assert!(dir.path().join("covid._start.json").exists());
        assert!(!dir.path().join("covid.p2.json").exists());
    }

    #[test]
    fn checkpoint_tracks_cursor_and_clears_on_exhaustion() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().to_str().unwrap();
        let q = query();
        let api = FakeSearch::chain(vec![(None, Some("p2")), (Some("p2"), None)]);

        let capped = Downloader::new(&api, config(&dir))
            .with_checkpoint(CheckpointManager::new(&q.fingerprint(), "covid", output));
        capped
            .download(&q, "covid", None, Some(1), &BatchStats::new())
            .unwrap();
        let cp = crate::checkpoint::load_if_valid(&q.fingerprint(), "covid", output)
            .unwrap()
            .unwrap();
        assert_eq!(cp.next_cursor, "p2");
        assert_eq!(cp.stats.pages_fetched, 1);

        capped
            .download(&q, "covid", Some(cp.next_cursor), None, &BatchStats::new())
            .unwrap();
        assert!(crate::checkpoint::load_if_valid(&q.fingerprint(), "covid", output)
            .unwrap()
            .is_none());
    }

    #[test]
    fn shard_names_are_escaped() {
        let path = shard_path(Path::new("/out"), "covid", &Cursor::Token("a/b:c".into()));
        assert_eq!(path, PathBuf::from("/out/covid.a%2Fb%3Ac.json"));
        let start = shard_path(Path::new("/out"), "covid", &Cursor::Start);
        assert_eq!(start, PathBuf::from("/out/covid._start.json"));
    }

    #[test]
    fn distinct_cursors_never_share_a_shard() {
        let dir = Path::new("/o");
        let cursors = [
            Cursor::Start,
            Cursor::Token("start".into()),
            Cursor::Token("_start".into()),
            Cursor::Token("a/b".into()),
            Cursor::Token("a_b".into()),
            Cursor::Token("a.b".into()),
            Cursor::Token("a%2Fb".into()),
        ];
        let paths: std::collections::HashSet<PathBuf> =
            cursors.iter().map(|c| shard_path(dir, "c", c)).collect();
        assert_eq!(paths.len(), cursors.len());
    }

    #[test]
    fn discover_shards_filters_by_prefix() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("covid._start.json"), "{}").unwrap();
        fs::write(dir.path().join("covid.p2.json"), "{}").unwrap();
        fs::write(dir.path().join("vaccino._start.json"), "{}").unwrap();
        fs::write(dir.path().join("covid.checkpoint"), "").unwrap();

        let shards = discover_shards(dir.path(), "covid").unwrap();
        assert_eq!(shards.len(), 2);
        assert!(shards.iter().all(|p| p
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("covid.")));
    }

    #[test]
    fn overlapping_prefixes_stay_separate() {
        let dir = TempDir::new().unwrap();
        let start = Cursor::Start;
        for prefix in ["covid", "covid_vaccino", "covid.v2"] {
            fs::write(shard_path(dir.path(), prefix, &start), "{}").unwrap();
        }

        let names = |prefix: &str| -> Vec<String> {
            discover_shards(dir.path(), prefix)
                .unwrap()
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
                .collect()
        };
        assert_eq!(names("covid"), vec!["covid._start.json".to_string()]);
        assert_eq!(names("covid_vaccino"), vec!["covid_vaccino._start.json".to_string()]);
        assert_eq!(names("covid.v2"), vec!["covid.v2._start.json".to_string()]);
    }
}
