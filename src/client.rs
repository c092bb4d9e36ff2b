//! HTTP collaborators: the search endpoint, the single-post lookup and the
//! free-text geocoder. Each is a trait so the pipeline stages can run
//! against in-memory fakes.

use crate::config::{
    EXPANSIONS, GEOCODER_USER_AGENT, GEOCODE_URL, LOOKUP_URL, PLACE_FIELDS, SEARCH_URL,
    TWEET_FIELDS, USER_FIELDS,
};
use crate::error::{IngestError, Result};
use crate::models::PageMeta;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Keyword search restricted to one language and an inclusive date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub keywords: Vec<String>,
    pub language: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SearchQuery {
    pub fn new(
        keywords: Vec<String>,
        language: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Self> {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(IngestError::InvalidQuery("no keywords given".into()));
        }
        if language.trim().is_empty() {
            return Err(IngestError::InvalidQuery("empty language filter".into()));
        }
        if start > end {
            return Err(IngestError::InvalidQuery(format!(
                "start date {start} is after end date {end}"
            )));
        }
        Ok(Self {
            keywords,
            language: language.trim().to_string(),
            start,
            end,
        })
    }

    /// `(a OR "b c") lang:xx`
    pub fn expression(&self) -> String {
        let terms: Vec<String> = self
            .keywords
            .iter()
            .map(|k| {
                if k.contains(char::is_whitespace) {
                    format!("\"{k}\"")
                } else {
                    k.clone()
                }
            })
            .collect();
        format!("({}) lang:{}", terms.join(" OR "), self.language)
    }

    pub fn start_time(&self) -> String {
        format!("{}T00:00:00Z", self.start.format("%Y-%m-%d"))
    }

    /// Midnight after `end`, so the last day is included.
    pub fn end_time(&self) -> String {
        let next = self.end.succ_opt().unwrap_or(self.end);
        format!("{}T00:00:00Z", next.format("%Y-%m-%d"))
    }

    /// Identifies the logical stream in checkpoints.
    pub fn fingerprint(&self) -> String {
        format!("{}|{}|{}", self.expression(), self.start_time(), self.end_time())
    }
}

/// A successfully fetched page: the raw body to persist and the cursor it announces.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub body: String,
    pub next_token: Option<String>,
    pub result_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeCandidate {
    pub lat: f64,
    pub lon: f64,
    pub display_name: String,
}

pub trait SearchApi {
    /// Fetch one page. `cursor` is `None` for the first page of a stream.
    fn search(&self, query: &SearchQuery, cursor: Option<&str>, page_size: u32)
        -> Result<SearchPage>;
}

pub trait PostLookup {
    /// Full text of a single post.
    fn fetch_text(&self, id: &str) -> Result<String>;
}

pub trait Geocoder {
    fn geocode(&self, address: &str) -> Result<Vec<GeocodeCandidate>>;
}

#[derive(Deserialize)]
struct PageEnvelope {
    meta: PageMeta,
}

#[derive(Deserialize)]
struct LookupResponse {
    data: Option<LookupData>,
}

#[derive(Deserialize)]
struct LookupData {
    text: String,
}

#[derive(Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    display_name: String,
}

fn check_status(resp: reqwest::blocking::Response) -> Result<reqwest::blocking::Response> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        return Err(IngestError::HttpFailure {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}

/// Bearer-authenticated client for the search and lookup endpoints.
pub struct TwitterClient {
    client: reqwest::blocking::Client,
    token: String,
    search_url: String,
    lookup_url: String,
}

impl TwitterClient {
    pub fn new(token: String) -> Result<Self> {
        Self::with_endpoints(token, SEARCH_URL, LOOKUP_URL)
    }

    pub fn with_endpoints(token: String, search_url: &str, lookup_url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            token,
            search_url: search_url.to_string(),
            lookup_url: lookup_url.trim_end_matches('/').to_string(),
        })
    }
}

impl SearchApi for TwitterClient {
    fn search(
        &self,
        query: &SearchQuery,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<SearchPage> {
        let mut params: Vec<(&str, String)> = vec![
            ("query", query.expression()),
            ("start_time", query.start_time()),
            ("end_time", query.end_time()),
            ("tweet.fields", TWEET_FIELDS.join(",")),
            ("expansions", EXPANSIONS.join(",")),
            ("user.fields", USER_FIELDS.join(",")),
            ("place.fields", PLACE_FIELDS.join(",")),
            ("max_results", page_size.to_string()),
        ];
        if let Some(token) = cursor {
            params.push(("next_token", token.to_string()));
        }

        let resp = self
            .client
            .get(&self.search_url)
            .bearer_auth(&self.token)
            .query(&params)
            .send()?;
        let body = check_status(resp)?.text()?;

        let envelope: PageEnvelope = serde_json::from_str(&body)?;
        debug!(
            results = envelope.meta.result_count,
            has_next = envelope.meta.next_token.is_some(),
            "Search page received"
        );

        Ok(SearchPage {
            body,
            next_token: envelope.meta.next_token,
            result_count: envelope.meta.result_count,
        })
    }
}

impl PostLookup for TwitterClient {
    fn fetch_text(&self, id: &str) -> Result<String> {
        let url = format!("{}/{}", self.lookup_url, id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()?;
        let lookup: LookupResponse = check_status(resp)?.json()?;
        lookup
            .data
            .map(|d| d.text)
            .ok_or_else(|| IngestError::MalformedResponse(format!("no data for post {id}")))
    }
}

/// Nominatim search client. Unauthenticated; one result per query.
pub struct NominatimGeocoder {
    client: reqwest::blocking::Client,
    url: String,
}

impl NominatimGeocoder {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(GEOCODE_URL)
    }

    pub fn with_endpoint(url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(GEOCODER_USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl Geocoder for NominatimGeocoder {
    fn geocode(&self, address: &str) -> Result<Vec<GeocodeCandidate>> {
        let resp = self
            .client
            .get(&self.url)
            .query(&[
                ("q", address),
                ("format", "json"),
                ("limit", "1"),
                ("accept-language", "it"),
            ])
            .send()?;
        let places: Vec<NominatimPlace> = check_status(resp)?.json()?;

        places
            .into_iter()
            .map(|p| {
                let lat = p.lat.parse::<f64>().map_err(|e| {
                    IngestError::MalformedResponse(format!("bad latitude {:?}: {e}", p.lat))
                })?;
                let lon = p.lon.parse::<f64>().map_err(|e| {
                    IngestError::MalformedResponse(format!("bad longitude {:?}: {e}", p.lon))
                })?;
                Ok(GeocodeCandidate {
                    lat,
                    lon,
                    display_name: p.display_name,
                })
            })
            .collect()
    }
}
