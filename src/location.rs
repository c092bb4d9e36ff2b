//! Free-text location resolution.
//!
//! A raw location goes through `normalize`, a cheap vocabulary check, then
//! hierarchical gazetteer narrowing (region, province, province code) and a
//! fuzzy municipality match. Anything the gazetteer cannot place with
//! confidence falls back to a single geocoder request. Results, including
//! misses, are memoized by normalized string for the lifetime of the resolver.

use crate::client::Geocoder;
use crate::config::{
    default_geocode_delay, COUNTRY_MARKER, FUZZY_THRESHOLD, MAX_LOCATION_LEN, MIN_LOCATION_LEN,
};
use crate::fuzzy;
use crate::gazetteer::{canonical_region, Gazetteer, Level};
use crate::models::ResolvedLocation;
use crate::stats::BatchStats;
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

static FILLER_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:comune di|provincia di|regione|comune|provincia|citt[aà] metropolitana di|metropolitan city of|municipality of|province of|region of|municipality|province|region)\b",
    )
    .unwrap()
});

/// English region names and their folded local spelling.
static ENGLISH_REGIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\baosta valley\b", "valle daosta"),
        (r"\btrentino south tyrol\b", "trentino alto adige"),
        (r"\bsouth tyrol\b", "bolzano"),
        (r"\bpiedmont\b", "piemonte"),
        (r"\blombardy\b", "lombardia"),
        (r"\btuscany\b", "toscana"),
        (r"\bsardinia\b", "sardegna"),
        (r"\bsicily\b", "sicilia"),
        (r"\bapulia\b", "puglia"),
        (r"\blatium\b", "lazio"),
    ]
    .into_iter()
    .map(|(pattern, local)| (Regex::new(pattern).unwrap(), local))
    .collect()
});

/// Country and continent tokens that carry no gazetteer information.
const COUNTRY_FILLERS: &[&str] = &["italia", "italy", "italie", "italien", "europa", "europe"];

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub min_len: usize,
    pub max_len: usize,
    /// Minimum weighted-ratio score (0-100) for a municipality match
    pub fuzzy_threshold: f64,
    /// Lowercase marker a geocoder display name must contain
    pub country_marker: String,
    /// Pause after each geocoder request
    pub geocode_delay: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_len: MIN_LOCATION_LEN,
            max_len: MAX_LOCATION_LEN,
            fuzzy_threshold: FUZZY_THRESHOLD,
            country_marker: COUNTRY_MARKER.to_string(),
            geocode_delay: default_geocode_delay(),
        }
    }
}

/// Result of matching a normalized string against the gazetteer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOutcome {
    /// Row index of the accepted municipality
    Found(usize),
    /// Two or more values matched at this level; no guess is made
    Ambiguous(Level),
    NoMatch,
}

/// Lowercased, letters/commas/spaces only, filler words removed, English
/// region names translated. `None` when the result is too short or too long.
pub fn normalize(raw: &str, config: &ResolverConfig) -> Option<String> {
    let cleaned: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, '-' | '_' | '/') { ' ' } else { c })
        .filter(|c| c.is_alphabetic() || c.is_whitespace() || *c == ',')
        .collect();

    let mut text = FILLER_WORDS.replace_all(&cleaned, " ").into_owned();
    for (pattern, local) in ENGLISH_REGIONS.iter() {
        text = pattern.replace_all(&text, *local).into_owned();
    }

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| !c.is_alphabetic());

    let len = trimmed.chars().count();
    if len < config.min_len || len > config.max_len {
        return None;
    }
    Some(trimmed.to_string())
}

/// Drop commas and country/continent tokens: `milano, lombardia, italia` -> `milano lombardia`.
pub fn strip_country(normalized: &str) -> String {
    normalized
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty() && !COUNTRY_FILLERS.contains(t))
        .collect::<Vec<_>>()
        .join(" ")
}

fn find_phrase(tokens: &[String], phrase: &str) -> Option<usize> {
    let wanted: Vec<&str> = phrase.split_whitespace().collect();
    if wanted.is_empty() || wanted.len() > tokens.len() {
        return None;
    }
    tokens
        .windows(wanted.len())
        .position(|w| w.iter().zip(&wanted).all(|(a, b)| a == b))
}

/// Narrow rows by region, then province, then province code, and fuzzy-match
/// what is left against the surviving municipalities.
pub fn match_gazetteer(text: &str, gazetteer: &Gazetteer, threshold: f64) -> MatchOutcome {
    let mut remaining: Vec<String> = text.split_whitespace().map(str::to_string).collect();
    let mut rows: Vec<usize> = (0..gazetteer.len()).collect();
    let mut matched_province: Option<String> = None;

    for level in Level::NARROWING_ORDER {
        let mut candidates: Vec<&str> = rows
            .iter()
            .map(|&i| gazetteer.key(i, level))
            .filter(|key| find_phrase(&remaining, key).is_some())
            .collect();
        candidates.sort_unstable();
        candidates.dedup();

        match candidates.as_slice() {
            [] => continue,
            [value] => {
                let value = value.to_string();
                rows.retain(|&i| gazetteer.key(i, level) == value);
                if let Some(pos) = find_phrase(&remaining, &value) {
                    let width = value.split_whitespace().count();
                    remaining.drain(pos..pos + width);
                }
                debug!(?level, value = %value, rows = rows.len(), "Narrowed gazetteer");
                if level == Level::Province {
                    matched_province = Some(value);
                }
            }
            _ => {
                debug!(?level, candidates = ?candidates, "Ambiguous narrowing");
                return MatchOutcome::Ambiguous(level);
            }
        }
    }

    let candidate = if remaining.is_empty() {
        match matched_province {
            Some(province) => province,
            None => return MatchOutcome::NoMatch,
        }
    } else {
        remaining.join(" ")
    };

    let best = fuzzy::best_match(
        &candidate,
        rows.iter().map(|&i| gazetteer.municipality_key(i)),
    );
    match best {
        Some((pos, score)) if score >= threshold => {
            debug!(candidate = %candidate, score, "Municipality matched");
            MatchOutcome::Found(rows[pos])
        }
        Some((_, score)) => {
            debug!(candidate = %candidate, score, "Best municipality below threshold");
            MatchOutcome::NoMatch
        }
        None => MatchOutcome::NoMatch,
    }
}

/// Resolves raw location strings for one pass. Holds the memo cache, so a
/// new resolver must be built for every pass (and every gazetteer).
pub struct LocationResolver<'a> {
    gazetteer: &'a Gazetteer,
    geocoder: Option<&'a dyn Geocoder>,
    config: ResolverConfig,
    cache: FxHashMap<String, Option<ResolvedLocation>>,
}

impl<'a> LocationResolver<'a> {
    pub fn new(
        gazetteer: &'a Gazetteer,
        geocoder: Option<&'a dyn Geocoder>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            gazetteer,
            geocoder,
            config,
            cache: FxHashMap::default(),
        }
    }

    pub fn gazetteer(&self) -> &Gazetteer {
        self.gazetteer
    }

    /// Distinct normalized strings seen so far.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn resolve(&mut self, raw: &str, stats: &BatchStats) -> Option<ResolvedLocation> {
        let normalized = normalize(raw, &self.config)?;

        if let Some(cached) = self.cache.get(&normalized) {
            stats.inc_cache_hits();
            return cached.clone();
        }

        let resolved = self.resolve_uncached(&normalized, stats);
        self.cache.insert(normalized, resolved.clone());
        resolved
    }

    fn resolve_uncached(&self, normalized: &str, stats: &BatchStats) -> Option<ResolvedLocation> {
        if !self.gazetteer.mentions_known_word(normalized) {
            debug!(location = normalized, "No gazetteer word, skipping");
            return None;
        }

        let text = strip_country(normalized);
        match match_gazetteer(&text, self.gazetteer, self.config.fuzzy_threshold) {
            MatchOutcome::Found(idx) => {
                let entry = self.gazetteer.entry(idx);
                return Some(ResolvedLocation {
                    lat: entry.lat,
                    lon: entry.lon,
                    name: entry.municipality.clone(),
                    region: canonical_region(&entry.region),
                });
            }
            MatchOutcome::Ambiguous(level) => {
                debug!(location = normalized, ?level, "Ambiguous, trying geocoder");
            }
            MatchOutcome::NoMatch => {}
        }

        self.geocode(normalized, stats)
    }

    fn geocode(&self, normalized: &str, stats: &BatchStats) -> Option<ResolvedLocation> {
        let geocoder = self.geocoder?;
        stats.inc_geocode_requests();
        let result = geocoder.geocode(normalized);
        thread::sleep(self.config.geocode_delay);

        let candidates = match result {
            Ok(c) => c,
            Err(e) => {
                warn!(location = normalized, error = %e, "Geocoding failed");
                return None;
            }
        };
        let first = candidates.into_iter().next()?;
        let shown = first.display_name.to_lowercase();

        if !shown.contains(&self.config.country_marker) {
            debug!(location = normalized, shown = %shown, "Geocoder result outside country");
            return None;
        }

        let region = self
            .gazetteer
            .regions()
            .iter()
            .flat_map(|r| [r.clone(), canonical_region(r)])
            .filter(|r| shown.contains(r.as_str()))
            .max_by_key(|r| r.len())?;

        let name = shown
            .split(',')
            .next()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        Some(ResolvedLocation {
            lat: first.lat,
            lon: first.lon,
            name,
            region: canonical_region(&region),
        })
    }
}
