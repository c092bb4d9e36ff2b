use crate::config::{PLACE_COUNTRY_CODE, PLACE_TYPE_CITY, RETWEET_MARKER};
use crate::gazetteer::canonical_region;
use crate::models::{Author, AuthorLocation, Entity, Place, Post, RawAuthor, RawPage, RawPlace, RawPost};
use crate::stats::BatchStats;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const RETWEETED: &str = "retweeted";

/// The three normalized collections of one batch.
#[derive(Debug, Default)]
pub struct MergedBatch {
    pub posts: Vec<Post>,
    pub authors: Vec<Author>,
    pub places: Vec<Place>,
}

/// Merge shards in the order given.
///
/// Records sharing an id are collapsed: the survivor sits where the id was
/// first seen and carries the content of its last occurrence, so later shards
/// override earlier ones. Merging the same shard list twice gives identical output.
pub fn merge(shard_paths: &[PathBuf], stats: &BatchStats) -> Result<MergedBatch> {
    info!(shards = shard_paths.len(), "Merging shards");

    let pages: Vec<RawPage> = shard_paths
        .par_iter()
        .map(|path| read_shard(path))
        .collect::<Result<_>>()?;

    let mut raw_posts = Vec::new();
    let mut raw_authors = Vec::new();
    let mut raw_places = Vec::new();
    for page in pages {
        raw_posts.extend(page.data);
        raw_authors.extend(page.includes.users);
        raw_places.extend(page.includes.places);
    }

    let posts = raw_posts
        .into_iter()
        .map(normalize_post)
        .collect::<Result<Vec<_>>>()?;
    let posts = dedup_last_wins(posts, |p| p.id.as_str());

    let authors = dedup_last_wins(raw_authors.into_iter().map(normalize_author), |a| a.id.as_str());

    let total_places = raw_places.len();
    let kept: Vec<Place> = raw_places.into_iter().filter_map(normalize_place).collect();
    let discarded = total_places - kept.len();
    let places = dedup_last_wins(kept, |p| p.id.as_str());

    stats.add_posts_merged(posts.len() as u64);
    stats.add_authors_merged(authors.len() as u64);
    stats.add_places_merged(places.len() as u64);
    stats.add_places_discarded(discarded as u64);

    info!(
        posts = posts.len(),
        authors = authors.len(),
        places = places.len(),
        places_discarded = discarded,
        "Merge complete"
    );

    Ok(MergedBatch {
        posts,
        authors,
        places,
    })
}

fn read_shard(path: &Path) -> Result<RawPage> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("Failed to read shard {}", path.display()))?;
    let page: RawPage = serde_json::from_str(&body)
        .with_context(|| format!("Malformed shard {}", path.display()))?;
    debug!(path = %path.display(), posts = page.data.len(), "Shard parsed");
    Ok(page)
}

fn dedup_last_wins<T>(items: impl IntoIterator<Item = T>, id: impl Fn(&T) -> &str) -> Vec<T> {
    let mut positions: FxHashMap<String, usize> = FxHashMap::default();
    let mut out: Vec<T> = Vec::new();

    for item in items {
        match positions.get(id(&item)).copied() {
            Some(pos) => out[pos] = item,
            None => {
                positions.insert(id(&item).to_string(), out.len());
                out.push(item);
            }
        }
    }
    out
}

pub fn normalize_post(raw: RawPost) -> Result<Post> {
    let datetime = DateTime::parse_from_rfc3339(&raw.created_at)
        .with_context(|| format!("Bad created_at {:?} on post {}", raw.created_at, raw.id))?
        .with_timezone(&Utc);

    let text = if raw.text.starts_with(RETWEET_MARKER) {
        raw.text[RETWEET_MARKER.len()..].to_string()
    } else {
        raw.text
    };

    // `is_retweet` follows the reference, not the marker.
    let referenced_id = raw
        .referenced_tweets
        .into_iter()
        .find(|r| r.kind == RETWEETED)
        .map(|r| r.id);
    let is_retweet = referenced_id.is_some();

    let (hashtags, entities) = match raw.entities {
        Some(e) => (
            e.hashtags.into_iter().map(|h| h.tag).collect(),
            e.annotations
                .into_iter()
                .map(|a| Entity {
                    text: a.normalized_text,
                    kind: a.kind,
                })
                .collect(),
        ),
        None => (Vec::new(), Vec::new()),
    };

    let metrics = raw.public_metrics;
    Ok(Post {
        id: raw.id,
        text,
        datetime,
        author_id: raw.author_id,
        geo_place_id: raw.geo.and_then(|g| g.place_id),
        source: raw.source,
        hashtags,
        entities,
        is_retweet,
        referenced_id,
        backfilled: false,
        retweet_count: metrics.retweet_count,
        reply_count: metrics.reply_count,
        like_count: metrics.like_count,
        quote_count: metrics.quote_count,
    })
}

pub fn normalize_author(raw: RawAuthor) -> Author {
    let metrics = raw.public_metrics;
    let location = raw
        .location
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .map(AuthorLocation::Raw);

    Author {
        id: raw.id,
        name: raw.name,
        username: raw.username,
        description: raw.description,
        location,
        verified: raw.verified,
        followers_count: metrics.followers_count,
        following_count: metrics.following_count,
        tweet_count: metrics.tweet_count,
        listed_count: metrics.listed_count,
    }
}

/// Keep only domestic city places with a usable bounding box
/// `[lon_min, lat_min, lon_max, lat_max]`, collapsed to its centre.
pub fn normalize_place(raw: RawPlace) -> Option<Place> {
    let domestic = raw
        .country_code
        .as_deref()
        .is_some_and(|c| c.eq_ignore_ascii_case(PLACE_COUNTRY_CODE));
    let city = raw.place_type.as_deref() == Some(PLACE_TYPE_CITY);
    if !domestic || !city {
        debug!(id = %raw.id, "Place discarded");
        return None;
    }

    let bbox = raw.geo.map(|g| g.bbox)?;
    let [lon_min, lat_min, lon_max, lat_max] = <[f64; 4]>::try_from(bbox).ok()?;

    let mut parts = raw.full_name.split(',').map(str::trim);
    let first = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    let region = parts
        .next()
        .filter(|s| !s.is_empty())
        .map(canonical_region);
    let name = raw.name.or(first)?;

    Some(Place {
        id: raw.id,
        name,
        region,
        lat: (lat_min + lat_max) / 2.0,
        lon: (lon_min + lon_max) / 2.0,
    })
}
