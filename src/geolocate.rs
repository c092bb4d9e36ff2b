use crate::gazetteer::{canonical_region, Gazetteer};
use crate::location::LocationResolver;
use crate::models::{Author, AuthorLocation, Place, Post};
use crate::stats::{make_progress_bar, BatchStats};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Where a located post got its coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    Place,
    Author,
}

/// A post pinned to a point, for time series and maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatedPost {
    pub id: String,
    pub datetime: DateTime<Utc>,
    pub text: String,
    pub lat: f64,
    pub lon: f64,
    pub region: Option<String>,
    pub source: LocationSource,
}

/// Resolve every author's raw location string. Resolved strings are replaced
/// by coordinates; the rest keep the raw string.
pub fn geolocate_authors(
    authors: &mut [Author],
    resolver: &mut LocationResolver<'_>,
    stats: &BatchStats,
) {
    let pending = authors
        .iter()
        .filter(|a| matches!(a.location, Some(AuthorLocation::Raw(_))))
        .count();
    info!(authors = authors.len(), pending, "Geolocating authors");

    let pb = make_progress_bar(pending as u64, "Authors");
    for author in authors.iter_mut() {
        let Some(AuthorLocation::Raw(raw)) = &author.location else {
            continue;
        };
        match resolver.resolve(raw, stats) {
            Some(loc) => {
                author.location = Some(AuthorLocation::Resolved(loc));
                stats.inc_resolved();
            }
            None => stats.inc_unresolved(),
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(
        resolved = stats.resolved(),
        unresolved = stats.unresolved(),
        geocode_requests = stats.geocode_requests(),
        distinct = resolver.cache_len(),
        "Author geolocation complete"
    );
}

/// Settle each place's region: keep the `full_name` region when the gazetteer
/// knows it, otherwise take the region of the nearest gazetteer row.
pub fn geolocate_places(places: &mut [Place], gazetteer: &Gazetteer) {
    for place in places.iter_mut() {
        let known = place
            .region
            .as_deref()
            .filter(|r| gazetteer.is_known_region(r))
            .map(canonical_region);

        place.region = known.or_else(|| {
            let nearest = gazetteer.nearest(place.lat, place.lon)?;
            debug!(place = %place.name, nearest = %nearest.municipality, "Region from nearest row");
            Some(canonical_region(&nearest.region))
        });
    }
}

/// Pin posts to a point: the tagged place first, the author's resolved
/// location second. Posts with neither are left out. Sorted by datetime.
pub fn locate_posts(posts: &[Post], authors: &[Author], places: &[Place]) -> Vec<LocatedPost> {
    let places: FxHashMap<&str, &Place> = places.iter().map(|p| (p.id.as_str(), p)).collect();
    let authors: FxHashMap<&str, &Author> = authors.iter().map(|a| (a.id.as_str(), a)).collect();

    let mut located: Vec<LocatedPost> = posts
        .iter()
        .filter_map(|post| {
            let from_place = post
                .geo_place_id
                .as_deref()
                .and_then(|id| places.get(id))
                .map(|p| (p.lat, p.lon, p.region.clone(), LocationSource::Place));

            let located = from_place.or_else(|| {
                let author = authors.get(post.author_id.as_str())?;
                let loc = author.location.as_ref()?.resolved()?;
                Some((loc.lat, loc.lon, Some(loc.region.clone()), LocationSource::Author))
            })?;

            let (lat, lon, region, source) = located;
            Some(LocatedPost {
                id: post.id.clone(),
                datetime: post.datetime,
                text: post.text.clone(),
                lat,
                lon,
                region,
                source,
            })
        })
        .collect();

    located.sort_by_key(|p| p.datetime);
    located
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gazetteer::GazetteerEntry;
    use crate::location::ResolverConfig;
    use crate::models::ResolvedLocation;
    use chrono::TimeZone;
    use std::time::Duration;

    fn gazetteer() -> Gazetteer {
        let rows = [
            ("milano", "milano", "mi", "lombardia", 45.46, 9.19),
            ("bergamo", "bergamo", "bg", "lombardia", 45.69, 9.67),
            ("roma", "roma", "rm", "lazio", 41.89, 12.48),
        ];
        Gazetteer::from_entries(
            rows.iter()
                .map(|&(m, p, c, r, lat, lon)| GazetteerEntry {
                    municipality: m.into(),
                    province: p.into(),
                    province_code: c.into(),
                    region: r.into(),
                    lat,
                    lon,
                })
                .collect(),
        )
    }

    fn author(id: &str, location: Option<AuthorLocation>) -> Author {
        Author {
            id: id.into(),
            name: None,
            username: None,
            description: None,
            location,
            verified: false,
            followers_count: 0,
            following_count: 0,
            tweet_count: 0,
            listed_count: 0,
        }
    }

    fn post(id: &str, author_id: &str, place: Option<&str>, hour: u32) -> Post {
        Post {
            id: id.into(),
            text: format!("post {id}"),
            datetime: Utc.with_ymd_and_hms(2020, 3, 9, hour, 0, 0).unwrap(),
            author_id: author_id.into(),
            geo_place_id: place.map(str::to_string),
            source: None,
            hashtags: Vec::new(),
            entities: Vec::new(),
            is_retweet: false,
            referenced_id: None,
            backfilled: false,
            retweet_count: 0,
            reply_count: 0,
            like_count: 0,
            quote_count: 0,
        }
    }

    fn place(id: &str, region: Option<&str>, lat: f64, lon: f64) -> Place {
        Place {
            id: id.into(),
            name: id.into(),
            region: region.map(str::to_string),
            lat,
            lon,
        }
    }

    #[test]
    fn authors_are_resolved_or_kept_raw() {
        let g = gazetteer();
        let config = ResolverConfig {
            geocode_delay: Duration::ZERO,
            ..ResolverConfig::default()
        };
        let mut resolver = LocationResolver::new(&g, None, config);
        let stats = BatchStats::new();
        let mut authors = vec![
            author("1", Some(AuthorLocation::Raw("Milano, Lombardia, Italia".into()))),
            author("2", Some(AuthorLocation::Raw("on the moon".into()))),
            author("3", None),
            author("4", Some(AuthorLocation::Raw("milano lombardia".into()))),
        ];

        geolocate_authors(&mut authors, &mut resolver, &stats);

        let resolved = authors[0].location.as_ref().and_then(|l| l.resolved()).unwrap();
        assert_eq!(resolved.name, "milano");
        assert_eq!(
            authors[1].location,
            Some(AuthorLocation::Raw("on the moon".into()))
        );
        assert_eq!(authors[2].location, None);
        assert!(authors[3].location.as_ref().unwrap().resolved().is_some());
        assert_eq!(stats.resolved(), 2);
        assert_eq!(stats.unresolved(), 1);
    }

    #[test]
    fn place_region_kept_when_known() {
        let g = gazetteer();
        let mut places = vec![place("p1", Some("Lombardia"), 41.9, 12.5)];
        geolocate_places(&mut places, &g);
        assert_eq!(places[0].region.as_deref(), Some("lombardia"));
    }

    #[test]
    fn place_region_falls_back_to_nearest_row() {
        let g = gazetteer();
        let mut places = vec![
            place("p1", None, 41.8, 12.4),
            place("p2", Some("Atlantide"), 45.5, 9.2),
        ];
        geolocate_places(&mut places, &g);
        assert_eq!(places[0].region.as_deref(), Some("lazio"));
        assert_eq!(places[1].region.as_deref(), Some("lombardia"));
    }

    #[test]
    fn place_beats_author_and_output_is_sorted() {
        let milano = ResolvedLocation {
            lat: 45.46,
            lon: 9.19,
            name: "milano".into(),
            region: "lombardia".into(),
        };
        let authors = vec![
            author("a1", Some(AuthorLocation::Resolved(milano))),
            author("a2", Some(AuthorLocation::Raw("boh".into()))),
        ];
        let places = vec![place("p1", Some("lazio"), 41.89, 12.48)];
        let posts = vec![
            post("late", "a1", None, 20),
            post("tagged", "a1", Some("p1"), 10),
            post("unknown", "a2", None, 5),
            post("early", "a1", Some("gone"), 1),
        ];

        let located = locate_posts(&posts, &authors, &places);
        let ids: Vec<&str> = located.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "tagged", "late"]);

        assert_eq!(located[0].source, LocationSource::Author);
        assert_eq!(located[1].source, LocationSource::Place);
        assert_eq!(located[1].region.as_deref(), Some("lazio"));
        assert_eq!(located[2].lat, 45.46);
    }
}
