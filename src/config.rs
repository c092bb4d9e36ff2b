use std::time::Duration;

/// Full-archive search endpoint
pub const SEARCH_URL: &str = "https://api.twitter.com/2/tweets/search/all";

/// Single post lookup endpoint (`{LOOKUP_URL}/{id}`)
pub const LOOKUP_URL: &str = "https://api.twitter.com/2/tweets";

/// Free-text geocoding endpoint
pub const GEOCODE_URL: &str = "https://nominatim.openstreetmap.org/search";

/// Nominatim rejects requests without an identifying user agent
pub const GEOCODER_USER_AGENT: &str = concat!("twingest/", env!("CARGO_PKG_VERSION"));

/// Search language filter
pub const DEFAULT_LANGUAGE: &str = "it";

/// Posts per search page (provider maximum for full-archive search)
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// 300 requests / 15 minutes averages to one request every 3 seconds
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 3000;

pub const TWEET_FIELDS: &[&str] = &[
    "created_at",
    "geo",
    "public_metrics",
    "source",
    "entities",
    "referenced_tweets",
];

pub const USER_FIELDS: &[&str] = &["description", "location", "public_metrics", "verified"];

pub const PLACE_FIELDS: &[&str] = &[
    "id",
    "full_name",
    "name",
    "place_type",
    "country",
    "country_code",
    "contained_within",
    "geo",
];

pub const EXPANSIONS: &[&str] = &["author_id", "geo.place_id"];

/// Prefix the provider puts in front of retweeted text
pub const RETWEET_MARKER: &str = "RT ";

/// Only places in this country with this type survive the merge
pub const PLACE_COUNTRY_CODE: &str = "IT";
pub const PLACE_TYPE_CITY: &str = "city";

/// Normalized location strings outside this range are rejected
pub const MIN_LOCATION_LEN: usize = 3;
pub const MAX_LOCATION_LEN: usize = 100;

/// Gazetteer words this short are left out of the usefulness vocabulary
pub const MAX_SHORT_TOKEN_LEN: usize = 3;

/// Minimum weighted-ratio score (0-100) to accept a municipality match
pub const FUZZY_THRESHOLD: f64 = 95.0;

/// Geocoder display names must contain this to be accepted
pub const COUNTRY_MARKER: &str = "italia";

pub const CHECKPOINT_VERSION: u32 = 1;

/// Nominatim usage policy allows one request per second
pub const DEFAULT_GEOCODE_DELAY_MS: u64 = 1000;

pub fn default_request_delay() -> Duration {
    Duration::from_millis(DEFAULT_REQUEST_DELAY_MS)
}

pub fn default_geocode_delay() -> Duration {
    Duration::from_millis(DEFAULT_GEOCODE_DELAY_MS)
}
