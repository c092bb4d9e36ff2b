use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One search page exactly as the provider returns it (and as it sits in a shard).
#[derive(Debug, Deserialize)]
pub struct RawPage {
    #[serde(default)]
    pub data: Vec<RawPost>,
    #[serde(default)]
    pub includes: RawIncludes,
    #[serde(default)]
    pub meta: PageMeta,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawIncludes {
    #[serde(default)]
    pub users: Vec<RawAuthor>,
    #[serde(default)]
    pub places: Vec<RawPlace>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageMeta {
    pub next_token: Option<String>,
    #[serde(default)]
    pub result_count: u64,
}

#[derive(Debug, Deserialize)]
pub struct RawPost {
    pub id: String,
    pub text: String,
    pub created_at: String,
    #[serde(default)]
    pub author_id: String,
    pub geo: Option<RawPostGeo>,
    pub source: Option<String>,
    pub entities: Option<RawEntities>,
    #[serde(default)]
    pub referenced_tweets: Vec<RawReference>,
    #[serde(default)]
    pub public_metrics: PostMetrics,
}

#[derive(Debug, Deserialize)]
pub struct RawPostGeo {
    pub place_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawEntities {
    #[serde(default)]
    pub hashtags: Vec<RawHashtag>,
    #[serde(default)]
    pub annotations: Vec<RawAnnotation>,
}

#[derive(Debug, Deserialize)]
pub struct RawHashtag {
    pub tag: String,
}

#[derive(Debug, Deserialize)]
pub struct RawAnnotation {
    pub normalized_text: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct RawReference {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PostMetrics {
    #[serde(default)]
    pub retweet_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub quote_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAuthor {
    pub id: String,
    pub name: Option<String>,
    pub username: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub public_metrics: AuthorMetrics,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct AuthorMetrics {
    #[serde(default)]
    pub followers_count: u64,
    #[serde(default)]
    pub following_count: u64,
    #[serde(default)]
    pub tweet_count: u64,
    #[serde(default)]
    pub listed_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPlace {
    pub id: String,
    #[serde(default)]
    pub full_name: String,
    pub name: Option<String>,
    pub place_type: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub geo: Option<RawPlaceGeo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPlaceGeo {
    #[serde(default)]
    pub bbox: Vec<f64>,
}

/// Named entity attached to a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A normalized post. Engagement counters are flat; the provider's nested
/// metrics, entities and geo objects do not survive normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub text: String,
    pub datetime: DateTime<Utc>,
    pub author_id: String,
    pub geo_place_id: Option<String>,
    pub source: Option<String>,
    pub hashtags: Vec<String>,
    pub entities: Vec<Entity>,
    pub is_retweet: bool,
    pub referenced_id: Option<String>,
    /// Set once the retweet text has been replaced by the referenced post's text.
    #[serde(default)]
    pub backfilled: bool,
    pub retweet_count: u64,
    pub reply_count: u64,
    pub like_count: u64,
    pub quote_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub lat: f64,
    pub lon: f64,
    pub name: String,
    pub region: String,
}

/// An author's location: resolved coordinates, or the raw string when unresolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthorLocation {
    Resolved(ResolvedLocation),
    Raw(String),
}

impl AuthorLocation {
    pub fn resolved(&self) -> Option<&ResolvedLocation> {
        match self {
            AuthorLocation::Resolved(loc) => Some(loc),
            AuthorLocation::Raw(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub name: Option<String>,
    pub username: Option<String>,
    pub description: Option<String>,
    pub location: Option<AuthorLocation>,
    pub verified: bool,
    pub followers_count: u64,
    pub following_count: u64,
    pub tweet_count: u64,
    pub listed_count: u64,
}

/// A city-level place with its bounding box collapsed to a centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub name: String,
    pub region: Option<String>,
    pub lat: f64,
    pub lon: f64,
}
