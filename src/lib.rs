//! Twingest: social-media post ingestion and location resolution pipeline
//!
//! This crate collects short posts from a cursor-paginated search API and
//! turns the raw pages into normalized, geolocated collections:
//!
//! 1. **Download Pass** -- Follow the pagination cursor, one shard file per page,
//!    paced by a configurable delay and resumable from a saved cursor
//! 2. **Merge Pass** -- Read shards in parallel, normalize posts, authors and
//!    places, and collapse duplicate ids (last occurrence wins)
//! 3. **Backfill Pass** (optional) -- Restore truncated retweet text from the batch
//!    itself, then with one paced lookup per missing referenced post
//! 4. **Geolocation Pass** -- Resolve author location strings against a gazetteer
//!    (hierarchical narrowing plus fuzzy matching) with a geocoder fallback, and
//!    settle place regions
//!
//! # Architecture
//!
//! - **Strictly sequential requests** -- Every call to a provider is followed by
//!   a pause taken from configuration; nothing talks to a provider concurrently
//! - **Trait seams** -- [`client::SearchApi`], [`client::PostLookup`] and
//!   [`client::Geocoder`] hide the HTTP clients, so every pass runs against fakes
//! - **Parallel merge** -- Shards are parsed with rayon; order is preserved
//! - **Per-pass memoization** -- The location resolver caches results (misses
//!   included) by normalized string and is discarded with the pass
//! - **Atomic counters** -- [`stats::BatchStats`] reports completeness per batch
//!
//! # Key Modules
//!
//! - [`client`] -- Query construction and the HTTP collaborators
//! - [`download`] -- Pagination loop and shard discovery
//! - [`checkpoint`] -- Download cursor checkpointing
//! - [`merge`] -- Shard merging, normalization and deduplication
//! - [`backfill`] -- Retweet text reconciliation
//! - [`gazetteer`] -- Reference table of municipalities
//! - [`location`] -- Location string normalization and resolution
//! - [`fuzzy`] -- Weighted-ratio string similarity
//! - [`geolocate`] -- Author/place geolocation and the located-post join
//! - [`store`] -- Typed JSON persistence of the collections
//! - [`models`] -- Raw provider payloads and normalized records
//! - [`error`] -- Collaborator error taxonomy
//! - [`stats`] -- Thread-safe batch counters
//! - [`config`] -- Endpoints, defaults and thresholds
//!
//! # Example Usage
//!
//! ```bash
//! export TWINGEST_BEARER_TOKEN=...
//!
//! # Download one week of posts, at most 100 pages
//! twingest download -o shards/ -k covid -k "green pass" --from 2021-08-01 --to 2021-08-07 --max-requests 100
//!
//! # Merge shards and backfill retweets
//! twingest merge -i shards/ -o batch/ --backfill
//!
//! # Geolocate authors and places
//! twingest geolocate -o batch/ --gazetteer comuni.csv
//! ```

pub mod backfill;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod download;
pub mod error;
pub mod fuzzy;
pub mod gazetteer;
pub mod geolocate;
pub mod location;
pub mod merge;
pub mod models;
pub mod stats;
pub mod store;
