//! Normalized collections on disk, one pretty-printed JSON array per entity.

use crate::geolocate::LocatedPost;
use crate::models::{Author, Place, Post};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub const POSTS_FILE: &str = "posts.json";
pub const AUTHORS_FILE: &str = "authors.json";
pub const PLACES_FILE: &str = "places.json";
pub const LOCATED_FILE: &str = "located_posts.json";

fn write_atomic<T: Serialize>(dir: &Path, name: &str, items: &[T]) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {:?}", dir))?;
    let path = dir.join(name);
    let temp_path = path.with_extension("json.tmp");

    let file = File::create(&temp_path)
        .with_context(|| format!("Failed to create {:?}", temp_path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, items)
        .with_context(|| format!("Failed to serialize {}", name))?;
    writer.flush()?;
    drop(writer);

    fs::rename(&temp_path, &path)
        .with_context(|| format!("Failed to move {:?} into place", temp_path))?;
    info!(path = %path.display(), records = items.len(), "Collection saved");
    Ok(path)
}

fn read<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<Vec<T>> {
    let path = dir.join(name);
    let file = File::open(&path).with_context(|| format!("Failed to open {:?}", path))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse {:?}", path))
}

pub fn save_posts(dir: &Path, posts: &[Post]) -> Result<PathBuf> {
    write_atomic(dir, POSTS_FILE, posts)
}

pub fn save_authors(dir: &Path, authors: &[Author]) -> Result<PathBuf> {
    write_atomic(dir, AUTHORS_FILE, authors)
}

pub fn save_places(dir: &Path, places: &[Place]) -> Result<PathBuf> {
    write_atomic(dir, PLACES_FILE, places)
}

pub fn save_located_posts(dir: &Path, located: &[LocatedPost]) -> Result<PathBuf> {
    write_atomic(dir, LOCATED_FILE, located)
}

pub fn load_posts(dir: &Path) -> Result<Vec<Post>> {
    read(dir, POSTS_FILE)
}

pub fn load_authors(dir: &Path) -> Result<Vec<Author>> {
    read(dir, AUTHORS_FILE)
}

pub fn load_places(dir: &Path) -> Result<Vec<Place>> {
    read(dir, PLACES_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthorLocation, ResolvedLocation};
    use tempfile::TempDir;

    fn author(id: &str, location: AuthorLocation) -> Author {
        Author {
            id: id.into(),
            name: Some("Mario".into()),
            username: Some("mario".into()),
            description: None,
            location: Some(location),
            verified: true,
            followers_count: 12,
            following_count: 3,
            tweet_count: 400,
            listed_count: 0,
        }
    }

    #[test]
    fn authors_keep_both_location_shapes() {
        let temp_dir = TempDir::new().unwrap();
        let authors = vec![
            author("1", AuthorLocation::Raw("da qualche parte".into())),
            author(
                "2",
                AuthorLocation::Resolved(ResolvedLocation {
                    lat: 45.46,
                    lon: 9.19,
                    name: "milano".into(),
                    region: "lombardia".into(),
                }),
            ),
        ];

        let path = save_authors(temp_dir.path(), &authors).unwrap();
        assert!(path.ends_with(AUTHORS_FILE));
        assert_eq!(load_authors(temp_dir.path()).unwrap(), authors);

        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("\"location\": \"da qualche parte\""));
        assert!(text.contains("\"region\": \"lombardia\""));
    }

    #[test]
    fn no_temp_file_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        save_places(temp_dir.path(), &[]).unwrap();
        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(PLACES_FILE)]);
    }

    #[test]
    fn missing_collection_names_the_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = load_posts(temp_dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains(POSTS_FILE));
    }
}
