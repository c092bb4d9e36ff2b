use crate::config::MAX_SHORT_TOKEN_LEN;
use crate::error::{IngestError, Result};
use rustc_hash::FxHashSet;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::info;

const REQUIRED_COLUMNS: [&str; 6] = [
    "municipality",
    "province",
    "province_code",
    "region",
    "lat",
    "lon",
];

/// Spelling variants (folded) collapsed onto one canonical region name.
const REGION_ALIASES: &[(&str, &str)] = &[
    ("trentino alto adige", "trentino-alto adige"),
    ("trentino alto adige sudtirol", "trentino-alto adige"),
    ("trentino alto adige südtirol", "trentino-alto adige"),
    ("trentino sudtirol", "trentino-alto adige"),
    ("trentino südtirol", "trentino-alto adige"),
    ("valle daosta", "valle d'aosta"),
    ("vallée daoste", "valle d'aosta"),
    ("valle daosta vallée daoste", "valle d'aosta"),
    ("friuli venezia giulia", "friuli-venezia giulia"),
    ("emilia romagna", "emilia-romagna"),
];

/// One administrative row. String fields are lowercase.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GazetteerEntry {
    pub municipality: String,
    pub province: String,
    pub province_code: String,
    pub region: String,
    pub lat: f64,
    pub lon: f64,
}

/// Administrative levels used when narrowing, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Region,
    Province,
    ProvinceCode,
}

impl Level {
    pub const NARROWING_ORDER: [Level; 3] = [Level::Region, Level::Province, Level::ProvinceCode];
}

/// Folded forms of an entry's names, comparable with normalized location text.
#[derive(Debug, Clone)]
struct EntryKeys {
    municipality: String,
    province: String,
    province_code: String,
    region: String,
}

/// Lowercase, separators (`-`, `_`, `/`) to spaces, letters and spaces only,
/// single-spaced.
pub fn fold(s: &str) -> String {
    let mapped: String = s
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, '-' | '_' | '/') { ' ' } else { c })
        .filter(|c| c.is_alphabetic() || c.is_whitespace())
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase a region and collapse bilingual or alternate spellings onto the
/// primary form (e.g. `Trentino-Alto Adige/Südtirol` -> `trentino-alto adige`).
pub fn canonical_region(region: &str) -> String {
    let lower = region.trim().to_lowercase();
    let primary = lower.split('/').next().unwrap_or(&lower).trim().to_string();
    let folded = fold(&lower);
    let folded_primary = fold(&primary);

    REGION_ALIASES
        .iter()
        .find(|(variant, _)| *variant == folded || *variant == folded_primary)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(primary)
}

/// Reference table of municipalities, loaded once and shared read-only.
pub struct Gazetteer {
    entries: Vec<GazetteerEntry>,
    keys: Vec<EntryKeys>,
    vocabulary: FxHashSet<String>,
    regions: Vec<String>,
}

impl Gazetteer {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            IngestError::InvalidGazetteer(format!("cannot open {}: {}", path.display(), e))
        })?;
        let gazetteer = Self::from_reader(BufReader::new(file))?;
        info!(
            path = %path.display(),
            rows = gazetteer.len(),
            regions = gazetteer.regions.len(),
            "Gazetteer loaded"
        );
        Ok(gazetteer)
    }

    /// Parse CSV with exactly the columns municipality, province,
    /// province_code, region, lat, lon (any order).
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let mut found: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();
        found.sort();
        let mut expected: Vec<String> = REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect();
        expected.sort();
        if found != expected {
            return Err(IngestError::InvalidGazetteer(format!(
                "expected columns {:?}, found {:?}",
                REQUIRED_COLUMNS,
                headers.iter().collect::<Vec<_>>()
            )));
        }
        let lowered = csv::StringRecord::from(
            headers
                .iter()
                .map(|h| h.to_lowercase())
                .collect::<Vec<_>>(),
        );
        csv_reader.set_headers(lowered);

        let mut entries = Vec::new();
        for (row, record) in csv_reader.deserialize::<GazetteerEntry>().enumerate() {
            let mut entry = record.map_err(|e| {
                IngestError::InvalidGazetteer(format!("row {}: {}", row + 1, e))
            })?;
            if !(-90.0..=90.0).contains(&entry.lat) || !(-180.0..=180.0).contains(&entry.lon) {
                return Err(IngestError::InvalidGazetteer(format!(
                    "row {}: coordinates out of range ({}, {})",
                    row + 1,
                    entry.lat,
                    entry.lon
                )));
            }
            if entry.municipality.is_empty() || entry.region.is_empty() {
                return Err(IngestError::InvalidGazetteer(format!(
                    "row {}: empty municipality or region",
                    row + 1
                )));
            }
            entry.municipality = entry.municipality.to_lowercase();
            entry.province = entry.province.to_lowercase();
            entry.province_code = entry.province_code.to_lowercase();
            entry.region = entry.region.to_lowercase();
            entries.push(entry);
        }

        if entries.is_empty() {
            return Err(IngestError::InvalidGazetteer("no rows".into()));
        }

        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: Vec<GazetteerEntry>) -> Self {
        let keys: Vec<EntryKeys> = entries
            .iter()
            .map(|e| EntryKeys {
                municipality: fold(&e.municipality),
                province: fold(&e.province),
                province_code: fold(&e.province_code),
                region: fold(&canonical_region(&e.region)),
            })
            .collect();

        let vocabulary = keys
            .iter()
            .flat_map(|k| {
                [&k.municipality, &k.province, &k.province_code, &k.region]
                    .into_iter()
                    .flat_map(|s| s.split_whitespace())
            })
            .filter(|token| token.chars().count() > MAX_SHORT_TOKEN_LEN)
            .map(str::to_string)
            .collect();

        let mut regions: Vec<String> = entries.iter().map(|e| e.region.clone()).collect();
        regions.sort();
        regions.dedup();

        Self {
            entries,
            keys,
            vocabulary,
            regions,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, idx: usize) -> &GazetteerEntry {
        &self.entries[idx]
    }

    pub fn entries(&self) -> &[GazetteerEntry] {
        &self.entries
    }

    /// Distinct region names as loaded (lowercase, not canonicalized).
    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    /// Whether any token of `normalized` could name a gazetteer place.
    pub fn mentions_known_word(&self, normalized: &str) -> bool {
        normalized
            .split(|c: char| c.is_whitespace() || c == ',')
            .any(|token| self.vocabulary.contains(token))
    }

    /// Folded name of row `idx` at `level`.
    pub fn key(&self, idx: usize, level: Level) -> &str {
        let k = &self.keys[idx];
        match level {
            Level::Region => &k.region,
            Level::Province => &k.province,
            Level::ProvinceCode => &k.province_code,
        }
    }

    pub fn municipality_key(&self, idx: usize) -> &str {
        &self.keys[idx].municipality
    }

    pub fn is_known_region(&self, region: &str) -> bool {
        let wanted = canonical_region(region);
        self.regions.iter().any(|r| canonical_region(r) == wanted)
    }

    /// Row closest to the given point (squared degree distance).
    pub fn nearest(&self, lat: f64, lon: f64) -> Option<&GazetteerEntry> {
        self.entries.iter().min_by(|a, b| {
            let da = (a.lat - lat).powi(2) + (a.lon - lon).powi(2);
            let db = (b.lat - lat).powi(2) + (b.lon - lon).powi(2);
            da.total_cmp(&db)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
municipality,province,province_code,region,lat,lon
Milano,Milano,MI,Lombardia,45.46,9.19
Bergamo,Bergamo,BG,Lombardia,45.69,9.67
Bolzano,Bolzano,BZ,Trentino-Alto Adige/Südtirol,46.49,11.35
";

    #[test]
    fn loads_and_lowercases() {
        let g = Gazetteer::from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(g.len(), 3);
        assert_eq!(g.entry(0).municipality, "milano");
        assert_eq!(g.entry(0).province_code, "mi");
        assert_eq!(g.entry(2).region, "trentino-alto adige/südtirol");
    }

    #[test]
    fn columns_may_be_reordered() {
        let csv = "lat,lon,region,province_code,province,municipality\n45.46,9.19,Lombardia,MI,Milano,Milano\n";
        let g = Gazetteer::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(g.entry(0).municipality, "milano");
        assert_eq!(g.entry(0).lat, 45.46);
    }

    #[test]
    fn missing_column_is_rejected() {
        let csv = "municipality,province,region,lat,lon\nMilano,Milano,Lombardia,45.46,9.19\n";
        let err = Gazetteer::from_reader(csv.as_bytes()).err().unwrap();
        assert!(matches!(err, IngestError::InvalidGazetteer(_)));
    }

    #[test]
    fn extra_column_is_rejected() {
        let csv = "municipality,province,province_code,region,lat,lon,population\nMilano,Milano,MI,Lombardia,45.46,9.19,1300000\n";
        assert!(Gazetteer::from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn non_numeric_coordinate_is_rejected() {
        let csv = "municipality,province,province_code,region,lat,lon\nMilano,Milano,MI,Lombardia,north,9.19\n";
        let err = Gazetteer::from_reader(csv.as_bytes()).err().unwrap();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn empty_table_is_rejected() {
        let csv = "municipality,province,province_code,region,lat,lon\n";
        assert!(Gazetteer::from_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn vocabulary_skips_short_tokens() {
        let g = Gazetteer::from_reader(CSV.as_bytes()).unwrap();
        assert!(g.mentions_known_word("vivo a milano"));
        assert!(g.mentions_known_word("alto adige"));
        assert!(!g.mentions_known_word("mi bg bz"));
        assert!(!g.mentions_known_word("somewhere else"));
    }

    #[test]
    fn fold_matches_location_text() {
        assert_eq!(fold("Trentino-Alto Adige/Südtirol"), "trentino alto adige südtirol");
        assert_eq!(fold("Valle d'Aosta"), "valle daosta");
        assert_eq!(fold("  Reggio_Emilia "), "reggio emilia");
    }

    #[test]
    fn canonical_region_merges_bilingual_forms() {
        assert_eq!(canonical_region("Trentino-Alto Adige/Südtirol"), "trentino-alto adige");
        assert_eq!(canonical_region("trentino alto adige"), "trentino-alto adige");
        assert_eq!(canonical_region("Valle d'Aosta/Vallée d'Aoste"), "valle d'aosta");
        assert_eq!(canonical_region("Friuli Venezia Giulia"), "friuli-venezia giulia");
        assert_eq!(canonical_region("Lombardia"), "lombardia");
    }

    #[test]
    fn known_region_ignores_spelling_variant() {
        let g = Gazetteer::from_reader(CSV.as_bytes()).unwrap();
        assert!(g.is_known_region("Trentino-Alto Adige"));
        assert!(g.is_known_region("LOMBARDIA"));
        assert!(!g.is_known_region("Bavaria"));
    }

    #[test]
    fn nearest_picks_closest_row() {
        let g = Gazetteer::from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(g.nearest(45.7, 9.6).unwrap().municipality, "bergamo");
        assert_eq!(g.nearest(46.5, 11.3).unwrap().municipality, "bolzano");
    }
}
