use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AtlasError;

/// A single file of a dataset version and the address it is downloaded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UrlEntry {
    relative_path: String,
    url: String,
}

impl UrlEntry {
    pub fn new(relative_path: impl Into<String>, url: impl Into<String>) -> Self {
        let relative_path = relative_path.into().replace('\\', "/");
        Self {
            relative_path,
            url: url.into(),
        }
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Joins the entry path onto `root`, refusing anything that would land
    /// outside of it.
    pub fn destination(&self, root: &Path) -> Result<PathBuf, AtlasError> {
        if self.relative_path.starts_with('/') {
            return Err(AtlasError::InvalidPath(self.relative_path.clone()));
        }
        let mut path = root.to_path_buf();
        let mut pushed = false;
        for segment in self.relative_path.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(AtlasError::InvalidPath(self.relative_path.clone())),
                segment if segment.contains(':') => {
                    return Err(AtlasError::InvalidPath(self.relative_path.clone()));
                }
                segment => {
                    path.push(segment);
                    pushed = true;
                }
            }
        }
        if !pushed {
            return Err(AtlasError::InvalidPath(self.relative_path.clone()));
        }
        Ok(path)
    }
}

impl fmt::Display for UrlEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.relative_path, self.url)
    }
}

// Entries are stored as single-key objects: `{ "<relative path>": "<url>" }`.
impl Serialize for UrlEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.relative_path, &self.url)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for UrlEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntryVisitor;

        impl<'de> Visitor<'de> for EntryVisitor {
            type Value = UrlEntry;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object with exactly one `path: url` pair")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let (path, url) = map
                    .next_entry::<String, String>()?
                    .ok_or_else(|| serde::de::Error::invalid_length(0, &self))?;
                if map.next_key::<String>()?.is_some() {
                    return Err(serde::de::Error::invalid_length(2, &self));
                }
                Ok(UrlEntry::new(path, url))
            }
        }

        deserializer.deserialize_map(EntryVisitor)
    }
}

/// Entries of one tagged version. Holds at most one entry per path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "VersionRecordRepr", into = "VersionRecordRepr")]
pub struct VersionRecord {
    entries: Vec<UrlEntry>,
    index: HashMap<String, usize>,
}

#[derive(Serialize, Deserialize)]
struct VersionRecordRepr {
    #[serde(default, alias = "urls")]
    entries: Vec<UrlEntry>,
}

impl From<VersionRecordRepr> for VersionRecord {
    fn from(repr: VersionRecordRepr) -> Self {
        let mut record = VersionRecord::default();
        for entry in repr.entries {
            record.insert(entry);
        }
        record
    }
}

impl From<VersionRecord> for VersionRecordRepr {
    fn from(record: VersionRecord) -> Self {
        Self {
            entries: record.entries,
        }
    }
}

impl PartialEq for VersionRecord {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for VersionRecord {}

impl VersionRecord {
    /// Adds an entry. A path that is already present keeps its position and
    /// takes the new url; the replaced url is returned.
    pub fn insert(&mut self, entry: UrlEntry) -> Option<String> {
        match self.index.get(entry.relative_path()) {
            Some(&position) => {
                let previous = std::mem::replace(&mut self.entries[position], entry);
                Some(previous.url)
            }
            None => {
                self.index
                    .insert(entry.relative_path.clone(), self.entries.len());
                self.entries.push(entry);
                None
            }
        }
    }

    pub fn get(&self, relative_path: &str) -> Option<&UrlEntry> {
        self.index
            .get(relative_path)
            .map(|&position| &self.entries[position])
    }

    pub fn entries(&self) -> &[UrlEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<UrlEntry> for VersionRecord {
    fn from_iter<I: IntoIterator<Item = UrlEntry>>(iter: I) -> Self {
        let mut record = VersionRecord::default();
        for entry in iter {
            record.insert(entry);
        }
        record
    }
}

/// Tag → version record, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionMap(Vec<(String, VersionRecord)>);

impl VersionMap {
    pub fn insert(&mut self, tag: impl Into<String>, record: VersionRecord) {
        let tag = tag.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == tag) {
            Some((_, slot)) => *slot = record,
            None => self.0.push((tag, record)),
        }
    }

    pub fn get(&self, tag: &str) -> Option<&VersionRecord> {
        self.0
            .iter()
            .find(|(existing, _)| existing == tag)
            .map(|(_, record)| record)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(tag, _)| tag.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VersionRecord)> {
        self.0.iter().map(|(tag, record)| (tag.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for VersionMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (tag, record) in &self.0 {
            map.serialize_entry(tag, record)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for VersionMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct VersionMapVisitor;

        impl<'de> Visitor<'de> for VersionMapVisitor {
            type Value = VersionMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of version tags to version records")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut versions = VersionMap::default();
                while let Some((tag, record)) = map.next_entry::<String, VersionRecord>()? {
                    versions.insert(tag, record);
                }
                Ok(versions)
            }
        }

        deserializer.deserialize_map(VersionMapVisitor)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    #[serde(rename = "sourceId", alias = "OpenNeuroID", default)]
    pub source_id: String,
    #[serde(default, alias = "version")]
    pub versions: VersionMap,
    #[serde(rename = "remote", default)]
    pub remote_origin: String,
}

impl DatasetRecord {
    pub fn new(source_id: impl Into<String>, remote_origin: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            versions: VersionMap::default(),
            remote_origin: remote_origin.into(),
        }
    }
}

/// Dataset name → record. The whole catalog written by one generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    datasets: BTreeMap<String, DatasetRecord>,
}

impl Manifest {
    pub fn insert(&mut self, name: impl Into<String>, record: DatasetRecord) {
        self.datasets.insert(name.into(), record);
    }

    pub fn dataset(&self, name: &str) -> Option<&DatasetRecord> {
        self.datasets.get(name)
    }

    pub fn dataset_names(&self) -> BTreeSet<String> {
        self.datasets.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DatasetRecord)> {
        self.datasets
            .iter()
            .map(|(name, record)| (name.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

/// How "latest" is picked when no version is requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VersionOrdering {
    /// Plain string comparison. "1.9.0" sorts above "1.10.0".
    #[default]
    Lexicographic,
    /// Numeric comparison of dot separated segments.
    Semantic,
}

impl fmt::Display for VersionOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionOrdering::Lexicographic => write!(f, "lexicographic"),
            VersionOrdering::Semantic => write!(f, "semantic"),
        }
    }
}

impl VersionOrdering {
    pub fn compare(self, left: &str, right: &str) -> Ordering {
        match self {
            VersionOrdering::Lexicographic => left.cmp(right),
            VersionOrdering::Semantic => compare_semantic(left, right),
        }
    }

    pub fn latest<'a, I>(self, tags: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut sorted = tags.into_iter().collect::<Vec<_>>();
        sorted.sort_by(|left, right| self.compare(right, left));
        sorted.first().copied()
    }
}

fn compare_semantic(left: &str, right: &str) -> Ordering {
    let left_parts = version_segments(left);
    let right_parts = version_segments(right);
    for (l, r) in left_parts.iter().zip(right_parts.iter()) {
        let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(l), Ok(r)) => l.cmp(&r),
            _ => l.cmp(r),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left_parts
        .len()
        .cmp(&right_parts.len())
        .then_with(|| left.cmp(right))
}

fn version_segments(tag: &str) -> Vec<&str> {
    let trimmed = tag.strip_prefix('v').unwrap_or(tag);
    trimmed.split(['.', '-', '+']).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_normalizes_separators() {
        let entry = UrlEntry::new("ds1\\anat\\T1w.nii.gz", "https://x/T1w.nii.gz");
        assert_eq!(entry.relative_path(), "ds1/anat/T1w.nii.gz");
    }

    #[test]
    fn destination_rejects_escape() {
        let root = Path::new("/tmp/out");
        let entry = UrlEntry::new("a/../../etc/passwd", "https://x");
        assert!(entry.destination(root).is_err());
        let entry = UrlEntry::new("/etc/passwd", "https://x");
        assert!(entry.destination(root).is_err());
        let entry = UrlEntry::new("a/./b.txt", "https://x");
        assert_eq!(
            entry.destination(root).unwrap(),
            Path::new("/tmp/out/a/b.txt")
        );
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut record = VersionRecord::default();
        record.insert(UrlEntry::new("a.txt", "https://one/a.txt"));
        record.insert(UrlEntry::new("b.txt", "https://one/b.txt"));
        let previous = record.insert(UrlEntry::new("a.txt", "https://two/a.txt"));

        assert_eq!(previous.as_deref(), Some("https://one/a.txt"));
        assert_eq!(record.len(), 2);
        assert_eq!(record.entries()[0].url(), "https://two/a.txt");
        assert_eq!(record.get("b.txt").unwrap().url(), "https://one/b.txt");
    }

    #[test]
    fn semantic_ordering_compares_numbers() {
        let ordering = VersionOrdering::Semantic;
        assert_eq!(ordering.latest(["1.9.0", "1.10.0"]), Some("1.10.0"));
        assert_eq!(ordering.latest(["v2.0", "v1.99"]), Some("v2.0"));
        assert_eq!(ordering.latest(Vec::<&str>::new()), None);
    }

    #[test]
    fn lexicographic_ordering_is_plain_string_order() {
        let ordering = VersionOrdering::Lexicographic;
        assert_eq!(ordering.latest(["1.0.0", "1.2.0", "2.0.0"]), Some("2.0.0"));
        assert_eq!(ordering.latest(["1.9.0", "1.10.0"]), Some("1.9.0"));
    }
}
