use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::domain::{Manifest, UrlEntry, VersionOrdering};
use crate::error::AtlasError;

/// Where a manifest lives and which of the two formats it is in. Decided once
/// from the file extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    Structured(Utf8PathBuf),
    Flat(Utf8PathBuf),
}

impl ManifestSource {
    pub fn from_path(path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            ManifestSource::Structured(path)
        } else {
            ManifestSource::Flat(path)
        }
    }

    pub fn path(&self) -> &Utf8Path {
        match self {
            ManifestSource::Structured(path) | ManifestSource::Flat(path) => path,
        }
    }
}

/// A loaded manifest. Flat files carry no dataset or version information, so
/// every lookup answers with the whole file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestStore {
    Structured(Manifest),
    Flat(Vec<UrlEntry>),
}

impl ManifestStore {
    pub fn load(source: &ManifestSource) -> Result<Self, AtlasError> {
        let path = source.path();
        if !path.as_std_path().is_file() {
            return Err(AtlasError::ManifestMissing(path.as_std_path().to_path_buf()));
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| AtlasError::Filesystem(format!("read {path}: {err}")))?;
        debug!(%path, bytes = content.len(), "loaded manifest");
        match source {
            ManifestSource::Structured(_) => Self::from_json(&content),
            ManifestSource::Flat(_) => Ok(ManifestStore::Flat(parse_flat(&content)?)),
        }
    }

    pub fn from_json(content: &str) -> Result<Self, AtlasError> {
        let manifest: Manifest = serde_json::from_str(content)
            .map_err(|err| AtlasError::ManifestParse(err.to_string()))?;
        Ok(ManifestStore::Structured(manifest))
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        match self {
            ManifestStore::Structured(manifest) => Some(manifest),
            ManifestStore::Flat(_) => None,
        }
    }

    pub fn resolve(&self, dataset: &str, version: &str) -> Result<&[UrlEntry], AtlasError> {
        match self {
            ManifestStore::Flat(entries) => Ok(entries.as_slice()),
            ManifestStore::Structured(manifest) => manifest
                .dataset(dataset)
                .and_then(|record| record.versions.get(version))
                .map(|record| record.entries())
                .ok_or_else(|| AtlasError::ManifestNotFound {
                    dataset: dataset.to_string(),
                    version: version.to_string(),
                }),
        }
    }

    pub fn list_datasets(&self) -> BTreeSet<String> {
        match self {
            ManifestStore::Structured(manifest) => manifest.dataset_names(),
            ManifestStore::Flat(_) => BTreeSet::new(),
        }
    }

    pub fn list_versions(&self, dataset: &str) -> Result<Vec<String>, AtlasError> {
        match self {
            ManifestStore::Structured(manifest) => manifest
                .dataset(dataset)
                .map(|record| record.versions.tags().map(str::to_string).collect())
                .ok_or_else(|| AtlasError::DatasetNotFound(dataset.to_string())),
            ManifestStore::Flat(_) => Ok(Vec::new()),
        }
    }

    /// Best-effort "latest" tag. With the default lexicographic ordering
    /// "1.9.0" wins over "1.10.0".
    pub fn resolve_latest(
        &self,
        dataset: &str,
        ordering: VersionOrdering,
    ) -> Result<Option<String>, AtlasError> {
        let versions = self.list_versions(dataset)?;
        Ok(ordering
            .latest(versions.iter().map(String::as_str))
            .map(str::to_string))
    }
}

/// Writes the manifest as pretty JSON, replacing any previous file in one step.
pub fn save(manifest: &Manifest, path: &Utf8Path) -> Result<(), AtlasError> {
    let mut content = serde_json::to_vec_pretty(manifest)
        .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
    content.push(b'\n');
    write_bytes_atomic(path.as_std_path(), &content)
}

pub fn write_flat(entries: &[UrlEntry], path: &Path) -> Result<(), AtlasError> {
    let mut content = String::new();
    for entry in entries {
        content.push_str(&entry.to_string());
        content.push('\n');
    }
    write_bytes_atomic(path, content.as_bytes())
}

/// `name url` pairs, one per line.
pub fn parse_flat(content: &str) -> Result<Vec<UrlEntry>, AtlasError> {
    let mut entries = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields = line.split_whitespace().collect::<Vec<_>>();
        let [name, url] = fields.as_slice() else {
            return Err(AtlasError::ManifestParse(format!(
                "line {}: expected `name url`, found {} fields",
                index + 1,
                fields.len()
            )));
        };
        entries.push(UrlEntry::new(*name, *url));
    }
    Ok(entries)
}

pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), AtlasError> {
    write_atomic_with(path, |file| {
        file.write_all(content)
            .map_err(|err| AtlasError::Filesystem(err.to_string()))
    })
}

/// Hands `write` a temp file in the destination directory and moves it over
/// `path` once `write` succeeded. On error the temp file is removed and `path`
/// keeps its previous content.
pub fn write_atomic_with<F>(path: &Path, write: F) -> Result<(), AtlasError>
where
    F: FnOnce(&mut fs::File) -> Result<(), AtlasError>,
{
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|err| AtlasError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".atlas-fetcher")
        .tempfile_in(parent)
        .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
    write(temp.as_file_mut())?;
    temp.persist(path)
        .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_from_extension() {
        assert!(matches!(
            ManifestSource::from_path("atlases.json"),
            ManifestSource::Structured(_)
        ));
        assert!(matches!(
            ManifestSource::from_path("ds004401_1.0.0.manifest"),
            ManifestSource::Flat(_)
        ));
    }

    #[test]
    fn flat_lines_need_two_fields() {
        let err = parse_flat("a.txt https://x/a.txt\nbroken\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
