use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::AtlasError;
use crate::repository::DEFAULT_OBJECT_STORE_REMOTE;

pub const DEFAULT_SOURCES_FILE: &str = "atlas-sources.json";
pub const REPOSITORIES_DIR: &str = "repositories";
pub const MANIFEST_FILE_NAME: &str = "atlases.json";
pub const PUBLISHED_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/openneuropet/MIBASFetcher/main/mibasfetcher/atlases.json";
const CLONE_URL_PREFIX: &str = "https://github.com/OpenNeuroDatasets";

#[derive(Debug, Deserialize, Serialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub object_store_remote: Option<String>,
    #[serde(default)]
    pub datasets: Vec<SourceEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SourceEntry {
    Shorthand(String),
    Detailed(SourceEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SourceEntryObject {
    pub name: String,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub clone_url: Option<String>,
}

/// One repository to crawl and the dataset name it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSource {
    pub name: String,
    pub source_id: String,
    pub clone_url: String,
}

impl DatasetSource {
    pub fn openneuro(id: &str) -> Self {
        Self {
            name: id.to_string(),
            source_id: id.to_string(),
            clone_url: default_clone_url(id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedSources {
    pub schema_version: u32,
    pub object_store_remote: String,
    pub datasets: Vec<DatasetSource>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedSources, AtlasError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_SOURCES_FILE),
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| AtlasError::ConfigRead(config_path.clone()))?;
        let config: SourcesConfig = serde_json::from_str(&content)
            .map_err(|err| AtlasError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: SourcesConfig) -> Result<ResolvedSources, AtlasError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let object_store_remote = config
            .object_store_remote
            .unwrap_or_else(|| DEFAULT_OBJECT_STORE_REMOTE.to_string());

        let datasets = config
            .datasets
            .into_iter()
            .map(|entry| match entry {
                SourceEntry::Shorthand(id) => {
                    let id = id.trim();
                    if id.is_empty() {
                        return Err(AtlasError::ConfigParse("empty dataset id".to_string()));
                    }
                    Ok(DatasetSource::openneuro(id))
                }
                SourceEntry::Detailed(obj) => {
                    if obj.name.trim().is_empty() {
                        return Err(AtlasError::ConfigParse("empty dataset name".to_string()));
                    }
                    let source_id = obj.source_id.unwrap_or_else(|| obj.name.clone());
                    let clone_url = obj
                        .clone_url
                        .unwrap_or_else(|| default_clone_url(&source_id));
                    Ok(DatasetSource {
                        name: obj.name,
                        source_id,
                        clone_url,
                    })
                }
            })
            .collect::<Result<Vec<_>, AtlasError>>()?;

        Ok(ResolvedSources {
            schema_version,
            object_store_remote,
            datasets,
        })
    }
}

pub fn default_clone_url(id: &str) -> String {
    format!("{CLONE_URL_PREFIX}/{id}.git")
}

/// `atlases.json` in the platform data directory, or the working directory
/// when no home directory can be found.
pub fn default_manifest_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join(MANIFEST_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(MANIFEST_FILE_NAME))
}

/// Where `generate` clones source repositories: the platform cache directory,
/// kept apart from the download layout of `fetch`.
pub fn default_work_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.cache_dir().join(REPOSITORIES_DIR))
        .unwrap_or_else(|| std::env::temp_dir().join("atlas-fetcher").join(REPOSITORIES_DIR))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "openneuropet", "atlas-fetcher")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_dir_is_not_the_working_directory() {
        let work_dir = default_work_dir();
        assert!(work_dir.is_absolute());
        assert!(work_dir.ends_with(REPOSITORIES_DIR));
    }

    #[test]
    fn parse_config_shorthand() {
        let config = SourcesConfig {
            schema_version: None,
            object_store_remote: None,
            datasets: vec![SourceEntry::Shorthand("ds004401".to_string())],
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.object_store_remote, "s3-PUBLIC");
        assert_eq!(
            resolved.datasets[0].clone_url,
            "https://github.com/OpenNeuroDatasets/ds004401.git"
        );
    }
}
