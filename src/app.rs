use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::builder::{self, ManifestBuilder, PathConflict};
use crate::config::DatasetSource;
use crate::domain::VersionOrdering;
use crate::error::AtlasError;
use crate::fetcher::{FetchOptions, FetchReport, Fetcher};
use crate::repository::RepositoryCrawler;
use crate::store::{self, ManifestSource, ManifestStore};
use crate::transfer::Transfer;
use crate::update::{ManifestUpdater, UpdateOutcome};

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub dataset: String,
    pub version: Option<String>,
    pub destination: PathBuf,
    pub ordering: VersionOrdering,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub dataset: String,
    pub version: Option<String>,
    pub used_latest: bool,
    pub report: FetchReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetList {
    pub datasets: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionList {
    pub dataset: String,
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateResult {
    pub manifest_path: String,
    pub datasets: Vec<String>,
    pub entries: usize,
    pub failures: Vec<builder::DatasetFailure>,
    pub conflicts: Vec<PathConflict>,
    pub skipped_urls: usize,
    pub legacy_files: Vec<String>,
    pub generated_at: String,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<T: Transfer> {
    manifest: ManifestSource,
    fetcher: Fetcher<T>,
}

impl<T: Transfer> App<T> {
    pub fn new(manifest: ManifestSource, transfer: T) -> Self {
        Self {
            manifest,
            fetcher: Fetcher::new(transfer),
        }
    }

    pub fn manifest_source(&self) -> &ManifestSource {
        &self.manifest
    }

    pub fn load(&self) -> Result<ManifestStore, AtlasError> {
        ManifestStore::load(&self.manifest)
    }

    pub fn show_datasets(&self, sink: &dyn ProgressSink) -> Result<DatasetList, AtlasError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; reading {}", self.manifest.path()),
            elapsed: None,
        });
        let store = self.load()?;
        Ok(DatasetList {
            datasets: store.list_datasets().into_iter().collect(),
        })
    }

    pub fn show_versions(
        &self,
        dataset: &str,
        sink: &dyn ProgressSink,
    ) -> Result<VersionList, AtlasError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; versions of {dataset}"),
            elapsed: None,
        });
        let store = self.load()?;
        Ok(VersionList {
            dataset: dataset.to_string(),
            versions: store.list_versions(dataset)?,
        })
    }

    pub fn fetch(
        &self,
        request: FetchRequest,
        options: &FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<FetchResult, AtlasError> {
        let store = self.load()?;
        let (version, used_latest) = match (&store, request.version) {
            (_, Some(version)) => (Some(version), false),
            (ManifestStore::Flat(_), None) => (None, false),
            (ManifestStore::Structured(_), None) => {
                let latest = store
                    .resolve_latest(&request.dataset, request.ordering)?
                    .ok_or_else(|| AtlasError::NoVersionAvailable(request.dataset.clone()))?;
                info!(
                    dataset = %request.dataset,
                    version = %latest,
                    ordering = %request.ordering,
                    "no version requested, using latest"
                );
                (Some(latest), true)
            }
        };

        let entries = store.resolve(&request.dataset, version.as_deref().unwrap_or_default())?;
        let root = destination_for(&request.destination, &request.dataset, version.as_deref());
        sink.event(ProgressEvent {
            message: format!(
                "phase=Prepare; {} entries into {}",
                entries.len(),
                root.display()
            ),
            elapsed: None,
        });

        let report = self.fetcher.fetch_all(entries, &root, options, sink);
        Ok(FetchResult {
            dataset: request.dataset,
            version,
            used_latest,
            report,
        })
    }

    pub fn update(&self, url: &str, sink: &dyn ProgressSink) -> Result<UpdateOutcome, AtlasError> {
        sink.event(ProgressEvent {
            message: format!("phase=Verify; comparing {} with {url}", self.manifest.path()),
            elapsed: None,
        });
        ManifestUpdater::new(self.fetcher.transfer()).check(self.manifest.path().as_std_path(), url)
    }

    /// Crawls `sources` and replaces the manifest file with the result.
    pub fn generate<C: RepositoryCrawler>(
        &self,
        builder: &ManifestBuilder<C>,
        sources: &[DatasetSource],
        legacy_dir: Option<&Path>,
        sink: &dyn ProgressSink,
    ) -> Result<GenerateResult, AtlasError> {
        let ManifestSource::Structured(path) = &self.manifest else {
            return Err(AtlasError::MissingSelection(format!(
                "generated manifests are JSON; {} does not end in .json",
                self.manifest.path()
            )));
        };

        let report = builder.build(sources, sink);
        sink.event(ProgressEvent {
            message: format!("phase=Store; writing {path}"),
            elapsed: None,
        });
        store::save(&report.manifest, path)?;

        let legacy_files = match legacy_dir {
            Some(dir) => builder::write_legacy_manifests(&report.manifest, dir)?
                .into_iter()
                .map(|path| path.display().to_string())
                .collect(),
            None => Vec::new(),
        };

        let entries = report
            .manifest
            .iter()
            .flat_map(|(_, record)| record.versions.iter())
            .map(|(_, version)| version.len())
            .sum();

        Ok(GenerateResult {
            manifest_path: path.to_string(),
            datasets: report.manifest.dataset_names().into_iter().collect(),
            entries,
            failures: report.failures,
            conflicts: report.conflicts,
            skipped_urls: report.skipped.len(),
            legacy_files,
            generated_at: report.generated_at,
        })
    }
}

/// `<base>/<dataset>/<version>`, skipping a part the base path already names
/// as one of its components.
pub fn destination_for(base: &Path, dataset: &str, version: Option<&str>) -> PathBuf {
    let mut destination = base.to_path_buf();
    if !dataset.is_empty() && !has_component(&destination, dataset) {
        destination.push(dataset);
    }
    if let Some(version) = version {
        if !version.is_empty() && !destination.ends_with(version) {
            destination.push(version);
        }
    }
    destination
}

fn has_component(path: &Path, name: &str) -> bool {
    path.components().any(|component| component.as_os_str() == name)
}
