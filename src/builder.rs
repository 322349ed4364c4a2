use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::config::DatasetSource;
use crate::domain::{DatasetRecord, Manifest, VersionRecord};
use crate::error::AtlasError;
use crate::extract;
use crate::repository::{RepositoryCrawler, RepositoryHandle};
use crate::store;

#[derive(Debug, Clone, Serialize)]
pub struct DatasetFailure {
    pub dataset: String,
    pub message: String,
}

/// A path listed by the annex that the tree walk wrote over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathConflict {
    pub dataset: String,
    pub tag: String,
    pub relative_path: String,
    pub replaced_url: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedUrl {
    pub dataset: String,
    pub tag: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub manifest: Manifest,
    pub failures: Vec<DatasetFailure>,
    pub conflicts: Vec<PathConflict>,
    pub skipped: Vec<SkippedUrl>,
    pub generated_at: String,
}

impl BuildReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Default)]
struct CrawlNotes {
    conflicts: Vec<PathConflict>,
    skipped: Vec<SkippedUrl>,
}

pub struct ManifestBuilder<C: RepositoryCrawler> {
    crawler: C,
    work_dir: PathBuf,
}

impl<C: RepositoryCrawler> ManifestBuilder<C> {
    pub fn new(crawler: C, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            crawler,
            work_dir: work_dir.into(),
        }
    }

    /// Builds a fresh manifest for every source. A dataset whose repository
    /// cannot be cloned or checked out is left out and reported; the others
    /// are still built.
    pub fn build(&self, sources: &[DatasetSource], sink: &dyn ProgressSink) -> BuildReport {
        let mut manifest = Manifest::default();
        let mut failures = Vec::new();
        let mut notes = CrawlNotes::default();

        for source in sources {
            sink.event(ProgressEvent {
                message: format!("phase=Resolve; cloning {}", source.name),
                elapsed: None,
            });
            let destination = self.work_dir.join(&source.name);
            let result = self
                .crawler
                .clone_repo(&source.clone_url, &destination)
                .and_then(|mut handle| self.crawl(source, &mut handle, &mut notes, sink));
            match result {
                Ok(record) => {
                    info!(
                        dataset = %source.name,
                        versions = record.versions.len(),
                        "dataset crawled"
                    );
                    manifest.insert(source.name.clone(), record);
                }
                Err(err) => {
                    warn!(dataset = %source.name, error = %err, "skipping dataset");
                    failures.push(DatasetFailure {
                        dataset: source.name.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        BuildReport {
            manifest,
            failures,
            conflicts: notes.conflicts,
            skipped: notes.skipped,
            generated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Crawls every tag of an already available working copy.
    pub fn crawl_handle(
        &self,
        source: &DatasetSource,
        handle: &mut RepositoryHandle,
        sink: &dyn ProgressSink,
    ) -> Result<(DatasetRecord, Vec<PathConflict>), AtlasError> {
        let mut notes = CrawlNotes::default();
        let record = self.crawl(source, handle, &mut notes, sink)?;
        Ok((record, notes.conflicts))
    }

    fn crawl(
        &self,
        source: &DatasetSource,
        handle: &mut RepositoryHandle,
        notes: &mut CrawlNotes,
        sink: &dyn ProgressSink,
    ) -> Result<DatasetRecord, AtlasError> {
        let remote = self.crawler.remote_origin(handle.root())?;
        let tags = self.crawler.list_tags(handle.root())?;
        info!(dataset = %source.name, tags = ?tags, "found tags");

        let mut record = DatasetRecord::new(source.source_id.clone(), remote.clone());
        for tag in tags {
            sink.event(ProgressEvent {
                message: format!("phase=Prepare; {} {tag}", source.name),
                elapsed: None,
            });
            handle.checkout(&self.crawler, &tag)?;
            let version = self.crawl_version(&source.name, &remote, &tag, handle, notes)?;
            record.versions.insert(tag, version);
        }
        Ok(record)
    }

    fn crawl_version(
        &self,
        dataset: &str,
        remote: &str,
        tag: &str,
        handle: &RepositoryHandle,
        notes: &mut CrawlNotes,
    ) -> Result<VersionRecord, AtlasError> {
        let mut version = VersionRecord::default();
        let mut annexed = HashSet::new();

        for url in self.crawler.list_remote_objects(handle.root())? {
            match extract::extract_path(&url) {
                Ok(entry) => {
                    annexed.insert(entry.relative_path().to_string());
                    version.insert(entry);
                }
                Err(err) => {
                    warn!(dataset, tag, error = %err, "skipping annex url");
                    notes.skipped.push(SkippedUrl {
                        dataset: dataset.to_string(),
                        tag: tag.to_string(),
                        url,
                    });
                }
            }
        }

        for file in self.crawler.walk_tree(handle.root())? {
            if file.is_symlink || is_git_metadata(&file.relative_path) {
                continue;
            }
            let entry = match extract::blob_fallback(remote, tag, &file.relative_path) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(dataset, tag, error = %err, "skipping tree file");
                    notes.skipped.push(SkippedUrl {
                        dataset: dataset.to_string(),
                        tag: tag.to_string(),
                        url: format!("{remote}/blob/{tag}/{}", file.relative_path),
                    });
                    continue;
                }
            };
            let relative_path = entry.relative_path().to_string();
            let url = entry.url().to_string();
            if let Some(replaced_url) = version.insert(entry) {
                if annexed.contains(&relative_path) {
                    warn!(
                        dataset,
                        tag,
                        path = %relative_path,
                        "duplicate path conflict, tree file replaces annex url"
                    );
                    notes.conflicts.push(PathConflict {
                        dataset: dataset.to_string(),
                        tag: tag.to_string(),
                        relative_path,
                        replaced_url,
                        url,
                    });
                }
            }
        }

        Ok(version)
    }
}

fn is_git_metadata(relative_path: &str) -> bool {
    relative_path.split('/').any(|segment| segment == ".git")
}

/// Writes `<dataset>_<tag>.manifest` flat files for every version.
pub fn write_legacy_manifests(manifest: &Manifest, dir: &Path) -> Result<Vec<PathBuf>, AtlasError> {
    let mut written = Vec::new();
    for (name, record) in manifest.iter() {
        for (tag, version) in record.versions.iter() {
            let path = dir.join(format!("{name}_{tag}.manifest"));
            store::write_flat(version.entries(), &path)?;
            written.push(path);
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_metadata_detection() {
        assert!(is_git_metadata(".git/config"));
        assert!(is_git_metadata("sub/.git/HEAD"));
        assert!(!is_git_metadata("derivatives/.gitkeep"));
    }
}
