use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use atlas_fetcher::app::{ProgressEvent, ProgressSink};
use atlas_fetcher::builder::{self, ManifestBuilder};
use atlas_fetcher::config::DatasetSource;
use atlas_fetcher::error::AtlasError;
use atlas_fetcher::repository::{RepositoryCrawler, RepositoryHandle, TreeEntry};
use atlas_fetcher::store;

struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Default, Clone)]
struct TagContents {
    annex_urls: Vec<String>,
    tree: Vec<TreeEntry>,
}

/// In-memory repository keyed by clone url. Checkout records the tag so the
/// listing calls answer for the right version.
#[derive(Default)]
struct MockCrawler {
    repos: HashMap<String, (String, Vec<(String, TagContents)>)>,
    roots: RefCell<HashMap<String, String>>,
    current: RefCell<HashMap<String, String>>,
    checkouts: RefCell<Vec<String>>,
}

impl MockCrawler {
    fn add_repo(&mut self, clone_url: &str, remote: &str, tags: Vec<(&str, TagContents)>) {
        self.repos.insert(
            clone_url.to_string(),
            (
                remote.to_string(),
                tags.into_iter()
                    .map(|(tag, contents)| (tag.to_string(), contents))
                    .collect(),
            ),
        );
    }

    fn repo_for(&self, root: &Path) -> Result<&(String, Vec<(String, TagContents)>), AtlasError> {
        let key = root.display().to_string();
        let roots = self.roots.borrow();
        let url = roots
            .get(&key)
            .ok_or_else(|| AtlasError::RepositoryAccess(format!("not cloned: {key}")))?;
        self.repos
            .get(url)
            .ok_or_else(|| AtlasError::RepositoryAccess(url.clone()))
    }

    fn contents(&self, root: &Path) -> Result<TagContents, AtlasError> {
        let (_, tags) = self.repo_for(root)?;
        let current = self.current.borrow();
        let tag = current
            .get(&root.display().to_string())
            .ok_or_else(|| AtlasError::RepositoryAccess("nothing checked out".to_string()))?;
        Ok(tags
            .iter()
            .find(|(name, _)| name == tag)
            .map(|(_, contents)| contents.clone())
            .unwrap_or_default())
    }
}

impl RepositoryCrawler for MockCrawler {
    fn clone_repo(&self, url: &str, destination: &Path) -> Result<RepositoryHandle, AtlasError> {
        if !self.repos.contains_key(url) {
            return Err(AtlasError::RepositoryAccess(format!("cannot clone {url}")));
        }
        self.roots
            .borrow_mut()
            .insert(destination.display().to_string(), url.to_string());
        Ok(RepositoryHandle::open(destination))
    }

    fn remote_origin(&self, root: &Path) -> Result<String, AtlasError> {
        Ok(self.repo_for(root)?.0.clone())
    }

    fn list_tags(&self, root: &Path) -> Result<Vec<String>, AtlasError> {
        Ok(self.repo_for(root)?.1.iter().map(|(tag, _)| tag.clone()).collect())
    }

    fn checkout(&self, root: &Path, tag: &str) -> Result<(), AtlasError> {
        self.checkouts.borrow_mut().push(tag.to_string());
        self.current
            .borrow_mut()
            .insert(root.display().to_string(), tag.to_string());
        Ok(())
    }

    fn list_remote_objects(&self, root: &Path) -> Result<Vec<String>, AtlasError> {
        Ok(self.contents(root)?.annex_urls)
    }

    fn walk_tree(&self, root: &Path) -> Result<Vec<TreeEntry>, AtlasError> {
        Ok(self.contents(root)?.tree)
    }
}

const REMOTE: &str = "https://github.com/OpenNeuroDatasets/ds004401";

fn s3(path: &str) -> String {
    format!("https://s3.amazonaws.com/openneuro.org/ds004401/{path}?versionId=v1")
}

fn file(path: &str) -> TreeEntry {
    TreeEntry {
        relative_path: path.to_string(),
        is_symlink: false,
    }
}

fn link(path: &str) -> TreeEntry {
    TreeEntry {
        relative_path: path.to_string(),
        is_symlink: true,
    }
}

fn sample_crawler() -> MockCrawler {
    let mut crawler = MockCrawler::default();
    crawler.add_repo(
        "https://github.com/OpenNeuroDatasets/ds004401.git",
        REMOTE,
        vec![
            (
                "1.0.0",
                TagContents {
                    annex_urls: vec![
                        s3("derivatives/label/BA_exvivo.ctab"),
                        "https://example.com/unrecognised".to_string(),
                    ],
                    tree: vec![
                        link("derivatives/label/BA_exvivo.ctab"),
                        file("dataset_description.json"),
                        file(".git/config"),
                    ],
                },
            ),
            (
                "1.1.0",
                TagContents {
                    annex_urls: vec![s3("README"), s3("derivatives/label/BA_exvivo.ctab")],
                    tree: vec![file("README"), link("derivatives/label/BA_exvivo.ctab")],
                },
            ),
        ],
    );
    crawler
}

#[test]
fn builds_every_tag_with_pointer_and_fallback_entries() {
    let temp = tempfile::tempdir().unwrap();
    let builder = ManifestBuilder::new(sample_crawler(), temp.path());
    let report = builder.build(&[DatasetSource::openneuro("ds004401")], &NoopSink);

    assert!(report.is_complete());
    let record = report.manifest.dataset("ds004401").unwrap();
    assert_eq!(record.remote_origin, REMOTE);
    assert_eq!(record.versions.tags().collect::<Vec<_>>(), vec!["1.0.0", "1.1.0"]);

    let first = record.versions.get("1.0.0").unwrap();
    let paths = first
        .entries()
        .iter()
        .map(|entry| entry.relative_path())
        .collect::<Vec<_>>();
    assert_eq!(
        paths,
        vec![
            "ds004401/derivatives/label/BA_exvivo.ctab",
            "ds004401/dataset_description.json"
        ]
    );
    assert_eq!(
        first.get("ds004401/dataset_description.json").unwrap().url(),
        format!("{REMOTE}/blob/1.0.0/dataset_description.json")
    );
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].url, "https://example.com/unrecognised");
}

#[test]
fn tree_file_overwrites_annex_entry_once() {
    let temp = tempfile::tempdir().unwrap();
    let builder = ManifestBuilder::new(sample_crawler(), temp.path());
    let report = builder.build(&[DatasetSource::openneuro("ds004401")], &NoopSink);

    let version = report
        .manifest
        .dataset("ds004401")
        .unwrap()
        .versions
        .get("1.1.0")
        .unwrap();
    let readme = version
        .entries()
        .iter()
        .filter(|entry| entry.relative_path() == "ds004401/README")
        .collect::<Vec<_>>();
    assert_eq!(readme.len(), 1);
    assert_eq!(readme[0].url(), format!("{REMOTE}/blob/1.1.0/README"));

    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].replaced_url, s3("README"));
    assert_eq!(report.conflicts[0].tag, "1.1.0");
}

#[test]
fn tree_files_with_reserved_characters_keep_their_names() {
    let mut crawler = MockCrawler::default();
    crawler.add_repo(
        "https://github.com/OpenNeuroDatasets/ds004401.git",
        REMOTE,
        vec![(
            "1.0.0",
            TagContents {
                annex_urls: Vec::new(),
                tree: vec![file("notes#1.txt"), file("notes?2.txt"), file("with space.tsv")],
            },
        )],
    );
    let temp = tempfile::tempdir().unwrap();
    let builder = ManifestBuilder::new(crawler, temp.path());
    let report = builder.build(&[DatasetSource::openneuro("ds004401")], &NoopSink);

    assert!(report.skipped.is_empty());
    assert!(report.conflicts.is_empty());
    let version = report
        .manifest
        .dataset("ds004401")
        .unwrap()
        .versions
        .get("1.0.0")
        .unwrap();
    assert_eq!(version.len(), 3);
    assert_eq!(
        version.get("ds004401/notes#1.txt").unwrap().url(),
        format!("{REMOTE}/blob/1.0.0/notes%231.txt")
    );
    assert_eq!(
        version.get("ds004401/notes?2.txt").unwrap().url(),
        format!("{REMOTE}/blob/1.0.0/notes%3F2.txt")
    );
    assert_eq!(
        version.get("ds004401/with space.tsv").unwrap().url(),
        format!("{REMOTE}/blob/1.0.0/with%20space.tsv")
    );
}

#[test]
fn relative_paths_are_distinct_per_version() {
    let temp = tempfile::tempdir().unwrap();
    let builder = ManifestBuilder::new(sample_crawler(), temp.path());
    let report = builder.build(&[DatasetSource::openneuro("ds004401")], &NoopSink);

    for (_, record) in report.manifest.iter() {
        for (_, version) in record.versions.iter() {
            assert!(!version.is_empty());
            let mut paths = version
                .entries()
                .iter()
                .map(|entry| entry.relative_path())
                .collect::<Vec<_>>();
            let total = paths.len();
            paths.sort();
            paths.dedup();
            assert_eq!(paths.len(), total);
        }
    }
}

#[test]
fn regeneration_is_idempotent() {
    let temp = tempfile::tempdir().unwrap();
    let builder = ManifestBuilder::new(sample_crawler(), temp.path());
    let sources = [DatasetSource::openneuro("ds004401")];

    let first = builder.build(&sources, &NoopSink);
    let second = builder.build(&sources, &NoopSink);
    assert_eq!(first.manifest, second.manifest);
}

#[test]
fn failing_dataset_does_not_affect_others() {
    let temp = tempfile::tempdir().unwrap();
    let builder = ManifestBuilder::new(sample_crawler(), temp.path());
    let sources = [
        DatasetSource::openneuro("ds999999"),
        DatasetSource::openneuro("ds004401"),
    ];
    let report = builder.build(&sources, &NoopSink);

    assert!(!report.is_complete());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].dataset, "ds999999");
    assert!(report.manifest.dataset("ds004401").is_some());
    assert!(report.manifest.dataset("ds999999").is_none());
}

#[test]
fn handle_tracks_checked_out_tag() {
    let temp = tempfile::tempdir().unwrap();
    let crawler = sample_crawler();
    let destination = temp.path().join("ds004401");
    let mut handle = crawler
        .clone_repo("https://github.com/OpenNeuroDatasets/ds004401.git", &destination)
        .unwrap();
    assert_eq!(handle.checked_out_tag(), None);

    let builder = ManifestBuilder::new(crawler, temp.path());
    let (record, conflicts) = builder
        .crawl_handle(&DatasetSource::openneuro("ds004401"), &mut handle, &NoopSink)
        .unwrap();
    assert_eq!(handle.checked_out_tag(), Some("1.1.0"));
    assert_eq!(record.versions.len(), 2);
    assert_eq!(conflicts.len(), 1);
}

#[test]
fn legacy_files_hold_one_line_per_entry() {
    let temp = tempfile::tempdir().unwrap();
    let builder = ManifestBuilder::new(sample_crawler(), temp.path());
    let report = builder.build(&[DatasetSource::openneuro("ds004401")], &NoopSink);

    let out = temp.path().join("legacy");
    let written = builder::write_legacy_manifests(&report.manifest, &out).unwrap();
    assert_eq!(written.len(), 2);
    assert!(written[0].ends_with("ds004401_1.0.0.manifest"));

    let content = std::fs::read_to_string(&written[0]).unwrap();
    let entries = store::parse_flat(&content).unwrap();
    assert_eq!(
        entries,
        report
            .manifest
            .dataset("ds004401")
            .unwrap()
            .versions
            .get("1.0.0")
            .unwrap()
            .entries()
    );
}
