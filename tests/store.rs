use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use atlas_fetcher::domain::{DatasetRecord, Manifest, UrlEntry, VersionOrdering, VersionRecord};
use atlas_fetcher::error::AtlasError;
use atlas_fetcher::store::{self, ManifestSource, ManifestStore};

fn manifest_with_tags(tags: &[&str]) -> Manifest {
    let mut record = DatasetRecord::new("ds1", "https://github.com/OpenNeuroDatasets/ds1");
    for tag in tags {
        record.versions.insert(
            *tag,
            VersionRecord::from_iter([UrlEntry::new("a/b.txt", format!("https://x/{tag}/a/b.txt"))]),
        );
    }
    let mut manifest = Manifest::default();
    manifest.insert("ds1", record);
    manifest
}

fn utf8_temp_path(temp: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().join(name)).unwrap()
}

#[test]
fn save_then_load_is_equal() {
    let temp = tempfile::tempdir().unwrap();
    let path = utf8_temp_path(&temp, "atlases.json");
    let manifest = manifest_with_tags(&["1.0.0", "2.0.0"]);

    store::save(&manifest, &path).unwrap();
    let loaded = ManifestStore::load(&ManifestSource::from_path(path)).unwrap();

    assert_eq!(loaded.manifest(), Some(&manifest));
}

#[test]
fn resolve_returns_entries_and_not_found() {
    let store = ManifestStore::Structured(manifest_with_tags(&["1.0.0"]));

    let entries = store.resolve("ds1", "1.0.0").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].relative_path(), "a/b.txt");

    assert_matches!(
        store.resolve("ds1", "9.9.9"),
        Err(AtlasError::ManifestNotFound { .. })
    );
    assert_matches!(
        store.resolve("missing", "1.0.0"),
        Err(AtlasError::ManifestNotFound { .. })
    );
}

#[test]
fn list_datasets_and_versions() {
    let store = ManifestStore::Structured(manifest_with_tags(&["2.0.0", "1.0.0"]));

    assert_eq!(store.list_datasets().into_iter().collect::<Vec<_>>(), vec!["ds1"]);
    assert_eq!(store.list_versions("ds1").unwrap(), vec!["2.0.0", "1.0.0"]);
    assert_matches!(
        store.list_versions("nope"),
        Err(AtlasError::DatasetNotFound(_))
    );
}

#[test]
fn latest_is_lexicographic_by_default() {
    let store = ManifestStore::Structured(manifest_with_tags(&["1.0.0", "1.2.0", "2.0.0"]));
    assert_eq!(
        store
            .resolve_latest("ds1", VersionOrdering::Lexicographic)
            .unwrap()
            .as_deref(),
        Some("2.0.0")
    );

    let store = ManifestStore::Structured(manifest_with_tags(&["1.9.0", "1.10.0"]));
    assert_eq!(
        store
            .resolve_latest("ds1", VersionOrdering::Lexicographic)
            .unwrap()
            .as_deref(),
        Some("1.9.0")
    );
    assert_eq!(
        store
            .resolve_latest("ds1", VersionOrdering::Semantic)
            .unwrap()
            .as_deref(),
        Some("1.10.0")
    );
}

#[test]
fn latest_without_versions_is_none() {
    let mut manifest = Manifest::default();
    manifest.insert("empty", DatasetRecord::new("empty", "https://github.com/org/empty"));
    let store = ManifestStore::Structured(manifest);
    assert_eq!(
        store
            .resolve_latest("empty", VersionOrdering::Lexicographic)
            .unwrap(),
        None
    );
}

#[test]
fn flat_file_is_one_entry_list() {
    let temp = tempfile::tempdir().unwrap();
    let path = utf8_temp_path(&temp, "ds1_1.0.0.manifest");
    std::fs::write(
        path.as_std_path(),
        "BA_exvivo.ctab https://s3.amazonaws.com/openneuro.org/ds1/BA_exvivo.ctab?versionId=a\n\
         \n\
         label/lh.ctab https://s3.amazonaws.com/openneuro.org/ds1/label/lh.ctab?versionId=b\n",
    )
    .unwrap();

    let source = ManifestSource::from_path(path);
    assert_matches!(source, ManifestSource::Flat(_));
    let store = ManifestStore::load(&source).unwrap();

    let entries = store.resolve("ignored", "ignored").unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].relative_path(), "label/lh.ctab");
    assert!(store.list_datasets().is_empty());
}

#[test]
fn flat_round_trip_through_writer() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("out.manifest");
    let entries = vec![
        UrlEntry::new("a.txt", "https://x/a.txt"),
        UrlEntry::new("b/c.txt", "https://x/b/c.txt"),
    ];
    store::write_flat(&entries, &path).unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(store::parse_flat(&content).unwrap(), entries);
}

#[test]
fn missing_and_corrupt_manifests() {
    let temp = tempfile::tempdir().unwrap();
    let path = utf8_temp_path(&temp, "atlases.json");
    assert_matches!(
        ManifestStore::load(&ManifestSource::from_path(path.clone())),
        Err(AtlasError::ManifestMissing(_))
    );

    std::fs::write(path.as_std_path(), "{ not json").unwrap();
    assert_matches!(
        ManifestStore::load(&ManifestSource::from_path(path)),
        Err(AtlasError::ManifestParse(_))
    );
}
