use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::domain::UrlEntry;
use crate::error::AtlasError;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"https://[-a-zA-Z0-9@:%._+~#=]{1,256}\.[a-zA-Z0-9()]{1,6}\b[-a-zA-Z0-9()@:%_+.~#?&/=]*",
    )
    .expect("url pattern is valid")
});

static DATASET_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ds\d+").expect("dataset id pattern is valid"));

/// Bucket segment of the public object store. Keys are taken from the path
/// that follows it.
pub const OBJECT_STORE_BUCKET: &str = "openneuro.org/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    HostedBlob,
    ObjectStore,
}

pub fn classify(url: &str) -> Option<UrlKind> {
    if url.contains("github") && url.contains("/blob/") {
        Some(UrlKind::HostedBlob)
    } else if url.contains(OBJECT_STORE_BUCKET) {
        Some(UrlKind::ObjectStore)
    } else {
        None
    }
}

/// First https URL found in a line of `git annex whereis` output.
pub fn find_url(line: &str) -> Option<&str> {
    URL_RE.find(line).map(|found| found.as_str())
}

/// Maps a download URL to its dataset-relative path.
pub fn extract_path(url: &str) -> Result<UrlEntry, AtlasError> {
    let path = match classify(url) {
        Some(UrlKind::HostedBlob) => hosted_blob_path(url),
        Some(UrlKind::ObjectStore) => object_store_path(url),
        None => None,
    };
    match path {
        Some(path) if !path.is_empty() && !path.ends_with('/') => Ok(UrlEntry::new(path, url)),
        _ => Err(AtlasError::UrlExtraction(url.to_string())),
    }
}

/// Entry for a plain file of a checkout, served through the hosting blob
/// view. The key is built from the file path itself; the URL carries each
/// path segment percent-encoded, so `#` and `?` in file names survive.
pub fn blob_fallback(remote: &str, tag: &str, relative_path: &str) -> Result<UrlEntry, AtlasError> {
    let unresolved = || AtlasError::UrlExtraction(format!("{remote}/blob/{tag}/{relative_path}"));
    let dataset = DATASET_ID_RE.find(remote).ok_or_else(unresolved)?.as_str();
    if relative_path.is_empty() || relative_path.split('/').any(str::is_empty) {
        return Err(unresolved());
    }
    let mut url = Url::parse(remote).map_err(|_| unresolved())?;
    url.path_segments_mut()
        .map_err(|_| unresolved())?
        .pop_if_empty()
        .push("blob")
        .push(tag)
        .extend(relative_path.split('/'));
    Ok(UrlEntry::new(format!("{dataset}/{relative_path}"), url.as_str()))
}

// https://github.com/<org>/<dataset>/blob/<tag>/<path> → <dataset id>/<path>
fn hosted_blob_path(url: &str) -> Option<String> {
    let dataset = DATASET_ID_RE.find(url)?.as_str();
    let (_, after_blob) = url.split_once("/blob/")?;
    let (_tag, path) = after_blob.split_once('/')?;
    let path = strip_query(path).trim_start_matches('/');
    if path.is_empty() {
        return None;
    }
    Some(format!("{dataset}/{path}"))
}

// https://s3.amazonaws.com/openneuro.org/<path>?versionId=... → <path>
fn object_store_path(url: &str) -> Option<String> {
    let (_, after_bucket) = url.split_once(OBJECT_STORE_BUCKET)?;
    let path = strip_query(after_bucket).trim_start_matches('/');
    Some(path.to_string())
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn object_store_url_drops_query() {
        let url = "https://s3.amazonaws.com/openneuro.org/ds004401/derivatives/freesurfer/mni152/label/BA_exvivo.ctab?versionId=KjHKLOsShW3qdSOVufFIv6ITGGrMcl.v";
        let entry = extract_path(url).unwrap();
        assert_eq!(
            entry.relative_path(),
            "ds004401/derivatives/freesurfer/mni152/label/BA_exvivo.ctab"
        );
        assert_eq!(entry.url(), url);
    }

    #[test]
    fn blob_url_keeps_path_after_tag() {
        let url = "https://github.com/OpenNeuroDatasets/ds004401/blob/1.2.0/participants.tsv";
        let entry = extract_path(url).unwrap();
        assert_eq!(entry.relative_path(), "ds004401/participants.tsv");
    }

    #[test]
    fn unknown_url_is_rejected() {
        let err = extract_path("https://example.com/some/file.txt").unwrap_err();
        assert_matches!(err, AtlasError::UrlExtraction(_));
        let err = extract_path("https://s3.amazonaws.com/openneuro.org/?versionId=1").unwrap_err();
        assert_matches!(err, AtlasError::UrlExtraction(_));
    }

    #[test]
    fn blob_fallback_encodes_reserved_characters() {
        let remote = "https://github.com/OpenNeuroDatasets/ds004401";
        let hash = blob_fallback(remote, "1.0.0", "notes/notes#1.txt").unwrap();
        let query = blob_fallback(remote, "1.0.0", "notes/notes?2.txt").unwrap();
        assert_eq!(hash.relative_path(), "ds004401/notes/notes#1.txt");
        assert_eq!(query.relative_path(), "ds004401/notes/notes?2.txt");
        assert_eq!(
            hash.url(),
            "https://github.com/OpenNeuroDatasets/ds004401/blob/1.0.0/notes/notes%231.txt"
        );
        assert_eq!(
            query.url(),
            "https://github.com/OpenNeuroDatasets/ds004401/blob/1.0.0/notes/notes%3F2.txt"
        );
    }

    #[test]
    fn blob_fallback_needs_a_dataset_id() {
        let err = blob_fallback("https://github.com/org/atlas", "1.0.0", "README").unwrap_err();
        assert_matches!(err, AtlasError::UrlExtraction(_));
    }

    #[test]
    fn finds_url_in_whereis_line() {
        let line = "  \tc6d3e1a0-s3-PUBLIC -- [s3-PUBLIC] https://s3.amazonaws.com/openneuro.org/ds004401/README?versionId=abc";
        assert_eq!(
            find_url(line),
            Some("https://s3.amazonaws.com/openneuro.org/ds004401/README?versionId=abc")
        );
        assert_eq!(find_url("whereis README (1 copy)"), None);
    }
}
