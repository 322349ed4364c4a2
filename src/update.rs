use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::error::AtlasError;
use crate::store::write_bytes_atomic;
use crate::transfer::Transfer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Created { digest: String },
    Updated { old: String, new: String },
    UpToDate { digest: String },
}

impl UpdateOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, UpdateOutcome::UpToDate { .. })
    }
}

/// Keeps a local manifest in step with the published copy by comparing md5
/// digests of the two files.
pub struct ManifestUpdater<'a, T: Transfer> {
    transfer: &'a T,
}

impl<'a, T: Transfer> ManifestUpdater<'a, T> {
    pub fn new(transfer: &'a T) -> Self {
        Self { transfer }
    }

    /// Downloads the published manifest and replaces `path` when it differs.
    /// A failed download leaves the local file untouched.
    pub fn check(&self, path: &Path, url: &str) -> Result<UpdateOutcome, AtlasError> {
        let remote = self.transfer.fetch(url)?;
        let new = digest(&remote);

        if !path.is_file() {
            info!(path = %path.display(), url, "no local manifest, downloading");
            write_bytes_atomic(path, &remote)?;
            return Ok(UpdateOutcome::Created { digest: new });
        }

        let local = fs::read(path)
            .map_err(|err| AtlasError::Filesystem(format!("read {}: {err}", path.display())))?;
        let old = digest(&local);
        if old == new {
            info!(path = %path.display(), digest = %old, "manifest is up to date");
            return Ok(UpdateOutcome::UpToDate { digest: old });
        }

        info!(path = %path.display(), %old, %new, "manifest changed, updating");
        write_bytes_atomic(path, &remote)?;
        Ok(UpdateOutcome::Updated { old, new })
    }
}

pub fn digest(content: &[u8]) -> String {
    format!("{:x}", md5::compute(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_hex_digest() {
        assert_eq!(digest(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
