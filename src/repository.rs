use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::AtlasError;
use crate::extract;

/// Annex remote whose `whereis` lines carry public download URLs.
pub const DEFAULT_OBJECT_STORE_REMOTE: &str = "s3-PUBLIC";

/// A working copy on disk and the tag currently checked out in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryHandle {
    root: PathBuf,
    checked_out_tag: Option<String>,
}

impl RepositoryHandle {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            checked_out_tag: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn checked_out_tag(&self) -> Option<&str> {
        self.checked_out_tag.as_deref()
    }

    /// Moves the working copy to `tag`. On failure the tree state is unknown,
    /// so the handle forgets any previous tag.
    pub fn checkout<C>(&mut self, crawler: &C, tag: &str) -> Result<(), AtlasError>
    where
        C: RepositoryCrawler + ?Sized,
    {
        self.checked_out_tag = None;
        crawler.checkout(&self.root, tag)?;
        self.checked_out_tag = Some(tag.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub relative_path: String,
    pub is_symlink: bool,
}

/// Everything the manifest builder needs from a version-controlled source.
pub trait RepositoryCrawler {
    /// Clones `url` into `destination`. An existing git checkout there is
    /// replaced only after the new clone succeeded; any other existing
    /// directory is left alone and reported.
    fn clone_repo(&self, url: &str, destination: &Path) -> Result<RepositoryHandle, AtlasError>;
    fn remote_origin(&self, root: &Path) -> Result<String, AtlasError>;
    fn list_tags(&self, root: &Path) -> Result<Vec<String>, AtlasError>;
    fn checkout(&self, root: &Path, tag: &str) -> Result<(), AtlasError>;
    /// Download URLs of the annexed objects in the current checkout.
    fn list_remote_objects(&self, root: &Path) -> Result<Vec<String>, AtlasError>;

    fn walk_tree(&self, root: &Path) -> Result<Vec<TreeEntry>, AtlasError> {
        walk_checkout(root)
    }
}

#[derive(Clone)]
pub struct GitCrawler {
    git: Option<PathBuf>,
    object_store_remote: String,
}

impl GitCrawler {
    pub fn new() -> Self {
        Self::with_remote(DEFAULT_OBJECT_STORE_REMOTE)
    }

    pub fn with_remote(object_store_remote: impl Into<String>) -> Self {
        Self {
            git: find_in_path("git"),
            object_store_remote: object_store_remote.into(),
        }
    }

    fn require_git(&self) -> Result<&PathBuf, AtlasError> {
        self.git
            .as_ref()
            .ok_or_else(|| AtlasError::MissingTool("git".to_string()))
    }

    fn run_git(&self, args: &[&str], cwd: Option<&Path>) -> Result<String, AtlasError> {
        let git = self.require_git()?;
        let mut cmd = Command::new(git);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        debug!(?args, "running git");
        let output = cmd
            .output()
            .map_err(|err| AtlasError::RepositoryAccess(err.to_string()))?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("git {} failed", args.join(" "))
        } else {
            stderr
        };
        Err(AtlasError::RepositoryAccess(message))
    }
}

impl Default for GitCrawler {
    fn default() -> Self {
        Self::new()
    }
}

impl RepositoryCrawler for GitCrawler {
    fn clone_repo(&self, url: &str, destination: &Path) -> Result<RepositoryHandle, AtlasError> {
        ensure_replaceable(destination)?;
        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        let staging = tempfile::Builder::new()
            .prefix(".atlas-clone")
            .tempdir_in(parent)
            .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        let checkout = staging.path().join("checkout");
        let target = checkout.to_string_lossy();
        self.run_git(&["clone", "--quiet", url, target.as_ref()], None)?;

        if destination.exists() {
            debug!(path = %destination.display(), "replacing previous checkout");
            fs::remove_dir_all(destination)
                .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        }
        fs::rename(&checkout, destination)
            .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        Ok(RepositoryHandle::open(destination))
    }

    fn remote_origin(&self, root: &Path) -> Result<String, AtlasError> {
        let stdout = self.run_git(&["remote", "get-url", "origin"], Some(root))?;
        Ok(strip_git_suffix(stdout.trim()))
    }

    fn list_tags(&self, root: &Path) -> Result<Vec<String>, AtlasError> {
        let stdout = self.run_git(&["tag"], Some(root))?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn checkout(&self, root: &Path, tag: &str) -> Result<(), AtlasError> {
        self.run_git(&["checkout", "--quiet", tag], Some(root))
            .map(|_| ())
    }

    fn list_remote_objects(&self, root: &Path) -> Result<Vec<String>, AtlasError> {
        let stdout = self.run_git(&["annex", "whereis"], Some(root))?;
        Ok(annex_urls(&stdout, &self.object_store_remote))
    }
}

/// A clone may only land on a missing path or on a previous git checkout.
pub fn ensure_replaceable(destination: &Path) -> Result<(), AtlasError> {
    if !destination.exists() || destination.join(".git").exists() {
        return Ok(());
    }
    Err(AtlasError::RepositoryAccess(format!(
        "{} exists and is not a git checkout; refusing to replace it",
        destination.display()
    )))
}

/// URLs on the `whereis` lines that mention `remote`.
pub fn annex_urls(whereis_output: &str, remote: &str) -> Vec<String> {
    whereis_output
        .lines()
        .filter(|line| line.contains(remote))
        .filter_map(extract::find_url)
        .map(str::to_string)
        .collect()
}

/// Regular files and symlinks of a checkout, skipping `.git`. Paths are
/// relative to `root` and use `/` separators.
pub fn walk_checkout(root: &Path) -> Result<Vec<TreeEntry>, AtlasError> {
    let mut entries = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || entry.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|err| AtlasError::Filesystem(err.to_string()))?;
        let relative_path = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        entries.push(TreeEntry {
            relative_path,
            is_symlink: file_type.is_symlink(),
        });
    }
    Ok(entries)
}

pub fn strip_git_suffix(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    trimmed.strip_suffix(".git").unwrap_or(trimmed).to_string()
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
