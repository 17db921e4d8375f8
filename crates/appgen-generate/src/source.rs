//! Source reference resolution.
//!
//! Normalizes the caller's source location (a remote repository address or a
//! local directory) into a [`SourceRef`]. Local directories are inspected for
//! a git checkout so that a working copy of a hosted repository builds from
//! its remote, at the checked out branch.

use appgen_core::validation::{normalize_name, validate_name};
use appgen_core::{Error, Result, SourceLocation, SourceRef};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use tokio::process::Command;
use tracing::{debug, info};

const REMOTE_SCHEMES: &[&str] = &["http", "https", "git", "ssh", "file"];

/// `user@host:path`, as understood by git.
static SCP_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+@[A-Za-z0-9.-]+:[^/\\].*$").unwrap());

/// Whether `input` names a remote repository rather than a local path.
pub fn is_remote_repository(input: &str) -> bool {
    if SCP_LIKE.is_match(input) {
        return true;
    }
    match url::Url::parse(input) {
        Ok(url) => REMOTE_SCHEMES.contains(&url.scheme()),
        Err(_) => false,
    }
}

/// Version control metadata of a local checkout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckoutInfo {
    /// Top level directory of the checkout.
    pub root: PathBuf,
    /// Checked out branch, `None` when detached.
    pub branch: Option<String>,
    /// URL of the `origin` remote.
    pub origin: Option<String>,
}

/// Reads checkout metadata for a local directory.
#[async_trait]
pub trait CheckoutInspector: Send + Sync {
    /// `Ok(None)` when `dir` is not inside a checkout.
    async fn inspect(&self, dir: &Path) -> Result<Option<CheckoutInfo>>;
}

/// Checkout inspector backed by the `git` command line.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    /// Run a git subcommand in `dir`, returning trimmed stdout on success.
    async fn git(&self, dir: &Path, args: &[&str]) -> Result<Option<String>> {
        let output = match Command::new("git")
            .args(args)
            .current_dir(dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("git is not installed, treating directory as plain source");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(stdout).filter(|s| !s.is_empty()))
    }
}

#[async_trait]
impl CheckoutInspector for GitCli {
    async fn inspect(&self, dir: &Path) -> Result<Option<CheckoutInfo>> {
        let Some(root) = self.git(dir, &["rev-parse", "--show-toplevel"]).await? else {
            return Ok(None);
        };

        let branch = self
            .git(dir, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?
            .filter(|b| b != "HEAD");
        let origin = self.git(dir, &["config", "--get", "remote.origin.url"]).await?;

        Ok(Some(CheckoutInfo {
            root: PathBuf::from(root),
            branch,
            origin,
        }))
    }
}

/// Builds [`SourceRef`]s from URLs and directories.
pub struct SourceRefGenerator {
    inspector: Arc<dyn CheckoutInspector>,
}

impl Default for SourceRefGenerator {
    fn default() -> Self {
        Self::new(Arc::new(GitCli))
    }
}

impl SourceRefGenerator {
    pub fn new(inspector: Arc<dyn CheckoutInspector>) -> Self {
        Self { inspector }
    }

    /// Source reference for a remote repository.
    ///
    /// A `#fragment` names the ref to build. Nothing is fetched here.
    pub fn from_url(&self, input: &str) -> Result<SourceRef> {
        let (address, fragment) = match input.split_once('#') {
            Some((address, fragment)) => (address, Some(fragment)),
            None => (input, None),
        };

        if !is_remote_repository(address) {
            return Err(Error::SourceDetection(format!(
                "{} is not a valid repository URL",
                input
            )));
        }
        if !SCP_LIKE.is_match(address) {
            let url = url::Url::parse(address)
                .map_err(|e| Error::SourceDetection(format!("{}: {}", input, e)))?;
            if url.scheme() != "file" && url.host_str().is_none_or(str::is_empty) {
                return Err(Error::SourceDetection(format!("{} has no host", input)));
            }
        }

        let name = name_from_repository(address)
            .ok_or_else(|| Error::SourceDetection(format!("cannot derive a name from {}", input)))?;

        Ok(SourceRef {
            name,
            location: SourceLocation::Url(address.to_string()),
            git_ref: fragment.filter(|f| !f.is_empty()).map(str::to_string),
            context_dir: None,
            local_dir: None,
        })
    }

    /// Source reference for a local directory. Performs no network access.
    pub async fn from_directory(&self, path: &Path) -> Result<SourceRef> {
        let dir = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| Error::SourceDetection(format!("{}: {}", path.display(), e)))?;
        let metadata = tokio::fs::metadata(&dir)
            .await
            .map_err(|e| Error::SourceDetection(format!("{}: {}", dir.display(), e)))?;
        if !metadata.is_dir() {
            return Err(Error::SourceDetection(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Error::SourceDetection(format!("{}: {}", dir.display(), e)))?;

        let Some(checkout) = self.inspector.inspect(&dir).await? else {
            let name = name_from_path(&dir).ok_or_else(|| {
                Error::SourceDetection(format!("cannot derive a name from {}", dir.display()))
            })?;
            debug!(path = %dir.display(), name = %name, "Using plain directory source");
            return Ok(SourceRef {
                name,
                location: SourceLocation::Directory(dir.clone()),
                git_ref: None,
                context_dir: None,
                local_dir: Some(dir),
            });
        };

        let root = tokio::fs::canonicalize(&checkout.root)
            .await
            .unwrap_or_else(|_| checkout.root.clone());
        let context_dir = dir
            .strip_prefix(&root)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .filter(|p| !p.is_empty());

        let name = checkout
            .origin
            .as_deref()
            .and_then(name_from_repository)
            .or_else(|| name_from_path(&root))
            .ok_or_else(|| {
                Error::SourceDetection(format!("cannot derive a name from {}", dir.display()))
            })?;

        let location = match checkout.origin {
            Some(origin) => SourceLocation::Url(origin),
            None => SourceLocation::Directory(root.clone()),
        };

        info!(
            path = %dir.display(),
            name = %name,
            branch = ?checkout.branch,
            context_dir = ?context_dir,
            "Detected git checkout"
        );

        Ok(SourceRef {
            name,
            location,
            git_ref: checkout.branch,
            context_dir,
            local_dir: Some(root),
        })
    }

    /// Apply caller supplied name and ref, which win over detected values.
    pub fn with_overrides(
        &self,
        mut source: SourceRef,
        name: Option<&str>,
        git_ref: Option<&str>,
    ) -> Result<SourceRef> {
        if let Some(name) = name {
            validate_name("name", name)?;
            source.name = name.to_string();
        }
        if let Some(git_ref) = git_ref.filter(|r| !r.is_empty()) {
            source.git_ref = Some(git_ref.to_string());
        }
        Ok(source)
    }
}

/// Logical name from the last path segment of a repository address.
fn name_from_repository(address: &str) -> Option<String> {
    let trimmed = address.trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(trimmed);
    normalize_name(last.strip_suffix(".git").unwrap_or(last))
}

fn name_from_path(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(normalize_name)
}
