//! Normalized source references.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the source code lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceLocation {
    /// Remote repository address, without any `#ref` fragment.
    Url(String),
    /// Local directory that is not tied to a remote.
    Directory(PathBuf),
}

/// Normalized descriptor of the source to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Logical name, used for every generated object.
    pub name: String,
    pub location: SourceLocation,
    /// Branch or tag to build.
    pub git_ref: Option<String>,
    /// Sub path within the source to build from.
    pub context_dir: Option<String>,
    /// Local checkout backing this source, when one exists.
    pub local_dir: Option<PathBuf>,
}

impl SourceRef {
    pub fn is_remote(&self) -> bool {
        matches!(self.location, SourceLocation::Url(_))
    }

    /// Repository URI for the build definition, if the source has one.
    pub fn uri(&self) -> Option<&str> {
        match &self.location {
            SourceLocation::Url(url) => Some(url),
            SourceLocation::Directory(_) => None,
        }
    }

    /// Local directory holding the source root, if any.
    pub fn local_root(&self) -> Option<&PathBuf> {
        match &self.location {
            SourceLocation::Directory(dir) => Some(dir),
            SourceLocation::Url(_) => self.local_dir.as_ref(),
        }
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            SourceLocation::Url(url) => write!(f, "{}", url)?,
            SourceLocation::Directory(dir) => write!(f, "{}", dir.display())?,
        }
        if let Some(git_ref) = &self.git_ref {
            write!(f, "#{}", git_ref)?;
        }
        Ok(())
    }
}
