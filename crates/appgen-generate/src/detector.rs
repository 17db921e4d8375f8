//! Build strategy detection.
//!
//! A [`DetectorChain`] runs over a [`SourceSnapshot`] and reports what kind of
//! build the source needs. A `Dockerfile` at the snapshot root always wins;
//! after that, language detectors are probed in order and the first one whose
//! marker files are present names the builder image.

use appgen_core::image::parse_exposed_port;
use appgen_core::{Error, ImageName, Result, SourceRef};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Name of the container-native build file.
pub const BUILD_FILE: &str = "Dockerfile";

/// Read-only view of the files in a source tree.
#[async_trait]
pub trait SourceSnapshot: Send + Sync {
    /// Whether `path`, relative to the snapshot root, exists.
    async fn exists(&self, path: &str) -> bool;

    /// Contents of `path`, `Ok(None)` when it does not exist.
    async fn read(&self, path: &str) -> Result<Option<String>>;
}

/// Snapshot of a local directory.
#[derive(Debug, Clone)]
pub struct DirectorySnapshot {
    root: PathBuf,
}

impl DirectorySnapshot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Snapshot of the build context of a source with a local checkout.
    pub fn for_source(source: &SourceRef) -> Option<Self> {
        let root = source.local_root()?;
        Some(match &source.context_dir {
            Some(dir) => Self::new(root.join(dir)),
            None => Self::new(root.clone()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl SourceSnapshot for DirectorySnapshot {
    async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(self.root.join(path))
            .await
            .unwrap_or(false)
    }

    async fn read(&self, path: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.root.join(path)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Snapshot of a fresh clone. The clone is removed when the snapshot drops.
#[derive(Debug)]
pub struct ClonedSnapshot {
    snapshot: DirectorySnapshot,
    clone_path: PathBuf,
}

impl ClonedSnapshot {
    pub fn new(clone_path: PathBuf, context_dir: Option<&str>) -> Self {
        let root = match context_dir {
            Some(dir) => clone_path.join(dir),
            None => clone_path.clone(),
        };
        Self {
            snapshot: DirectorySnapshot::new(root),
            clone_path,
        }
    }
}

#[async_trait]
impl SourceSnapshot for ClonedSnapshot {
    async fn exists(&self, path: &str) -> bool {
        self.snapshot.exists(path).await
    }

    async fn read(&self, path: &str) -> Result<Option<String>> {
        self.snapshot.read(path).await
    }
}

impl Drop for ClonedSnapshot {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.clone_path) {
            Ok(()) => debug!(path = %self.clone_path.display(), "Removed clone"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.clone_path.display(), error = %e, "Failed to remove clone"),
        }
    }
}

/// Produces a snapshot of a remote source.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &SourceRef) -> Result<Box<dyn SourceSnapshot>>;
}

/// Fetches remote sources with a shallow `git clone`.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    work_dir: PathBuf,
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl GitFetcher {
    pub fn new() -> Self {
        let work_dir = std::env::var("APPGEN_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("appgen-sources"));
        Self { work_dir }
    }

    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    /// Local path a source is cloned into.
    pub fn clone_path(&self, source: &SourceRef) -> PathBuf {
        let key = source.to_string();
        self.work_dir.join(format!("{:x}", md5::compute(key)))
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(&self, source: &SourceRef) -> Result<Box<dyn SourceSnapshot>> {
        let uri = source
            .uri()
            .ok_or_else(|| Error::SourceDetection(format!("{} has no remote to fetch", source)))?;

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let clone_path = self.clone_path(source);
        if tokio::fs::try_exists(&clone_path).await? {
            tokio::fs::remove_dir_all(&clone_path).await?;
        }

        let mut args = vec![
            "clone".to_string(),
            "--depth".to_string(),
            "1".to_string(),
            "--single-branch".to_string(),
        ];
        if let Some(git_ref) = &source.git_ref {
            args.push("--branch".to_string());
            args.push(git_ref.clone());
        }
        args.push(uri.to_string());
        args.push(clone_path.to_string_lossy().into_owned());

        info!(uri = %uri, git_ref = ?source.git_ref, path = %clone_path.display(), "Cloning source");

        let output = Command::new("git")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(uri = %uri, "Git clone failed");
            return Err(Error::SourceDetection(format!(
                "cloning {}: {}",
                uri,
                stderr.trim()
            )));
        }

        Ok(Box::new(ClonedSnapshot::new(
            clone_path,
            source.context_dir.as_deref(),
        )))
    }
}

/// A language detector: marker files and the builder image they imply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detector {
    pub language: String,
    pub markers: Vec<String>,
    pub builder_image: String,
}

impl Detector {
    pub fn new(language: &str, markers: &[&str], builder_image: &str) -> Self {
        Self {
            language: language.to_string(),
            markers: markers.iter().map(|m| m.to_string()).collect(),
            builder_image: builder_image.to_string(),
        }
    }

    async fn matches(&self, snapshot: &dyn SourceSnapshot) -> Option<&str> {
        for marker in &self.markers {
            if snapshot.exists(marker).await {
                return Some(marker.as_str());
            }
        }
        None
    }
}

/// Outcome of a successful detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// The source carries its own build file.
    ContainerNative { build_file: BuildFile },
    /// The source should be built with a builder image.
    BuilderImage { language: String, image: String },
}

/// Ordered detectors. The container-native check always runs first.
#[derive(Debug, Clone)]
pub struct DetectorChain {
    detectors: Vec<Detector>,
}

impl Default for DetectorChain {
    fn default() -> Self {
        Self::new(vec![
            Detector::new(
                "ruby",
                &["Gemfile", "Rakefile", "config.ru"],
                "openshift/ruby-20-centos",
            ),
            Detector::new("jee", &["pom.xml"], "openshift/wildfly-8-centos"),
            Detector::new(
                "nodejs",
                &["app.json", "package.json"],
                "openshift/nodejs-010-centos",
            ),
            Detector::new(
                "python",
                &["requirements.txt", "setup.py"],
                "openshift/python-33-centos",
            ),
        ])
    }
}

impl DetectorChain {
    pub fn new(detectors: Vec<Detector>) -> Self {
        Self { detectors }
    }

    /// Replace builder images by language.
    ///
    /// Fails when a key names no detector or a value is not an image name.
    pub fn with_builder_overrides(mut self, overrides: &BTreeMap<String, String>) -> Result<Self> {
        for (language, image) in overrides {
            ImageName::parse(image)?;
            let detector = self
                .detectors
                .iter_mut()
                .find(|d| &d.language == language)
                .ok_or_else(|| {
                    Error::validation("builders", format!("no detector for language {language:?}"))
                })?;
            debug!(language = %language, image = %image, "Overriding builder image");
            detector.builder_image = image.clone();
        }
        Ok(self)
    }

    /// Languages in probe order.
    pub fn languages(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.language.as_str()).collect()
    }

    /// Classify the snapshot, `Ok(None)` when nothing matches.
    pub async fn detect(&self, snapshot: &dyn SourceSnapshot) -> Result<Option<Detection>> {
        if let Some(content) = snapshot.read(BUILD_FILE).await? {
            let build_file = parse_build_file(&content)?;
            info!(base = ?build_file.from.as_ref().map(|f| f.to_string()), "Detected Dockerfile");
            return Ok(Some(Detection::ContainerNative { build_file }));
        }

        for detector in &self.detectors {
            if let Some(marker) = detector.matches(snapshot).await {
                info!(
                    language = %detector.language,
                    marker = %marker,
                    builder = %detector.builder_image,
                    "Detected language"
                );
                return Ok(Some(Detection::BuilderImage {
                    language: detector.language.clone(),
                    image: detector.builder_image.clone(),
                }));
            }
        }

        Ok(None)
    }
}

/// What a build file says about the image it produces.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BuildFile {
    /// Base image of the final stage, `None` for `scratch` or unresolvable names.
    pub from: Option<ImageName>,
    /// TCP ports exposed by the final stage.
    pub exposed_ports: BTreeSet<u16>,
}

/// Parse the `FROM` and `EXPOSE` instructions of a Dockerfile.
pub fn parse_build_file(content: &str) -> Result<BuildFile> {
    let mut stages: HashMap<String, Option<ImageName>> = HashMap::new();
    let mut build_file = BuildFile::default();

    for line in logical_lines(content) {
        let mut words = line.split_whitespace();
        let Some(instruction) = words.next() else {
            continue;
        };

        if instruction.eq_ignore_ascii_case("FROM") {
            let args: Vec<&str> = words.filter(|w| !w.starts_with("--")).collect();
            let Some(image) = args.first() else {
                return Err(Error::validation("Dockerfile", "FROM without an image"));
            };

            let from = if let Some(previous) = stages.get(&image.to_lowercase()) {
                previous.clone()
            } else if image.contains('$') || image.eq_ignore_ascii_case("scratch") {
                None
            } else {
                Some(ImageName::parse(image)?)
            };

            if let [_, keyword, alias, ..] = args.as_slice() {
                if keyword.eq_ignore_ascii_case("AS") {
                    stages.insert(alias.to_lowercase(), from.clone());
                }
            }

            build_file = BuildFile {
                from,
                exposed_ports: BTreeSet::new(),
            };
        } else if instruction.eq_ignore_ascii_case("EXPOSE") {
            for word in words {
                match parse_exposed_port(word) {
                    Some(port) => {
                        build_file.exposed_ports.insert(port);
                    }
                    None => debug!(port = %word, "Ignoring EXPOSE entry"),
                }
            }
        }
    }

    Ok(build_file)
}

/// Join continuation lines and drop comments and blanks.
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for raw in content.lines() {
        let trimmed = raw.trim();
        if trimmed.starts_with('#') || (trimmed.is_empty() && current.is_empty()) {
            continue;
        }
        match trimmed.strip_suffix('\\') {
            Some(part) => {
                current.push_str(part);
                current.push(' ');
            }
            None => {
                current.push_str(trimmed);
                lines.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.trim().is_empty() {
        lines.push(current);
    }
    lines
}
