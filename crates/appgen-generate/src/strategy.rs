//! Build strategy selection.

use crate::detector::{
    BUILD_FILE, BuildFile, Detection, DetectorChain, DirectorySnapshot, SourceFetcher, SourceSnapshot,
    parse_build_file,
};
use appgen_core::{BuildStrategyRef, Error, ImageRef, Resolver, Result, SourceRef, StrategyOptions};
use std::path::Component;
use std::sync::Arc;
use tracing::{debug, info};

/// Caller supplied strategy, bypassing detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOverride {
    /// Build with the source's own build file, from this sub directory.
    Context(String),
    /// Build with this builder image.
    BuilderImage(String),
}

/// Chooses exactly one build strategy for a source.
pub struct StrategyRefGenerator {
    resolver: Arc<dyn Resolver>,
    fetcher: Arc<dyn SourceFetcher>,
    detectors: DetectorChain,
}

impl StrategyRefGenerator {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        fetcher: Arc<dyn SourceFetcher>,
        detectors: DetectorChain,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            detectors,
        }
    }

    pub async fn generate(
        &self,
        source: &SourceRef,
        strategy_override: Option<&StrategyOverride>,
        options: StrategyOptions,
    ) -> Result<BuildStrategyRef> {
        let strategy = match strategy_override {
            Some(StrategyOverride::Context(context)) => self.from_context(source, context).await?,
            Some(StrategyOverride::BuilderImage(image)) => self.from_builder(image).await?,
            None => self.detect(source).await?,
        };
        Ok(strategy.with_options(options))
    }

    /// Container-native build from an explicit context. Nothing is fetched.
    async fn from_context(&self, source: &SourceRef, context: &str) -> Result<BuildStrategyRef> {
        validate_context(context)?;

        let build_file = match DirectorySnapshot::for_source(source) {
            Some(snapshot) => {
                let snapshot = DirectorySnapshot::new(snapshot.root().join(context));
                match snapshot.read(BUILD_FILE).await? {
                    Some(content) => Some(parse_build_file(&content)?),
                    None => None,
                }
            }
            None => None,
        };

        let strategy = match build_file {
            Some(build_file) => container_native(Some(context.to_string()), build_file),
            None => BuildStrategyRef::container_native(Some(context.to_string()), None),
        };
        info!(context = %context, base = ?strategy.base.as_ref().map(ImageRef::pull_spec), "Using build context override");
        Ok(strategy)
    }

    /// Builder image named by the caller, resolved exactly once.
    async fn from_builder(&self, name: &str) -> Result<BuildStrategyRef> {
        let image = self.resolver.resolve(name).await?;
        if image.is_custom_builder() {
            info!(image = %image.pull_spec(), "Using custom builder image");
            return Ok(BuildStrategyRef::custom_tooling(image, None));
        }
        info!(image = %image.pull_spec(), "Using builder image override");
        Ok(BuildStrategyRef::builder_image(image, None))
    }

    async fn detect(&self, source: &SourceRef) -> Result<BuildStrategyRef> {
        let snapshot: Box<dyn SourceSnapshot> = match DirectorySnapshot::for_source(source) {
            Some(snapshot) => Box::new(snapshot),
            None => self.fetcher.fetch(source).await?,
        };

        debug!(source = %source, languages = ?self.detectors.languages(), "Detecting build strategy");
        match self.detectors.detect(snapshot.as_ref()).await? {
            Some(Detection::ContainerNative { build_file }) => Ok(container_native(None, build_file)),
            Some(Detection::BuilderImage { image, .. }) => {
                let image = self.resolver.resolve(&image).await?;
                Ok(BuildStrategyRef::builder_image(image, None))
            }
            None => Err(Error::NoStrategyMatch(source.to_string())),
        }
    }
}

/// Container-native strategy for a parsed build file. Its ports are kept even
/// when the base cannot be named.
fn container_native(context_dir: Option<String>, build_file: BuildFile) -> BuildStrategyRef {
    let base = build_file
        .from
        .map(|from| ImageRef::declared(from, build_file.exposed_ports.clone()));
    BuildStrategyRef::container_native(context_dir, base).with_detected_ports(build_file.exposed_ports)
}

/// A context must be a relative path that stays inside the source.
fn validate_context(context: &str) -> Result<()> {
    let path = std::path::Path::new(context);
    if context.trim().is_empty() {
        return Err(Error::validation("context", "may not be empty"));
    }
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(Error::validation(
            "context",
            format!("{context:?} must be a relative path inside the source"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use appgen_core::image::CUSTOM_BUILDER_LABEL;
    use appgen_core::{ImageName, ImageSource, SourceLocation, StrategyKind};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingResolver {
        labels: BTreeMap<String, String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Resolver for RecordingResolver {
        fn name(&self) -> &str {
            "recording"
        }

        async fn resolve(&self, name: &str) -> Result<ImageRef> {
            self.calls.lock().unwrap().push(name.to_string());
            Ok(ImageRef::new(ImageName::parse(name)?, ImageSource::Registry)
                .with_exposed_ports([8080])
                .with_labels(self.labels.clone()))
        }
    }

    #[derive(Default)]
    struct RecordingFetcher {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl SourceFetcher for RecordingFetcher {
        async fn fetch(&self, source: &SourceRef) -> Result<Box<dyn SourceSnapshot>> {
            *self.calls.lock().unwrap() += 1;
            Err(Error::SourceDetection(format!("{source} is not reachable in tests")))
        }
    }

    fn remote_source() -> SourceRef {
        SourceRef {
            name: "app".to_string(),
            location: SourceLocation::Url("https://example.com/app.git".to_string()),
            git_ref: None,
            context_dir: None,
            local_dir: None,
        }
    }

    fn local_source(dir: &std::path::Path) -> SourceRef {
        SourceRef {
            name: "app".to_string(),
            location: SourceLocation::Directory(dir.to_path_buf()),
            git_ref: None,
            context_dir: None,
            local_dir: Some(dir.to_path_buf()),
        }
    }

    fn generator(
        resolver: Arc<RecordingResolver>,
        fetcher: Arc<RecordingFetcher>,
    ) -> StrategyRefGenerator {
        StrategyRefGenerator::new(resolver, fetcher, DetectorChain::default())
    }

    #[tokio::test]
    async fn test_builder_override_skips_detection() {
        let resolver = Arc::new(RecordingResolver::default());
        let fetcher = Arc::new(RecordingFetcher::default());
        let strategies = generator(resolver.clone(), fetcher.clone());

        let strategy = strategies
            .generate(
                &remote_source(),
                Some(&StrategyOverride::BuilderImage("openshift/ruby-20-centos".to_string())),
                StrategyOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(strategy.kind, StrategyKind::BuilderImage);
        assert_eq!(
            resolver.calls.lock().unwrap().as_slice(),
            ["openshift/ruby-20-centos"]
        );
        assert_eq!(*fetcher.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_custom_builder_label() {
        let resolver = Arc::new(RecordingResolver {
            labels: BTreeMap::from([(CUSTOM_BUILDER_LABEL.to_string(), "true".to_string())]),
            ..Default::default()
        });
        let strategies = generator(resolver, Arc::new(RecordingFetcher::default()));

        let strategy = strategies
            .generate(
                &remote_source(),
                Some(&StrategyOverride::BuilderImage("myorg/packager".to_string())),
                StrategyOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(strategy.kind, StrategyKind::CustomTooling);
    }

    #[tokio::test]
    async fn test_context_override_on_remote_source() {
        let resolver = Arc::new(RecordingResolver::default());
        let fetcher = Arc::new(RecordingFetcher::default());
        let strategies = generator(resolver.clone(), fetcher.clone());

        let strategy = strategies
            .generate(
                &remote_source(),
                Some(&StrategyOverride::Context("docker/web".to_string())),
                StrategyOptions {
                    no_cache: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(strategy.kind, StrategyKind::ContainerNative);
        assert_eq!(strategy.context_dir.as_deref(), Some("docker/web"));
        assert!(strategy.base.is_none());
        assert!(strategy.options.no_cache);
        assert!(resolver.calls.lock().unwrap().is_empty());
        assert_eq!(*fetcher.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_context_override_reads_local_build_file() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("web")).unwrap();
        std::fs::write(temp.path().join("web/Dockerfile"), "FROM nginx:1.25\nEXPOSE 80\n").unwrap();
        std::fs::write(temp.path().join("Gemfile"), "").unwrap();

        let strategies = generator(
            Arc::new(RecordingResolver::default()),
            Arc::new(RecordingFetcher::default()),
        );
        let strategy = strategies
            .generate(
                &local_source(temp.path()),
                Some(&StrategyOverride::Context("web".to_string())),
                StrategyOptions::default(),
            )
            .await
            .unwrap();

        let base = strategy.base.clone().unwrap();
        assert_eq!(base.source, ImageSource::Declared);
        assert_eq!(base.pull_spec(), "nginx:1.25");
        assert_eq!(strategy.exposed_ports(), vec![80]);
    }

    #[tokio::test]
    async fn test_scratch_build_file_keeps_ports() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("Dockerfile"), "FROM scratch\nEXPOSE 8080\n").unwrap();

        let strategies = generator(
            Arc::new(RecordingResolver::default()),
            Arc::new(RecordingFetcher::default()),
        );
        let strategy = strategies
            .generate(&local_source(temp.path()), None, StrategyOptions::default())
            .await
            .unwrap();

        assert_eq!(strategy.kind, StrategyKind::ContainerNative);
        assert!(strategy.base.is_none());
        assert_eq!(strategy.exposed_ports(), vec![8080]);
    }

    #[tokio::test]
    async fn test_invalid_context() {
        let strategies = generator(
            Arc::new(RecordingResolver::default()),
            Arc::new(RecordingFetcher::default()),
        );
        for context in ["", "/abs", "../escape"] {
            let err = strategies
                .generate(
                    &remote_source(),
                    Some(&StrategyOverride::Context(context.to_string())),
                    StrategyOptions::default(),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Validation { .. }), "{context}");
        }
    }

    #[tokio::test]
    async fn test_detection_resolves_builder() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("pom.xml"), "<project/>").unwrap();
        let resolver = Arc::new(RecordingResolver::default());
        let strategies = generator(resolver.clone(), Arc::new(RecordingFetcher::default()));

        let strategy = strategies
            .generate(&local_source(temp.path()), None, StrategyOptions::default())
            .await
            .unwrap();

        assert_eq!(strategy.kind, StrategyKind::BuilderImage);
        assert_eq!(
            resolver.calls.lock().unwrap().as_slice(),
            ["openshift/wildfly-8-centos"]
        );
    }

    #[tokio::test]
    async fn test_detection_without_match() {
        let temp = tempfile::tempdir().unwrap();
        let strategies = generator(
            Arc::new(RecordingResolver::default()),
            Arc::new(RecordingFetcher::default()),
        );

        let err = strategies
            .generate(&local_source(temp.path()), None, StrategyOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NoStrategyMatch(_)));
    }

    #[tokio::test]
    async fn test_remote_detection_uses_fetcher() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let strategies = generator(Arc::new(RecordingResolver::default()), fetcher.clone());

        let err = strategies
            .generate(&remote_source(), None, StrategyOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SourceDetection(_)));
        assert_eq!(*fetcher.calls.lock().unwrap(), 1);
    }
}
