//! End-to-end generation runs against stubbed collaborators.

use appgen_core::{
    Error, GeneratedObject, ImageRef, ImageResolverChain, ObjectKind, Resolver, Result, SourceRef,
};
use appgen_generate::{
    CheckoutInfo, CheckoutInspector, DetectorChain, DirectorySnapshot, GenerateRequest, Generator,
    SourceFetcher, SourceInput, SourceSnapshot, StrategyOverride,
};
use appgen_resolver::{RegistryClient, RegistryImage, RegistryResolver};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

struct NoCheckout;

#[async_trait]
impl CheckoutInspector for NoCheckout {
    async fn inspect(&self, _dir: &Path) -> Result<Option<CheckoutInfo>> {
        Ok(None)
    }
}

/// Serves a local directory as the "clone" of any remote.
struct DirectoryFetcher {
    root: PathBuf,
    calls: Mutex<Vec<String>>,
}

impl DirectoryFetcher {
    fn new(root: &Path) -> Arc<Self> {
        Arc::new(Self {
            root: root.to_path_buf(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceFetcher for DirectoryFetcher {
    async fn fetch(&self, source: &SourceRef) -> Result<Box<dyn SourceSnapshot>> {
        self.calls.lock().unwrap().push(source.to_string());
        Ok(Box::new(DirectorySnapshot::new(&self.root)))
    }
}

/// Resolver that never matches and records every name it is asked for.
#[derive(Default)]
struct EmptyResolver {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Resolver for EmptyResolver {
    fn name(&self) -> &str {
        "empty"
    }

    async fn resolve(&self, name: &str) -> Result<ImageRef> {
        self.calls.lock().unwrap().push(name.to_string());
        Err(Error::ResolverNoMatch(name.to_string()))
    }
}

struct StubRegistry {
    requests: Mutex<Vec<String>>,
}

#[async_trait]
impl RegistryClient for StubRegistry {
    fn host(&self) -> &str {
        "registry-1.docker.io"
    }

    async fn fetch_image(&self, repository: &str, reference: &str) -> Result<Option<RegistryImage>> {
        self.requests
            .lock()
            .unwrap()
            .push(format!("{}:{}", repository, reference));
        Ok(Some(RegistryImage {
            digest: Some("sha256:4f1c".to_string()),
            exposed_ports: vec!["8080/tcp".to_string()],
            env: vec!["STI_SCRIPTS_URL=https://example.com/sti".to_string()],
            labels: HashMap::new(),
        }))
    }
}

fn write_files(dir: &Path, files: &[(&str, &str)]) {
    for (name, content) in files {
        std::fs::write(dir.join(name), content).unwrap();
    }
}

fn generator(resolver: Arc<dyn Resolver>, fetcher: Arc<DirectoryFetcher>) -> Generator {
    Generator::new(resolver, fetcher, Arc::new(NoCheckout), DetectorChain::default())
}

fn of_kind(objects: &[GeneratedObject], kind: ObjectKind) -> Vec<&GeneratedObject> {
    objects.iter().filter(|o| o.kind() == kind).collect()
}

fn selector(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("deploymentconfig".to_string(), name.to_string())])
}

#[tokio::test]
async fn test_directory_with_dockerfile_exposing_8080() {
    let temp = tempfile::tempdir().unwrap();
    write_files(temp.path(), &[("Dockerfile", "FROM centos:7\nEXPOSE 8080\n")]);
    let resolver = Arc::new(EmptyResolver::default());
    let fetcher = DirectoryFetcher::new(temp.path());

    let mut request = GenerateRequest::new(SourceInput::Directory(temp.path().to_path_buf()));
    request.name = Some("frontend".to_string());
    let objects = generator(resolver.clone(), fetcher.clone())
        .generate(request)
        .await
        .unwrap();

    let builds = of_kind(&objects, ObjectKind::BuildConfig);
    assert_eq!(builds.len(), 1);
    let GeneratedObject::BuildConfig(bc) = builds[0] else {
        panic!("expected a build config");
    };
    assert_eq!(bc.parameters.strategy.kind.to_string(), "Docker");
    assert!(bc.parameters.strategy.docker_strategy.is_some());

    let services = of_kind(&objects, ObjectKind::Service);
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].service_signatures(), vec![(8080, selector("frontend"))]);

    assert!(resolver.calls.lock().unwrap().is_empty());
    assert!(fetcher.calls().is_empty());
}

#[tokio::test]
async fn test_dockerfile_without_nameable_base_keeps_ports() {
    let build_files = [
        "FROM scratch\nEXPOSE 8080\n",
        "ARG BASE=centos:7\nFROM ${BASE}\nEXPOSE 8080\n",
    ];
    for content in build_files {
        let temp = tempfile::tempdir().unwrap();
        write_files(temp.path(), &[("Dockerfile", content)]);
        let fetcher = DirectoryFetcher::new(temp.path());

        let mut request = GenerateRequest::new(SourceInput::Directory(temp.path().to_path_buf()));
        request.name = Some("frontend".to_string());
        let objects = generator(Arc::new(EmptyResolver::default()), fetcher)
            .generate(request)
            .await
            .unwrap();

        let deployments = of_kind(&objects, ObjectKind::DeploymentConfig);
        assert_eq!(deployments.len(), 1, "{content}");
        assert_eq!(deployments[0].container_ports(), vec![8080], "{content}");

        let services = of_kind(&objects, ObjectKind::Service);
        assert_eq!(services.len(), 1, "{content}");
        assert_eq!(services[0].service_signatures(), vec![(8080, selector("frontend"))]);
    }
}

#[tokio::test]
async fn test_remote_source_resolved_from_registry() {
    let temp = tempfile::tempdir().unwrap();
    write_files(temp.path(), &[("Gemfile", "source 'https://rubygems.org'\n"), ("config.ru", "")]);
    let registry = Arc::new(StubRegistry {
        requests: Mutex::new(Vec::new()),
    });
    let chain = ImageResolverChain::default().with(Arc::new(RegistryResolver::new(registry.clone())), 0.5);
    let fetcher = DirectoryFetcher::new(temp.path());

    let request = GenerateRequest::new(SourceInput::Url(
        "https://github.com/openshift/ruby-hello-world.git".to_string(),
    ));
    let objects = generator(Arc::new(chain), fetcher.clone())
        .generate(request)
        .await
        .unwrap();

    let keys: Vec<String> = objects.iter().map(|o| o.key().to_string()).collect();
    assert_eq!(
        keys,
        vec![
            "ImageRepository/ruby-hello-world",
            "ImageRepository/ruby-20-centos",
            "BuildConfig/ruby-hello-world",
            "DeploymentConfig/ruby-hello-world",
            "Service/ruby-hello-world",
        ]
    );

    let GeneratedObject::BuildConfig(bc) = &objects[2] else {
        panic!("expected a build config");
    };
    assert_eq!(bc.parameters.strategy.kind.to_string(), "Source");
    assert_eq!(
        bc.parameters.source.git.as_ref().map(|g| g.uri.as_str()),
        Some("https://github.com/openshift/ruby-hello-world.git")
    );

    let GeneratedObject::ImageRepository(base) = &objects[1] else {
        panic!("expected an image repository");
    };
    assert_eq!(
        base.docker_image_repository.as_deref(),
        Some("docker.io/openshift/ruby-20-centos")
    );

    assert_eq!(
        registry.requests.lock().unwrap().as_slice(),
        ["openshift/ruby-20-centos:latest"]
    );
    assert_eq!(fetcher.calls().len(), 1);

    let json = serde_json::to_value(&objects).unwrap();
    assert_eq!(json[0]["kind"], "ImageRepository");
    assert_eq!(json[2]["parameters"]["strategy"]["type"], "Source");
    assert_eq!(json[4]["kind"], "Service");
}

#[tokio::test]
async fn test_dockerfile_takes_precedence_over_language_markers() {
    let temp = tempfile::tempdir().unwrap();
    write_files(
        temp.path(),
        &[
            ("Dockerfile", "FROM node:20\nEXPOSE 3000\n"),
            ("package.json", "{}"),
            ("Gemfile", ""),
        ],
    );
    let resolver = Arc::new(EmptyResolver::default());

    let mut request = GenerateRequest::new(SourceInput::Directory(temp.path().to_path_buf()));
    request.name = Some("web".to_string());
    let objects = generator(resolver.clone(), DirectoryFetcher::new(temp.path()))
        .generate(request)
        .await
        .unwrap();

    let GeneratedObject::BuildConfig(bc) = of_kind(&objects, ObjectKind::BuildConfig)[0] else {
        panic!("expected a build config");
    };
    assert_eq!(bc.parameters.strategy.kind.to_string(), "Docker");
    assert!(resolver.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_builder_override_skips_detection() {
    let temp = tempfile::tempdir().unwrap();
    write_files(temp.path(), &[("Dockerfile", "FROM centos:7\n")]);
    let registry = Arc::new(StubRegistry {
        requests: Mutex::new(Vec::new()),
    });
    let fetcher = DirectoryFetcher::new(temp.path());

    let mut request = GenerateRequest::new(SourceInput::Url(
        "https://github.com/openshift/ruby-hello-world.git".to_string(),
    ));
    request.strategy_override = Some(StrategyOverride::BuilderImage(
        "openshift/python-33-centos".to_string(),
    ));
    let objects = generator(Arc::new(RegistryResolver::new(registry.clone())), fetcher.clone())
        .generate(request)
        .await
        .unwrap();

    let GeneratedObject::BuildConfig(bc) = of_kind(&objects, ObjectKind::BuildConfig)[0] else {
        panic!("expected a build config");
    };
    assert_eq!(bc.parameters.strategy.kind.to_string(), "Source");
    assert!(fetcher.calls().is_empty());
    assert_eq!(
        registry.requests.lock().unwrap().as_slice(),
        ["openshift/python-33-centos:latest"]
    );
}

#[tokio::test]
async fn test_port_and_environment_overrides() {
    let temp = tempfile::tempdir().unwrap();
    write_files(temp.path(), &[("Dockerfile", "FROM centos:7\nEXPOSE 8080 8443\n")]);

    let mut request = GenerateRequest::new(SourceInput::Directory(temp.path().to_path_buf()));
    request.name = Some("api".to_string());
    request.port = Some(9090);
    request.env = BTreeMap::from([("LOG_LEVEL".to_string(), "debug".to_string())]);
    let objects = generator(Arc::new(EmptyResolver::default()), DirectoryFetcher::new(temp.path()))
        .generate(request)
        .await
        .unwrap();

    let services = of_kind(&objects, ObjectKind::Service);
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].service_signatures(), vec![(9090, selector("api"))]);

    let json = serde_json::to_value(of_kind(&objects, ObjectKind::DeploymentConfig)[0]).unwrap();
    let container = &json["template"]["template"]["spec"]["containers"][0];
    assert_eq!(container["env"][0]["name"], "LOG_LEVEL");
    assert_eq!(container["env"][0]["value"], "debug");
}

#[tokio::test]
async fn test_resolution_exhaustion() {
    let temp = tempfile::tempdir().unwrap();
    write_files(temp.path(), &[("requirements.txt", "flask\n")]);
    let first = Arc::new(EmptyResolver::default());
    let second = Arc::new(EmptyResolver::default());
    let chain = ImageResolverChain::default()
        .with(first.clone(), 1.0)
        .with(second.clone(), 0.5);

    let request = GenerateRequest::new(SourceInput::Url(
        "https://github.com/team/service.git".to_string(),
    ));
    let err = generator(Arc::new(chain), DirectoryFetcher::new(temp.path()))
        .generate(request)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Resolution(ref name) if name == "openshift/python-33-centos"));
    assert_eq!(first.calls.lock().unwrap().len(), 1);
    assert_eq!(second.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_no_strategy_match() {
    let temp = tempfile::tempdir().unwrap();
    write_files(temp.path(), &[("README.md", "nothing to build")]);

    let request = GenerateRequest::new(SourceInput::Directory(temp.path().to_path_buf()));
    let err = generator(Arc::new(EmptyResolver::default()), DirectoryFetcher::new(temp.path()))
        .generate(request)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NoStrategyMatch(_)));
}

#[tokio::test]
async fn test_invalid_name_override() {
    let temp = tempfile::tempdir().unwrap();
    let mut request = GenerateRequest::new(SourceInput::Directory(temp.path().to_path_buf()));
    request.name = Some("Bad_Name".to_string());

    let err = generator(Arc::new(EmptyResolver::default()), DirectoryFetcher::new(temp.path()))
        .generate(request)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation { .. }));
}
