//! Local Docker image store resolver.

use appgen_core::image::{parse_env_entries, parse_exposed_port};
use appgen_core::{Error, ImageName, ImageRef, ImageSource, Resolver, Result};
use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as DockerError;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Resolves images already present in the local Docker daemon.
pub struct LocalDockerResolver {
    docker: Docker,
}

impl LocalDockerResolver {
    /// Create a resolver for the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::ResolverTransient(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl Resolver for LocalDockerResolver {
    fn name(&self) -> &str {
        "docker"
    }

    async fn resolve(&self, name: &str) -> Result<ImageRef> {
        let image_name = ImageName::parse(name)?;

        let inspect = match self.docker.inspect_image(name).await {
            Ok(inspect) => inspect,
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => return Err(Error::ResolverNoMatch(name.to_string())),
            Err(e) => return Err(Error::ResolverTransient(format!("docker: {}", e))),
        };

        debug!(image = %name, id = ?inspect.id, "Found image in local store");

        let config = inspect.config.unwrap_or_default();
        let ports: Vec<String> = config
            .exposed_ports
            .map(|p| p.into_keys().collect())
            .unwrap_or_default();
        let env = config.env.unwrap_or_default();

        Ok(image_ref_from_parts(
            image_name,
            inspect.id,
            ports.iter().map(String::as_str),
            env.iter().map(String::as_str),
            config.labels.unwrap_or_default(),
        ))
    }
}

/// Build an image reference from the pieces of a local image inspection.
fn image_ref_from_parts<'a>(
    name: ImageName,
    id: Option<String>,
    ports: impl Iterator<Item = &'a str>,
    env: impl Iterator<Item = &'a str>,
    labels: HashMap<String, String>,
) -> ImageRef {
    let mut image = ImageRef::new(name, ImageSource::LocalRuntime)
        .with_exposed_ports(ports.filter_map(parse_exposed_port))
        .with_env(parse_env_entries(env))
        .with_labels(labels.into_iter().collect::<BTreeMap<_, _>>());
    image.id = id;
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use appgen_core::image::NON_RUNNABLE_LABEL;

    #[test]
    fn test_image_ref_from_parts() {
        let name = ImageName::parse("openshift/ruby-20-centos").unwrap();
        let labels = HashMap::from([(NON_RUNNABLE_LABEL.to_string(), "true".to_string())]);

        let image = image_ref_from_parts(
            name,
            Some("sha256:abc".to_string()),
            ["8080/tcp", "53/udp"].into_iter(),
            ["RACK_ENV=production", "PATH=/usr/bin"].into_iter(),
            labels,
        );

        assert_eq!(image.source, ImageSource::LocalRuntime);
        assert_eq!(image.id.as_deref(), Some("sha256:abc"));
        assert_eq!(image.exposed_ports.iter().copied().collect::<Vec<_>>(), vec![8080]);
        assert_eq!(image.env.get("RACK_ENV").map(String::as_str), Some("production"));
        assert!(!image.is_runnable());
    }

    #[test]
    fn test_resolver_name() {
        // Connecting with local defaults does not contact the daemon.
        if let Ok(resolver) = LocalDockerResolver::new() {
            assert_eq!(resolver.name(), "docker");
        }
    }
}
