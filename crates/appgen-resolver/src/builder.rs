//! Assembles the resolver chain from configuration.

use crate::docker::LocalDockerResolver;
use crate::kubernetes::{ImageStreamResolver, KubeImageStreamLookup};
use crate::registry::{HttpRegistryClient, RegistryResolver};
use appgen_config::GeneratorConfig;
use appgen_core::{ImageResolverChain, Resolver};
use std::sync::Arc;
use tracing::{info, warn};

const DOCKER_WEIGHT: f32 = 1.0;
const CLUSTER_WEIGHT: f32 = 0.75;
const REGISTRY_WEIGHT: f32 = 0.5;

/// Builds the canonical chain: local runtime, platform image streams, registry.
///
/// A backend that is enabled but cannot be set up is left out of the chain
/// with a warning; the generator still works with the remaining backends.
#[derive(Debug, Clone)]
pub struct ResolverChainBuilder {
    config: GeneratorConfig,
}

impl ResolverChainBuilder {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    pub async fn build(self) -> ImageResolverChain {
        let settings = &self.config.resolvers;

        let docker = if settings.docker {
            match LocalDockerResolver::new() {
                Ok(resolver) => Some(Arc::new(resolver) as Arc<dyn Resolver>),
                Err(e) => {
                    warn!(error = %e, "Docker unavailable, leaving it out of the resolver chain");
                    None
                }
            }
        } else {
            None
        };

        let cluster = if settings.cluster {
            match KubeImageStreamLookup::new().await {
                Ok(lookup) => Some(Arc::new(ImageStreamResolver::new(
                    Arc::new(lookup),
                    self.config.namespace.as_deref(),
                    &self.config.default_namespace,
                )) as Arc<dyn Resolver>),
                Err(e) => {
                    warn!(error = %e, "Cluster unavailable, leaving it out of the resolver chain");
                    None
                }
            }
        } else {
            None
        };

        let registry = match settings.registry.as_deref() {
            Some(url) => match HttpRegistryClient::new(url) {
                Ok(client) => Some(Arc::new(RegistryResolver::new(Arc::new(client))) as Arc<dyn Resolver>),
                Err(e) => {
                    warn!(registry = %url, error = %e, "Invalid registry, leaving it out of the resolver chain");
                    None
                }
            },
            None => None,
        };

        let chain = assemble(docker, cluster, registry);
        info!(resolvers = ?chain.names(), "Resolver chain ready");
        chain
    }
}

/// Put the available backends in canonical order.
pub fn assemble(
    docker: Option<Arc<dyn Resolver>>,
    cluster: Option<Arc<dyn Resolver>>,
    registry: Option<Arc<dyn Resolver>>,
) -> ImageResolverChain {
    [
        (docker, DOCKER_WEIGHT),
        (cluster, CLUSTER_WEIGHT),
        (registry, REGISTRY_WEIGHT),
    ]
    .into_iter()
    .filter_map(|(resolver, weight)| resolver.map(|r| (r, weight)))
    .fold(ImageResolverChain::default(), |chain, (resolver, weight)| {
        chain.with(resolver, weight)
    })
}
