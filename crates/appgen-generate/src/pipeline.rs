//! Build pipeline assembly.
//!
//! A [`Pipeline`] ties a source to the strategy chosen for it and turns the
//! pair into draft platform objects: the output image repository, a tracking
//! repository for the base image, the build definition and, unless the build
//! only produces artifacts, a deployment definition.

use crate::emitter::Acceptor;
use appgen_core::object::{
    API_VERSION, BuildConfig, BuildOutput, BuildParameters, BuildSource, BuildStrategy,
    BuildTrigger, CustomBuildStrategy, DeploymentConfig, DeploymentTemplate, DeploymentTrigger,
    DockerBuildStrategy, GitBuildSource, ImageReference, ImageRepository, SourceBuildStrategy,
    object_meta,
};
use appgen_core::{
    BuildStrategyRef, Error, GeneratedObject, ImageRef, ImageSource, ObjectKind, Result, SourceRef,
    StrategyKind,
};
use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Label selecting the pods of a deployment.
pub const DEPLOYMENT_LABEL: &str = "deploymentconfig";

/// Tag the build output is pushed to and deployed from.
pub const OUTPUT_TAG: &str = "latest";

/// Runtime settings of the deployment that accompanies a build.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeploymentPlan {
    pub env: BTreeMap<String, String>,
    pub ports: Vec<u16>,
}

/// A source, the strategy that builds it and the deployment that runs it.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: String,
    pub base: Option<ImageRef>,
    pub source: SourceRef,
    pub strategy: BuildStrategyRef,
    pub deployment: Option<DeploymentPlan>,
}

impl Pipeline {
    pub fn new(
        name: &str,
        base: Option<ImageRef>,
        strategy: BuildStrategyRef,
        source: SourceRef,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::PipelineConsistency("pipeline name is empty".to_string()));
        }

        match strategy.kind {
            StrategyKind::BuilderImage | StrategyKind::CustomTooling if base.is_none() => {
                return Err(Error::PipelineConsistency(format!(
                    "{} strategy for {} has no base image",
                    strategy.kind, name
                )));
            }
            StrategyKind::ContainerNative
                if strategy
                    .context_dir
                    .as_deref()
                    .is_some_and(|c| c.trim().is_empty()) =>
            {
                return Err(Error::PipelineConsistency(format!(
                    "container-native strategy for {} has no context",
                    name
                )));
            }
            _ => {}
        }

        if let (Some(base), Some(strategy_base)) = (&base, &strategy.base) {
            if base.name != strategy_base.name {
                return Err(Error::PipelineConsistency(format!(
                    "base image {} does not match strategy base {}",
                    base.pull_spec(),
                    strategy_base.pull_spec()
                )));
            }
        }

        debug!(name = %name, strategy = %strategy.kind, source = %source, "Assembling pipeline");
        Ok(Self {
            name: name.to_string(),
            base,
            source,
            strategy,
            deployment: None,
        })
    }

    /// Decide whether the output runs, recording a deployment plan if so.
    ///
    /// The deployment environment is the base image's environment overlaid
    /// with `env`; on conflicting keys `env` wins.
    pub fn needs_deployment(&mut self, env: &BTreeMap<String, String>) -> bool {
        if self.strategy.is_build_only() {
            info!(name = %self.name, "Build only produces artifacts, skipping deployment");
            self.deployment = None;
            return false;
        }

        let mut merged = self
            .base
            .as_ref()
            .map(|b| b.env.clone())
            .unwrap_or_default();
        merged.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));

        self.deployment = Some(DeploymentPlan {
            env: merged,
            ports: self.strategy.exposed_ports(),
        });
        true
    }

    /// Draft objects, filtered through `acceptor`.
    pub fn objects(&self, acceptor: &mut dyn Acceptor) -> Vec<GeneratedObject> {
        let mut drafts = vec![GeneratedObject::ImageRepository(image_repository(
            &self.name, None,
        ))];

        // Platform streams already exist; only registry images need one created.
        if let Some(base) = self
            .base
            .as_ref()
            .filter(|b| b.source == ImageSource::Registry)
        {
            drafts.push(GeneratedObject::ImageRepository(image_repository(
                &base.name.name,
                Some(tracked_repository(base)),
            )));
        }

        drafts.push(GeneratedObject::BuildConfig(self.build_config()));

        if let Some(plan) = &self.deployment {
            drafts.push(GeneratedObject::DeploymentConfig(self.deployment_config(plan)));
        }

        drafts.into_iter().filter(|o| acceptor.accept(o)).collect()
    }

    fn build_config(&self) -> BuildConfig {
        let from = self.base.as_ref().map(base_reference);

        let mut triggers = Vec::new();
        if let (Some(base), Some(from)) = (&self.base, &from) {
            if base.is_tracked() {
                triggers.push(BuildTrigger::ImageChange {
                    from: from.clone(),
                    tag: base.name.tag_or_default().to_string(),
                });
            }
        }
        triggers.push(BuildTrigger::ConfigChange);

        let options = &self.strategy.options;
        let mut strategy = BuildStrategy {
            kind: self.strategy.kind,
            docker_strategy: None,
            source_strategy: None,
            custom_strategy: None,
        };
        match (self.strategy.kind, from) {
            (StrategyKind::ContainerNative, from) => {
                strategy.docker_strategy = Some(DockerBuildStrategy {
                    no_cache: options.no_cache,
                    from,
                });
            }
            (StrategyKind::BuilderImage, Some(from)) => {
                strategy.source_strategy = Some(SourceBuildStrategy {
                    from,
                    incremental: options.incremental,
                });
            }
            (StrategyKind::CustomTooling, Some(from)) => {
                strategy.custom_strategy = Some(CustomBuildStrategy {
                    from,
                    expose_docker_socket: true,
                    env: BTreeMap::new(),
                });
            }
            // Pipeline::new rejects image based strategies without a base.
            (_, None) => {}
        }

        let git = self.source.uri().map(|uri| GitBuildSource {
            uri: uri.to_string(),
            git_ref: self.source.git_ref.clone(),
        });
        let source = BuildSource {
            source_type: if git.is_some() { "Git" } else { "Binary" }.to_string(),
            git,
            context_dir: join_context(
                self.source.context_dir.as_deref(),
                self.strategy.context_dir.as_deref(),
            ),
        };

        BuildConfig {
            api_version: API_VERSION.to_string(),
            kind: ObjectKind::BuildConfig.to_string(),
            metadata: object_meta(&self.name),
            triggers,
            parameters: BuildParameters {
                source,
                strategy,
                output: BuildOutput {
                    to: ImageReference::image_repository(&self.name, None),
                },
            },
        }
    }

    fn deployment_config(&self, plan: &DeploymentPlan) -> DeploymentConfig {
        let selector = BTreeMap::from([(DEPLOYMENT_LABEL.to_string(), self.name.clone())]);

        let ports: Vec<ContainerPort> = plan
            .ports
            .iter()
            .map(|port| ContainerPort {
                container_port: i32::from(*port),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            })
            .collect();
        let env: Vec<EnvVar> = plan
            .env
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            })
            .collect();

        let container = Container {
            name: self.name.clone(),
            image: Some(format!("{}:{}", self.name, OUTPUT_TAG)),
            ports: Some(ports).filter(|p| !p.is_empty()),
            env: Some(env).filter(|e| !e.is_empty()),
            ..Default::default()
        };

        DeploymentConfig {
            api_version: API_VERSION.to_string(),
            kind: ObjectKind::DeploymentConfig.to_string(),
            metadata: object_meta(&self.name),
            triggers: vec![
                DeploymentTrigger::ConfigChange,
                DeploymentTrigger::ImageChange {
                    automatic: true,
                    container_names: vec![self.name.clone()],
                    from: ImageReference::image_repository(&self.name, None),
                    tag: OUTPUT_TAG.to_string(),
                },
            ],
            template: DeploymentTemplate {
                strategy: "Recreate".to_string(),
                replicas: 1,
                selector: selector.clone(),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(selector),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        ..Default::default()
                    }),
                },
            },
        }
    }
}

fn image_repository(name: &str, docker_image_repository: Option<String>) -> ImageRepository {
    ImageRepository {
        api_version: API_VERSION.to_string(),
        kind: ObjectKind::ImageRepository.to_string(),
        metadata: object_meta(name),
        docker_image_repository,
    }
}

/// Pull location of a tracked base, without tag or digest.
fn tracked_repository(base: &ImageRef) -> String {
    match &base.name.registry {
        Some(registry) => format!("{}/{}", registry, base.name.repository()),
        None => base.name.repository(),
    }
}

/// How the build definition refers to its base image.
fn base_reference(base: &ImageRef) -> ImageReference {
    match &base.source {
        ImageSource::Platform { namespace } => {
            ImageReference::image_repository(&base.name.name, Some(namespace.clone()))
        }
        ImageSource::Registry => ImageReference::image_repository(&base.name.name, None),
        ImageSource::LocalRuntime | ImageSource::Declared => {
            ImageReference::docker_image(base.pull_spec())
        }
    }
}

fn join_context(source: Option<&str>, strategy: Option<&str>) -> Option<String> {
    let parts: Vec<&str> = [source, strategy]
        .into_iter()
        .flatten()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
