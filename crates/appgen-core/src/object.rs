//! Generated platform objects.
//!
//! Build definitions, deployment definitions and image repositories are
//! platform extensions with no `k8s-openapi` counterpart, so they are modelled
//! here; services and pod templates reuse the upstream Kubernetes types.

use derive_more::Display;
use k8s_openapi::api::core::v1::{PodTemplateSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::StrategyKind;

pub const API_VERSION: &str = "v1";

/// Object kinds the generator emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
pub enum ObjectKind {
    BuildConfig,
    DeploymentConfig,
    Service,
    ImageRepository,
}

/// Identity of an object for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("{kind}/{name}")]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub name: String,
}

/// Reference to an image, either tracked by the platform or a raw pull spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    /// `ImageRepository` or `DockerImage`.
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ImageReference {
    pub fn image_repository(name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            kind: ObjectKind::ImageRepository.to_string(),
            name: name.into(),
            namespace,
        }
    }

    pub fn docker_image(pull_spec: impl Into<String>) -> Self {
        Self {
            kind: "DockerImage".to_string(),
            name: pull_spec.into(),
            namespace: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitBuildSource {
    pub uri: String,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSource {
    /// `Git` for repository sources, `Binary` for local directories.
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitBuildSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerBuildStrategy {
    pub no_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<ImageReference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBuildStrategy {
    pub from: ImageReference,
    pub incremental: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomBuildStrategy {
    pub from: ImageReference,
    pub expose_docker_socket: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStrategy {
    #[serde(rename = "type")]
    pub kind: StrategyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_strategy: Option<DockerBuildStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_strategy: Option<SourceBuildStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_strategy: Option<CustomBuildStrategy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutput {
    pub to: ImageReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildParameters {
    pub source: BuildSource,
    pub strategy: BuildStrategy,
    pub output: BuildOutput,
}

/// What re-runs a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BuildTrigger {
    /// Rebuild when the base image changes.
    #[serde(rename_all = "camelCase")]
    ImageChange { from: ImageReference, tag: String },
    /// Build once the definition is created or changed.
    ConfigChange,
}

/// Build definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub triggers: Vec<BuildTrigger>,
    pub parameters: BuildParameters,
}

/// What rolls out a new deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeploymentTrigger {
    ConfigChange,
    #[serde(rename_all = "camelCase")]
    ImageChange {
        automatic: bool,
        container_names: Vec<String>,
        from: ImageReference,
        tag: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentTemplate {
    /// Rollout strategy, `Recreate` unless configured otherwise.
    pub strategy: String,
    pub replicas: i32,
    pub selector: BTreeMap<String, String>,
    pub template: PodTemplateSpec,
}

/// Runtime deployment definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub triggers: Vec<DeploymentTrigger>,
    pub template: DeploymentTemplate,
}

/// Repository tracking object for built or imported images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRepository {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    /// External repository this one mirrors, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_image_repository: Option<String>,
}

/// Any object produced by the generator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GeneratedObject {
    BuildConfig(BuildConfig),
    DeploymentConfig(DeploymentConfig),
    Service(Service),
    ImageRepository(ImageRepository),
}

impl GeneratedObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            GeneratedObject::BuildConfig(_) => ObjectKind::BuildConfig,
            GeneratedObject::DeploymentConfig(_) => ObjectKind::DeploymentConfig,
            GeneratedObject::Service(_) => ObjectKind::Service,
            GeneratedObject::ImageRepository(_) => ObjectKind::ImageRepository,
        }
    }

    pub fn name(&self) -> &str {
        let meta = match self {
            GeneratedObject::BuildConfig(o) => &o.metadata,
            GeneratedObject::DeploymentConfig(o) => &o.metadata,
            GeneratedObject::Service(o) => &o.metadata,
            GeneratedObject::ImageRepository(o) => &o.metadata,
        };
        meta.name.as_deref().unwrap_or_default()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            kind: self.kind(),
            name: self.name().to_string(),
        }
    }

    /// Container ports declared by the object's pod template.
    pub fn container_ports(&self) -> Vec<i32> {
        let GeneratedObject::DeploymentConfig(dc) = self else {
            return Vec::new();
        };
        let mut ports = Vec::new();
        let containers = dc
            .template
            .template
            .spec
            .iter()
            .flat_map(|spec| spec.containers.iter());
        for container in containers {
            for port in container.ports.iter().flatten() {
                if !ports.contains(&port.container_port) {
                    ports.push(port.container_port);
                }
            }
        }
        ports
    }

    /// Label selector of the pods the object manages.
    pub fn selector(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            GeneratedObject::DeploymentConfig(dc) if !dc.template.selector.is_empty() => {
                Some(&dc.template.selector)
            }
            GeneratedObject::Service(svc) => svc.spec.as_ref().and_then(|s| s.selector.as_ref()),
            _ => None,
        }
    }

    /// `(port, selector)` pairs exposed by an existing service.
    pub fn service_signatures(&self) -> Vec<(i32, BTreeMap<String, String>)> {
        let GeneratedObject::Service(svc) = self else {
            return Vec::new();
        };
        let Some(spec) = svc.spec.as_ref() else {
            return Vec::new();
        };
        let selector = spec.selector.clone().unwrap_or_default();
        spec.ports
            .iter()
            .flatten()
            .map(|p| (p.port, selector.clone()))
            .collect()
    }
}

pub fn object_meta(name: impl Into<String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        ..Default::default()
    }
}

/// A service forwarding `port` to the pods matching `selector`.
pub fn service(name: impl Into<String>, port: i32, selector: BTreeMap<String, String>) -> Service {
    Service {
        metadata: object_meta(name),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            selector: Some(selector),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec};

    fn selector(name: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("deploymentconfig".to_string(), name.to_string())])
    }

    fn deployment(name: &str, ports: &[i32]) -> GeneratedObject {
        GeneratedObject::DeploymentConfig(DeploymentConfig {
            api_version: API_VERSION.to_string(),
            kind: ObjectKind::DeploymentConfig.to_string(),
            metadata: object_meta(name),
            triggers: vec![DeploymentTrigger::ConfigChange],
            template: DeploymentTemplate {
                strategy: "Recreate".to_string(),
                replicas: 1,
                selector: selector(name),
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: name.to_string(),
                            ports: Some(
                                ports
                                    .iter()
                                    .map(|p| ContainerPort {
                                        container_port: *p,
                                        ..Default::default()
                                    })
                                    .collect(),
                            ),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
            },
        })
    }

    #[test]
    fn test_key_uses_kind_and_name() {
        let obj = deployment("frontend", &[8080]);
        let key = obj.key();
        assert_eq!(key.kind, ObjectKind::DeploymentConfig);
        assert_eq!(key.name, "frontend");
        assert_eq!(key.to_string(), "DeploymentConfig/frontend");
    }

    #[test]
    fn test_container_ports_deduplicated() {
        let obj = deployment("frontend", &[8080, 8443, 8080]);
        assert_eq!(obj.container_ports(), vec![8080, 8443]);
    }

    #[test]
    fn test_service_signature() {
        let svc = GeneratedObject::Service(service("frontend", 8080, selector("frontend")));
        assert_eq!(svc.kind(), ObjectKind::Service);
        assert_eq!(svc.name(), "frontend");
        assert_eq!(svc.service_signatures(), vec![(8080, selector("frontend"))]);
        assert!(svc.container_ports().is_empty());
    }

    #[test]
    fn test_service_serializes_with_kind() {
        let svc = GeneratedObject::Service(service("frontend", 8080, selector("frontend")));
        let json = serde_json::to_value(&svc).unwrap();
        assert_eq!(json["kind"], "Service");
        assert_eq!(json["spec"]["ports"][0]["port"], 8080);
    }

    #[test]
    fn test_build_trigger_serialization() {
        let trigger = BuildTrigger::ImageChange {
            from: ImageReference::image_repository("ruby-20-centos", None),
            tag: "latest".to_string(),
        };
        let json = serde_json::to_value(&trigger).unwrap();
        assert_eq!(json["type"], "ImageChange");
        assert_eq!(json["from"]["kind"], "ImageRepository");
    }
}
