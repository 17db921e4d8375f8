//! Acceptance policies and service synthesis.

use appgen_core::object::service;
use appgen_core::{GeneratedObject, ObjectKey};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Decides whether a draft object makes it into the output.
pub trait Acceptor {
    fn accept(&mut self, object: &GeneratedObject) -> bool;
}

/// Keeps the first object for each `(kind, name)` and drops later ones.
#[derive(Debug, Default)]
pub struct AcceptFirst {
    seen: HashSet<ObjectKey>,
}

impl AcceptFirst {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Acceptor for AcceptFirst {
    fn accept(&mut self, object: &GeneratedObject) -> bool {
        let key = object.key();
        if self.seen.contains(&key) {
            debug!(object = %key, "Dropping duplicate object");
            return false;
        }
        self.seen.insert(key);
        true
    }
}

/// Accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Acceptor for AcceptAll {
    fn accept(&mut self, _object: &GeneratedObject) -> bool {
        true
    }
}

/// Append a service for every `(port, selector)` pair that objects expose
/// and no existing service covers.
///
/// The first port of an object names the service after the object, further
/// ports after `<name>-<port>`. A first port whose name is taken falls back to
/// `<name>-<port>`.
pub fn add_services(mut objects: Vec<GeneratedObject>) -> Vec<GeneratedObject> {
    let mut covered: HashSet<(i32, BTreeMap<String, String>)> = objects
        .iter()
        .flat_map(GeneratedObject::service_signatures)
        .collect();
    let mut names = AcceptFirst::new();
    for object in &objects {
        names.accept(object);
    }

    let mut services = Vec::new();
    for object in &objects {
        if matches!(object, GeneratedObject::Service(_)) {
            continue;
        }
        let Some(selector) = object.selector() else {
            continue;
        };

        for (index, port) in object.container_ports().into_iter().enumerate() {
            let signature = (port, selector.clone());
            if covered.contains(&signature) {
                continue;
            }

            let port_name = format!("{}-{}", object.name(), port);
            let candidates = if index == 0 {
                vec![object.name().to_string(), port_name]
            } else {
                vec![port_name]
            };
            let Some(svc) = candidates
                .into_iter()
                .map(|name| GeneratedObject::Service(service(name, port, selector.clone())))
                .find(|svc| names.accept(svc))
            else {
                debug!(object = %object.name(), port = port, "No free service name");
                continue;
            };

            debug!(service = %svc.name(), port = port, "Synthesized service");
            covered.insert(signature);
            services.push(svc);
        }
    }

    objects.extend(services);
    objects
}

#[cfg(test)]
mod tests {
    use super::*;
    use appgen_core::ObjectKind;
    use appgen_core::object::{API_VERSION, DeploymentConfig, DeploymentTemplate, ImageRepository, object_meta};
    use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec};

    fn deployment(name: &str, ports: &[i32]) -> GeneratedObject {
        let selector = BTreeMap::from([("deploymentconfig".to_string(), name.to_string())]);
        GeneratedObject::DeploymentConfig(DeploymentConfig {
            api_version: API_VERSION.to_string(),
            kind: ObjectKind::DeploymentConfig.to_string(),
            metadata: object_meta(name),
            triggers: Vec::new(),
            template: DeploymentTemplate {
                strategy: "Recreate".to_string(),
                replicas: 1,
                selector,
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

    fn repository(name: &str) -> GeneratedObject {
        GeneratedObject::ImageRepository(ImageRepository {
            api_version: API_VERSION.to_string(),
            kind: ObjectKind::ImageRepository.to_string(),
            metadata: object_meta(name),
            docker_image_repository: None,
        })
    }

    fn services(objects: &[GeneratedObject]) -> Vec<(String, Vec<(i32, BTreeMap<String, String>)>)> {
        objects
            .iter()
            .filter(|o| o.kind() == ObjectKind::Service)
            .map(|o| (o.name().to_string(), o.service_signatures()))
            .collect()
    }

    #[test]
    fn test_accept_first_drops_later_duplicates() {
        let mut acceptor = AcceptFirst::new();
        assert!(acceptor.accept(&repository("app")));
        assert!(!acceptor.accept(&repository("app")));
        assert!(acceptor.accept(&repository("ruby")));
        assert!(acceptor.accept(&deployment("app", &[])));
    }

    #[test]
    fn test_accept_all() {
        let mut acceptor = AcceptAll;
        assert!(acceptor.accept(&repository("app")));
        assert!(acceptor.accept(&repository("app")));
    }

    #[test]
    fn test_one_service_per_port() {
        let objects = add_services(vec![repository("app"), deployment("app", &[8080, 8443])]);

        let svcs = services(&objects);
        assert_eq!(objects.len(), 4);
        assert_eq!(svcs.len(), 2);
        assert_eq!(svcs[0].0, "app");
        assert_eq!(svcs[0].1[0].0, 8080);
        assert_eq!(svcs[1].0, "app-8443");
        assert_eq!(svcs[1].1[0].0, 8443);
    }

    #[test]
    fn test_signatures_are_unique() {
        let dc = deployment("app", &[8080]);
        let objects = add_services(vec![dc.clone(), dc.clone(), dc]);

        let svcs = services(&objects);
        assert_eq!(svcs.len(), 1);
    }

    #[test]
    fn test_existing_service_counts() {
        let selector = BTreeMap::from([("deploymentconfig".to_string(), "app".to_string())]);
        let existing = GeneratedObject::Service(service("frontend", 8080, selector));

        let objects = add_services(vec![existing, deployment("app", &[8080])]);

        let svcs = services(&objects);
        assert_eq!(svcs.len(), 1);
        assert_eq!(svcs[0].0, "frontend");
    }

    #[test]
    fn test_taken_name_falls_back_to_port_name() {
        let selector = BTreeMap::from([("deploymentconfig".to_string(), "other".to_string())]);
        let existing = GeneratedObject::Service(service("app", 9000, selector));

        let objects = add_services(vec![existing, deployment("app", &[8080])]);

        let svcs = services(&objects);
        assert_eq!(svcs.len(), 2);
        assert_eq!(svcs[1].0, "app-8080");
        assert_eq!(svcs[1].1[0].0, 8080);
    }

    #[test]
    fn test_no_ports_no_services() {
        let objects = add_services(vec![deployment("worker", &[]), repository("worker")]);
        assert!(services(&objects).is_empty());
    }
}
