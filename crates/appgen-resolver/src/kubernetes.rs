//! Platform image stream resolver.

use appgen_core::image::{parse_env_entries, parse_exposed_port};
use appgen_core::{Error, ImageName, ImageRef, ImageSource, Resolver, Result};
use async_trait::async_trait;
use kube::Client;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Namespace probed when no other is configured.
pub const FALLBACK_NAMESPACE: &str = "default";

/// Looks up images tracked by the platform in a single namespace.
#[async_trait]
pub trait ClusterImageLookup: Send + Sync {
    /// Find `name` in `namespace`.
    ///
    /// `Ok(None)` means the cluster answered and has no such image.
    async fn find_image(&self, namespace: &str, name: &ImageName) -> Result<Option<ImageRef>>;
}

/// Resolves images through platform image streams.
///
/// The probe list is fixed at construction: the project namespace (when
/// given) followed by the default namespace. It is never empty.
pub struct ImageStreamResolver {
    lookup: Arc<dyn ClusterImageLookup>,
    namespaces: Vec<String>,
}

impl ImageStreamResolver {
    pub fn new(
        lookup: Arc<dyn ClusterImageLookup>,
        project_namespace: Option<&str>,
        default_namespace: &str,
    ) -> Self {
        let default_namespace = if default_namespace.is_empty() {
            FALLBACK_NAMESPACE
        } else {
            default_namespace
        };

        let mut namespaces = Vec::with_capacity(2);
        if let Some(ns) = project_namespace.filter(|ns| !ns.is_empty()) {
            namespaces.push(ns.to_string());
        }
        if !namespaces.iter().any(|ns| ns == default_namespace) {
            namespaces.push(default_namespace.to_string());
        }

        Self { lookup, namespaces }
    }

    /// Namespaces in probe order.
    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }
}

#[async_trait]
impl Resolver for ImageStreamResolver {
    fn name(&self) -> &str {
        "imagestream"
    }

    async fn resolve(&self, name: &str) -> Result<ImageRef> {
        let image_name = ImageName::parse(name)?;

        if image_name.registry.is_some() {
            return Err(Error::ResolverNoMatch(name.to_string()));
        }

        // An image name that carries its own namespace is only looked up there.
        let probe: Vec<&str> = match &image_name.namespace {
            Some(ns) => vec![ns.as_str()],
            None => self.namespaces.iter().map(String::as_str).collect(),
        };

        let mut unavailable = None;
        for namespace in probe {
            debug!(image = %name, namespace = %namespace, "Probing image streams");
            match self.lookup.find_image(namespace, &image_name).await {
                Ok(Some(image)) => return Ok(image),
                Ok(None) => {}
                Err(Error::ResolverTransient(msg)) => {
                    warn!(namespace = %namespace, error = %msg, "Image stream lookup failed");
                    unavailable = Some(msg);
                }
                Err(e) => return Err(e),
            }
        }

        match unavailable {
            Some(msg) => Err(Error::ResolverTransient(msg)),
            None => Err(Error::ResolverNoMatch(name.to_string())),
        }
    }
}

/// Image stream lookup against a live cluster.
pub struct KubeImageStreamLookup {
    client: Client,
    streams: ApiResource,
    images: ApiResource,
}

impl KubeImageStreamLookup {
    /// Connect using the ambient kubeconfig or in-cluster configuration.
    pub async fn new() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::ResolverTransient(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        let streams =
            ApiResource::from_gvk(&GroupVersionKind::gvk("image.openshift.io", "v1", "ImageStream"));
        let images =
            ApiResource::from_gvk(&GroupVersionKind::gvk("image.openshift.io", "v1", "Image"));
        Self {
            client,
            streams,
            images,
        }
    }
}

#[async_trait]
impl ClusterImageLookup for KubeImageStreamLookup {
    async fn find_image(&self, namespace: &str, name: &ImageName) -> Result<Option<ImageRef>> {
        let streams: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &self.streams);

        let Some(stream) = streams
            .get_opt(&name.name)
            .await
            .map_err(|e| Error::ResolverTransient(format!("cluster: {}", e)))?
        else {
            return Ok(None);
        };

        let Some(event) = latest_tag_event(&stream.data, name.tag_or_default()) else {
            debug!(namespace = %namespace, stream = %name.name, "Tag not present in stream");
            return Ok(None);
        };

        let metadata = match &event.image {
            Some(image_id) => {
                let images: Api<DynamicObject> = Api::all_with(self.client.clone(), &self.images);
                images
                    .get_opt(image_id)
                    .await
                    .map_err(|e| Error::ResolverTransient(format!("cluster: {}", e)))?
                    .map(|image| image.data)
            }
            None => None,
        };

        Ok(Some(image_ref_from_stream(
            namespace,
            name,
            &event,
            metadata.as_ref(),
        )))
    }
}

/// Most recent entry recorded for a tag in an image stream's status.
#[derive(Debug, Clone, PartialEq)]
struct TagEvent {
    docker_image_reference: String,
    image: Option<String>,
}

fn latest_tag_event(stream: &Value, tag: &str) -> Option<TagEvent> {
    let tags = stream.pointer("/status/tags")?.as_array()?;
    let entry = tags
        .iter()
        .find(|t| t.get("tag").and_then(Value::as_str) == Some(tag))?;
    let item = entry.get("items")?.as_array()?.first()?;

    Some(TagEvent {
        docker_image_reference: item.get("dockerImageReference")?.as_str()?.to_string(),
        image: item.get("image").and_then(Value::as_str).map(str::to_string),
    })
}

fn image_ref_from_stream(
    namespace: &str,
    requested: &ImageName,
    event: &TagEvent,
    image: Option<&Value>,
) -> ImageRef {
    let mut name = ImageName::parse(&event.docker_image_reference).unwrap_or_else(|_| ImageName {
        registry: None,
        namespace: Some(namespace.to_string()),
        name: requested.name.clone(),
        tag: None,
        digest: None,
    });
    // Stream references are usually digest pinned; keep the tag that was asked for.
    if name.tag.is_none() {
        name.tag = Some(requested.tag_or_default().to_string());
    }

    let mut image_ref = ImageRef::new(
        name,
        ImageSource::Platform {
            namespace: namespace.to_string(),
        },
    );
    image_ref.id = event.image.clone();

    if let Some(config) = image.and_then(|i| i.pointer("/dockerImageMetadata/Config")) {
        if let Some(ports) = config.get("ExposedPorts").and_then(Value::as_object) {
            image_ref = image_ref.with_exposed_ports(ports.keys().filter_map(|p| parse_exposed_port(p)));
        }
        if let Some(env) = config.get("Env").and_then(Value::as_array) {
            image_ref = image_ref.with_env(parse_env_entries(env.iter().filter_map(Value::as_str)));
        }
        if let Some(labels) = config.get("Labels").and_then(Value::as_object) {
            let labels: BTreeMap<String, String> = labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect();
            image_ref = image_ref.with_labels(labels);
        }
    }

    image_ref
}
