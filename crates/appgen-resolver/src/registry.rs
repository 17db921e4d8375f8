//! Remote registry resolver.
//!
//! Speaks the distribution (v2) API: fetch the manifest for a tag, follow a
//! manifest list to a linux/amd64 entry if needed, then read the image config
//! blob for exposed ports, environment and labels. Anonymous access only,
//! including the anonymous bearer token handshake Docker Hub asks for.

use appgen_core::image::{parse_env_entries, parse_exposed_port};
use appgen_core::{Error, ImageName, ImageRef, ImageSource, Resolver, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};
use tracing::debug;

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

static CHALLENGE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).unwrap());

const DOCKER_HUB_HOST: &str = "registry-1.docker.io";
const DOCKER_HUB_ALIAS: &str = "docker.io";

/// Image metadata as reported by a registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryImage {
    pub digest: Option<String>,
    pub exposed_ports: Vec<String>,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
}

/// Fetches image metadata from a single registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Host the client talks to, e.g. `registry-1.docker.io`.
    fn host(&self) -> &str;

    /// Fetch `repository` at `reference` (tag or digest).
    ///
    /// `Ok(None)` means the registry answered and has no such image.
    async fn fetch_image(&self, repository: &str, reference: &str) -> Result<Option<RegistryImage>>;
}

/// Resolves images by querying a remote registry.
pub struct RegistryResolver {
    client: Arc<dyn RegistryClient>,
}

impl RegistryResolver {
    pub fn new(client: Arc<dyn RegistryClient>) -> Self {
        Self { client }
    }

    /// Canonical registry name recorded in resolved references.
    fn registry_name(&self) -> String {
        match self.client.host() {
            DOCKER_HUB_HOST => DOCKER_HUB_ALIAS.to_string(),
            host => host.to_string(),
        }
    }

    fn serves(&self, registry: &str) -> bool {
        registry == self.client.host() || registry == self.registry_name()
    }
}

#[async_trait]
impl Resolver for RegistryResolver {
    fn name(&self) -> &str {
        "registry"
    }

    async fn resolve(&self, name: &str) -> Result<ImageRef> {
        let mut image_name = ImageName::parse(name)?;

        if let Some(registry) = &image_name.registry {
            if !self.serves(registry) {
                debug!(image = %name, registry = %registry, "Image lives in another registry");
                return Err(Error::ResolverNoMatch(name.to_string()));
            }
        }

        let registry = self.registry_name();
        let repository = match (&image_name.namespace, registry.as_str()) {
            (None, DOCKER_HUB_ALIAS) => format!("library/{}", image_name.name),
            _ => image_name.repository(),
        };
        let reference = image_name
            .digest
            .clone()
            .unwrap_or_else(|| image_name.tag_or_default().to_string());

        debug!(repository = %repository, reference = %reference, "Querying registry");
        let image = self
            .client
            .fetch_image(&repository, &reference)
            .await?
            .ok_or_else(|| Error::ResolverNoMatch(name.to_string()))?;

        image_name.registry = Some(registry);
        if image_name.tag.is_none() && image_name.digest.is_none() {
            image_name.tag = Some(reference);
        }

        let mut image_ref = ImageRef::new(image_name, ImageSource::Registry)
            .with_exposed_ports(image.exposed_ports.iter().filter_map(|p| parse_exposed_port(p)))
            .with_env(parse_env_entries(image.env.iter().map(String::as_str)))
            .with_labels(image.labels.into_iter().collect::<BTreeMap<_, _>>());
        image_ref.id = image.digest;
        Ok(image_ref)
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    config: Option<Descriptor>,
    manifests: Option<Vec<PlatformDescriptor>>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
}

#[derive(Debug, Deserialize)]
struct PlatformDescriptor {
    digest: String,
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    architecture: String,
    os: String,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigBlob {
    #[serde(default)]
    config: ContainerConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerConfig {
    exposed_ports: Option<HashMap<String, serde_json::Value>>,
    env: Option<Vec<String>>,
    labels: Option<HashMap<String, String>>,
}

impl From<(Option<String>, ConfigBlob)> for RegistryImage {
    fn from((digest, blob): (Option<String>, ConfigBlob)) -> Self {
        let config = blob.config;
        Self {
            digest,
            exposed_ports: config
                .exposed_ports
                .map(|p| p.into_keys().collect())
                .unwrap_or_default(),
            env: config.env.unwrap_or_default(),
            labels: config.labels.unwrap_or_default(),
        }
    }
}

/// `Bearer` challenge of a `WWW-Authenticate` header.
#[derive(Debug, PartialEq, Eq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

impl BearerChallenge {
    fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let (mut realm, mut service, mut scope) = (None, None, None);
        for caps in CHALLENGE_PARAM.captures_iter(params) {
            let value = Some(caps[2].to_string());
            match &caps[1] {
                "realm" => realm = value,
                "service" => service = value,
                "scope" => scope = value,
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            service,
            scope,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Pick the linux/amd64 entry of a manifest list, or the first entry.
fn select_platform(manifests: &[PlatformDescriptor]) -> Option<&str> {
    manifests
        .iter()
        .find(|m| {
            m.platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == "amd64")
        })
        .or_else(|| manifests.first())
        .map(|m| m.digest.as_str())
}

/// Registry client speaking the distribution API over HTTP.
pub struct HttpRegistryClient {
    http: reqwest::Client,
    base_url: String,
    host: String,
}

impl HttpRegistryClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let url = url::Url::parse(base_url)
            .map_err(|e| Error::validation("registry", format!("{}: {}", base_url, e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(Error::validation("registry", format!("{} has no host", base_url))),
        };

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            host,
        })
    }

    fn transient(&self, err: impl std::fmt::Display) -> Error {
        Error::ResolverTransient(format!("registry {}: {}", self.host, err))
    }

    async fn request(&self, url: &str, accept: Option<&str>, token: Option<&str>) -> Result<Response> {
        let mut request = self.http.get(url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.map_err(|e| self.transient(e))
    }

    /// GET `url`, answering a bearer challenge once with an anonymous token.
    ///
    /// A token obtained here is stored in `token` and sent on later calls.
    async fn send(&self, url: &str, accept: Option<&str>, token: &mut Option<String>) -> Result<Response> {
        let response = self.request(url, accept, token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED || token.is_some() {
            return Ok(response);
        }

        let Some(challenge) = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(BearerChallenge::parse)
        else {
            return Ok(response);
        };
        let Some(fresh) = self.fetch_token(&challenge).await? else {
            return Ok(response);
        };

        let retried = self.request(url, accept, Some(&fresh)).await?;
        *token = Some(fresh);
        Ok(retried)
    }

    /// Anonymous token for a challenge. `Ok(None)` when the realm refuses one.
    async fn fetch_token(&self, challenge: &BearerChallenge) -> Result<Option<String>> {
        let mut url = url::Url::parse(&challenge.realm).map_err(|e| self.transient(e))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            if let Some(scope) = &challenge.scope {
                query.append_pair("scope", scope);
            }
        }

        debug!(realm = %challenge.realm, scope = ?challenge.scope, "Requesting anonymous registry token");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transient(e))?;
        if !response.status().is_success() {
            debug!(realm = %challenge.realm, status = %response.status(), "Token request refused");
            return Ok(None);
        }

        let body = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| self.transient(e))?;
        Ok(body.token.or(body.access_token))
    }

    /// Fetch a manifest. `Ok(None)` when the registry does not serve it.
    async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
        token: &mut Option<String>,
    ) -> Result<Option<(Option<String>, Manifest)>> {
        let url = format!("{}/v2/{}/manifests/{}", self.base_url, repository, reference);
        let response = self.send(&url, Some(MANIFEST_ACCEPT), token).await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                debug!(url = %url, status = %response.status(), "Manifest not available");
                return Ok(None);
            }
            status => {
                return Err(Error::ResolverTransient(format!(
                    "registry {} answered {}",
                    self.host, status
                )));
            }
        }

        let digest = response
            .headers()
            .get("docker-content-digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let manifest = response
            .json::<Manifest>()
            .await
            .map_err(|e| self.transient(e))?;

        Ok(Some((digest, manifest)))
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn fetch_image(&self, repository: &str, reference: &str) -> Result<Option<RegistryImage>> {
        let mut token = None;
        let Some((mut digest, mut manifest)) =
            self.get_manifest(repository, reference, &mut token).await?
        else {
            return Ok(None);
        };

        if let Some(entries) = manifest.manifests.as_deref() {
            let Some(platform_digest) = select_platform(entries).map(str::to_string) else {
                return Ok(None);
            };
            let Some((_, resolved)) = self
                .get_manifest(repository, &platform_digest, &mut token)
                .await?
            else {
                return Ok(None);
            };
            digest = Some(platform_digest);
            manifest = resolved;
        }

        let Some(config) = manifest.config else {
            return Ok(Some(RegistryImage {
                digest,
                ..Default::default()
            }));
        };

        let url = format!("{}/v2/{}/blobs/{}", self.base_url, repository, config.digest);
        let response = self
            .send(&url, None, &mut token)
            .await?
            .error_for_status()
            .map_err(|e| self.transient(e))?;
        let blob = response
            .json::<ConfigBlob>()
            .await
            .map_err(|e| self.transient(e))?;

        Ok(Some((digest, blob).into()))
    }
}
