//! Sub-resource descriptors: the resource handle a fetch attempt clones, the
//! endpoint key requests are throttled under, and the declarative manifest
//! the composite unit is built from.

use crate::content::factory::GroupMetadata;
use crate::transport::request::ContentRequest;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::sync::Arc;

/// Throttling group for one destination: lowercase `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey(String);

impl EndpointKey {
    /// Derives the key from an absolute http(s) URL, filling in the scheme's
    /// default port when the authority does not carry one.
    pub fn from_url(url: &str) -> Result<Self> {
        let (rest, default_port) = if let Some(rest) = url.strip_prefix("https://") {
            (rest, 443u16)
        } else if let Some(rest) = url.strip_prefix("http://") {
            (rest, 80u16)
        } else {
            bail!("unsupported url scheme: {url}");
        };

        let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let authority = &rest[..end];
        if authority.is_empty() {
            bail!("url has no host: {url}");
        }

        let key = if authority.contains(':') {
            authority.to_ascii_lowercase()
        } else {
            format!("{}:{default_port}", authority.to_ascii_lowercase())
        };
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Addressable resource plus the per-request throttling bookkeeping the
/// transport mutates while fetching it.
///
/// The bookkeeping must not be shared between attempts (or between other
/// uses of the same logical resource), so schedulers take a fresh copy via
/// [`ResourceHandle::clone_for_attempt`] before every fetch.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    url: String,
    endpoint: EndpointKey,
    retries_taken: u32,
}

impl ResourceHandle {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let endpoint = EndpointKey::from_url(&url)?;
        Ok(Self {
            url,
            endpoint,
            retries_taken: 0,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn endpoint(&self) -> &EndpointKey {
        &self.endpoint
    }

    /// Fresh copy for one fetch attempt; request-scoped bookkeeping starts
    /// clean.
    pub fn clone_for_attempt(&self) -> Self {
        Self {
            retries_taken: 0,
            ..self.clone()
        }
    }

    /// Resolves `uri` against this resource: absolute URLs pass through,
    /// `/`-rooted paths replace the base path, anything else is joined onto
    /// the base directory.
    pub fn derive(&self, uri: &str) -> Result<Self> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Self::new(uri);
        }

        let scheme_end = self
            .url
            .find("://")
            .map(|idx| idx + 3)
            .unwrap_or(self.url.len());
        let (origin_and_path, _) = split_query(&self.url);

        if let Some(rooted) = uri.strip_prefix('/') {
            let authority_end = origin_and_path[scheme_end..]
                .find('/')
                .map(|idx| scheme_end + idx)
                .unwrap_or(origin_and_path.len());
            return Self::new(format!("{}/{rooted}", &origin_and_path[..authority_end]));
        }

        let directory_end = origin_and_path[scheme_end..]
            .rfind('/')
            .map(|idx| scheme_end + idx)
            .unwrap_or(origin_and_path.len());
        Self::new(format!("{}/{uri}", &origin_and_path[..directory_end]))
    }

    pub fn retries_taken(&self) -> u32 {
        self.retries_taken
    }

    pub(crate) fn note_retry(&mut self) {
        self.retries_taken = self.retries_taken.saturating_add(1);
    }
}

fn split_query(url: &str) -> (&str, &str) {
    match url.find(['?', '#']) {
        Some(idx) => (&url[..idx], &url[idx..]),
        None => (url, ""),
    }
}

/// Declarative description of one composite content unit.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentManifest {
    pub contents: Vec<ContentEntry>,
}

impl ContentManifest {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let manifest: Self =
            serde_json::from_slice(bytes).context("failed to parse content manifest")?;
        if manifest.contents.is_empty() {
            bail!("content manifest lists no contents");
        }
        Ok(manifest)
    }
}

/// One manifest entry: where to fetch the payload and which metadata group
/// the materialized content belongs to.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentEntry {
    pub uri: String,
    #[serde(default)]
    pub group: Option<GroupMetadata>,
}

/// Per-item record held by the composite unit: the resource to fetch, its
/// metadata group, and the in-flight request handle (absent until the item
/// is scheduled, cleared again on cancellation).
#[derive(Debug)]
pub struct SubResource {
    resource: ResourceHandle,
    group: Option<GroupMetadata>,
    request: Option<Arc<ContentRequest>>,
}

impl SubResource {
    pub fn new(resource: ResourceHandle) -> Self {
        Self {
            resource,
            group: None,
            request: None,
        }
    }

    pub fn with_group(mut self, group: GroupMetadata) -> Self {
        self.group = Some(group);
        self
    }

    pub fn resource(&self) -> &ResourceHandle {
        &self.resource
    }

    pub fn group(&self) -> Option<&GroupMetadata> {
        self.group.as_ref()
    }

    pub fn request(&self) -> Option<&Arc<ContentRequest>> {
        self.request.as_ref()
    }

    pub(crate) fn attach_request(&mut self, request: Arc<ContentRequest>) {
        self.request = Some(request);
    }

    pub(crate) fn clear_request(&mut self) {
        self.request = None;
    }
}
