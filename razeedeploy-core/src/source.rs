//! Fetching and parsing of manifest sources
//!
//! Components are published as `resource.yaml` release assets. A
//! [`ReleaseRef`] names one such asset, and a [`ManifestProvider`] turns
//! it into a parsed [`ManifestSource`].
use std::{fmt, future::Future, str::FromStr};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{decompose::ManifestSource, Error, Result};

/// Placeholder in release uri templates replaced by the version path
pub const VERSION_PLACEHOLDER: &str = "{{install_version}}";

/// Requested version of a release
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Version {
    /// The most recent release
    #[default]
    Latest,
    /// A concrete release tag
    Tag(String),
}

impl Version {
    /// Path segment selecting this version in a release download url
    pub fn download_path(&self) -> String {
        match self {
            Version::Latest => "latest/download".into(),
            Version::Tag(tag) => format!("download/{tag}"),
        }
    }
}

impl FromStr for Version {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("latest") {
            Ok(Version::Latest)
        } else {
            Ok(Version::Tag(s.to_string()))
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Latest => f.write_str("latest"),
            Version::Tag(tag) => f.write_str(tag),
        }
    }
}

/// A release asset holding manifests for one component
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseRef {
    /// Logical component name, e.g. `remoteresource`
    pub name: String,
    /// Download url containing [`VERSION_PLACEHOLDER`]
    pub uri_template: String,
    /// Requested version
    pub version: Version,
}

impl ReleaseRef {
    /// Construct a release reference
    pub fn new(name: impl Into<String>, uri_template: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            uri_template: uri_template.into(),
            version,
        }
    }

    /// Url for the requested version
    pub fn uri(&self) -> String {
        self.uri_for(&self.version)
    }

    /// Url for the latest release
    pub fn latest_uri(&self) -> String {
        self.uri_for(&Version::Latest)
    }

    fn uri_for(&self, version: &Version) -> String {
        self.uri_template
            .replace(VERSION_PLACEHOLDER, &version.download_path())
    }
}

/// Parsed manifests plus the url that actually served them
#[derive(Clone, Debug, PartialEq)]
pub struct FetchedManifest {
    /// The url the content came from; differs from [`ReleaseRef::uri`] after a fallback
    pub uri: String,
    /// The parsed manifest tree
    pub source: ManifestSource,
}

/// Turns release references into parsed manifests
#[async_trait]
pub trait ManifestProvider: Send + Sync {
    /// Fetch and parse `release`
    ///
    /// When a tagged version cannot be fetched, implementations fall back to
    /// the latest release and report the url used. Empty content is never
    /// returned silently in place of a failure.
    async fn fetch(&self, release: &ReleaseRef) -> Result<FetchedManifest>;
}

/// Parse a multi-document yaml stream into a manifest tree
///
/// Each `---` separated document becomes one element of a
/// [`ManifestSource::Sequence`]; empty documents decompose to nothing.
pub fn parse_documents(yaml: &str) -> Result<ManifestSource> {
    let mut docs = vec![];
    for de in serde_yaml::Deserializer::from_str(yaml) {
        docs.push(Value::deserialize(de).map_err(Error::ParseYaml)?);
    }
    Ok(ManifestSource::Sequence(docs))
}

/// Download `release` with `get`, falling back to the latest release on failure
pub(crate) async fn fetch_with_fallback<F, Fut>(release: &ReleaseRef, mut get: F) -> Result<FetchedManifest>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let uri = release.uri();
    info!("Downloading {uri}");
    let (uri, body) = match get(uri.clone()).await {
        Ok(body) => (uri, body),
        Err(e) if release.version != Version::Latest => {
            let latest = release.latest_uri();
            warn!(error = %e, "Failed to download {uri}.. defaulting to {latest}");
            let body = get(latest.clone()).await?;
            (latest, body)
        }
        Err(e) => return Err(e),
    };
    Ok(FetchedManifest {
        source: parse_documents(&body)?,
        uri,
    })
}

/// Fetches release assets over http(s)
#[derive(Clone, Debug, Default)]
pub struct HttpProvider {
    client: reqwest::Client,
}

impl HttpProvider {
    /// Create a provider with a default http client
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider using a preconfigured http client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn get(&self, uri: String) -> Result<String> {
        let res = self.client.get(&uri).send().await.map_err(|source| Error::Fetch {
            uri: uri.clone(),
            source,
        })?;
        let status = res.status();
        if !status.is_success() {
            return Err(Error::FetchStatus { uri, status });
        }
        res.text().await.map_err(|source| Error::Fetch { uri, source })
    }
}

#[async_trait]
impl ManifestProvider for HttpProvider {
    async fn fetch(&self, release: &ReleaseRef) -> Result<FetchedManifest> {
        fetch_with_fallback(release, |uri| self.get(uri)).await
    }
}
