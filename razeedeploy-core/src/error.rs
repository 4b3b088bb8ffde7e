//! Error handling in [`razeedeploy_core`][crate]
use http::StatusCode;
use thiserror::Error;

/// Possible errors when reconciling manifests
///
/// Most of these are scoped to a single resource or a single entry.
/// The [`Reconciler`](crate::Reconciler) records them and moves on.
#[derive(Error, Debug)]
pub enum Error {
    /// The api server answered with a status outside of the expected set
    ///
    /// A `409 Conflict` on a replace lands here as well; the whole
    /// get-then-write sequence is not retried.
    #[error("ApiError: {status} {body}")]
    Api {
        /// Status code returned by the api server
        status: StatusCode,
        /// Response body, usually a `Status` object
        body: serde_json::Value,
    },

    /// Transport or client failure talking to the api server
    #[error("KubeError: {0}")]
    Kube(#[source] kube::Error),

    /// The resolver could not map `{apiVersion, kind}` to an endpoint
    #[error("unknown resource type: {api_version} {kind}")]
    UnknownResourceType {
        /// apiVersion of the rejected document
        api_version: String,
        /// kind of the rejected document
        kind: String,
    },

    /// The readiness waiter gave up on a resource type
    #[error("Failed to find {api_version} {kind} after {attempts} attempts")]
    TypeNotReady {
        /// apiVersion that never became resolvable
        api_version: String,
        /// kind that never became resolvable
        kind: String,
        /// Number of resolution attempts made
        attempts: u32,
    },

    /// A manifest could not be downloaded
    #[error("Failed to download {uri}: {source}")]
    Fetch {
        /// The uri that was requested last
        uri: String,
        /// Underlying http failure
        #[source]
        source: reqwest::Error,
    },

    /// A manifest download answered with a non-success status
    #[error("Failed to download {uri}: status {status}")]
    FetchStatus {
        /// The uri that was requested last
        uri: String,
        /// Status code of the response
        status: StatusCode,
    },

    /// A manifest body was not valid yaml
    #[error("Failed to parse manifest yaml: {0}")]
    ParseYaml(#[source] serde_yaml::Error),

    /// A release entry was run without a [`ManifestProvider`](crate::ManifestProvider)
    #[error("no manifest provider configured for {0}")]
    MissingProvider(String),

    /// A document lacks a field the api requires
    #[error("invalid document {0}")]
    InvalidDocument(String),

    /// Serializing a document for the api server failed
    #[error("Error serializing document: {0}")]
    SerdeError(#[source] serde_json::Error),

    /// The run was aborted through its cancellation token
    #[error("reconciliation cancelled")]
    Cancelled,
}

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Error::Kube(e)
    }
}
