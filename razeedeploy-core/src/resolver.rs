//! The resource type resolution contract consumed by the engine
//!
//! A [`ResourceResolver`] turns `{apiVersion, kind, verb}` into a
//! [`ResourceHandle`] that can address and write objects of that type.
//! Handles are short lived: the engine resolves afresh for every apply, so
//! types registered (or removed) during a run are picked up.
use async_trait::async_trait;
use http::StatusCode;
use serde_json::Value;

use crate::{
    document::{ResourceDocument, TypeRef},
    Result,
};

/// The operation a handle is resolved for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Read a single object
    Get,
    /// Create an object
    Post,
    /// Replace an object
    Put,
    /// Replace an object (kubernetes' name for `Put`)
    Update,
}

impl Verb {
    /// The verb as it appears in api discovery documents
    pub fn as_discovery_verb(self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::Post => "create",
            Verb::Put | Verb::Update => "update",
        }
    }
}

/// Result of a resolution attempt
///
/// An unknown type is an expected answer (e.g. a CRD that was installed a
/// moment ago and is not served yet), so it is a value rather than an error.
#[derive(Debug)]
pub enum Resolution<H> {
    /// The type is served by the api server
    Resolved(H),
    /// The type is not (yet) known to the api server
    Unresolved,
}

impl<H> Resolution<H> {
    /// Convert into an `Option`, dropping the distinction into `None`
    pub fn into_option(self) -> Option<H> {
        match self {
            Resolution::Resolved(h) => Some(h),
            Resolution::Unresolved => None,
        }
    }
}

/// Raw answer from the api server
///
/// Handles never turn non-2xx statuses into errors; callers branch on `status`.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    /// Http status of the response
    pub status: StatusCode,
    /// Decoded body; an object on success, a `Status` on failure
    pub body: Value,
}

impl ApiResponse {
    /// Construct from a status and body
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }

    /// `metadata.resourceVersion` of a returned object
    pub fn resource_version(&self) -> Option<&str> {
        self.body.get("metadata")?.get("resourceVersion")?.as_str()
    }

    /// `reason` of a returned `Status`, e.g. `AlreadyExists`
    pub fn reason(&self) -> Option<&str> {
        self.body.get("reason")?.as_str()
    }

    /// `message` of a returned `Status`
    pub fn message(&self) -> Option<&str> {
        self.body.get("message")?.as_str()
    }
}

/// A resolved resource type able to address and write objects
#[async_trait]
pub trait ResourceHandle: Send + Sync {
    /// The type this handle was resolved for
    fn type_ref(&self) -> &TypeRef;

    /// The verb this handle was resolved for
    fn verb(&self) -> Verb;

    /// Canonical url path of a named object
    ///
    /// The namespace is ignored for cluster scoped types.
    fn uri(&self, name: &str, namespace: Option<&str>) -> String;

    /// Url path of the status subresource of a named object
    fn status_uri(&self, name: &str, namespace: Option<&str>) -> String {
        format!("{}/status", self.uri(name, namespace))
    }

    /// Read a named object
    async fn get(&self, name: &str, namespace: Option<&str>) -> Result<ApiResponse>;

    /// Create an object
    async fn post(&self, doc: &ResourceDocument) -> Result<ApiResponse>;

    /// Replace an object; `metadata.resourceVersion` must be current
    async fn put(&self, doc: &ResourceDocument) -> Result<ApiResponse>;
}

/// Resolves resource types into [`ResourceHandle`]s
#[async_trait]
pub trait ResourceResolver: Send + Sync {
    /// The handle type produced
    type Handle: ResourceHandle;

    /// Resolve `type_ref` for `verb`
    ///
    /// Returns [`Resolution::Unresolved`] when the type is not served.
    /// Errors are reserved for failures to talk to the api server at all.
    async fn resolve(&self, type_ref: &TypeRef, verb: Verb) -> Result<Resolution<Self::Handle>>;
}
