//! Resource type resolution backed by kubernetes api discovery
//!
//! [`KubeResolver`] runs a single-kind discovery query per resolution
//! (see [`kube::discovery::pinned_kind`]) and deliberately caches nothing,
//! so a CRD registered halfway through a run becomes visible to the next apply.
use async_trait::async_trait;
use http::StatusCode;
use kube::{
    api::{Api, DynamicObject, PostParams},
    core::{GroupVersion, GroupVersionKind},
    discovery::{self, ApiCapabilities, ApiResource, Scope},
    Client,
};
use serde_json::Value;
use tracing::debug;

use crate::{
    document::{ResourceDocument, TypeRef},
    resolver::{ApiResponse, Resolution, ResourceHandle, ResourceResolver, Verb},
    Error, Result,
};

/// Resolves resource types against a live api server
#[derive(Clone)]
pub struct KubeResolver {
    client: Client,
}

impl KubeResolver {
    /// Create a resolver using `client` for discovery and all later requests
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceResolver for KubeResolver {
    type Handle = KubeHandle;

    async fn resolve(&self, type_ref: &TypeRef, verb: Verb) -> Result<Resolution<KubeHandle>> {
        let Ok(gv) = type_ref.api_version.parse::<GroupVersion>() else {
            debug!(api_version = %type_ref.api_version, "unparseable apiVersion");
            return Ok(Resolution::Unresolved);
        };
        let gvk = GroupVersionKind::gvk(&gv.group, &gv.version, &type_ref.kind);
        match discovery::pinned_kind(&self.client, &gvk).await {
            Ok((resource, caps)) => {
                if !caps.supports_operation(verb.as_discovery_verb()) {
                    debug!(%type_ref, ?verb, "resource type does not support verb");
                    return Ok(Resolution::Unresolved);
                }
                Ok(Resolution::Resolved(KubeHandle {
                    client: self.client.clone(),
                    type_ref: type_ref.clone(),
                    verb,
                    resource,
                    caps,
                }))
            }
            Err(kube::Error::Discovery(e)) => {
                debug!(%type_ref, error = %e, "resource type not discovered");
                Ok(Resolution::Unresolved)
            }
            // group/version not served (yet)
            Err(kube::Error::Api(e)) if e.code == StatusCode::NOT_FOUND.as_u16() => {
                debug!(%type_ref, "resource group not served");
                Ok(Resolution::Unresolved)
            }
            Err(e) => Err(Error::Kube(e)),
        }
    }
}

/// A resolved resource type on a live api server
#[derive(Clone)]
pub struct KubeHandle {
    client: Client,
    type_ref: TypeRef,
    verb: Verb,
    resource: ApiResource,
    caps: ApiCapabilities,
}

impl KubeHandle {
    fn api(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if self.caps.scope == Scope::Namespaced => {
                Api::namespaced_with(self.client.clone(), ns, &self.resource)
            }
            _ => Api::all_with(self.client.clone(), &self.resource),
        }
    }

    fn object(doc: &ResourceDocument) -> Result<(String, DynamicObject)> {
        let name = doc
            .name()
            .ok_or_else(|| Error::InvalidDocument(format!("{} has no metadata.name", doc.id())))?
            .to_string();
        let obj = serde_json::from_value(doc.clone().into_value()).map_err(Error::SerdeError)?;
        Ok((name, obj))
    }
}

/// Turn a typed kube result back into a raw status + body
fn into_response(res: kube::Result<DynamicObject>, ok: StatusCode) -> Result<ApiResponse> {
    match res {
        Ok(obj) => Ok(ApiResponse::new(
            ok,
            serde_json::to_value(obj).map_err(Error::SerdeError)?,
        )),
        Err(kube::Error::Api(e)) => {
            let status =
                StatusCode::from_u16(e.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let body = serde_json::to_value(&e).unwrap_or(Value::Null);
            Ok(ApiResponse::new(status, body))
        }
        Err(e) => Err(Error::Kube(e)),
    }
}

#[async_trait]
impl ResourceHandle for KubeHandle {
    fn type_ref(&self) -> &TypeRef {
        &self.type_ref
    }

    fn verb(&self) -> Verb {
        self.verb
    }

    fn uri(&self, name: &str, namespace: Option<&str>) -> String {
        format!("{}/{}", self.api(namespace).resource_url(), name)
    }

    async fn get(&self, name: &str, namespace: Option<&str>) -> Result<ApiResponse> {
        into_response(self.api(namespace).get(name).await, StatusCode::OK)
    }

    async fn post(&self, doc: &ResourceDocument) -> Result<ApiResponse> {
        let (_, obj) = Self::object(doc)?;
        let res = self
            .api(doc.namespace())
            .create(&PostParams::default(), &obj)
            .await;
        into_response(res, StatusCode::CREATED)
    }

    async fn put(&self, doc: &ResourceDocument) -> Result<ApiResponse> {
        let (name, obj) = Self::object(doc)?;
        let res = self
            .api(doc.namespace())
            .replace(&name, &PostParams::default(), &obj)
            .await;
        into_response(res, StatusCode::OK)
    }
}
