//! In-memory cluster used by the unit tests
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use http::StatusCode;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::{
    document::{ResourceDocument, TypeRef},
    resolver::{ApiResponse, Resolution, ResourceHandle, ResourceResolver, Verb},
    source::{FetchedManifest, ManifestProvider, ReleaseRef},
    Error, ManifestSource, Result,
};

type ObjectKey = (String, String, String, String);

#[derive(Default)]
struct State {
    // remaining resolution attempts that still report the type as unknown
    types: HashMap<TypeRef, usize>,
    objects: BTreeMap<ObjectKey, ResourceDocument>,
    resolutions: HashMap<TypeRef, usize>,
    calls: Vec<String>,
    next_get: Option<StatusCode>,
    next_post: Option<StatusCode>,
    next_put: Option<StatusCode>,
    version: u64,
}

/// A fake api server holding objects in memory
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn with_types(types: &[(&str, &str)]) -> Self {
        let cluster = Self::default();
        for (api_version, kind) in types {
            cluster.register(api_version, kind);
        }
        cluster
    }

    pub fn register(&self, api_version: &str, kind: &str) {
        self.register_after(api_version, kind, 0);
    }

    /// Register a type that only resolves after `attempts` failed resolutions
    pub fn register_after(&self, api_version: &str, kind: &str, attempts: usize) {
        self.state
            .lock()
            .types
            .insert(TypeRef::new(api_version, kind), attempts);
    }

    pub fn handle(&self, api_version: &str, kind: &str) -> FakeHandle {
        FakeHandle {
            state: self.state.clone(),
            type_ref: TypeRef::new(api_version, kind),
            verb: Verb::Update,
        }
    }

    pub fn object(&self, api_version: &str, kind: &str, ns: &str, name: &str) -> Option<ResourceDocument> {
        let key = (api_version.into(), kind.into(), ns.into(), name.into());
        self.state.lock().objects.get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn resolutions(&self, type_ref: &TypeRef) -> usize {
        self.state.lock().resolutions.get(type_ref).copied().unwrap_or(0)
    }

    pub fn fail_next_get(&self, status: StatusCode) {
        self.state.lock().next_get = Some(status);
    }

    pub fn fail_next_post(&self, status: StatusCode) {
        self.state.lock().next_post = Some(status);
    }

    pub fn fail_next_put(&self, status: StatusCode) {
        self.state.lock().next_put = Some(status);
    }
}

#[async_trait]
impl ResourceResolver for FakeCluster {
    type Handle = FakeHandle;

    async fn resolve(&self, type_ref: &TypeRef, verb: Verb) -> Result<Resolution<FakeHandle>> {
        let mut state = self.state.lock();
        *state.resolutions.entry(type_ref.clone()).or_default() += 1;
        match state.types.get_mut(type_ref) {
            Some(0) => Ok(Resolution::Resolved(FakeHandle {
                state: self.state.clone(),
                type_ref: type_ref.clone(),
                verb,
            })),
            Some(remaining) => {
                *remaining -= 1;
                Ok(Resolution::Unresolved)
            }
            None => Ok(Resolution::Unresolved),
        }
    }
}

pub struct FakeHandle {
    state: Arc<Mutex<State>>,
    type_ref: TypeRef,
    verb: Verb,
}

impl FakeHandle {
    fn plural(&self) -> String {
        format!("{}s", self.type_ref.kind.to_lowercase())
    }

    fn key(&self, name: &str, namespace: Option<&str>) -> ObjectKey {
        (
            self.type_ref.api_version.clone(),
            self.type_ref.kind.clone(),
            namespace.unwrap_or_default().into(),
            name.into(),
        )
    }

    fn status(status: StatusCode, reason: &str, message: String) -> ApiResponse {
        ApiResponse::new(
            status,
            json!({
                "kind": "Status",
                "apiVersion": "v1",
                "status": "Failure",
                "reason": reason,
                "message": message,
                "code": status.as_u16(),
            }),
        )
    }

    fn injected(status: StatusCode) -> ApiResponse {
        Self::status(status, "Injected", "injected failure".into())
    }
}

#[async_trait]
impl ResourceHandle for FakeHandle {
    fn type_ref(&self) -> &TypeRef {
        &self.type_ref
    }

    fn verb(&self) -> Verb {
        self.verb
    }

    fn uri(&self, name: &str, namespace: Option<&str>) -> String {
        let base = if self.type_ref.api_version.contains('/') {
            format!("/apis/{}", self.type_ref.api_version)
        } else {
            format!("/api/{}", self.type_ref.api_version)
        };
        match namespace {
            Some(ns) => format!("{base}/namespaces/{ns}/{}/{name}", self.plural()),
            None => format!("{base}/{}/{name}", self.plural()),
        }
    }

    async fn get(&self, name: &str, namespace: Option<&str>) -> Result<ApiResponse> {
        let uri = self.uri(name, namespace);
        let mut state = self.state.lock();
        state.calls.push(format!("GET {uri}"));
        if let Some(status) = state.next_get.take() {
            return Ok(Self::injected(status));
        }
        Ok(match state.objects.get(&self.key(name, namespace)) {
            Some(obj) => ApiResponse::new(StatusCode::OK, obj.clone().into_value()),
            None => Self::status(
                StatusCode::NOT_FOUND,
                "NotFound",
                format!("{} \"{name}\" not found", self.plural()),
            ),
        })
    }

    async fn post(&self, doc: &ResourceDocument) -> Result<ApiResponse> {
        let name = doc.name().ok_or_else(|| Error::InvalidDocument("nameless".into()))?;
        let uri = self.uri(name, doc.namespace());
        let mut state = self.state.lock();
        state.calls.push(format!("POST {uri}"));
        if let Some(status) = state.next_post.take() {
            return Ok(Self::injected(status));
        }
        let key = self.key(name, doc.namespace());
        if state.objects.contains_key(&key) {
            return Ok(Self::status(
                StatusCode::CONFLICT,
                "AlreadyExists",
                format!("{} \"{name}\" already exists", self.plural()),
            ));
        }
        state.version += 1;
        let mut stored = doc.clone();
        stored.set_resource_version(state.version.to_string());
        state.objects.insert(key, stored.clone());
        Ok(ApiResponse::new(StatusCode::CREATED, stored.into_value()))
    }

    async fn put(&self, doc: &ResourceDocument) -> Result<ApiResponse> {
        let name = doc.name().ok_or_else(|| Error::InvalidDocument("nameless".into()))?;
        let uri = self.uri(name, doc.namespace());
        let mut state = self.state.lock();
        state.calls.push(format!(
            "PUT {uri} rv={}",
            doc.resource_version().unwrap_or_default()
        ));
        if let Some(status) = state.next_put.take() {
            return Ok(Self::injected(status));
        }
        let key = self.key(name, doc.namespace());
        let live_version = match state.objects.get(&key) {
            Some(live) => live.resource_version().map(String::from),
            None => {
                return Ok(Self::status(
                    StatusCode::NOT_FOUND,
                    "NotFound",
                    format!("{} \"{name}\" not found", self.plural()),
                ))
            }
        };
        if live_version.as_deref() != doc.resource_version() {
            return Ok(Self::status(
                StatusCode::CONFLICT,
                "Conflict",
                "the object has been modified".into(),
            ));
        }
        state.version += 1;
        let mut stored = doc.clone();
        stored.set_resource_version(state.version.to_string());
        state.objects.insert(key, stored.clone());
        Ok(ApiResponse::new(StatusCode::OK, stored.into_value()))
    }
}

/// Serves fixed manifests by release name; names without an entry fail to fetch
#[derive(Default)]
pub struct StaticProvider {
    manifests: HashMap<String, Value>,
}

impl StaticProvider {
    pub fn with(mut self, name: &str, manifest: Value) -> Self {
        self.manifests.insert(name.into(), manifest);
        self
    }
}

#[async_trait]
impl ManifestProvider for StaticProvider {
    async fn fetch(&self, release: &ReleaseRef) -> Result<FetchedManifest> {
        let uri = release.uri();
        match self.manifests.get(&release.name) {
            Some(manifest) => Ok(FetchedManifest {
                uri,
                source: ManifestSource::from(manifest.clone()),
            }),
            None => Err(Error::FetchStatus {
                uri,
                status: StatusCode::NOT_FOUND,
            }),
        }
    }
}
