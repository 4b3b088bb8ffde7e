//! Resource documents and the identifiers derived from them
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single resource object ready to be applied
///
/// Only `apiVersion`, `kind` and `metadata` are ever inspected. Everything
/// else (spec, data, status) is carried through untouched.
///
/// A document parsed from a manifest has no `metadata.resourceVersion`,
/// and may lack a namespace until [`Applier`](crate::Applier) defaults it.
/// A document read back from the cluster carries the live `resourceVersion`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceDocument(Map<String, Value>);

impl ResourceDocument {
    /// Wrap a json object
    pub fn new(object: Map<String, Value>) -> Self {
        Self(object)
    }

    /// The `apiVersion` field, if it is a string
    pub fn api_version(&self) -> Option<&str> {
        self.0.get("apiVersion").and_then(Value::as_str)
    }

    /// The `kind` field, if it is a string
    pub fn kind(&self) -> Option<&str> {
        self.0.get("kind").and_then(Value::as_str)
    }

    /// `metadata.name`
    pub fn name(&self) -> Option<&str> {
        self.metadata_str("name")
    }

    /// `metadata.namespace`
    pub fn namespace(&self) -> Option<&str> {
        self.metadata_str("namespace")
    }

    /// `metadata.resourceVersion`
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata_str("resourceVersion")
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.0.get("metadata")?.get(key)?.as_str()
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        let metadata = self
            .0
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !metadata.is_object() {
            *metadata = Value::Object(Map::new());
        }
        match metadata {
            Value::Object(map) => map,
            _ => unreachable!("metadata was just replaced by an object"),
        }
    }

    /// Set `metadata.namespace` unless the document already has one
    ///
    /// Returns whether the namespace was filled in.
    pub fn default_namespace(&mut self, namespace: &str) -> bool {
        if self.namespace().is_some() {
            return false;
        }
        self.metadata_mut()
            .insert("namespace".into(), Value::String(namespace.into()));
        true
    }

    /// Overwrite `metadata.resourceVersion`
    pub fn set_resource_version(&mut self, version: impl Into<String>) {
        self.metadata_mut()
            .insert("resourceVersion".into(), Value::String(version.into()));
    }

    /// The `{apiVersion, kind}` pair this document dispatches on
    pub fn type_ref(&self) -> Option<TypeRef> {
        Some(TypeRef::new(self.api_version()?, self.kind()?))
    }

    /// Identity of this document for outcome reporting
    pub fn id(&self) -> ResourceId {
        ResourceId {
            api_version: self.api_version().unwrap_or_default().into(),
            kind: self.kind().unwrap_or_default().into(),
            namespace: self.namespace().map(String::from),
            name: self.name().unwrap_or_default().into(),
        }
    }

    /// Borrow the underlying json object
    pub fn as_object(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into a json value
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for ResourceDocument {
    fn from(object: Map<String, Value>) -> Self {
        Self(object)
    }
}

/// A resource type: the `{apiVersion, kind}` pair selecting an api endpoint
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeRef {
    /// apiVersion, e.g. `apps/v1` or `v1`
    pub api_version: String,
    /// kind, e.g. `Deployment`
    pub kind: String,
}

impl TypeRef {
    /// Construct from an apiVersion and kind
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.api_version, self.kind)
    }
}

/// Identity of a single resource in an [`ApplyOutcome`](crate::ApplyOutcome)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId {
    /// apiVersion of the resource
    pub api_version: String,
    /// kind of the resource
    pub kind: String,
    /// namespace after defaulting, if any
    pub namespace: Option<String>,
    /// `metadata.name`, empty when the document had none
    pub name: String,
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ kind: {}, apiVersion: {}, name: {}, namespace: {} }}",
            self.kind,
            self.api_version,
            self.name,
            self.namespace.as_deref().unwrap_or_default()
        )
    }
}
