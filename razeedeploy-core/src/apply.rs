//! Create-or-update of single resources
//!
//! Two policies are offered, picked per [`Entry`](crate::Entry):
//!
//! - [`ApplyPolicy::Replace`]: read the live object, then `PUT` it with the
//!   freshly read `resourceVersion`, or `POST` it when absent.
//! - [`ApplyPolicy::CreateSkipExisting`]: `POST` blindly, and treat
//!   `409 AlreadyExists` as a successful no-op.
use std::fmt;

use http::StatusCode;
use tracing::{error, info};

use crate::{
    document::{ResourceDocument, ResourceId},
    resolver::{ResourceHandle, ResourceResolver, Resolution, Verb},
    Error, Result,
};

/// How a document is written to the cluster
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ApplyPolicy {
    /// Upsert, attaching the live `resourceVersion` before replacing
    #[default]
    Replace,
    /// Create only, skipping objects that already exist
    CreateSkipExisting,
}

impl ApplyPolicy {
    /// The verb handles must be resolved for under this policy
    pub fn verb(self) -> Verb {
        match self {
            ApplyPolicy::Replace => Verb::Update,
            ApplyPolicy::CreateSkipExisting => Verb::Post,
        }
    }
}

/// What happened to a single resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyAction {
    /// Created through `POST`
    Created,
    /// Replaced through `PUT`
    Updated,
    /// Already present, left alone
    AlreadySkipped,
    /// Not applied; see [`ApplyOutcome::error`]
    Failed,
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplyAction::Created => "created",
            ApplyAction::Updated => "updated",
            ApplyAction::AlreadySkipped => "skipped",
            ApplyAction::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Record of applying one [`ResourceDocument`]
#[derive(Clone, Debug, PartialEq)]
pub struct ApplyOutcome {
    /// Which resource this is about
    pub resource: ResourceId,
    /// What happened
    pub action: ApplyAction,
    /// Status of the last api call made, if any was made
    pub status: Option<StatusCode>,
    /// Failure detail for [`ApplyAction::Failed`]
    pub error: Option<String>,
}

impl ApplyOutcome {
    fn succeeded(resource: ResourceId, action: ApplyAction, status: StatusCode) -> Self {
        Self {
            resource,
            action,
            status: Some(status),
            error: None,
        }
    }

    /// A failed outcome built from an error
    pub fn failed(resource: ResourceId, err: &Error) -> Self {
        let status = match err {
            Error::Api { status, .. } => Some(*status),
            _ => None,
        };
        Self {
            resource,
            action: ApplyAction::Failed,
            status,
            error: Some(err.to_string()),
        }
    }

    /// Whether this resource was not applied
    pub fn is_failed(&self) -> bool {
        self.action == ApplyAction::Failed
    }
}

/// Applies documents into a target namespace
#[derive(Clone, Debug)]
pub struct Applier {
    namespace: String,
}

impl Applier {
    /// Create an applier defaulting documents into `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// The namespace documents without one are placed in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Replace-if-exists
    ///
    /// Statuses outside the expected set (200/404 on get, 200/201 on put,
    /// 200/201/202 on post) surface as [`Error::Api`]; a `409 Conflict`
    /// is not retried.
    pub async fn replace<H>(&self, handle: &H, mut doc: ResourceDocument) -> Result<ApplyOutcome>
    where
        H: ResourceHandle + ?Sized,
    {
        doc.default_namespace(&self.namespace);
        let id = doc.id();
        let name = doc
            .name()
            .ok_or_else(|| Error::InvalidDocument(format!("{id} has no metadata.name")))?
            .to_string();
        let namespace = doc.namespace().map(String::from);
        let uri = handle.uri(&name, namespace.as_deref());
        info!("Replace {uri}");

        info!("- Get {uri}");
        let live = handle.get(&name, namespace.as_deref()).await?;
        let found = match live.status {
            StatusCode::OK => {
                info!(
                    "- Get {} {uri}: resourceVersion {}",
                    live.status.as_u16(),
                    live.resource_version().unwrap_or_default()
                );
                true
            }
            StatusCode::NOT_FOUND => {
                info!("- Get {} {uri}", live.status.as_u16());
                false
            }
            status => {
                info!("- Get {} {uri}", status.as_u16());
                return Err(Error::Api {
                    status,
                    body: live.body,
                });
            }
        };

        if found {
            if let Some(version) = live.resource_version() {
                doc.set_resource_version(version);
            }
            info!("- Put {uri}");
            let put = handle.put(&doc).await?;
            info!("- Put {} {uri}", put.status.as_u16());
            match put.status {
                StatusCode::OK | StatusCode::CREATED => {
                    Ok(ApplyOutcome::succeeded(id, ApplyAction::Updated, put.status))
                }
                status => Err(Error::Api {
                    status,
                    body: put.body,
                }),
            }
        } else {
            info!("- Post {uri}");
            let post = handle.post(&doc).await?;
            info!("- Post {} {uri}", post.status.as_u16());
            match post.status {
                StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED => {
                    Ok(ApplyOutcome::succeeded(id, ApplyAction::Created, post.status))
                }
                status => Err(Error::Api {
                    status,
                    body: post.body,
                }),
            }
        }
    }

    /// Create-skip-existing
    ///
    /// Never fails: anything other than a creation or an `AlreadyExists`
    /// conflict becomes an [`ApplyAction::Failed`] outcome.
    pub async fn create_skip_existing<H>(&self, handle: &H, mut doc: ResourceDocument) -> ApplyOutcome
    where
        H: ResourceHandle + ?Sized,
    {
        doc.default_namespace(&self.namespace);
        let id = doc.id();
        let uri = handle.uri(&id.name, id.namespace.as_deref());
        info!("- Post {uri}");
        let post = match handle.post(&doc).await {
            Ok(post) => post,
            Err(e) => {
                error!("- Post {uri}: {e}");
                return ApplyOutcome::failed(id, &e);
            }
        };
        info!("- Post {} {uri}", post.status.as_u16());
        match post.status {
            s if s.is_success() => ApplyOutcome::succeeded(id, ApplyAction::Created, s),
            StatusCode::CONFLICT if post.reason() == Some("AlreadyExists") => {
                info!("{id} already exists.. skipping");
                ApplyOutcome::succeeded(id, ApplyAction::AlreadySkipped, StatusCode::CONFLICT)
            }
            status => {
                let message = post
                    .message()
                    .map(String::from)
                    .unwrap_or_else(|| post.body.to_string());
                error!("- Post {} {uri}: {message}", status.as_u16());
                ApplyOutcome {
                    resource: id,
                    action: ApplyAction::Failed,
                    status: Some(status),
                    error: Some(message),
                }
            }
        }
    }

    /// Apply with `policy` through an already resolved handle
    ///
    /// Errors from [`Applier::replace`] are folded into a failed outcome.
    pub async fn apply<H>(&self, policy: ApplyPolicy, handle: &H, doc: ResourceDocument) -> ApplyOutcome
    where
        H: ResourceHandle + ?Sized,
    {
        match policy {
            ApplyPolicy::Replace => {
                let mut id = doc.id();
                if id.namespace.is_none() {
                    id.namespace = Some(self.namespace.clone());
                }
                match self.replace(handle, doc).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("{id}: {e}");
                        ApplyOutcome::failed(id, &e)
                    }
                }
            }
            ApplyPolicy::CreateSkipExisting => self.create_skip_existing(handle, doc).await,
        }
    }

    /// Resolve the document's own type, then apply it with `policy`
    ///
    /// A type the resolver does not know is recorded as failed and skipped.
    pub async fn resolve_and_apply<R>(
        &self,
        resolver: &R,
        policy: ApplyPolicy,
        mut doc: ResourceDocument,
    ) -> ApplyOutcome
    where
        R: ResourceResolver + ?Sized,
    {
        doc.default_namespace(&self.namespace);
        let id = doc.id();
        let Some(type_ref) = doc.type_ref() else {
            let e = Error::InvalidDocument(format!("{id} has no apiVersion or kind"));
            error!("{e} ... skipping");
            return ApplyOutcome::failed(id, &e);
        };
        match resolver.resolve(&type_ref, policy.verb()).await {
            Ok(Resolution::Resolved(handle)) => self.apply(policy, &handle, doc).await,
            Ok(Resolution::Unresolved) => {
                error!("KubeResourceMeta not found: {id} ... skipping");
                let e = Error::UnknownResourceType {
                    api_version: type_ref.api_version,
                    kind: type_ref.kind,
                };
                ApplyOutcome::failed(id, &e)
            }
            Err(e) => {
                error!("Failed to resolve {type_ref} for {id}: {e}");
                ApplyOutcome::failed(id, &e)
            }
        }
    }
}
