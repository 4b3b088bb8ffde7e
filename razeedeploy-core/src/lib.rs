//! Manifest reconciliation engine for razeedeploy
//!
//! This crate installs a fixed set of declarative resource manifests into a
//! Kubernetes cluster in one finite pass. It flattens arbitrary manifest trees
//! (single objects, arrays and `List` wrappers) into individual resources and
//! applies each one with create/update semantics that respect the api server's
//! `resourceVersion` contract.
//!
//! The pieces, leaf first:
//!
//! - [`resolver`]: the contract for resolving `{apiVersion, kind}` into a typed endpoint
//! - [`discovery`]: a [`kube`] backed implementation of that contract
//! - [`decompose`]: flattening of manifest trees into [`ResourceDocument`]s
//! - [`wait`]: bounded exponential backoff until a resource type is registered
//! - [`apply`]: the replace and create-skip-existing apply policies
//! - [`source`]: fetching and parsing manifests from release urls
//! - [`reconcile`]: the driver that runs an ordered list of [`Entry`]s
//!
//! # Example
//!
//! ```rust,no_run
//! use razeedeploy_core::{
//!     discovery::KubeResolver, ApplyPolicy, Entry, ManifestSource, Reconciler, ReconcilerConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = kube::Client::try_default().await?;
//!     let config = ReconcilerConfig::new("razeedeploy");
//!     let reconciler = Reconciler::new(KubeResolver::new(client), config);
//!
//!     let list = serde_json::json!({
//!         "kind": "List",
//!         "items": [
//!             { "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "a" } },
//!             { "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "b" } },
//!         ]
//!     });
//!     let entry = Entry::parsed("configmaps", ManifestSource::from(list), ApplyPolicy::CreateSkipExisting);
//!     let report = reconciler.run(vec![entry]).await;
//!     for outcome in &report.outcomes {
//!         println!("{}: {:?}", outcome.resource, outcome.action);
//!     }
//!     Ok(())
//! }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod apply;
pub mod decompose;
pub mod discovery;
pub mod document;
pub mod error;
pub mod reconcile;
pub mod resolver;
pub mod source;
pub mod wait;

#[cfg(test)]
mod testing;

pub use apply::{ApplyAction, ApplyOutcome, ApplyPolicy, Applier};
pub use decompose::{decompose, Decompose, ManifestSource};
pub use document::{ResourceDocument, ResourceId, TypeRef};
pub use error::{Error, Result};
pub use reconcile::{Entry, EntryReport, EntrySource, EntryStatus, Reconciler, ReconcilerConfig, RunReport};
pub use resolver::{ApiResponse, Resolution, ResourceHandle, ResourceResolver, Verb};
pub use source::{FetchedManifest, HttpProvider, ManifestProvider, ReleaseRef, Version};
pub use wait::{wait_for_type, WaitConfig};
