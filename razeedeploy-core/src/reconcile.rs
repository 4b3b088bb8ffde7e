//! The reconciliation driver
//!
//! A [`Reconciler`] runs an ordered list of [`Entry`]s one after another.
//! Later entries typically depend on earlier ones (instances of a custom
//! resource need its CRD), so nothing is applied concurrently.
//!
//! Failures are scoped: a bad resource fails only itself, and an
//! unreachable manifest or a type that never becomes ready fails only its
//! entry. The run always continues with the remaining work.
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    apply::{ApplyAction, ApplyOutcome, ApplyPolicy, Applier},
    decompose::{decompose, ManifestSource},
    document::TypeRef,
    resolver::ResourceResolver,
    source::{ManifestProvider, ReleaseRef},
    wait::{wait_for_type, WaitConfig},
    Error,
};

/// Where an entry's manifests come from
#[derive(Clone, Debug, PartialEq)]
pub enum EntrySource {
    /// An already parsed manifest tree
    Parsed(ManifestSource),
    /// A release asset fetched through the [`ManifestProvider`]
    Release(ReleaseRef),
}

/// One installation step
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    /// Human readable name used in logs and the [`RunReport`]
    pub label: String,
    /// The manifests to apply
    pub source: EntrySource,
    /// How every resource of this entry is written
    pub policy: ApplyPolicy,
    /// A type that must be resolvable before anything here is attempted
    pub requires_type: Option<TypeRef>,
}

impl Entry {
    /// An entry applying an already parsed tree
    pub fn parsed(label: impl Into<String>, source: impl Into<ManifestSource>, policy: ApplyPolicy) -> Self {
        Self {
            label: label.into(),
            source: EntrySource::Parsed(source.into()),
            policy,
            requires_type: None,
        }
    }

    /// An entry applying a fetched release asset
    pub fn release(label: impl Into<String>, release: ReleaseRef, policy: ApplyPolicy) -> Self {
        Self {
            label: label.into(),
            source: EntrySource::Release(release),
            policy,
            requires_type: None,
        }
    }

    /// Gate this entry on `type_ref` becoming resolvable
    #[must_use]
    pub fn requires_type(mut self, type_ref: TypeRef) -> Self {
        self.requires_type = Some(type_ref);
        self
    }
}

/// What happened to a whole [`Entry`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryStatus {
    /// Every resource was attempted; individual outcomes may still have failed
    Applied {
        /// Number of resources attempted
        resources: usize,
    },
    /// The required type never became ready, nothing was attempted
    Skipped {
        /// Why the entry was skipped
        reason: String,
    },
    /// The manifests could not be fetched or parsed, nothing was attempted
    Failed {
        /// Why the entry failed
        reason: String,
    },
    /// The run was cancelled while this entry was in progress
    Cancelled {
        /// Number of resources attempted before cancellation
        resources: usize,
    },
}

/// Report for one [`Entry`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryReport {
    /// The entry's label
    pub label: String,
    /// The entry's fate
    pub status: EntryStatus,
}

/// Result of [`Reconciler::run`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunReport {
    /// Every per-resource outcome, in the order applied
    pub outcomes: Vec<ApplyOutcome>,
    /// One report per entry that was started
    pub entries: Vec<EntryReport>,
    /// Whether the run stopped early on cancellation
    pub cancelled: bool,
}

impl RunReport {
    /// Whether everything was attempted and nothing failed
    pub fn is_success(&self) -> bool {
        !self.cancelled
            && self
                .entries
                .iter()
                .all(|e| matches!(e.status, EntryStatus::Applied { .. }))
            && !self.outcomes.iter().any(ApplyOutcome::is_failed)
    }

    /// Number of outcomes with `action`
    pub fn count(&self, action: ApplyAction) -> usize {
        self.outcomes.iter().filter(|o| o.action == action).count()
    }
}

/// Configuration of a [`Reconciler`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Namespace given to documents that do not carry one
    pub namespace: String,
    /// Backoff for entries gated on a type
    pub wait: WaitConfig,
}

impl ReconcilerConfig {
    /// Defaults for everything but the namespace
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            wait: WaitConfig::default(),
        }
    }

    /// Override the readiness backoff
    #[must_use]
    pub fn wait(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }
}

/// Runs entries against a cluster
pub struct Reconciler<R> {
    resolver: R,
    provider: Option<Box<dyn ManifestProvider>>,
    applier: Applier,
    wait: WaitConfig,
    cancel: CancellationToken,
}

impl<R: ResourceResolver> Reconciler<R> {
    /// Create a reconciler resolving types through `resolver`
    ///
    /// Without a [`ManifestProvider`], entries with an [`EntrySource::Release`] fail.
    pub fn new(resolver: R, config: ReconcilerConfig) -> Self {
        Self {
            resolver,
            provider: None,
            applier: Applier::new(config.namespace),
            wait: config.wait,
            cancel: CancellationToken::new(),
        }
    }

    /// Fetch release entries through `provider`
    #[must_use]
    pub fn with_provider(mut self, provider: impl ManifestProvider + 'static) -> Self {
        self.provider = Some(Box::new(provider));
        self
    }

    /// Abort on `token` instead of the internal one
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that aborts the run when cancelled
    ///
    /// Already applied resources stay applied.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Apply every entry, in order
    pub async fn run(&self, entries: Vec<Entry>) -> RunReport {
        let mut report = RunReport::default();
        for entry in entries {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let label = entry.label.clone();
            let status = self.run_entry(entry, &mut report.outcomes).await;
            match &status {
                EntryStatus::Applied { resources } => {
                    info!(entry = %label, resources, "entry applied");
                }
                EntryStatus::Skipped { reason } => {
                    warn!(entry = %label, "{reason}.. skipping");
                }
                EntryStatus::Failed { reason } => {
                    error!(entry = %label, "{reason}");
                }
                EntryStatus::Cancelled { .. } => report.cancelled = true,
            }
            report.entries.push(EntryReport { label, status });
            if report.cancelled {
                warn!("reconciliation cancelled, remaining entries not attempted");
                break;
            }
        }
        report
    }

    async fn run_entry(&self, entry: Entry, outcomes: &mut Vec<ApplyOutcome>) -> EntryStatus {
        info!("=========== Installing {} ===========", entry.label);
        if let Some(type_ref) = &entry.requires_type {
            match wait_for_type(&self.resolver, type_ref, &self.wait, &self.cancel).await {
                Ok(_) => {}
                Err(Error::Cancelled) => return EntryStatus::Cancelled { resources: 0 },
                Err(e) => {
                    return EntryStatus::Skipped {
                        reason: e.to_string(),
                    }
                }
            }
        }

        let source = match entry.source {
            EntrySource::Parsed(source) => source,
            EntrySource::Release(release) => match self.fetch(&release).await {
                Ok(source) => source,
                Err(e) => {
                    return EntryStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            },
        };

        let mut resources = 0;
        for doc in decompose(source) {
            if self.cancel.is_cancelled() {
                return EntryStatus::Cancelled { resources };
            }
            let outcome = self
                .applier
                .resolve_and_apply(&self.resolver, entry.policy, doc)
                .await;
            info!(resource = %outcome.resource, action = %outcome.action, "applied");
            outcomes.push(outcome);
            resources += 1;
        }
        EntryStatus::Applied { resources }
    }

    async fn fetch(&self, release: &ReleaseRef) -> crate::Result<ManifestSource> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| Error::MissingProvider(release.name.clone()))?;
        let fetched = provider.fetch(release).await?;
        info!(release = %release.name, uri = %fetched.uri, "fetched manifests");
        Ok(fetched.source)
    }
}
