//! Installs razeedeploy components into the current cluster
//!
//! Credentials are picked up like kubectl does: `KUBECONFIG`, then
//! `~/.kube/config`, then the in-cluster service account.
mod plan;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use razeedeploy_core::{
    discovery::KubeResolver, ApplyAction, ApplyPolicy, EntryStatus, HttpProvider, Reconciler,
    ReconcilerConfig, Version, WaitConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::*;
use tracing_subscriber::EnvFilter;

use crate::plan::InstallOptions;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum PolicyArg {
    /// get, then put with the live resourceVersion or post
    Replace,
    /// post, leaving existing resources untouched
    Create,
}

impl From<PolicyArg> for ApplyPolicy {
    fn from(p: PolicyArg) -> Self {
        match p {
            PolicyArg::Replace => ApplyPolicy::Replace,
            PolicyArg::Create => ApplyPolicy::CreateSkipExisting,
        }
    }
}

/// Installs razeedeploy components. Without component flags, everything is installed at latest.
#[derive(Parser, Debug)]
#[command(name = "razeedeploy-delta", version)]
struct App {
    /// Namespace to populate razeedeploy resources into
    #[arg(long, short, env = "RAZEEDEPLOY_NAMESPACE", default_value = "razeedeploy")]
    namespace: String,

    /// Install watch-keeper at a specific version (default latest)
    #[arg(long = "watch-keeper", visible_alias = "wk", num_args = 0..=1, default_missing_value = "latest")]
    watch_keeper: Option<Version>,

    /// Install RemoteResource at a specific version (default latest)
    #[arg(long, visible_alias = "rr", num_args = 0..=1, default_missing_value = "latest")]
    remoteresource: Option<Version>,

    /// Install RemoteResourceS3 at a specific version (default latest)
    #[arg(long, visible_alias = "rrs3", num_args = 0..=1, default_missing_value = "latest")]
    remoteresources3: Option<Version>,

    /// Install RemoteResourceS3Decrypt at a specific version (default latest)
    #[arg(long, visible_alias = "rrs3d", num_args = 0..=1, default_missing_value = "latest")]
    remoteresources3decrypt: Option<Version>,

    /// Install MustacheTemplate at a specific version (default latest)
    #[arg(long, visible_alias = "mtp", num_args = 0..=1, default_missing_value = "latest")]
    mustachetemplate: Option<Version>,

    /// Install FeatureFlagSetLD at a specific version (default latest)
    #[arg(long, visible_alias = "ffsld", num_args = 0..=1, default_missing_value = "latest")]
    featureflagsetld: Option<Version>,

    /// Install ManagedSet at a specific version (default latest)
    #[arg(long, visible_alias = "ms", num_args = 0..=1, default_missing_value = "latest")]
    managedset: Option<Version>,

    /// Create a RemoteResource keeping the installed components on their latest release
    #[arg(long = "autoupdate", short = 'a')]
    auto_update: bool,

    /// How resources are written to the cluster
    #[arg(long, value_enum, default_value_t = PolicyArg::Replace)]
    policy: PolicyArg,

    /// Attempts made while waiting for a freshly created resource type
    #[arg(long, env = "RAZEEDEPLOY_WAIT_ATTEMPTS", default_value_t = 6)]
    wait_attempts: u32,

    /// First delay between those attempts; doubles every time
    #[arg(long, default_value_t = 50)]
    wait_backoff_ms: u64,

    /// Base url of the release repositories
    #[arg(long, env = "RAZEEDEPLOY_RELEASE_BASE_URL", default_value = "https://github.com/razee-io")]
    release_base_url: String,

    /// Log as json
    #[arg(long)]
    json: bool,
}

impl App {
    fn install_options(&self) -> InstallOptions {
        let requested = [
            ("watch-keeper", &self.watch_keeper),
            ("remoteresource", &self.remoteresource),
            ("remoteresources3", &self.remoteresources3),
            ("remoteresources3decrypt", &self.remoteresources3decrypt),
            ("mustachetemplate", &self.mustachetemplate),
            ("featureflagsetld", &self.featureflagsetld),
            ("managedset", &self.managedset),
        ]
        .into_iter()
        .filter_map(|(name, version)| version.clone().map(|v| (name, v)))
        .collect();
        InstallOptions {
            namespace: self.namespace.clone(),
            requested,
            auto_update: self.auto_update,
            policy: self.policy.into(),
            release_base_url: self.release_base_url.clone(),
        }
    }

    fn wait_config(&self) -> WaitConfig {
        WaitConfig::new(self.wait_attempts, Duration::from_millis(self.wait_backoff_ms))
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        fmt.json().init();
    } else {
        fmt.init();
    }
}

/// Cancel `token` on ctrl-c or SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    warn!("shutdown requested, stopping after the current request");
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let app = App::parse();
    init_tracing(app.json);

    let entries = plan::build_plan(&app.install_options())?;
    let client = kube::Client::try_default()
        .await
        .context("failed to create kube client")?;
    let config = ReconcilerConfig::new(app.namespace.as_str()).wait(app.wait_config());
    let reconciler = Reconciler::new(KubeResolver::new(client), config).with_provider(HttpProvider::new());
    tokio::spawn(cancel_on_signal(reconciler.cancellation_token()));

    info!("Installing {} entries into {}", entries.len(), app.namespace);
    let report = reconciler.run(entries).await;

    for outcome in report.outcomes.iter().filter(|o| o.is_failed()) {
        error!(
            error = outcome.error.as_deref().unwrap_or_default(),
            "{} failed", outcome.resource
        );
    }
    for entry in &report.entries {
        match &entry.status {
            EntryStatus::Skipped { reason } => warn!("{} skipped: {reason}", entry.label),
            EntryStatus::Failed { reason } => error!("{} failed: {reason}", entry.label),
            EntryStatus::Applied { .. } | EntryStatus::Cancelled { .. } => {}
        }
    }
    info!(
        created = report.count(ApplyAction::Created),
        updated = report.count(ApplyAction::Updated),
        skipped = report.count(ApplyAction::AlreadySkipped),
        failed = report.count(ApplyAction::Failed),
        "Install finished"
    );

    if report.cancelled {
        bail!("install cancelled");
    }
    if !report.is_success() {
        bail!("install completed with failures");
    }
    Ok(())
}
