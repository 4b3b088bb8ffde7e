//! Waits for resource types to become resolvable
//!
//! A CRD that was created a moment ago is usually not served straight away.
//! [`wait_for_type`] bridges that gap with a bounded exponential backoff.
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    document::TypeRef,
    resolver::{Resolution, ResourceResolver, Verb},
    Error, Result,
};

/// Backoff schedule for [`wait_for_type`]
///
/// The delay starts at `initial_backoff` and doubles after every failed
/// attempt, without jitter. The default of 6 attempts from 50ms sleeps
/// 50+100+200+400+800ms in total before giving up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WaitConfig {
    /// Number of resolution attempts; zero is treated as one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

impl WaitConfig {
    /// Construct a schedule
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
        }
    }
}

/// Poll `resolver` until `type_ref` resolves, or the attempts run out
///
/// # Errors
///
/// - [`Error::TypeNotReady`] once all attempts reported the type as unknown
/// - [`Error::Cancelled`] if `cancel` fires while waiting
///
/// Resolver errors count as a failed attempt; the type may simply not be
/// served yet.
pub async fn wait_for_type<R>(
    resolver: &R,
    type_ref: &TypeRef,
    config: &WaitConfig,
    cancel: &CancellationToken,
) -> Result<R::Handle>
where
    R: ResourceResolver + ?Sized,
{
    let max_attempts = config.max_attempts.max(1);
    let mut backoff = config.initial_backoff;
    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match resolver.resolve(type_ref, Verb::Get).await {
            Ok(Resolution::Resolved(handle)) => {
                info!("Found {type_ref}");
                return Ok(handle);
            }
            Ok(Resolution::Unresolved) => {
                warn!("Did not find {type_ref}.. attempts remaining: {}", max_attempts - attempt);
            }
            Err(e) => {
                warn!(error = %e, "Failed to resolve {type_ref}.. attempts remaining: {}", max_attempts - attempt);
            }
        }
        if attempt < max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = backoff.saturating_mul(2);
        }
    }
    Err(Error::TypeNotReady {
        api_version: type_ref.api_version.clone(),
        kind: type_ref.kind.clone(),
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;
    use tokio::time::{pause, Instant};

    fn rr() -> TypeRef {
        TypeRef::new("deploy.razee.io/v1alpha2", "RemoteResource")
    }

    #[tokio::test]
    async fn gives_up_after_bounded_backoff() {
        pause();
        let cluster = FakeCluster::default();
        let config = WaitConfig::new(3, Duration::from_millis(10));
        let start = Instant::now();
        let res = wait_for_type(&cluster, &rr(), &config, &CancellationToken::new()).await;
        let elapsed = start.elapsed();

        assert!(matches!(res, Err(Error::TypeNotReady { attempts: 3, .. })));
        assert_eq!(cluster.resolutions(&rr()), 3);
        assert!(elapsed >= Duration::from_millis(30), "slept {elapsed:?}");
        assert!(elapsed < Duration::from_millis(200), "slept {elapsed:?}");
    }

    #[tokio::test]
    async fn default_schedule_sleeps_1550ms() {
        pause();
        let cluster = FakeCluster::default();
        let start = Instant::now();
        let res = wait_for_type(&cluster, &rr(), &WaitConfig::default(), &CancellationToken::new()).await;
        assert!(res.is_err());
        assert_eq!(cluster.resolutions(&rr()), 6);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1550), "slept {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1600), "slept {elapsed:?}");
    }

    #[tokio::test]
    async fn returns_once_the_type_is_registered() {
        pause();
        let cluster = FakeCluster::default();
        cluster.register_after("deploy.razee.io/v1alpha2", "RemoteResource", 2);
        let config = WaitConfig::new(6, Duration::from_millis(10));
        let start = Instant::now();
        let res = wait_for_type(&cluster, &rr(), &config, &CancellationToken::new()).await;
        assert!(res.is_ok());
        assert_eq!(cluster.resolutions(&rr()), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(30), "slept {elapsed:?}");
        assert!(elapsed < Duration::from_millis(40), "slept {elapsed:?}");
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_backoff() {
        pause();
        let cluster = FakeCluster::default();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(75)).await;
            trigger.cancel();
        });
        let res = wait_for_type(&cluster, &rr(), &WaitConfig::default(), &cancel).await;
        assert!(matches!(res, Err(Error::Cancelled)));
        // attempts at 0ms and 50ms, cancelled during the 100ms sleep
        assert_eq!(cluster.resolutions(&rr()), 2);
    }
}
