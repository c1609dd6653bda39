//! Retry supervision for listeners, plus the backend-init gate.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use osmo_telemetry::{listener_attrs, Instruments};
use osmo_wire::ServiceEndpoint;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const BACKEND_INIT_ATTEMPTS: u32 = 5;

/// Backoff ladder: 1, 2, 4, 8, 16, then capped at 30 seconds.
fn backoff_for(retry: u32) -> Duration {
    let exp = retry.saturating_sub(1).min(6);
    MAX_BACKOFF.min(Duration::from_secs(1u64 << exp))
}

/// Run `op` until shutdown, restarting on error with capped exponential
/// backoff. A successful return resets the ladder.
pub async fn supervise<F, Fut>(
    name: &'static str,
    shutdown: CancellationToken,
    instruments: Arc<Instruments>,
    mut op: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut retry: u32 = 0;
    loop {
        if shutdown.is_cancelled() {
            return;
        }
        match op().await {
            Ok(()) => {
                retry = 0;
            }
            Err(error) => {
                if shutdown.is_cancelled() {
                    return;
                }
                retry += 1;
                let backoff = backoff_for(retry);
                warn!(
                    listener = name,
                    retry,
                    backoff_secs = backoff.as_secs(),
                    error = %error,
                    "listener failed; backing off"
                );
                instruments.listener_retry_total.add(1, &listener_attrs(name));
                instruments
                    .listener_backoff_seconds
                    .record(backoff.as_secs_f64(), &listener_attrs(name));
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

/// Verify the control plane is reachable before any listener starts. Retries
/// a bounded number of times; persistent failure is fatal to the process.
pub async fn init_backend(
    service: &ServiceEndpoint,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let mut attempt: u32 = 0;
    loop {
        if shutdown.is_cancelled() {
            anyhow::bail!("backend init canceled");
        }
        attempt += 1;
        match osmo_wire::probe(service).await {
            Ok(()) => {
                info!(uri = %service.uri(), "control plane reachable");
                return Ok(());
            }
            Err(error) if attempt < BACKEND_INIT_ATTEMPTS => {
                let backoff = backoff_for(attempt);
                warn!(
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    error = %error,
                    "control plane probe failed"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => anyhow::bail!("backend init canceled"),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
            Err(error) => {
                return Err(anyhow::Error::new(error).context("control plane unreachable"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn backoff_ladder_is_capped() {
        let secs: Vec<u64> = (1..=7).map(|r| backoff_for(r).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn supervise_retries_until_shutdown() {
        let shutdown = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        let stop = shutdown.clone();
        supervise("test", shutdown.clone(), Arc::new(Instruments::noop()), move || {
            let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
            let stop = stop.clone();
            async move {
                if n >= 3 {
                    stop.cancel();
                    return Ok(());
                }
                anyhow::bail!("transient")
            }
        })
        .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn supervise_returns_immediately_when_already_cancelled() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        supervise("test", shutdown, Arc::new(Instruments::noop()), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}
