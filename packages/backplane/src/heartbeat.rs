//! Publishes this server's liveness to the directory on a fixed interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::directory::ServerDirectory;
use crate::error::{BackplaneError, Result};
use crate::metrics::BackplaneMetrics;

/// Reports how many connections this server currently holds.
pub trait ConnectionCountProvider: Send + Sync + 'static {
    fn connection_count(&self) -> usize;
}

impl<F> ConnectionCountProvider for F
where
    F: Fn() -> usize + Send + Sync + 'static,
{
    fn connection_count(&self) -> usize {
        self()
    }
}

/// Source of the process identity, asked once per heartbeat manager.
pub trait ServerIdProvider: Send + Sync {
    fn server_id(&self) -> String;
}

/// Random v4 UUID per call
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidServerIdProvider;

impl ServerIdProvider for UuidServerIdProvider {
    fn server_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Always the same id; for tests and deployments that pin identity.
#[derive(Debug, Clone)]
pub struct FixedServerIdProvider(pub String);

impl FixedServerIdProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl ServerIdProvider for FixedServerIdProvider {
    fn server_id(&self) -> String {
        self.0.clone()
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatOptions {
    pub interval: Duration,
    /// Purge servers dead for longer than this on every tick
    pub reap_dead_after: Option<Duration>,
    /// Upper bound on the unregister call fired by [`HeartbeatManager::dispose`]
    pub dispose_timeout: Duration,
}

impl Default for HeartbeatOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            reap_dead_after: None,
            dispose_timeout: Duration::from_secs(5),
        }
    }
}

enum Lifecycle {
    Created,
    Started(CancellationToken),
    Stopped,
}

pub struct HeartbeatManager {
    server_id: String,
    directory: Arc<dyn ServerDirectory>,
    options: HeartbeatOptions,
    metrics: Arc<BackplaneMetrics>,
    lifecycle: Mutex<Lifecycle>,
    /// Parent of every tick task's token; cancelled on dispose
    shutdown: CancellationToken,
    disposed: AtomicBool,
}

impl HeartbeatManager {
    pub fn new(
        directory: Arc<dyn ServerDirectory>,
        ids: &dyn ServerIdProvider,
        mut options: HeartbeatOptions,
        metrics: Arc<BackplaneMetrics>,
    ) -> Self {
        // tokio's interval panics on zero
        options.interval = options.interval.max(Duration::from_millis(1));
        Self {
            server_id: ids.server_id(),
            directory,
            options,
            metrics,
            lifecycle: Mutex::new(Lifecycle::Created),
            shutdown: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub async fn is_started(&self) -> bool {
        matches!(*self.lifecycle.lock().await, Lifecycle::Started(_))
    }

    /// Register with the directory and start the heartbeat timer.
    ///
    /// A second call while started does nothing.
    pub async fn start(&self, connections: Arc<dyn ConnectionCountProvider>) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(BackplaneError::Disposed {
                component: "heartbeat manager",
            });
        }

        let mut lifecycle = self.lifecycle.lock().await;
        if matches!(*lifecycle, Lifecycle::Started(_)) {
            debug!(server_id = %self.server_id, "heartbeat already started");
            return Ok(());
        }

        self.directory.register(&self.server_id).await?;
        if self.disposed.load(Ordering::Acquire) {
            // dispose may have unregistered before this registration landed
            if let Err(e) = self.directory.unregister(&self.server_id).await {
                warn!(server_id = %self.server_id, error = %e, "unregister after racing dispose failed");
            }
            return Err(BackplaneError::Disposed {
                component: "heartbeat manager",
            });
        }

        let token = self.shutdown.child_token();
        tokio::spawn(run_ticks(
            self.directory.clone(),
            self.server_id.clone(),
            connections,
            self.options.clone(),
            self.metrics.clone(),
            token.clone(),
        ));
        *lifecycle = Lifecycle::Started(token);

        info!(
            server_id = %self.server_id,
            interval_secs = self.options.interval.as_secs_f64(),
            "heartbeat started"
        );
        Ok(())
    }

    /// Cancel the timer and unregister. Does nothing unless started.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Started(token) => {
                token.cancel();
                self.directory.unregister(&self.server_id).await?;
                info!(server_id = %self.server_id, "heartbeat stopped");
                Ok(())
            }
            previous => {
                *lifecycle = previous;
                debug!(server_id = %self.server_id, "heartbeat not running, nothing to stop");
                Ok(())
            }
        }
    }

    /// Cancel the timer and unregister in the background. Only the first call
    /// has any effect; unregister failures are logged and dropped.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(server_id = %self.server_id, "no runtime available, skipping unregister");
            return;
        };

        let directory = self.directory.clone();
        let server_id = self.server_id.clone();
        let timeout = self.options.dispose_timeout;
        runtime.spawn(async move {
            match tokio::time::timeout(timeout, directory.unregister(&server_id)).await {
                Ok(Ok(())) => debug!(server_id = %server_id, "unregistered on dispose"),
                Ok(Err(e)) => {
                    warn!(server_id = %server_id, error = %e, "unregister on dispose failed")
                }
                Err(_) => warn!(
                    server_id = %server_id,
                    timeout_secs = timeout.as_secs_f64(),
                    "unregister on dispose timed out"
                ),
            }
        });
    }

    /// Servers whose last heartbeat is older than `timeout`.
    pub async fn dead_servers(&self, timeout: Duration) -> Result<Vec<String>> {
        self.directory.dead_servers(timeout).await
    }
}

impl Drop for HeartbeatManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run_ticks(
    directory: Arc<dyn ServerDirectory>,
    server_id: String,
    connections: Arc<dyn ConnectionCountProvider>,
    options: HeartbeatOptions,
    metrics: Arc<BackplaneMetrics>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // registration counts as the first heartbeat
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let count = connections.connection_count();
                match directory.heartbeat(&server_id, count).await {
                    Ok(()) => debug!(server_id = %server_id, connections = count, "heartbeat"),
                    Err(e) => {
                        metrics.heartbeat_failure();
                        warn!(server_id = %server_id, error = %e, "heartbeat failed, retrying next tick");
                    }
                }

                if let Some(timeout) = options.reap_dead_after {
                    match directory.reap_dead_servers(timeout).await {
                        Ok(reaped) if !reaped.is_empty() => {
                            info!(server_id = %server_id, ?reaped, "reaped dead servers")
                        }
                        Ok(_) => {}
                        Err(e) => warn!(server_id = %server_id, error = %e, "reaping dead servers failed"),
                    }
                }
            }
        }
    }
    debug!(server_id = %server_id, "heartbeat timer cancelled");
}
