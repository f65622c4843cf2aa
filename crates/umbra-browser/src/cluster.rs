//! Cluster scheduler
//!
//! Pools browser instances behind acquire/release with FIFO reuse,
//! creates instances on demand up to the cap, and falls back to
//! health-weighted selection (overloading a busy instance) when the pool is
//! exhausted. A background monitor probes idle instances with a synthetic
//! create/close round-trip and restarts any that fail twice in a row. A
//! failed request gets exactly one failover onto a different healthy
//! instance before the error surfaces.

use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use umbra_stealth::FingerprintRegistry;

use crate::config::ClusterConfig;
use crate::error::{BrowserError, BrowserResult};
use crate::instance::{BrowserInstance, InstanceSnapshot};

/// Cluster lifecycle events for monitoring.
#[derive(Debug, Clone)]
pub enum ClusterEvent {
    InstanceCreated { id: String },
    InstanceRemoved { id: String, reason: String },
    InstanceRestarted { id: String },
    HealthCheckCompleted { healthy: usize, unhealthy: usize },
}

/// Aggregate cluster statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ClusterStats {
    pub instance_count: usize,
    pub available: usize,
    pub busy: usize,
    pub total_sessions: usize,
    pub instances: Vec<InstanceSnapshot>,
}

#[derive(Default)]
struct PoolState {
    available: VecDeque<String>,
    busy: HashSet<String>,
}

/// Returns a checked-out instance to the pool if the request future is
/// dropped (cancelled) before the normal release path runs.
struct ReleaseGuard {
    pool: Arc<Mutex<PoolState>>,
    instance_id: String,
    armed: bool,
}

impl ReleaseGuard {
    fn new(pool: Arc<Mutex<PoolState>>, instance_id: String) -> Self {
        Self {
            pool,
            instance_id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if self.armed {
            let pool = self.pool.clone();
            let id = self.instance_id.clone();
            warn!(instance_id = %id, "request cancelled, releasing instance in background");
            tokio::spawn(async move {
                let mut pool = pool.lock().await;
                if pool.busy.remove(&id) {
                    pool.available.push_back(id);
                }
            });
        }
    }
}

/// Pool of browser instances with health scoring and failover.
pub struct BrowserCluster {
    config: ClusterConfig,
    registry: Arc<Mutex<FingerprintRegistry>>,
    instances: RwLock<HashMap<String, Arc<BrowserInstance>>>,
    pool: Arc<Mutex<PoolState>>,
    /// Serializes on-demand instance creation so the cap holds under
    /// concurrent acquires.
    create_lock: Mutex<()>,
    event_tx: mpsc::UnboundedSender<ClusterEvent>,
    event_rx: Arc<Mutex<mpsc::UnboundedReceiver<ClusterEvent>>>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Mutex<Option<mpsc::Receiver<()>>>,
    monitor_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BrowserCluster {
    pub fn new(config: ClusterConfig, registry: FingerprintRegistry) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Arc::new(Self {
            config,
            registry: Arc::new(Mutex::new(registry)),
            instances: RwLock::new(HashMap::new()),
            pool: Arc::new(Mutex::new(PoolState::default())),
            create_lock: Mutex::new(()),
            event_tx,
            event_rx: Arc::new(Mutex::new(event_rx)),
            shutdown_tx,
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
            monitor_task: Mutex::new(None),
        })
    }

    /// Pre-warm the pool and start the background health monitor.
    ///
    /// Warm-up failures degrade capacity instead of failing initialization,
    /// as long as at least one instance came up.
    pub async fn initialize(self: &Arc<Self>) -> BrowserResult<()> {
        let target = self.config.warmup_instances();
        info!(target, max = self.config.max_instances, "initializing browser cluster");

        let mut failures = 0usize;
        for _ in 0..target {
            match self.spawn_instance().await {
                Ok(instance) => {
                    self.pool
                        .lock()
                        .await
                        .available
                        .push_back(instance.id().to_string());
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, "failed to create warm-up instance");
                }
            }
        }

        let created = self.instances.read().await.len();
        if created == 0 && target > 0 {
            return Err(BrowserError::Launch(format!(
                "all {failures} warm-up launches failed"
            )));
        }

        self.start_monitor().await;
        info!(instance_count = created, "browser cluster initialized");
        Ok(())
    }

    /// Acquire an instance: FIFO from the available queue, else create one
    /// below the cap, else report no capacity (the caller may fall back to
    /// [`select_healthy`](Self::select_healthy) and overload).
    pub async fn acquire(&self) -> BrowserResult<Arc<BrowserInstance>> {
        loop {
            let candidate = {
                let mut pool = self.pool.lock().await;
                match pool.available.pop_front() {
                    Some(id) => {
                        pool.busy.insert(id.clone());
                        Some(id)
                    }
                    None => None,
                }
            };
            let Some(id) = candidate else { break };

            if let Some(instance) = self.instances.read().await.get(&id).cloned() {
                instance.mark_used();
                return Ok(instance);
            }
            // Stale queue entry for an instance that no longer exists.
            self.pool.lock().await.busy.remove(&id);
        }

        let _creating = self.create_lock.lock().await;
        if self.instances.read().await.len() < self.config.max_instances {
            let instance = self.spawn_instance().await?;
            self.pool
                .lock()
                .await
                .busy
                .insert(instance.id().to_string());
            instance.mark_used();
            return Ok(instance);
        }

        Err(BrowserError::NoCapacity)
    }

    /// Return an instance to the available queue.
    pub async fn release(&self, instance_id: &str) {
        let returned = {
            let mut pool = self.pool.lock().await;
            if pool.busy.remove(instance_id) {
                pool.available.push_back(instance_id.to_string());
                true
            } else {
                false
            }
        };
        if returned {
            if let Some(instance) = self.instances.read().await.get(instance_id) {
                instance.touch_last_used();
            }
            debug!(instance_id, "instance released");
        }
    }

    /// Health-weighted selection over healthy instances (consecutive
    /// failures < 3), with probability proportional to health score.
    /// Unhealthy instances are never selected.
    pub async fn select_healthy(&self, exclude: Option<&str>) -> Option<Arc<BrowserInstance>> {
        let candidates: Vec<(Arc<BrowserInstance>, f64)> = {
            let instances = self.instances.read().await;
            instances
                .values()
                .filter(|i| i.is_healthy())
                .filter(|i| exclude != Some(i.id()))
                .map(|i| (i.clone(), i.health_score()))
                .collect()
        };
        if candidates.is_empty() {
            return None;
        }

        let scores: Vec<f64> = candidates.iter().map(|(_, s)| *s).collect();
        let index = weighted_pick(&scores, selection_draw())?;
        Some(candidates[index].0.clone())
    }

    /// Serve one request: acquire (or overload) an instance, ensure the
    /// session exists there, navigate, report health, release, and fail
    /// over once to a different healthy instance on error.
    pub async fn handle_request(&self, session_id: &str, url: &str) -> BrowserResult<String> {
        let (instance, guard) = match self.acquire().await {
            Ok(instance) => {
                let guard = ReleaseGuard::new(self.pool.clone(), instance.id().to_string());
                (instance, Some(guard))
            }
            Err(BrowserError::NoCapacity) => match self.select_healthy(None).await {
                Some(instance) => {
                    instance.mark_used();
                    (instance, None)
                }
                None => return Err(BrowserError::NoCapacity),
            },
            Err(e) => return Err(e),
        };

        let result = self.navigate_on(&instance, session_id, url).await;
        if let Some(guard) = guard {
            guard.disarm();
            self.release(instance.id()).await;
        }

        match result {
            Ok(html) => {
                instance.mark_success();
                Ok(html)
            }
            Err(e) => {
                error!(
                    instance_id = instance.id(),
                    session_id,
                    url,
                    error = %e,
                    "request failed on instance"
                );
                instance.mark_failure();
                self.failover(instance.id(), session_id, url).await
            }
        }
    }

    /// Find the instance currently hosting a session.
    pub async fn instance_for_session(&self, session_id: &str) -> Option<Arc<BrowserInstance>> {
        let instances: Vec<Arc<BrowserInstance>> =
            self.instances.read().await.values().cloned().collect();
        for instance in instances {
            if instance.has_session(session_id).await {
                return Some(instance);
            }
        }
        None
    }

    /// Instance hosting the session, or any instance acquired via the
    /// health-weighted path with the session created on it.
    pub async fn instance_with_session(
        &self,
        session_id: &str,
    ) -> BrowserResult<Arc<BrowserInstance>> {
        if let Some(instance) = self.instance_for_session(session_id).await {
            return Ok(instance);
        }
        let instance = self
            .select_healthy(None)
            .await
            .ok_or(BrowserError::NoCapacity)?;
        instance.create_session(session_id).await?;
        Ok(instance)
    }

    /// Aggregate statistics over the pool.
    pub async fn stats(&self) -> ClusterStats {
        let instances: Vec<Arc<BrowserInstance>> =
            self.instances.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(instances.len());
        let mut total_sessions = 0usize;
        for instance in &instances {
            let snapshot = instance.snapshot().await;
            total_sessions += snapshot.session_count;
            snapshots.push(snapshot);
        }

        let pool = self.pool.lock().await;
        ClusterStats {
            instance_count: instances.len(),
            available: pool.available.len(),
            busy: pool.busy.len(),
            total_sessions,
            instances: snapshots,
        }
    }

    /// Cluster event stream for observability.
    pub fn events(&self) -> Arc<Mutex<mpsc::UnboundedReceiver<ClusterEvent>>> {
        self.event_rx.clone()
    }

    /// Cancel the monitor and tear down all instances in parallel.
    pub async fn shutdown(&self) {
        info!("shutting down browser cluster");
        let _ = self.shutdown_tx.send(()).await;
        if let Some(task) = self.monitor_task.lock().await.take() {
            let _ = task.await;
        }

        let instances: Vec<Arc<BrowserInstance>> =
            self.instances.write().await.drain().map(|(_, i)| i).collect();
        futures::future::join_all(instances.iter().map(|i| i.shutdown())).await;

        let mut pool = self.pool.lock().await;
        pool.available.clear();
        pool.busy.clear();
        info!("browser cluster shutdown completed");
    }

    // ----- internals -----

    async fn spawn_instance(&self) -> BrowserResult<Arc<BrowserInstance>> {
        let instance = BrowserInstance::launch(&self.config, self.registry.clone()).await?;
        let id = instance.id().to_string();
        self.instances
            .write()
            .await
            .insert(id.clone(), instance.clone());
        let _ = self.event_tx.send(ClusterEvent::InstanceCreated { id });
        Ok(instance)
    }

    async fn navigate_on(
        &self,
        instance: &Arc<BrowserInstance>,
        session_id: &str,
        url: &str,
    ) -> BrowserResult<String> {
        if !instance.has_session(session_id).await {
            instance.create_session(session_id).await?;
        }
        instance.navigate(session_id, url).await
    }

    /// One failover attempt on a different healthy instance. The failing
    /// instance is left to the background monitor; it is not restarted here.
    async fn failover(
        &self,
        failed_instance_id: &str,
        session_id: &str,
        url: &str,
    ) -> BrowserResult<String> {
        info!(session_id, url, failed_instance_id, "attempting failover");

        let instance = self
            .select_healthy(Some(failed_instance_id))
            .await
            .ok_or(BrowserError::NoCapacity)?;
        instance.mark_used();

        match self.navigate_on(&instance, session_id, url).await {
            Ok(html) => {
                instance.mark_success();
                info!(
                    failover_instance = instance.id(),
                    session_id, "failover succeeded"
                );
                Ok(html)
            }
            Err(e) => {
                error!(
                    failover_instance = instance.id(),
                    error = %e,
                    "failover also failed"
                );
                instance.mark_failure();
                Err(e)
            }
        }
    }

    async fn start_monitor(self: &Arc<Self>) {
        let Some(mut shutdown_rx) = self.shutdown_rx.lock().await.take() else {
            return;
        };
        let cluster = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = interval(cluster.config.health_check_interval);
            // The first tick fires immediately; skip it so warm instances
            // are not probed right after launch.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cluster.run_health_sweep().await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("health monitor shutting down");
                        break;
                    }
                }
            }
        });
        *self.monitor_task.lock().await = Some(task);
    }

    async fn run_health_sweep(&self) {
        let instances: Vec<Arc<BrowserInstance>> =
            self.instances.read().await.values().cloned().collect();
        let mut healthy = 0usize;
        let mut unhealthy = 0usize;

        for instance in instances {
            instance
                .purge_idle_sessions(self.config.session_timeout)
                .await;

            // Recently used instances are demonstrably alive.
            if instance.seconds_since_last_use()
                < self.config.recent_use_threshold.as_secs_f64()
            {
                healthy += 1;
                continue;
            }

            match instance.probe().await {
                Ok(()) => {
                    instance.mark_success();
                    healthy += 1;
                }
                Err(e) => {
                    debug!(instance_id = instance.id(), error = %e, "health probe failed");
                    instance.mark_failure();
                    unhealthy += 1;

                    if instance.consecutive_failures() >= self.config.restart_failure_threshold {
                        warn!(
                            instance_id = instance.id(),
                            consecutive_failures = instance.consecutive_failures(),
                            "restarting unhealthy instance"
                        );
                        match instance.restart(&self.config).await {
                            Ok(()) => {
                                let _ = self.event_tx.send(ClusterEvent::InstanceRestarted {
                                    id: instance.id().to_string(),
                                });
                            }
                            Err(e) => {
                                error!(
                                    instance_id = instance.id(),
                                    error = %e,
                                    "failed to restart instance"
                                );
                            }
                        }
                    }
                }
            }
        }

        let _ = self
            .event_tx
            .send(ClusterEvent::HealthCheckCompleted { healthy, unhealthy });
    }
}

/// Uniform draw in [0, 1) for the weighted selection. Kept synchronous so
/// no RNG handle exists in an async scope.
fn selection_draw() -> f64 {
    rand::thread_rng().gen()
}

/// Pick an index with probability proportional to its weight, given a draw
/// uniform in [0, 1). Zero-weight entries are never picked unless all
/// weights are zero, in which case the first candidate wins.
fn weighted_pick(weights: &[f64], draw: f64) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Some(0);
    }
    let mut threshold = draw.clamp(0.0, 1.0 - f64::EPSILON) * total;
    for (index, weight) in weights.iter().enumerate() {
        if threshold < *weight {
            return Some(index);
        }
        threshold -= weight;
    }
    Some(weights.len() - 1)
}
