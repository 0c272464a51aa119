//! Worker pool dispatcher: matches shards to idle endpoints, recovers from
//! shard failures, and evicts endpoints that keep failing.
//!
//! All endpoint and failure bookkeeping lives on a single coordinator thread
//! that reacts to three event sources: shard submissions, endpoint arrivals
//! from the provider stream, and shard completions. Per-shard RPC work runs
//! in short-lived worker threads that report back over the completion
//! channel; they never touch the coordinator's maps directly.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, after, select, unbounded};
use tracing::{info, warn};

use crate::cache::SceneCache;
use crate::collector::FrameCollector;
use crate::debug::DebugPanel;
use crate::executor::execute_shard;
use crate::foundation::error::{RayfleetError, RayfleetResult};
use crate::job::{MovieJob, Shard};
use crate::provider::Provider;
use crate::rpc::RpcEndpoint;

/// Consecutive shard failures after which an endpoint is evicted.
pub const MAX_FAILURES: u32 = 3;

/// Back-off before re-offering parked shards when no endpoint is idle.
const PARKED_BACKOFF: Duration = Duration::from_millis(100);
/// Select timeout when nothing is parked; purely a liveness heartbeat.
const IDLE_HEARTBEAT: Duration = Duration::from_secs(60);

enum PoolMsg {
    Submit(Shard),
    Endpoint(Arc<dyn RpcEndpoint>),
    /// Shut down the coordinator and release provider resources.
    Finish,
}

struct ShardOutcome {
    endpoint_id: String,
    shard: Shard,
    result: RayfleetResult<()>,
}

/// Dispatch counters kept by the coordinator, rendered on the `/debug` page.
#[derive(Default, Debug)]
pub struct PoolStatus {
    in_flight: AtomicUsize,
    completed: AtomicUsize,
    endpoints: AtomicUsize,
}

impl PoolStatus {
    /// Shards currently running on an endpoint.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Shards that have completed successfully.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Endpoints currently registered (arrived and not evicted).
    pub fn endpoints(&self) -> usize {
        self.endpoints.load(Ordering::SeqCst)
    }
}

impl DebugPanel for PoolStatus {
    fn title(&self) -> String {
        "Worker pool".to_owned()
    }

    fn render_html(&self, out: &mut String) {
        out.push_str(&format!(
            "<p>{} endpoints, {} shards in flight, {} completed</p>",
            self.endpoints(),
            self.in_flight(),
            self.completed()
        ));
    }
}

/// Dispatches shards for one job across a provider's endpoints.
///
/// Constructing the pool prepares the provider. The provider is released
/// exactly once on every exit path: normally when [`WorkerPool::wait_finish`]
/// completes, or through the coordinator's shutdown path when the pool is
/// dropped mid-job.
#[derive(Debug)]
pub struct WorkerPool {
    msg_tx: Option<Sender<PoolMsg>>,
    result_rx: Receiver<()>,
    submitted: usize,
    cache: Arc<SceneCache>,
    status: Arc<PoolStatus>,
    coordinator: Option<JoinHandle<()>>,
}

impl WorkerPool {
    /// Prepare `provider` and start the dispatch coordinator.
    ///
    /// A provider whose `prepare` fails has cleaned itself up; per the
    /// provider contract, `discard` is not called in that case.
    pub fn new(
        mut provider: Box<dyn Provider>,
        job: Arc<MovieJob>,
        collector: Arc<FrameCollector>,
    ) -> RayfleetResult<Self> {
        info!(provider = %provider.safe_describe(), "preparing provider");
        let endpoint_rx = provider.prepare()?;

        let cache = Arc::new(SceneCache::new());
        let status = Arc::new(PoolStatus::default());
        let (msg_tx, msg_rx) = unbounded::<PoolMsg>();
        let (result_tx, result_rx) = unbounded::<()>();
        let (done_tx, done_rx) = unbounded::<ShardOutcome>();

        // Forward provider endpoints into the coordinator's event stream.
        // The provider stream may complete before, during, or after the job;
        // the forwarder simply exits when either side goes away.
        let forward_tx = msg_tx.clone();
        std::thread::spawn(move || {
            for endpoint in endpoint_rx.iter() {
                if forward_tx.send(PoolMsg::Endpoint(endpoint)).is_err() {
                    break;
                }
            }
        });

        let coordinator = Coordinator {
            provider,
            job,
            collector,
            cache: cache.clone(),
            status: status.clone(),
            done_tx,
            result_tx,
            slots: Vec::new(),
            failures: HashMap::new(),
            parked: VecDeque::new(),
        };
        let handle = std::thread::spawn(move || coordinator.run(msg_rx, done_rx));

        Ok(Self {
            msg_tx: Some(msg_tx),
            result_rx,
            submitted: 0,
            cache,
            status,
            coordinator: Some(handle),
        })
    }

    /// Queue a shard for dispatch. Never blocks.
    pub fn submit(&mut self, shard: Shard) -> RayfleetResult<()> {
        let tx = self
            .msg_tx
            .as_ref()
            .ok_or_else(|| RayfleetError::contract("submit after wait_finish"))?;
        tx.send(PoolMsg::Submit(shard))
            .map_err(|_| RayfleetError::contract("dispatcher coordinator is gone"))?;
        self.submitted += 1;
        Ok(())
    }

    /// Block until every submitted shard has succeeded, then release the
    /// provider. Returns once the release has completed.
    pub fn wait_finish(&mut self) -> RayfleetResult<()> {
        for _ in 0..self.submitted {
            self.result_rx.recv().map_err(|_| {
                RayfleetError::contract("dispatcher coordinator died before job completion")
            })?;
        }
        self.submitted = 0;
        self.shutdown();
        Ok(())
    }

    /// Scene-cache state for this job.
    pub fn scene_cache(&self) -> &Arc<SceneCache> {
        &self.cache
    }

    /// Dispatch counters for the debug page.
    pub fn status_panel(&self) -> Arc<PoolStatus> {
        self.status.clone()
    }

    /// Number of shards submitted and not yet confirmed by `wait_finish`.
    pub fn pending(&self) -> usize {
        self.submitted
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.msg_tx.take() {
            let _ = tx.send(PoolMsg::Finish);
        }
        if let Some(handle) = self.coordinator.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Abandonment goes through the same shutdown path as normal
        // completion, so the provider is released here too.
        self.shutdown();
    }
}

struct EndpointSlot {
    endpoint: Arc<dyn RpcEndpoint>,
    idle: bool,
}

struct Coordinator {
    provider: Box<dyn Provider>,
    job: Arc<MovieJob>,
    collector: Arc<FrameCollector>,
    cache: Arc<SceneCache>,
    status: Arc<PoolStatus>,
    done_tx: Sender<ShardOutcome>,
    result_tx: Sender<()>,
    /// Endpoints in arrival order; idle selection scans from the front.
    slots: Vec<EndpointSlot>,
    failures: HashMap<String, u32>,
    parked: VecDeque<Shard>,
}

impl Coordinator {
    fn run(mut self, msg_rx: Receiver<PoolMsg>, done_rx: Receiver<ShardOutcome>) {
        loop {
            self.dispatch_parked();

            let backoff = if self.parked.is_empty() {
                IDLE_HEARTBEAT
            } else {
                PARKED_BACKOFF
            };

            select! {
                recv(msg_rx) -> msg => match msg {
                    Ok(PoolMsg::Submit(shard)) => self.parked.push_back(shard),
                    Ok(PoolMsg::Endpoint(endpoint)) => self.register_endpoint(endpoint),
                    // Finish after all results were delivered, or the pool
                    // was dropped mid-job; either way shut down and release.
                    Ok(PoolMsg::Finish) | Err(_) => break,
                },
                recv(done_rx) -> outcome => {
                    if let Ok(outcome) = outcome {
                        self.handle_outcome(outcome);
                    }
                },
                recv(after(backoff)) -> _ => {}
            }
        }

        info!("dispatcher shutting down; releasing provider");
        self.provider.discard();
    }

    /// Hand parked shards to idle endpoints, in arrival order.
    fn dispatch_parked(&mut self) {
        while !self.parked.is_empty() {
            let Some(slot_ix) = self.slots.iter().position(|s| s.idle) else {
                return;
            };
            let Some(shard) = self.parked.pop_front() else {
                return;
            };
            self.spawn_shard(slot_ix, shard);
        }
    }

    fn spawn_shard(&mut self, slot_ix: usize, shard: Shard) {
        // Mark busy before the spawn so no second shard can pick this slot.
        let slot = &mut self.slots[slot_ix];
        slot.idle = false;
        self.status.in_flight.fetch_add(1, Ordering::SeqCst);

        let endpoint = slot.endpoint.clone();
        let job = self.job.clone();
        let cache = self.cache.clone();
        let collector = self.collector.clone();
        let done = self.done_tx.clone();
        std::thread::spawn(move || {
            let result = execute_shard(&cache, &job, &shard, endpoint.as_ref(), &collector);
            let _ = done.send(ShardOutcome {
                endpoint_id: endpoint.id().to_owned(),
                shard,
                result,
            });
        });
    }

    fn register_endpoint(&mut self, endpoint: Arc<dyn RpcEndpoint>) {
        info!(endpoint = endpoint.id(), "endpoint joined the pool");
        self.failures.insert(endpoint.id().to_owned(), 0);
        self.slots.push(EndpointSlot {
            endpoint,
            idle: true,
        });
        self.status.endpoints.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_outcome(&mut self, outcome: ShardOutcome) {
        self.status.in_flight.fetch_sub(1, Ordering::SeqCst);
        match outcome.result {
            Ok(()) => {
                // Exactly one completion signal per shard success.
                let _ = self.result_tx.send(());
                self.status.completed.fetch_add(1, Ordering::SeqCst);
                // Eviction counts consecutive failures; success clears them.
                if let Some(count) = self.failures.get_mut(&outcome.endpoint_id) {
                    *count = 0;
                }
                self.set_idle(&outcome.endpoint_id);
            }
            Err(e) => {
                warn!(
                    endpoint = %outcome.endpoint_id,
                    frame = %outcome.shard.frame,
                    error = %e,
                    "shard failed; re-queueing"
                );
                self.parked.push_back(outcome.shard);

                let count = {
                    let entry = self.failures.entry(outcome.endpoint_id.clone()).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if count >= MAX_FAILURES {
                    info!(
                        endpoint = %outcome.endpoint_id,
                        failures = count,
                        "evicting endpoint"
                    );
                    self.failures.remove(&outcome.endpoint_id);
                    self.slots
                        .retain(|s| s.endpoint.id() != outcome.endpoint_id);
                    self.status.endpoints.fetch_sub(1, Ordering::SeqCst);
                    self.provider.notify_useless(&outcome.endpoint_id);
                } else {
                    self.set_idle(&outcome.endpoint_id);
                }
            }
        }
    }

    fn set_idle(&mut self, endpoint_id: &str) {
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.endpoint.id() == endpoint_id)
        {
            slot.idle = true;
        }
    }
}
