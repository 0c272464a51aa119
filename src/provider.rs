//! Provider abstraction: lifecycle owner for a dynamic pool of worker
//! endpoints.
//!
//! A provider moves through `constructed -> prepared -> discarded`. No cost
//! may accrue before [`Provider::prepare`]; once `prepare` succeeds the caller
//! must eventually call [`Provider::discard`], on every exit path. When
//! `prepare` itself fails validation, the provider cleans up internally and
//! `discard` must not be called.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::foundation::error::RayfleetResult;
use crate::rpc::{PROTOBUF_CONTENT_TYPE, RpcEndpoint};

pub mod aws;
pub mod cloud;
pub mod fake;
pub mod gce;
pub mod local;

/// Lazy, unbounded stream of endpoints; they may appear at any time and in
/// any order as the underlying instances come online.
pub type EndpointStream = crossbeam_channel::Receiver<Arc<dyn RpcEndpoint>>;

/// Supplier of RPC endpoints with an explicit lifecycle.
pub trait Provider: Send {
    /// Log-safe summary containing no credentials.
    fn safe_describe(&self) -> String;

    /// Start supplying endpoints. Cost may accrue from this point on.
    fn prepare(&mut self) -> RayfleetResult<EndpointStream>;

    /// Release all resources. Failures are logged, never propagated.
    fn discard(&mut self);

    /// Human-readable billing line and estimated cost in USD.
    fn calc_bill(&self) -> (String, f64);

    /// Hint that `endpoint_id` keeps failing and could be torn down early.
    /// Providers may ignore the hint.
    fn notify_useless(&mut self, endpoint_id: &str) {
        let _ = endpoint_id;
    }
}

/// Readiness-probe interval for cloud instances.
pub const CLOUD_PROBE_INTERVAL: Duration = Duration::from_secs(5);
/// Readiness-probe interval for local containers.
pub const LOCAL_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Block until the worker behind `url` answers the readiness probe.
///
/// The probe POSTs a short non-protobuf payload; a worker that is up rejects
/// it with HTTP 400, which is the "alive" signal. Every other outcome,
/// including connection errors, means the worker is still booting.
pub fn block_until_available(url: &str, interval: Duration) {
    loop {
        info!(url, "pinging for RPC availability");
        let result = ureq::post(url)
            .set("Content-Type", PROTOBUF_CONTENT_TYPE)
            .send_string("PING");
        if let Err(ureq::Error::Status(400, _)) = result {
            break;
        }
        std::thread::sleep(interval);
    }
    info!(url, "now accepting requests");
}

/// Container image holding the production worker binary.
pub const WORKER_IMAGE: &str = "rayfleet/worker-prod";
/// Path of the worker binary inside [`WORKER_IMAGE`].
pub const WORKER_PATH: &str = "/opt/rayfleet/worker";
/// Port the worker serves on inside the container.
pub const WORKER_CONTAINER_PORT: u16 = 80;
/// Port cloud boot scripts publish the worker on.
pub const WORKER_PUBLISHED_PORT: u16 = 8000;

/// Machine families available for fleet sizing, in cores per machine.
pub const CORE_CHOICES: [u32; 6] = [1, 2, 4, 8, 16, 32];

/// Translate a core requirement into (instance count, cores per machine):
/// the smallest family that covers the need on one machine, else enough
/// max-size machines to cover it.
pub fn satisfy_core_need(cores_needed: f64) -> (u32, u32) {
    let need = cores_needed.ceil().max(1.0) as u32;
    for &cores in &CORE_CHOICES {
        if cores >= need {
            return (1, cores);
        }
    }
    let max = CORE_CHOICES[CORE_CHOICES.len() - 1];
    (need.div_ceil(max), max)
}
