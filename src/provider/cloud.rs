//! Generic elastic VM-fleet provider.
//!
//! Owns the lifecycle that is common to every cloud backend: fleet sizing
//! from a core-hour target, the worker boot script, the poll-until-running
//! loop, the readiness probe, and teardown. The backend-specific provisioning
//! calls sit behind [`ComputeApi`]; the concrete SDK glue is out of scope and
//! supplied by thin CLI-backed implementations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::Rng as _;
use tracing::{info, warn};

use crate::debug::DebugPanel;
use crate::foundation::error::{RayfleetError, RayfleetResult};
use crate::provider::{
    CLOUD_PROBE_INTERVAL, EndpointStream, Provider, WORKER_CONTAINER_PORT, WORKER_IMAGE,
    WORKER_PATH, WORKER_PUBLISHED_PORT, block_until_available, satisfy_core_need,
};
use crate::rpc::{HttpEndpoint, RpcEndpoint};

/// Backend-specific provisioning operations.
///
/// Implementations map fleet-level instance names onto whatever the backend
/// uses internally and must never leak credentials through `describe`.
pub trait ComputeApi: Send + 'static {
    /// Log-safe backend summary (no secrets).
    fn describe(&self) -> String;

    /// Backend machine type name for a machine with `cores` cores.
    fn machine_type(&self, cores: u32) -> String;

    /// Launch one instance per name, each running `boot_script` on first boot.
    fn launch(&mut self, names: &[String], cores: u32, boot_script: &str) -> RayfleetResult<()>;

    /// Public IP of `name` once the instance is running, `None` while booting.
    fn poll_ip(&mut self, name: &str) -> RayfleetResult<Option<String>>;

    /// Terminate every named instance.
    fn terminate(&mut self, names: &[String]) -> RayfleetResult<()>;

    /// Billing line and estimated cost for this fleet shape.
    fn billing(&self, cores: u32, instance_count: u32, duration_hours: f64) -> (String, f64);
}

/// Boot phase of one fleet instance, for the debug page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstancePhase {
    Launching,
    Probing(String),
    Ready(String),
}

/// Shared per-instance boot state, rendered on the `/debug` page.
#[derive(Default)]
pub struct FleetStatus {
    phases: Mutex<HashMap<String, InstancePhase>>,
}

impl FleetStatus {
    fn set(&self, name: &str, phase: InstancePhase) {
        let mut phases = self.phases.lock().expect("fleet status lock poisoned");
        phases.insert(name.to_owned(), phase);
    }

    /// Snapshot of instance phases, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, InstancePhase)> {
        let phases = self.phases.lock().expect("fleet status lock poisoned");
        let mut out: Vec<_> = phases
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl DebugPanel for FleetStatus {
    fn title(&self) -> String {
        "Fleet instances".to_owned()
    }

    fn render_html(&self, out: &mut String) {
        for (name, phase) in self.snapshot() {
            let line = match phase {
                InstancePhase::Launching => format!("{name}: launching"),
                InstancePhase::Probing(ip) => format!("{name}: probing {ip}"),
                InstancePhase::Ready(ip) => format!("{name}: ready at {ip}"),
            };
            out.push_str(&format!("<p>{line}</p>"));
        }
    }
}

/// Elastic fleet of cloud VMs running the worker container.
pub struct CloudFleetProvider<A: ComputeApi> {
    api: Arc<Mutex<A>>,
    instance_count: u32,
    cores_per_machine: u32,
    est_duration_hours: f64,
    run_id: String,
    names: Vec<String>,
    prepared: bool,
    status: Arc<FleetStatus>,
}

impl<A: ComputeApi> CloudFleetProvider<A> {
    /// Size a fleet to cover `cores_needed` cores for roughly
    /// `est_duration_hours` of wall clock.
    pub fn new(api: A, cores_needed: f64, est_duration_hours: f64) -> Self {
        let (instance_count, cores_per_machine) = satisfy_core_need(cores_needed);
        Self {
            api: Arc::new(Mutex::new(api)),
            instance_count,
            cores_per_machine,
            est_duration_hours,
            run_id: format!("{:04}", rand::thread_rng().gen_range(0..10000)),
            names: Vec::new(),
            prepared: false,
            status: Arc::new(FleetStatus::default()),
        }
    }

    /// Instance boot state for the debug page.
    pub fn status_panel(&self) -> Arc<FleetStatus> {
        self.status.clone()
    }

    fn boot_script() -> String {
        [
            "#!/bin/bash".to_owned(),
            "apt-get update".to_owned(),
            "apt-get -y install docker.io".to_owned(),
            "service docker start".to_owned(),
            format!("docker pull docker.io/{WORKER_IMAGE}"),
            format!(
                "docker run --detach=true --publish {WORKER_PUBLISHED_PORT}:{WORKER_CONTAINER_PORT} \
                 docker.io/{WORKER_IMAGE} {WORKER_PATH}"
            ),
        ]
        .join("\n")
    }
}

impl<A: ComputeApi> Provider for CloudFleetProvider<A> {
    fn safe_describe(&self) -> String {
        let api = self.api.lock().expect("compute api lock poisoned");
        format!(
            "CloudFleetProvider{{{} {} x {}}}",
            api.describe(),
            api.machine_type(self.cores_per_machine),
            self.instance_count
        )
    }

    fn prepare(&mut self) -> RayfleetResult<EndpointStream> {
        let names: Vec<String> = (0..self.instance_count)
            .map(|ix| format!("rayfleet-worker-{}-{ix}", self.run_id))
            .collect();

        {
            let mut api = self.api.lock().expect("compute api lock poisoned");
            if let Err(e) = api.launch(&names, self.cores_per_machine, &Self::boot_script()) {
                // Validation failure: clean up whatever partially started so
                // the caller must not (and cannot) call discard.
                if let Err(cleanup) = api.terminate(&names) {
                    warn!(error = %cleanup, "cleanup after failed launch also failed");
                }
                return Err(RayfleetError::validation(format!(
                    "fleet launch failed: {e}"
                )));
            }
        }
        for name in &names {
            self.status.set(name, InstancePhase::Launching);
        }
        self.names = names.clone();
        self.prepared = true;

        let (tx, rx) = crossbeam_channel::unbounded::<Arc<dyn RpcEndpoint>>();
        let api = self.api.clone();
        let status = self.status.clone();
        std::thread::spawn(move || {
            for name in names {
                let ip = loop {
                    let polled = {
                        let mut api = api.lock().expect("compute api lock poisoned");
                        api.poll_ip(&name)
                    };
                    match polled {
                        Ok(Some(ip)) => break ip,
                        Ok(None) => info!(%name, "instance not running yet"),
                        Err(e) => warn!(%name, error = %e, "instance status poll failed"),
                    }
                    std::thread::sleep(CLOUD_PROBE_INTERVAL);
                };

                let url = format!("http://{ip}:{WORKER_PUBLISHED_PORT}");
                status.set(&name, InstancePhase::Probing(ip.clone()));
                block_until_available(&url, CLOUD_PROBE_INTERVAL);
                status.set(&name, InstancePhase::Ready(ip));
                if tx.send(Arc::new(HttpEndpoint::new(url)) as Arc<dyn RpcEndpoint>).is_err() {
                    // Dispatcher went away; stop publishing.
                    return;
                }
            }
        });
        Ok(rx)
    }

    fn discard(&mut self) {
        if !self.prepared {
            return;
        }
        self.prepared = false;
        let mut api = self.api.lock().expect("compute api lock poisoned");
        match api.terminate(&self.names) {
            Ok(()) => info!(instances = self.names.len(), "fleet terminated"),
            Err(e) => warn!(
                error = %e,
                "fleet termination failed; instances may need manual cleanup"
            ),
        }
    }

    fn calc_bill(&self) -> (String, f64) {
        let api = self.api.lock().expect("compute api lock poisoned");
        api.billing(
            self.cores_per_machine,
            self.instance_count,
            self.est_duration_hours,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend that records teardowns and never produces reachable instances.
    struct RecordingApi {
        terminated: Arc<Mutex<Vec<String>>>,
        fail_launch: bool,
    }

    impl ComputeApi for RecordingApi {
        fn describe(&self) -> String {
            "recording".to_owned()
        }

        fn machine_type(&self, cores: u32) -> String {
            format!("test-standard-{cores}")
        }

        fn launch(
            &mut self,
            _names: &[String],
            _cores: u32,
            _boot_script: &str,
        ) -> RayfleetResult<()> {
            if self.fail_launch {
                return Err(RayfleetError::validation("quota exceeded"));
            }
            Ok(())
        }

        fn poll_ip(&mut self, _name: &str) -> RayfleetResult<Option<String>> {
            Ok(None)
        }

        fn terminate(&mut self, names: &[String]) -> RayfleetResult<()> {
            self.terminated.lock().unwrap().extend(names.iter().cloned());
            Ok(())
        }

        fn billing(&self, cores: u32, count: u32, duration: f64) -> (String, f64) {
            (
                format!("test {cores}x{count}"),
                0.05 * f64::from(cores) * f64::from(count) * duration,
            )
        }
    }

    #[test]
    fn sizing_flows_into_launch_and_billing() {
        let terminated = Arc::new(Mutex::new(Vec::new()));
        let api = RecordingApi {
            terminated: terminated.clone(),
            fail_launch: false,
        };
        let mut provider = CloudFleetProvider::new(api, 33.0, 0.5);
        assert!(provider.safe_describe().contains("test-standard-32 x 2"));

        let (_line, cost) = provider.calc_bill();
        assert!((cost - 0.05 * 32.0 * 2.0 * 0.5).abs() < 1e-9);

        let _stream = provider.prepare().unwrap();
        provider.discard();
        assert_eq!(terminated.lock().unwrap().len(), 2);
    }

    #[test]
    fn failed_launch_self_cleans_and_reports_validation() {
        let terminated = Arc::new(Mutex::new(Vec::new()));
        let api = RecordingApi {
            terminated: terminated.clone(),
            fail_launch: true,
        };
        let mut provider = CloudFleetProvider::new(api, 1.0, 0.5);
        let err = provider.prepare().unwrap_err();
        assert!(err.to_string().contains("validation error"));
        // Cleanup ran inside prepare; discard afterwards is a no-op.
        assert_eq!(terminated.lock().unwrap().len(), 1);
        provider.discard();
        assert_eq!(terminated.lock().unwrap().len(), 1);
    }

    #[test]
    fn boot_script_pulls_and_publishes_the_worker() {
        let script = CloudFleetProvider::<RecordingApi>::boot_script();
        assert!(script.contains("docker pull docker.io/rayfleet/worker-prod"));
        assert!(script.contains("--publish 8000:80"));
        assert!(script.starts_with("#!/bin/bash"));
    }
}
