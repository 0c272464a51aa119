//! Local provider: boots one worker container on this machine via `docker`.

use std::process::Command;
use std::sync::Arc;

use rand::Rng as _;
use tracing::{info, warn};

use crate::foundation::error::{RayfleetError, RayfleetResult};
use crate::provider::{
    EndpointStream, LOCAL_PROBE_INTERVAL, Provider, WORKER_CONTAINER_PORT, WORKER_IMAGE,
    WORKER_PATH, block_until_available,
};
use crate::rpc::{HttpEndpoint, RpcEndpoint};

/// Runs the worker container locally and exposes it on a random high port.
pub struct LocalDockerProvider {
    container_id: Option<String>,
}

impl LocalDockerProvider {
    pub fn new() -> Self {
        Self { container_id: None }
    }
}

impl Default for LocalDockerProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for LocalDockerProvider {
    fn safe_describe(&self) -> String {
        format!(
            "LocalDockerProvider{{{}}}",
            self.container_id.as_deref().unwrap_or("<not prepared>")
        )
    }

    fn prepare(&mut self) -> RayfleetResult<EndpointStream> {
        let mut rng = rand::thread_rng();
        let container_name = format!("rayfleet_local_worker_{}", rng.gen_range(0..1000));
        let port: u16 = rng.gen_range(20000..30000);

        let output = Command::new("docker")
            .args(["run", "--detach=true"])
            .args(["--name", &container_name])
            .args([
                "--publish",
                &format!("{port}:{WORKER_CONTAINER_PORT}"),
            ])
            .args([WORKER_IMAGE, WORKER_PATH])
            .output()
            .map_err(|e| RayfleetError::validation(format!("failed to invoke docker: {e}")))?;
        if !output.status.success() {
            // Nothing started, so there is nothing to clean up.
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RayfleetError::validation(format!(
                "docker run failed: {}",
                stderr.trim()
            )));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        info!(%container_id, port, "local worker container started");
        self.container_id = Some(container_id);

        let url = format!("http://localhost:{port}/");
        let (tx, rx) = crossbeam_channel::unbounded::<Arc<dyn RpcEndpoint>>();
        std::thread::spawn(move || {
            block_until_available(&url, LOCAL_PROBE_INTERVAL);
            let _ = tx.send(Arc::new(HttpEndpoint::new(url)));
        });
        Ok(rx)
    }

    fn discard(&mut self) {
        let Some(container_id) = self.container_id.take() else {
            return;
        };
        let result = Command::new("docker")
            .args(["rm", "-f", &container_id])
            .status();
        match result {
            Ok(status) if status.success() => {
                info!(%container_id, "local worker container removed");
            }
            other => {
                warn!(
                    %container_id,
                    ?other,
                    "container cleanup failed; you may need to remove it manually"
                );
            }
        }
    }

    fn calc_bill(&self) -> (String, f64) {
        ("This machine".to_owned(), 0.0)
    }
}
