//! Google Compute Engine backend for [`CloudFleetProvider`], driven through
//! the `gcloud` CLI (the SDK proper is an external collaborator).

use std::path::PathBuf;
use std::process::Command;

use serde_json::Value;
use tracing::info;

use crate::foundation::error::{RayfleetError, RayfleetResult};
use crate::provider::cloud::ComputeApi;

const PRICE_PER_CORE_HOUR: f64 = 0.05;
/// GCE bills a 10-minute minimum per instance.
const MIN_BILLING_HOURS: f64 = 1.0 / 6.0;

/// GCE provisioning via `gcloud compute instances ...`.
pub struct GceComputeApi {
    keyfile: PathBuf,
    project: String,
    zone: String,
    activated: bool,
}

impl GceComputeApi {
    /// Backend using the service-account keyfile at `keyfile`.
    pub fn new(keyfile: impl Into<PathBuf>) -> Self {
        Self {
            keyfile: keyfile.into(),
            project: "rayfleet-prod".to_owned(),
            zone: "us-central1-b".to_owned(),
            activated: false,
        }
    }

    fn activate(&mut self) -> RayfleetResult<()> {
        if self.activated {
            return Ok(());
        }
        run_gcloud(Command::new("gcloud").args([
            "auth",
            "activate-service-account",
            "--key-file",
            &self.keyfile.display().to_string(),
            "--quiet",
        ]))?;
        self.activated = true;
        Ok(())
    }
}

impl ComputeApi for GceComputeApi {
    fn describe(&self) -> String {
        // The keyfile path stays out of logs; project and zone are not secrets.
        format!("GCE[{}/{}]", self.project, self.zone)
    }

    fn machine_type(&self, cores: u32) -> String {
        format!("n1-standard-{cores}")
    }

    fn launch(&mut self, names: &[String], cores: u32, boot_script: &str) -> RayfleetResult<()> {
        self.activate()?;
        let machine_type = self.machine_type(cores);
        for name in names {
            info!(%name, %machine_type, "creating GCE instance");
            run_gcloud(
                Command::new("gcloud")
                    .args(["compute", "instances", "create", name])
                    .args(["--project", &self.project])
                    .args(["--zone", &self.zone])
                    .args(["--machine-type", &machine_type])
                    .args(["--image-family", "ubuntu-2204-lts"])
                    .args(["--image-project", "ubuntu-os-cloud"])
                    .arg(format!("--metadata=startup-script={boot_script}"))
                    .args(["--format", "json", "--quiet"]),
            )?;
        }
        Ok(())
    }

    fn poll_ip(&mut self, name: &str) -> RayfleetResult<Option<String>> {
        let out = run_gcloud(
            Command::new("gcloud")
                .args(["compute", "instances", "describe", name])
                .args(["--project", &self.project])
                .args(["--zone", &self.zone])
                .args(["--format", "json"]),
        )?;
        let desc: Value = serde_json::from_slice(&out)
            .map_err(|e| RayfleetError::validation(format!("unparsable instance status: {e}")))?;
        if desc.get("status").and_then(Value::as_str) != Some("RUNNING") {
            return Ok(None);
        }
        let nat_ip = desc
            .pointer("/networkInterfaces/0/accessConfigs/0/natIP")
            .and_then(Value::as_str);
        Ok(nat_ip.map(str::to_owned))
    }

    fn terminate(&mut self, names: &[String]) -> RayfleetResult<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut cmd = Command::new("gcloud");
        cmd.args(["compute", "instances", "delete"]);
        cmd.args(names);
        cmd.args(["--project", &self.project])
            .args(["--zone", &self.zone])
            .args(["--quiet"]);
        run_gcloud(&mut cmd)?;
        Ok(())
    }

    fn billing(&self, cores: u32, instance_count: u32, duration_hours: f64) -> (String, f64) {
        let billing_hours = duration_hours.max(MIN_BILLING_HOURS);
        let price = PRICE_PER_CORE_HOUR
            * f64::from(cores)
            * f64::from(instance_count)
            * billing_hours;
        (
            format!(
                "GCE instance ({}) * {} for {:.1} hour",
                self.machine_type(cores),
                instance_count,
                billing_hours
            ),
            price,
        )
    }
}

fn run_gcloud(cmd: &mut Command) -> RayfleetResult<Vec<u8>> {
    let output = cmd
        .output()
        .map_err(|e| RayfleetError::validation(format!("failed to invoke gcloud: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RayfleetError::validation(format!(
            "gcloud exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_applies_ten_minute_minimum() {
        let api = GceComputeApi::new("/tmp/key.json");
        let (line, price) = api.billing(8, 2, 0.01);
        assert!(line.contains("n1-standard-8"));
        assert!((price - 0.05 * 8.0 * 2.0 * (1.0 / 6.0)).abs() < 1e-9);

        let (_, price_long) = api.billing(8, 2, 2.0);
        assert!((price_long - 0.05 * 8.0 * 2.0 * 2.0).abs() < 1e-9);
    }

    #[test]
    fn describe_names_no_credentials() {
        let api = GceComputeApi::new("/secret/path/key.json");
        assert!(!api.describe().contains("secret"));
    }
}
