//! Amazon EC2 backend for [`CloudFleetProvider`], driven through the `aws`
//! CLI (the SDK proper is an external collaborator).

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use anyhow::Context as _;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::foundation::error::{RayfleetError, RayfleetResult};
use crate::provider::cloud::ComputeApi;

const IMAGE_ID: &str = "ami-0d114f2951";
const REGION: &str = "us-west-1";

/// Static access credentials as stored in the `--aws` JSON file.
#[derive(Clone, Deserialize)]
pub struct AwsCredential {
    pub access_key: String,
    pub secret_access_key: String,
}

impl AwsCredential {
    /// Load and validate credentials from a JSON file.
    pub fn load(path: &Path) -> RayfleetResult<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("read AWS credential file '{}'", path.display()))?;
        let cred: Self = serde_json::from_slice(&raw)
            .map_err(|e| RayfleetError::validation(format!("invalid AWS credential JSON: {e}")))?;
        if cred.access_key.is_empty() || cred.secret_access_key.is_empty() {
            return Err(RayfleetError::validation(
                "AWS credential file must set access_key and secret_access_key",
            ));
        }
        Ok(cred)
    }
}

/// EC2 provisioning via `aws ec2 ...`.
pub struct AwsComputeApi {
    credential: AwsCredential,
    /// Fleet instance name -> EC2 instance id, filled by `launch`.
    instance_ids: HashMap<String, String>,
}

impl AwsComputeApi {
    pub fn new(credential: AwsCredential) -> Self {
        Self {
            credential,
            instance_ids: HashMap::new(),
        }
    }

    fn run_aws(&self, cmd: &mut Command) -> RayfleetResult<Vec<u8>> {
        let output = cmd
            .env("AWS_ACCESS_KEY_ID", &self.credential.access_key)
            .env("AWS_SECRET_ACCESS_KEY", &self.credential.secret_access_key)
            .env("AWS_DEFAULT_REGION", REGION)
            .output()
            .map_err(|e| RayfleetError::validation(format!("failed to invoke aws: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RayfleetError::validation(format!(
                "aws exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

impl ComputeApi for AwsComputeApi {
    fn describe(&self) -> String {
        // Credentials never appear here.
        format!("EC2[{REGION}]")
    }

    fn machine_type(&self, cores: u32) -> String {
        match cores {
            0..=2 => "c4.large",
            3..=4 => "c4.xlarge",
            5..=8 => "c4.2xlarge",
            9..=16 => "c4.4xlarge",
            _ => "c4.8xlarge",
        }
        .to_owned()
    }

    fn launch(&mut self, names: &[String], cores: u32, boot_script: &str) -> RayfleetResult<()> {
        let instance_type = self.machine_type(cores);
        info!(count = names.len(), %instance_type, "launching EC2 instances");
        let out = self.run_aws(
            Command::new("aws")
                .args(["ec2", "run-instances"])
                .args(["--image-id", IMAGE_ID])
                .args(["--count", &names.len().to_string()])
                .args(["--instance-type", &instance_type])
                .args(["--user-data", boot_script])
                .args(["--output", "json"]),
        )?;
        let resp: Value = serde_json::from_slice(&out)
            .map_err(|e| RayfleetError::validation(format!("unparsable run-instances JSON: {e}")))?;
        let instances = resp
            .get("Instances")
            .and_then(Value::as_array)
            .ok_or_else(|| RayfleetError::validation("run-instances returned no Instances"))?;
        if instances.len() != names.len() {
            return Err(RayfleetError::validation(format!(
                "asked for {} instances, EC2 started {}",
                names.len(),
                instances.len()
            )));
        }
        for (name, inst) in names.iter().zip(instances) {
            let id = inst
                .get("InstanceId")
                .and_then(Value::as_str)
                .ok_or_else(|| RayfleetError::validation("instance without InstanceId"))?;
            self.instance_ids.insert(name.clone(), id.to_owned());
        }
        Ok(())
    }

    fn poll_ip(&mut self, name: &str) -> RayfleetResult<Option<String>> {
        let Some(id) = self.instance_ids.get(name).cloned() else {
            return Err(RayfleetError::validation(format!(
                "unknown fleet instance '{name}'"
            )));
        };
        let out = self.run_aws(
            Command::new("aws")
                .args(["ec2", "describe-instances"])
                .args(["--instance-ids", &id])
                .args(["--output", "json"]),
        )?;
        let resp: Value = serde_json::from_slice(&out).map_err(|e| {
            RayfleetError::validation(format!("unparsable describe-instances JSON: {e}"))
        })?;
        let instance = resp.pointer("/Reservations/0/Instances/0");
        let Some(instance) = instance else {
            return Ok(None);
        };
        if instance.pointer("/State/Name").and_then(Value::as_str) != Some("running") {
            return Ok(None);
        }
        Ok(instance
            .get("PublicIpAddress")
            .and_then(Value::as_str)
            .map(str::to_owned))
    }

    fn terminate(&mut self, names: &[String]) -> RayfleetResult<()> {
        let ids: Vec<String> = names
            .iter()
            .filter_map(|n| self.instance_ids.get(n).cloned())
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        let mut cmd = Command::new("aws");
        cmd.args(["ec2", "terminate-instances", "--instance-ids"]);
        cmd.args(&ids);
        cmd.args(["--output", "json"]);
        self.run_aws(&mut cmd)?;
        Ok(())
    }

    fn billing(&self, cores: u32, instance_count: u32, _duration_hours: f64) -> (String, f64) {
        let instance_type = self.machine_type(cores);
        let price_per_hour = match instance_type.as_str() {
            "c4.large" => 0.116,
            "c4.xlarge" => 0.232,
            "c4.2xlarge" => 0.464,
            "c4.4xlarge" => 0.928,
            _ => 1.856,
        } * f64::from(instance_count);
        (
            format!("EC2 on-demand instance ({instance_type}) * {instance_count}"),
            price_per_hour,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> AwsCredential {
        AwsCredential {
            access_key: "AKIATEST".to_owned(),
            secret_access_key: "secret".to_owned(),
        }
    }

    #[test]
    fn credential_file_requires_both_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cred.json");
        std::fs::write(&path, br#"{"access_key": "", "secret_access_key": "x"}"#).unwrap();
        assert!(AwsCredential::load(&path).is_err());

        std::fs::write(
            &path,
            br#"{"access_key": "AKIA", "secret_access_key": "x"}"#,
        )
        .unwrap();
        assert!(AwsCredential::load(&path).is_ok());
    }

    #[test]
    fn machine_ladder_covers_core_needs() {
        let api = AwsComputeApi::new(credential());
        assert_eq!(api.machine_type(1), "c4.large");
        assert_eq!(api.machine_type(4), "c4.xlarge");
        assert_eq!(api.machine_type(8), "c4.2xlarge");
        assert_eq!(api.machine_type(16), "c4.4xlarge");
        assert_eq!(api.machine_type(32), "c4.8xlarge");
    }

    #[test]
    fn describe_and_billing_carry_no_secrets() {
        let api = AwsComputeApi::new(credential());
        assert!(!api.describe().contains("secret"));
        let (line, price) = api.billing(32, 4, 1.0);
        assert!(line.contains("c4.8xlarge"));
        assert!((price - 1.856 * 4.0).abs() < 1e-9);
        assert!(!line.contains("AKIA"));
    }
}
