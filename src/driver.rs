//! Job driver: sizes the fleet from the job's difficulty, instantiates the
//! selected provider, drives the worker pool, and encodes the result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::collector::FrameCollector;
use crate::debug::DebugFrontend;
use crate::foundation::error::{RayfleetError, RayfleetResult};
use crate::job::MovieJob;
use crate::pool::WorkerPool;
use crate::provider::aws::{AwsComputeApi, AwsCredential};
use crate::provider::cloud::CloudFleetProvider;
use crate::provider::fake::FakeProvider;
use crate::provider::gce::GceComputeApi;
use crate::provider::local::LocalDockerProvider;
use crate::provider::Provider;

/// Wall-clock target the fleet is sized against: finish in about 10 minutes.
pub const TARGET_WALL_CLOCK_HOURS: f64 = 10.0 / 60.0;

/// Which provider families the invocation asked for.
#[derive(Clone, Debug, Default)]
pub struct ProviderSelection {
    pub local: bool,
    pub gce_keyfile: Option<PathBuf>,
    pub aws_credentials: Option<PathBuf>,
    pub fake: bool,
}

/// Instantiate the requested providers.
///
/// Providers whose credentials cannot be loaded are skipped with a warning,
/// so the result can be shorter than the selection. The job driver requires
/// exactly one usable provider.
pub fn create_providers(
    selection: &ProviderSelection,
    cores_needed: f64,
    duration_hours: f64,
    debug: Option<&DebugFrontend>,
) -> Vec<Box<dyn Provider>> {
    let mut providers: Vec<Box<dyn Provider>> = Vec::new();

    if selection.local {
        providers.push(Box::new(LocalDockerProvider::new()));
    }
    if let Some(keyfile) = &selection.gce_keyfile {
        match std::fs::metadata(keyfile) {
            Ok(_) => {
                let fleet = CloudFleetProvider::new(
                    GceComputeApi::new(keyfile),
                    cores_needed,
                    duration_hours,
                );
                if let Some(debug) = debug {
                    debug.register(fleet.status_panel());
                }
                providers.push(Box::new(fleet));
            }
            Err(e) => warn!(
                keyfile = %keyfile.display(),
                error = %e,
                "ignoring GCE because the credential keyfile is unreadable"
            ),
        }
    }
    if let Some(path) = &selection.aws_credentials {
        match AwsCredential::load(path) {
            Ok(credential) => {
                let fleet = CloudFleetProvider::new(
                    AwsComputeApi::new(credential),
                    cores_needed,
                    duration_hours,
                );
                if let Some(debug) = debug {
                    debug.register(fleet.status_panel());
                }
                providers.push(Box::new(fleet));
            }
            Err(e) => warn!(error = %e, "ignoring AWS because credentials could not be loaded"),
        }
    }
    if selection.fake {
        providers.push(Box::new(FakeProvider::new()));
    }

    providers
}

/// Load the job and report its sizing numbers.
pub fn plan_job(input: &Path) -> RayfleetResult<(Arc<MovieJob>, f64)> {
    let job = MovieJob::load(input)?;
    let difficulty = job.difficulty_core_hours();
    let cores_needed = job.cores_needed(TARGET_WALL_CLOCK_HOURS);
    info!(
        frames = job.frame_count(),
        difficulty_core_hours = difficulty,
        cores_needed,
        target_hours = TARGET_WALL_CLOCK_HOURS,
        "job sized"
    );
    Ok((Arc::new(job), cores_needed))
}

/// Render the whole movie through `provider` and encode it to `out_mp4`.
pub fn render_movie(
    job: Arc<MovieJob>,
    provider: Box<dyn Provider>,
    out_mp4: &Path,
    debug: Option<&DebugFrontend>,
) -> RayfleetResult<()> {
    let collector = Arc::new(FrameCollector::new(job.framerate));
    let mut pool = WorkerPool::new(provider, job.clone(), collector.clone())?;
    if let Some(debug) = debug {
        debug.register(pool.status_panel());
    }

    info!(shards = job.frame_count(), "submitting shards");
    for shard in job.shards() {
        pool.submit(shard)?;
    }
    pool.wait_finish()?;

    info!(out = %out_mp4.display(), "all shards finished; encoding");
    collector.encode_to_mp4(out_mp4)?;
    collector.clean();
    Ok(())
}

/// Pick the single provider the job will run on.
pub fn select_single_provider(
    mut providers: Vec<Box<dyn Provider>>,
) -> RayfleetResult<Box<dyn Provider>> {
    match providers.len() {
        1 => Ok(providers.remove(0)),
        0 => Err(RayfleetError::validation(
            "you need at least one usable provider",
        )),
        n => Err(RayfleetError::validation(format!(
            "exactly one provider must be selected, got {n}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_selection_yields_one_provider() {
        let selection = ProviderSelection {
            fake: true,
            ..Default::default()
        };
        let providers = create_providers(&selection, 1.0, TARGET_WALL_CLOCK_HOURS, None);
        assert_eq!(providers.len(), 1);
        assert!(select_single_provider(providers).is_ok());
    }

    #[test]
    fn missing_gce_keyfile_is_skipped() {
        let selection = ProviderSelection {
            gce_keyfile: Some(PathBuf::from("/nonexistent/keyfile.json")),
            ..Default::default()
        };
        let providers = create_providers(&selection, 1.0, TARGET_WALL_CLOCK_HOURS, None);
        assert!(providers.is_empty());
        assert!(select_single_provider(providers).is_err());
    }

    #[test]
    fn selecting_two_providers_is_rejected() {
        let selection = ProviderSelection {
            local: true,
            fake: true,
            ..Default::default()
        };
        let providers = create_providers(&selection, 1.0, TARGET_WALL_CLOCK_HOURS, None);
        assert_eq!(providers.len(), 2);
        let err = match select_single_provider(providers) {
            Err(err) => err,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err.to_string().contains("exactly one"));
    }
}
