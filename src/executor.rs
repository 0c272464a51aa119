//! Shard executor: renders one (frame, camera) pair on one endpoint,
//! including the cache-aware retry loop.

use tracing::{info, warn};

use crate::cache::SceneCache;
use crate::collector::FrameCollector;
use crate::foundation::error::{RayfleetError, RayfleetResult};
use crate::job::{MovieJob, Shard};
use crate::rpc::RpcEndpoint;
use crate::wire::{RenderRequest, RenderStatus, RenderTask};

/// Render `shard` on `endpoint`, storing the tile into `collector` on success.
///
/// Each loop iteration issues exactly one RPC. The scene blob is omitted when
/// the endpoint is believed cache-warm; a `SCENE_UNAVAILABLE` answer to such a
/// request marks the endpoint cold and retries once more with the scene
/// included. A `SCENE_UNAVAILABLE` answer to a request that already carried
/// the scene is a protocol violation by the worker and fails the shard.
pub fn execute_shard(
    cache: &SceneCache,
    job: &MovieJob,
    shard: &Shard,
    endpoint: &dyn RpcEndpoint,
    collector: &FrameCollector,
) -> RayfleetResult<()> {
    loop {
        info!(frame = %shard.frame, endpoint = endpoint.id(), "rendering shard");

        let use_cache = cache.is_warm(endpoint.id());
        let request = RenderRequest {
            task: Some(RenderTask {
                sample_per_pixel: job.sample_per_pixel,
                scene: if use_cache {
                    None
                } else {
                    Some(job.scene.clone())
                },
                camera: Some(shard.camera.clone()),
            }),
            scene_id: cache.scene_id(),
        };

        let response = endpoint.do_render(&request)?;
        match response.status() {
            RenderStatus::Success => {
                cache.set_warm(endpoint.id(), true);
                let tile = response.output_tile.ok_or_else(|| {
                    RayfleetError::worker(format!(
                        "endpoint {} reported success without a tile",
                        endpoint.id()
                    ))
                })?;
                collector.add(shard.frame, tile);
                info!(frame = %shard.frame, "shard complete");
                return Ok(());
            }
            RenderStatus::SceneUnavailable => {
                cache.set_warm(endpoint.id(), false);
                if use_cache {
                    warn!(
                        endpoint = endpoint.id(),
                        "cache unavailable despite expectation; resending with scene"
                    );
                    continue;
                }
                return Err(RayfleetError::worker(format!(
                    "endpoint {} reported SCENE_UNAVAILABLE for a request carrying the scene",
                    endpoint.id()
                )));
            }
            RenderStatus::RenderingError | RenderStatus::Unknown => {
                let message = response
                    .error_message
                    .unwrap_or_else(|| "worker returned no error message".to_owned());
                return Err(RayfleetError::worker(format!(
                    "endpoint {}: {message}",
                    endpoint.id()
                )));
            }
        }
    }
}
