//! RPC endpoints: the uniform request/response seam between the dispatcher
//! and a worker, remote (HTTP + protobuf) or in-process (fake worker).

use std::collections::HashMap;
use std::io::Read as _;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};
use tracing::debug;

use crate::foundation::error::{RayfleetError, RayfleetResult};
use crate::tile::{HdrImage, encode_tile};
use crate::wire::{RenderRequest, RenderResponse, decode_message, encode_message};

/// Content type used for all worker traffic.
pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// A live RPC target that can process render shards.
///
/// Implementations must be shareable across threads; the dispatcher clones an
/// `Arc<dyn RpcEndpoint>` into each shard task.
pub trait RpcEndpoint: Send + Sync {
    /// Submit one render request and wait for the response.
    ///
    /// Transport and deserialization failures surface as errors; worker-side
    /// failures are carried inside the response status.
    fn do_render(&self, request: &RenderRequest) -> RayfleetResult<RenderResponse>;

    /// Stable opaque identity. For HTTP endpoints this is the URL.
    fn id(&self) -> &str;
}

/// Endpoint reached over HTTP POST with protobuf bodies.
pub struct HttpEndpoint {
    url: String,
    agent: ureq::Agent,
}

impl HttpEndpoint {
    /// Create an endpoint for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            agent: ureq::AgentBuilder::new().build(),
        }
    }
}

impl RpcEndpoint for HttpEndpoint {
    fn do_render(&self, request: &RenderRequest) -> RayfleetResult<RenderResponse> {
        let body = encode_message(request);
        let resp = self
            .agent
            .post(&self.url)
            .set("Content-Type", PROTOBUF_CONTENT_TYPE)
            .send_bytes(&body)
            .map_err(|e| RayfleetError::transport(format!("RPC to {} failed: {e}", self.url)))?;

        let mut raw = Vec::new();
        resp.into_reader()
            .read_to_end(&mut raw)
            .map_err(|e| RayfleetError::transport(format!("reading RPC response body: {e}")))?;
        decode_message(&raw)
    }

    fn id(&self) -> &str {
        &self.url
    }
}

/// Probability that the fake worker keeps a cached scene across one call.
pub const FAKE_KEEP_PROBABILITY: f32 = 0.25;

/// In-process worker for exercising the dispatcher without a network.
///
/// Renders a flat red tile at the requested camera size, maintains a scene
/// cache keyed by scene id, and randomly forgets cached scenes to exercise
/// the cache-miss path.
pub struct FakeEndpoint {
    id: String,
    state: Mutex<FakeWorkerState>,
}

struct FakeWorkerState {
    rng: StdRng,
    keep_probability: f32,
    scenes: HashMap<u64, Vec<u8>>,
}

impl FakeEndpoint {
    /// Create a fake worker with the default cache-forgetting behavior.
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_keep_probability(id, FAKE_KEEP_PROBABILITY, 1)
    }

    /// Create a fake worker with explicit keep probability and RNG seed.
    ///
    /// `keep_probability = 1.0` gives a worker that never forgets, which
    /// makes cache-path tests deterministic.
    pub fn with_keep_probability(id: impl Into<String>, keep_probability: f32, seed: u64) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(FakeWorkerState {
                rng: StdRng::seed_from_u64(seed),
                keep_probability,
                scenes: HashMap::new(),
            }),
        }
    }
}

impl RpcEndpoint for FakeEndpoint {
    fn do_render(&self, request: &RenderRequest) -> RayfleetResult<RenderResponse> {
        let mut state = self.state.lock().expect("fake worker lock poisoned");

        // Simulate realistic memory pressure: each call may drop cached scenes.
        let FakeWorkerState {
            rng,
            keep_probability,
            scenes,
        } = &mut *state;
        let mut dropped = 0usize;
        scenes.retain(|_, _| {
            let kept = rng.r#gen::<f32>() < *keep_probability;
            if !kept {
                dropped += 1;
            }
            kept
        });
        if dropped > 0 {
            debug!(dropped, "fake worker invalidated cached scenes");
        }

        let Some(task) = request.task.as_ref() else {
            return Ok(RenderResponse::rendering_error("request carries no task"));
        };

        match task.scene.as_ref() {
            None => {
                if !state.scenes.contains_key(&request.scene_id) {
                    return Ok(RenderResponse::scene_unavailable());
                }
            }
            Some(scene) => {
                state.scenes.insert(request.scene_id, scene.clone());
            }
        }

        let Some(camera) = task.camera.as_ref() else {
            return Ok(RenderResponse::rendering_error("camera not found"));
        };

        let tile = encode_tile(&HdrImage::filled(
            camera.size_x,
            camera.size_y,
            [255.0, 0.0, 0.0],
        ))?;
        Ok(RenderResponse::success(tile))
    }

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{CameraConfig, RenderStatus, RenderTask};

    fn request(scene: Option<Vec<u8>>, scene_id: u64) -> RenderRequest {
        RenderRequest {
            task: Some(RenderTask {
                sample_per_pixel: 4,
                scene,
                camera: Some(CameraConfig {
                    camera_type: "perspective2".to_owned(),
                    size_x: 4,
                    size_y: 3,
                    fov_x: 90.0,
                    fov_y: 60.0,
                    local_to_world: None,
                }),
            }),
            scene_id,
        }
    }

    #[test]
    fn fake_renders_red_tile_at_camera_size() {
        let ep = FakeEndpoint::with_keep_probability("fake", 1.0, 1);
        let resp = ep.do_render(&request(Some(vec![9]), 7)).unwrap();
        assert_eq!(resp.status(), RenderStatus::Success);

        let hdr = crate::tile::decode_tile(resp.output_tile.as_ref().unwrap()).unwrap();
        assert_eq!((hdr.width, hdr.height), (4, 3));
        // Zero channels decode to the smallest representable value.
        assert_eq!(hdr.values[0], 255.0);
        assert_eq!(hdr.values[1], 2.0f32.powi(-127));
        assert_eq!(hdr.values[2], 2.0f32.powi(-127));
    }

    #[test]
    fn fake_reports_scene_unavailable_without_cache() {
        let ep = FakeEndpoint::with_keep_probability("fake", 1.0, 1);
        let resp = ep.do_render(&request(None, 7)).unwrap();
        assert_eq!(resp.status(), RenderStatus::SceneUnavailable);

        // After a request carrying the scene, the cache-only path succeeds.
        ep.do_render(&request(Some(vec![9]), 7)).unwrap();
        let resp = ep.do_render(&request(None, 7)).unwrap();
        assert_eq!(resp.status(), RenderStatus::Success);
    }

    #[test]
    fn fake_forgets_scenes_when_keep_probability_is_zero() {
        let ep = FakeEndpoint::with_keep_probability("fake", 0.0, 1);
        ep.do_render(&request(Some(vec![9]), 7)).unwrap();
        // The cached scene is invalidated at the start of the next call.
        let resp = ep.do_render(&request(None, 7)).unwrap();
        assert_eq!(resp.status(), RenderStatus::SceneUnavailable);
    }

    #[test]
    fn fake_rejects_missing_camera() {
        let ep = FakeEndpoint::with_keep_probability("fake", 1.0, 1);
        let mut req = request(Some(vec![9]), 7);
        req.task.as_mut().unwrap().camera = None;
        let resp = ep.do_render(&req).unwrap();
        assert_eq!(resp.status(), RenderStatus::RenderingError);
        assert!(resp.error_message.unwrap().contains("camera"));
    }
}
