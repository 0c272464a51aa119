//! Job model: the decoded movie task, work shards, and the sizing estimate.

use std::path::Path;

use anyhow::Context as _;

use crate::foundation::core::FrameIndex;
use crate::foundation::error::{RayfleetError, RayfleetResult};
use crate::wire::{CameraConfig, RenderMovieTask, decode_message};

/// Rendering throughput assumed by the difficulty estimator, in path-tracing
/// samples per core-second.
pub const SAMPLES_PER_CORE_SEC: f64 = 15_000.0;

/// A movie rendering job, immutable after load.
#[derive(Clone, Debug)]
pub struct MovieJob {
    /// Opaque scene blob shared by every frame.
    pub scene: Vec<u8>,
    /// Per-frame camera configurations; the index is the frame number.
    pub frames: Vec<CameraConfig>,
    pub framerate: f32,
    pub width: u32,
    pub height: u32,
    pub sample_per_pixel: u64,
}

/// One unit of work: a single frame's camera paired with the shared scene.
#[derive(Clone, Debug)]
pub struct Shard {
    pub frame: FrameIndex,
    pub camera: CameraConfig,
}

impl MovieJob {
    /// Load and validate a job from a serialized [`RenderMovieTask`] file.
    pub fn load(path: &Path) -> RayfleetResult<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read job input '{}'", path.display()))?;
        let task: RenderMovieTask = decode_message(&bytes)
            .map_err(|e| RayfleetError::codec(format!("job input is not a RenderMovieTask: {e}")))?;
        Self::from_task(task)
    }

    /// Validate a decoded task.
    pub fn from_task(task: RenderMovieTask) -> RayfleetResult<Self> {
        if task.frames.is_empty() {
            return Err(RayfleetError::validation("job contains no frames"));
        }
        if task.framerate <= 0.0 {
            return Err(RayfleetError::validation("job framerate must be positive"));
        }
        if task.width == 0 || task.height == 0 {
            return Err(RayfleetError::validation(
                "job width/height must be non-zero",
            ));
        }
        Ok(Self {
            scene: task.scene,
            frames: task.frames,
            framerate: task.framerate,
            width: task.width,
            height: task.height,
            sample_per_pixel: task.sample_per_pixel,
        })
    }

    /// Number of output frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Shards in frame-index order.
    pub fn shards(&self) -> impl Iterator<Item = Shard> + '_ {
        self.frames.iter().enumerate().map(|(ix, camera)| Shard {
            frame: FrameIndex(ix as u32),
            camera: camera.clone(),
        })
    }

    /// Estimated difficulty in core-hours.
    pub fn difficulty_core_hours(&self) -> f64 {
        let samples = self.frames.len() as f64
            * f64::from(self.width)
            * f64::from(self.height)
            * self.sample_per_pixel as f64;
        samples / SAMPLES_PER_CORE_SEC / 3600.0
    }

    /// Cores needed to finish within `target_hours` of wall clock.
    pub fn cores_needed(&self, target_hours: f64) -> f64 {
        self.difficulty_core_hours() / target_hours
    }
}
