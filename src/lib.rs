//! rayfleet is the controller of an elastic path-tracing render farm.
//!
//! A movie job (a shared scene plus ordered per-frame cameras) is fanned out
//! as one shard per frame to worker processes living in ephemeral compute
//! instances: a local container, cloud VMs, or an in-process fake. Rendered
//! HDR tiles are collected by frame index, tone-mapped with temporal
//! adaptation, and encoded into a single H.264/MP4 file.
//!
//! # Pipeline overview
//!
//! 1. **Load**: decode a [`MovieJob`] from a serialized `RenderMovieTask`
//! 2. **Size**: estimate core-hours and pick a fleet shape for the provider
//! 3. **Dispatch**: [`WorkerPool`] matches shards to endpoints from the
//!    provider stream, re-queueing failures and evicting bad endpoints
//! 4. **Collect**: tiles land in the [`FrameCollector`] keyed by frame index
//! 5. **Encode**: tone-map and hand LDR frames to the system `ffmpeg`
//!
//! Providers follow a strict lifecycle (`constructed -> prepared ->
//! discarded`); once prepared, resources are released on every exit path.
#![forbid(unsafe_code)]

pub mod cache;
pub mod collector;
pub mod debug;
pub mod driver;
pub mod executor;
pub mod foundation;
pub mod job;
pub mod pool;
pub mod provider;
pub mod rpc;
pub mod tile;
pub mod tonemap;
pub mod wire;

pub use crate::cache::SceneCache;
pub use crate::collector::FrameCollector;
pub use crate::foundation::core::FrameIndex;
pub use crate::foundation::error::{RayfleetError, RayfleetResult};
pub use crate::job::{MovieJob, Shard};
pub use crate::pool::{MAX_FAILURES, PoolStatus, WorkerPool};
pub use crate::provider::{EndpointStream, Provider};
pub use crate::rpc::{FakeEndpoint, HttpEndpoint, RpcEndpoint};
pub use crate::tile::{HdrImage, decode_tile, encode_tile};
