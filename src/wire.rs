//! Protobuf wire messages exchanged with render workers.
//!
//! Requests and responses travel as `application/x-protobuf` HTTP bodies; the
//! job input file is a serialized [`RenderMovieTask`]. Messages are written
//! out with prost derives so the controller builds without a protoc step.

use prost::Message;

use crate::foundation::error::{RayfleetError, RayfleetResult};

/// Worker response status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum RenderStatus {
    /// Not set / unrecognized value.
    Unknown = 0,
    /// Tile rendered; `output_tile` is present.
    Success = 1,
    /// Worker does not hold the scene for the given scene id.
    SceneUnavailable = 2,
    /// Worker-side rendering failure; see `error_message`.
    RenderingError = 3,
}

/// Camera placement and projection for one frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CameraConfig {
    /// Projection model; workers currently accept `"perspective2"`.
    #[prost(string, tag = "1")]
    pub camera_type: String,
    #[prost(uint32, tag = "2")]
    pub size_x: u32,
    #[prost(uint32, tag = "3")]
    pub size_y: u32,
    /// Horizontal field of view in degrees, in (0, 180).
    #[prost(float, tag = "4")]
    pub fov_x: f32,
    /// Vertical field of view in degrees, in (0, 180).
    #[prost(float, tag = "5")]
    pub fov_y: f32,
    /// Camera pose; identity when absent.
    #[prost(message, optional, tag = "6")]
    pub local_to_world: Option<RigidTransform>,
}

/// Rotation + translation in the scene's 4-dimensional space.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RigidTransform {
    /// Row-major 4x4 rotation matrix; identity when empty.
    #[prost(float, repeated, tag = "1")]
    pub rotation: Vec<f32>,
    /// 4-element translation; origin when empty.
    #[prost(float, repeated, tag = "2")]
    pub translation: Vec<f32>,
}

/// One shard of work: render a single frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RenderTask {
    #[prost(uint64, tag = "1")]
    pub sample_per_pixel: u64,
    /// Scene description blob. Omitted when the worker is believed to hold a
    /// cached copy keyed by the request's scene id.
    #[prost(bytes = "vec", optional, tag = "2")]
    pub scene: Option<Vec<u8>>,
    #[prost(message, optional, tag = "3")]
    pub camera: Option<CameraConfig>,
}

/// Request body POSTed to a worker endpoint.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RenderRequest {
    #[prost(message, optional, tag = "1")]
    pub task: Option<RenderTask>,
    /// Job-constant identifier the worker uses to key its scene cache.
    #[prost(uint64, tag = "2")]
    pub scene_id: u64,
}

/// HDR tile encoded as two 8-bit PNG planes (mantissa, exponent).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ImageTile {
    #[prost(bytes = "vec", tag = "1")]
    pub blob_png_mantissa: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub blob_png_exponent: Vec<u8>,
}

/// Response body returned by a worker endpoint.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RenderResponse {
    #[prost(enumeration = "RenderStatus", tag = "1")]
    pub status: i32,
    #[prost(string, optional, tag = "2")]
    pub error_message: Option<String>,
    #[prost(message, optional, tag = "3")]
    pub output_tile: Option<ImageTile>,
}

impl RenderResponse {
    /// Shorthand for a success response carrying `tile`.
    pub fn success(tile: ImageTile) -> Self {
        Self {
            status: RenderStatus::Success as i32,
            error_message: None,
            output_tile: Some(tile),
        }
    }

    /// Shorthand for a scene-unavailable response.
    pub fn scene_unavailable() -> Self {
        Self {
            status: RenderStatus::SceneUnavailable as i32,
            error_message: None,
            output_tile: None,
        }
    }

    /// Shorthand for a worker-side error response.
    pub fn rendering_error(message: impl Into<String>) -> Self {
        Self {
            status: RenderStatus::RenderingError as i32,
            error_message: Some(message.into()),
            output_tile: None,
        }
    }
}

/// A whole movie job: shared scene plus ordered per-frame cameras.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RenderMovieTask {
    #[prost(bytes = "vec", tag = "1")]
    pub scene: Vec<u8>,
    /// One camera per output frame; the index is the frame number.
    #[prost(message, repeated, tag = "2")]
    pub frames: Vec<CameraConfig>,
    #[prost(float, tag = "3")]
    pub framerate: f32,
    #[prost(uint32, tag = "4")]
    pub width: u32,
    #[prost(uint32, tag = "5")]
    pub height: u32,
    #[prost(uint64, tag = "6")]
    pub sample_per_pixel: u64,
}

/// Serialize a message to bytes.
pub fn encode_message<M: Message>(msg: &M) -> Vec<u8> {
    let mut buf = Vec::with_capacity(msg.encoded_len());
    msg.encode(&mut buf)
        .expect("Vec<u8> encode target cannot run out of capacity");
    buf
}

/// Deserialize a message from bytes, surfacing failures as transport errors.
pub fn decode_message<M: Message + Default>(bytes: &[u8]) -> RayfleetResult<M> {
    M::decode(bytes).map_err(|e| RayfleetError::transport(format!("invalid wire message: {e}")))
}
