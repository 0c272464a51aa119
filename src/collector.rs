//! Frame collector: accumulates rendered tiles by frame index, then drives
//! tone mapping and MP4 encoding through the system `ffmpeg` binary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use rayon::prelude::*;
use tracing::info;

use crate::foundation::core::FrameIndex;
use crate::foundation::error::{RayfleetError, RayfleetResult};
use crate::tile::{HdrImage, decode_tile};
use crate::tonemap::tonemap;
use crate::wire::ImageTile;

/// Accumulates rendered tiles keyed by frame index.
///
/// Shard tasks write concurrently through [`FrameCollector::add`]; writes are
/// keyed by distinct frame indices, guarded by one mutex. The collection is
/// complete when every index in `[0, N)` is present.
pub struct FrameCollector {
    framerate: f32,
    tiles: Mutex<HashMap<u32, ImageTile>>,
    staging: Mutex<Option<tempfile::TempDir>>,
}

impl FrameCollector {
    /// Create a collector for a movie at `framerate` frames per second.
    pub fn new(framerate: f32) -> Self {
        Self {
            framerate,
            tiles: Mutex::new(HashMap::new()),
            staging: Mutex::new(None),
        }
    }

    /// Store the tile for `frame`. A re-render of the same frame replaces the
    /// previous tile without growing the collection.
    pub fn add(&self, frame: FrameIndex, tile: ImageTile) {
        let mut tiles = self.tiles.lock().expect("collector lock poisoned");
        tiles.insert(frame.0, tile);
    }

    /// Number of distinct frames collected so far.
    pub fn len(&self) -> usize {
        self.tiles.lock().expect("collector lock poisoned").len()
    }

    /// Whether no frames have been collected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return all tiles in frame-index order.
    ///
    /// Calling this with any index in `[0, len)` missing is a contract
    /// violation and fails.
    pub fn retrieve(&self) -> RayfleetResult<Vec<ImageTile>> {
        let tiles = self.tiles.lock().expect("collector lock poisoned");
        let mut out = Vec::with_capacity(tiles.len());
        for ix in 0..tiles.len() as u32 {
            let tile = tiles.get(&ix).ok_or_else(|| {
                RayfleetError::contract(format!(
                    "retrieving frames from an incomplete collection: index {ix} missing"
                ))
            })?;
            out.push(tile.clone());
        }
        Ok(out)
    }

    /// Tone-map the collected frames and encode them into `out_mp4`.
    ///
    /// LDR frames are staged as `frame-%06d.png` in a fresh temporary
    /// directory which lives until [`FrameCollector::clean`] (or drop).
    pub fn encode_to_mp4(&self, out_mp4: &Path) -> RayfleetResult<()> {
        let tiles = self.retrieve()?;

        let hdr_frames = tiles
            .par_iter()
            .map(decode_tile)
            .collect::<RayfleetResult<Vec<_>>>()?;
        let ldr_frames = tonemap(self.framerate, &hdr_frames);

        let staging = tempfile::Builder::new()
            .prefix("rayfleet-frames-")
            .tempdir()
            .map_err(|e| RayfleetError::codec(format!("create frame staging dir: {e}")))?;
        write_ldr_frames(staging.path(), &ldr_frames)?;

        info!(frames = ldr_frames.len(), out = %out_mp4.display(), "encoding mp4");
        run_ffmpeg(self.framerate, staging.path(), out_mp4)?;

        *self.staging.lock().expect("collector lock poisoned") = Some(staging);
        Ok(())
    }

    /// Remove the temporary staging directory from the last encode.
    pub fn clean(&self) {
        // Dropping the TempDir deletes it.
        let _ = self
            .staging
            .lock()
            .expect("collector lock poisoned")
            .take();
    }
}

/// Write LDR frames into `dir` as `frame-000000.png`, `frame-000001.png`, …
/// in strictly ascending index order. Returns the written paths.
pub fn write_ldr_frames(dir: &Path, frames: &[HdrImage]) -> RayfleetResult<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(frames.len());
    for (ix, frame) in frames.iter().enumerate() {
        let path = dir.join(format!("frame-{ix:06}.png"));
        std::fs::write(&path, frame.to_saturated_png()?)
            .map_err(|e| RayfleetError::codec(format!("write '{}': {e}", path.display())))?;
        paths.push(path);
    }
    Ok(paths)
}

fn run_ffmpeg(framerate: f32, staging: &Path, out_mp4: &Path) -> RayfleetResult<()> {
    if !is_ffmpeg_on_path() {
        return Err(RayfleetError::validation(
            "ffmpeg is required for MP4 encoding, but was not found on PATH",
        ));
    }

    let pattern = staging.join("frame-%06d.png");
    let output = Command::new("ffmpeg")
        .arg("-y")
        .args(["-framerate", &framerate.to_string()])
        .arg("-i")
        .arg(&pattern)
        .args(["-pix_fmt", "yuv444p"])
        .args(["-crf", "18"])
        .args(["-c:v", "libx264"])
        .args(["-loglevel", "warning"])
        .args(["-r", &framerate.to_string()])
        .arg(out_mp4)
        .output()
        .map_err(|e| RayfleetError::codec(format!("failed to spawn ffmpeg: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RayfleetError::codec(format!(
            "ffmpeg exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::encode_tile;

    fn tile(v: f32) -> ImageTile {
        encode_tile(&HdrImage::filled(2, 2, [v, v, v])).unwrap()
    }

    #[test]
    fn retrieve_orders_by_index_not_insertion() {
        let collector = FrameCollector::new(24.0);
        collector.add(FrameIndex(2), tile(3.0));
        collector.add(FrameIndex(0), tile(1.0));
        collector.add(FrameIndex(1), tile(2.0));

        let tiles = collector.retrieve().unwrap();
        assert_eq!(tiles.len(), 3);
        for (ix, t) in tiles.iter().enumerate() {
            let hdr = decode_tile(t).unwrap();
            let expected = (ix + 1) as f32;
            let ratio = hdr.values[0] / expected;
            assert!((0.99..=1.01).contains(&ratio));
        }
    }

    #[test]
    fn retrieve_with_gap_is_a_contract_violation() {
        let collector = FrameCollector::new(24.0);
        collector.add(FrameIndex(0), tile(1.0));
        collector.add(FrameIndex(2), tile(3.0));

        let err = collector.retrieve().unwrap_err();
        assert!(err.to_string().contains("contract violation"));
    }

    #[test]
    fn rerender_replaces_without_double_count() {
        let collector = FrameCollector::new(24.0);
        collector.add(FrameIndex(0), tile(1.0));
        collector.add(FrameIndex(0), tile(5.0));
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn staged_frames_are_named_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let frames: Vec<HdrImage> = (0..12)
            .map(|i| HdrImage::filled(2, 2, [i as f32, 0.0, 0.0]))
            .collect();

        let paths = write_ldr_frames(dir.path(), &frames).unwrap();
        assert_eq!(paths.len(), 12);
        assert_eq!(
            paths[0].file_name().unwrap().to_str().unwrap(),
            "frame-000000.png"
        );
        assert_eq!(
            paths[11].file_name().unwrap().to_str().unwrap(),
            "frame-000011.png"
        );
        for pair in paths.windows(2) {
            assert!(pair[0] < pair[1], "paths must ascend strictly");
        }

        // Exactly N distinct files on disk, no extras.
        let mut on_disk: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        on_disk.sort();
        assert_eq!(on_disk.len(), 12);
        assert_eq!(on_disk[0], "frame-000000.png");
        assert_eq!(on_disk[11], "frame-000011.png");
    }
}
