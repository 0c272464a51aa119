//! Temporal-adaptation tone mapping: maps an HDR frame sequence into
//! display range, smoothing the per-frame exposure the way a pupil adapts.

use rayon::prelude::*;

use crate::tile::HdrImage;

/// Pupillary reflex latency driving the adaptation blend, in seconds.
pub const ADAPTATION_LATENCY_SECS: f64 = 0.25;

/// Display gamma applied after exposure scaling.
pub const DISPLAY_GAMMA: f64 = 2.2;

/// Per-frame blend ratio `a = 1 - 0.1^(1 / (framerate * latency))`.
pub fn blend_ratio(framerate: f32) -> f64 {
    1.0 - 0.1f64.powf(1.0 / (f64::from(framerate) * ADAPTATION_LATENCY_SECS))
}

/// 99th-percentile luminance proxy: sort all channel values and pick the one
/// at `floor(0.99 * count)`.
///
/// Returns the smallest positive double for empty or fully black frames so
/// the logarithmic blend below stays finite.
pub fn percentile_99(values: &[f32]) -> f64 {
    if values.is_empty() {
        return f64::MIN_POSITIVE;
    }
    let mut sorted: Vec<f64> = values.iter().map(|&v| f64::from(v)).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pick = sorted[(sorted.len() as f64 * 0.99) as usize];
    pick.max(f64::MIN_POSITIVE)
}

/// Tone-map `frames` (in index order) into display-range images.
///
/// Output channel values land in `[0, 255]` up to gamma overshoot on the
/// brightest pixels; the PNG writer saturates them.
pub fn tonemap(framerate: f32, frames: &[HdrImage]) -> Vec<HdrImage> {
    let ratio = blend_ratio(framerate);

    // Per-frame analysis is independent; the adaptation blend below is not.
    let max99: Vec<f64> = frames
        .par_iter()
        .map(|frame| percentile_99(&frame.values))
        .collect();

    let mut adapted = Vec::with_capacity(frames.len());
    let mut prev: Option<f64> = None;
    for &m in &max99 {
        let smooth = match prev {
            None => m,
            Some(p) => ((1.0 - ratio) * p.ln() + ratio * m.ln()).exp(),
        };
        adapted.push(smooth);
        prev = Some(smooth);
    }

    frames
        .par_iter()
        .zip(adapted.par_iter())
        .map(|(frame, &scale)| {
            let values = frame
                .values
                .iter()
                .map(|&v| ((f64::from(v) / scale).powf(1.0 / DISPLAY_GAMMA) * 255.0) as f32)
                .collect();
            HdrImage {
                width: frame.width,
                height: frame.height,
                values,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_ratio_matches_formula() {
        let a = blend_ratio(24.0);
        let expected = 1.0 - 0.1f64.powf(1.0 / 6.0);
        assert!((a - expected).abs() < 1e-12);
    }

    #[test]
    fn percentile_picks_by_floor_index() {
        // 100 values 0..100: floor(0.99 * 100) = index 99 -> value 99.
        let values: Vec<f32> = (0..100).map(|i| i as f32).collect();
        assert_eq!(percentile_99(&values), 99.0);
        // Order must not matter.
        let mut rev = values.clone();
        rev.reverse();
        assert_eq!(percentile_99(&rev), 99.0);
    }

    #[test]
    fn flat_frame_maps_to_full_scale() {
        let frames = vec![HdrImage::filled(4, 4, [100.0, 100.0, 100.0])];
        let out = tonemap(24.0, &frames);
        for &v in &out[0].values {
            assert!((v - 255.0).abs() < 1e-3, "v={v}");
        }
    }

    #[test]
    fn adaptation_converges_regardless_of_start() {
        // A bright first frame followed by a long run of constant luminance:
        // the output converges to full scale within a few adaptation windows.
        let fps = 24.0f32;
        let mut frames = vec![HdrImage::filled(2, 2, [1000.0, 1000.0, 1000.0])];
        let steady = 20;
        for _ in 0..steady {
            frames.push(HdrImage::filled(2, 2, [1.0, 1.0, 1.0]));
        }

        let out = tonemap(fps, &frames);
        let last = out.last().unwrap().values[0];
        assert!((last - 255.0).abs() < 2.0, "last={last}");

        // And the approach is monotone: once the scene dims, outputs only rise.
        let mids: Vec<f32> = out[1..].iter().map(|f| f.values[0]).collect();
        for pair in mids.windows(2) {
            assert!(pair[1] >= pair[0] - 1e-3);
        }
    }

    #[test]
    fn gradient_pair_maps_percentile_to_full_scale_with_smoothing() {
        // Two gradient frames: peak luminance 1e3, then 1e-2.
        let gradient = |peak: f32| {
            let mut img = HdrImage::new(10, 10);
            let n = img.values.len();
            for (i, v) in img.values.iter_mut().enumerate() {
                *v = peak * (i + 1) as f32 / n as f32;
            }
            img
        };
        let frames = vec![gradient(1e3), gradient(1e-2)];
        let out = tonemap(24.0, &frames);

        // Frame 0 adapts to its own 99th percentile, which thus maps to 255.
        let p99_ix = (frames[0].values.len() as f64 * 0.99) as usize;
        let at_p99 = out[0].values[p99_ix];
        assert!((at_p99 - 255.0).abs() < 1.0, "at_p99={at_p99}");

        // Frame 1 is scaled by the smoothed adaptation (still dominated by
        // the bright frame), so it sits well inside display range.
        for &v in &out[1].values {
            assert!(v >= 0.0);
            assert!(v < 255.0);
        }
    }

    #[test]
    fn bright_then_dim_pair_stays_in_display_range() {
        let frames = vec![
            HdrImage::filled(4, 4, [1e3, 1e3, 1e3]),
            HdrImage::filled(4, 4, [1e-2, 1e-2, 1e-2]),
        ];
        let out = tonemap(24.0, &frames);
        // Frame 0 sits at full scale; frame 1 is dimmed by the smoothed
        // adaptation rather than re-normalized to full scale.
        assert!((out[0].values[0] - 255.0).abs() < 1e-3);
        assert!(out[1].values[0] > 0.0);
        assert!(out[1].values[0] < 255.0);
    }
}
