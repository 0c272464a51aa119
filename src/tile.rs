//! HDR tile codec: 32-bit RGB floats packed into two 8-bit PNG planes.
//!
//! Each channel value `v > 0` is decomposed as `v = f * 2^e` with `f` in
//! `[1, 2)`; the mantissa plane stores `floor((f - 1) * 256)` and the exponent
//! plane stores `e + 127`, both saturated into `[0, 255]`. Non-positive (and
//! NaN) values encode as `(0, 0)`, the smallest representable value. The two
//! planes are independent RGBA PNGs with opaque alpha; alpha is ignored on
//! decode.

use std::io::Cursor;

use crate::foundation::core::saturate_u8;
use crate::foundation::error::{RayfleetError, RayfleetResult};
use crate::wire::ImageTile;

/// Decoded high-dynamic-range image.
///
/// `values` is row-major `height * width * 3` in RGB channel order.
#[derive(Clone, Debug, PartialEq)]
pub struct HdrImage {
    pub width: u32,
    pub height: u32,
    pub values: Vec<f32>,
}

impl HdrImage {
    /// Allocate a zero-filled image.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: vec![0.0; (width as usize) * (height as usize) * 3],
        }
    }

    /// Allocate an image filled with a constant RGB color.
    pub fn filled(width: u32, height: u32, rgb: [f32; 3]) -> Self {
        let mut img = Self::new(width, height);
        for px in img.values.chunks_exact_mut(3) {
            px.copy_from_slice(&rgb);
        }
        img
    }

    /// Clamp channel values into `[0, 255]` and emit a single RGBA PNG.
    pub fn to_saturated_png(&self) -> RayfleetResult<Vec<u8>> {
        let n = (self.width as usize) * (self.height as usize);
        let mut rgba = Vec::with_capacity(n * 4);
        for px in self.values.chunks_exact(3) {
            for &c in px {
                rgba.push(saturate_u8(c as i64));
            }
            rgba.push(255);
        }
        encode_rgba_png(self.width, self.height, rgba)
    }
}

/// Split a channel value into (mantissa byte, exponent byte).
pub fn split_float(v: f32) -> (u8, u8) {
    if !(v > 0.0) {
        // Non-positive and NaN approximate to the smallest representable value.
        return (0, 0);
    }
    // Widen to f64 first: f32 subnormals become normal f64 values, so the
    // exponent can be read straight out of the bit pattern.
    let v = f64::from(v);
    let exp = ((v.to_bits() >> 52) & 0x7ff) as i64 - 1023;
    let fract = v / (exp as f64).exp2(); // in [1, 2)
    (
        saturate_u8(((fract - 1.0) * 256.0) as i64),
        saturate_u8(exp + 127),
    )
}

/// Inverse of [`split_float`].
pub fn combine_float(mantissa: u8, exponent: u8) -> f32 {
    ((f64::from(mantissa) / 256.0 + 1.0) * (f64::from(exponent) - 127.0).exp2()) as f32
}

/// Encode an HDR image into a two-plane PNG tile.
pub fn encode_tile(hdr: &HdrImage) -> RayfleetResult<ImageTile> {
    let n = (hdr.width as usize) * (hdr.height as usize);
    if hdr.values.len() != n * 3 {
        return Err(RayfleetError::codec(format!(
            "HDR buffer length {} does not match {}x{}x3",
            hdr.values.len(),
            hdr.width,
            hdr.height
        )));
    }

    let mut mantissa = Vec::with_capacity(n * 4);
    let mut exponent = Vec::with_capacity(n * 4);
    for px in hdr.values.chunks_exact(3) {
        for &c in px {
            let (m, e) = split_float(c);
            mantissa.push(m);
            exponent.push(e);
        }
        mantissa.push(255);
        exponent.push(255);
    }

    Ok(ImageTile {
        blob_png_mantissa: encode_rgba_png(hdr.width, hdr.height, mantissa)?,
        blob_png_exponent: encode_rgba_png(hdr.width, hdr.height, exponent)?,
    })
}

/// Decode a two-plane PNG tile back into an HDR image.
///
/// The planes must agree on dimensions; the tile's dimensions are whatever
/// the PNGs carry.
pub fn decode_tile(tile: &ImageTile) -> RayfleetResult<HdrImage> {
    let mantissa = decode_rgba_png(&tile.blob_png_mantissa)?;
    let exponent = decode_rgba_png(&tile.blob_png_exponent)?;
    if mantissa.dimensions() != exponent.dimensions() {
        return Err(RayfleetError::codec(format!(
            "tile plane dimensions disagree: mantissa {:?}, exponent {:?}",
            mantissa.dimensions(),
            exponent.dimensions()
        )));
    }

    let (width, height) = mantissa.dimensions();
    let mut values = Vec::with_capacity((width as usize) * (height as usize) * 3);
    for (m_px, e_px) in mantissa
        .pixels()
        .zip(exponent.pixels())
    {
        for ch in 0..3 {
            values.push(combine_float(m_px.0[ch], e_px.0[ch]));
        }
    }

    Ok(HdrImage {
        width,
        height,
        values,
    })
}

fn encode_rgba_png(width: u32, height: u32, rgba: Vec<u8>) -> RayfleetResult<Vec<u8>> {
    let img = image::RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| RayfleetError::codec("RGBA buffer does not match image dimensions"))?;
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| RayfleetError::codec(format!("PNG encode failed: {e}")))?;
    Ok(buf)
}

fn decode_rgba_png(bytes: &[u8]) -> RayfleetResult<image::RgbaImage> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| RayfleetError::codec(format!("PNG decode failed: {e}")))?;
    Ok(img.to_rgba8())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_combine_relative_error_is_bounded() {
        // Sweep the representable range; the mantissa quantization bounds the
        // relative error by one part in 256.
        let mut v = 2.0f32.powi(-126);
        while v < 2.0f32.powi(126) {
            for factor in [1.0f32, 1.3, 1.9999] {
                let x = v * factor;
                let (m, e) = split_float(x);
                let back = combine_float(m, e);
                let ratio = f64::from(back) / f64::from(x);
                assert!(
                    (1.0 - 2.0f64.powi(-8)..=1.0 + 2.0f64.powi(-8)).contains(&ratio),
                    "x={x} back={back} ratio={ratio}"
                );
            }
            v *= 2.0;
        }
    }

    #[test]
    fn non_positive_values_encode_to_smallest() {
        for v in [0.0f32, -1.0, -1e30, f32::NEG_INFINITY, f32::NAN] {
            assert_eq!(split_float(v), (0, 0));
        }
        assert_eq!(combine_float(0, 0), 2.0f32.powi(-127));
    }

    #[test]
    fn exponent_saturates_out_of_range() {
        // Far above the representable range the exponent byte pins at 255.
        let (_, e) = split_float(f32::MAX);
        assert_eq!(e, 255);
        let (_, e) = split_float(2.0f32.powi(-126) / 4.0);
        assert_eq!(e, 0);
    }

    #[test]
    fn tile_roundtrip_preserves_dimensions_and_values() {
        let mut hdr = HdrImage::new(3, 2);
        for (i, v) in hdr.values.iter_mut().enumerate() {
            *v = 0.5 + i as f32;
        }
        let tile = encode_tile(&hdr).unwrap();
        let back = decode_tile(&tile).unwrap();
        assert_eq!(back.width, 3);
        assert_eq!(back.height, 2);
        for (a, b) in hdr.values.iter().zip(back.values.iter()) {
            let ratio = f64::from(*b) / f64::from(*a);
            assert!(ratio >= 1.0 - 2.0f64.powi(-8) && ratio <= 1.0 + 2.0f64.powi(-8));
        }
    }

    #[test]
    fn mismatched_planes_are_rejected() {
        let a = encode_tile(&HdrImage::new(2, 2)).unwrap();
        let b = encode_tile(&HdrImage::new(3, 2)).unwrap();
        let mixed = ImageTile {
            blob_png_mantissa: a.blob_png_mantissa,
            blob_png_exponent: b.blob_png_exponent,
        };
        assert!(decode_tile(&mixed).is_err());
    }

    #[test]
    fn saturated_png_clamps_channels() {
        let hdr = HdrImage::filled(2, 1, [300.0, -5.0, 128.0]);
        let png = hdr.to_saturated_png().unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgba8();
        let px = img.get_pixel(0, 0);
        assert_eq!(px.0, [255, 0, 128, 255]);
    }
}
