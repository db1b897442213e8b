//! Perceptual hashing of base64-encoded page images.
//!
//! A 64-bit gradient hash (8×8, `img_hash`'s `Gradient` algorithm) survives
//! the re-encoding and slight rescaling that OCR services apply to repeated
//! headers and logos, so two crops of the same stamp land a few bits apart
//! while unrelated figures differ in roughly half their bits.

use crate::document::decode_image_data;
use img_hash::image::{ImageBuffer, Rgba};
use img_hash::{HashAlg, HasherConfig, ImageHash};
use thiserror::Error;

/// Why an image could not be hashed.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("undecodable image: {0}")]
    Image(#[from] image::ImageError),

    #[error("pixel buffer of {width}x{height} does not match its size")]
    Buffer { width: u32, height: u32 },
}

/// Reusable perceptual hasher.
pub struct PerceptualHasher {
    hasher: img_hash::Hasher,
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PerceptualHasher {
    pub fn new() -> Self {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Gradient)
            .hash_size(8, 8)
            .to_hasher();
        Self { hasher }
    }

    /// Hash the image carried in a base64 (or `data:` URI) string.
    pub fn hash_base64(&self, data: &str) -> Result<ImageHash, HashError> {
        let bytes = decode_image_data(data)?;
        let decoded = image::load_from_memory(&bytes)?;

        // img_hash works on image 0.23 buffers; hand over raw pixels.
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        let buffer: ImageBuffer<Rgba<u8>, Vec<u8>> =
            ImageBuffer::from_raw(width, height, rgba.into_raw())
                .ok_or(HashError::Buffer { width, height })?;
        Ok(self
            .hasher
            .hash_image(&img_hash::image::DynamicImage::ImageRgba8(buffer)))
    }
}

/// Number of differing bits between two hashes.
pub fn distance(a: &ImageHash, b: &ImageHash) -> u32 {
    a.dist(b)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use image::{DynamicImage, GrayImage, Luma};
    use std::io::Cursor;

    /// A 64×64 horizontal gradient, brightening left to right or the reverse.
    pub(crate) fn gradient_png_base64(rising: bool) -> String {
        let img = GrayImage::from_fn(64, 64, |x, _| {
            let v = (x * 4) as u8;
            Luma([if rising { v } else { 252 - v }])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        STANDARD.encode(&buf)
    }

    #[test]
    fn identical_images_have_zero_distance() {
        let hasher = PerceptualHasher::new();
        let data = gradient_png_base64(true);
        let a = hasher.hash_base64(&data).unwrap();
        let b = hasher.hash_base64(&format!("data:image/png;base64,{data}")).unwrap();
        assert_eq!(distance(&a, &b), 0);
    }

    #[test]
    fn opposite_gradients_are_far_apart() {
        let hasher = PerceptualHasher::new();
        let a = hasher.hash_base64(&gradient_png_base64(true)).unwrap();
        let b = hasher.hash_base64(&gradient_png_base64(false)).unwrap();
        assert!(distance(&a, &b) >= 32, "distance {}", distance(&a, &b));
    }

    #[test]
    fn garbage_is_reported() {
        let hasher = PerceptualHasher::new();
        assert!(matches!(
            hasher.hash_base64("not base64 at all!"),
            Err(HashError::Base64(_))
        ));
        let not_an_image = STANDARD.encode(b"plain bytes");
        assert!(matches!(
            hasher.hash_base64(&not_an_image),
            Err(HashError::Image(_))
        ));
    }
}
