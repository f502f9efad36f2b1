//! Image transforms applied by the pipeline.

use image::DynamicImage;

/// A pure image-to-image transform
pub trait Transform: Send + Sync {
    /// Human-readable transform name
    fn name(&self) -> &str;

    /// Produce the transformed image
    fn apply(&self, image: DynamicImage) -> DynamicImage;
}

/// Pixel-value inversion (alpha is left alone)
#[derive(Debug, Clone, Copy, Default)]
pub struct Invert;

impl Transform for Invert {
    fn name(&self) -> &str {
        "invert"
    }

    fn apply(&self, mut image: DynamicImage) -> DynamicImage {
        image.invert();
        image
    }
}
