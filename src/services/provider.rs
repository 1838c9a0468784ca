//! Pluggable mesh-generation providers.
//!
//! A provider is a pure function of (input image path, height hint) to an
//! output mesh file. The registry resolves a requested provider name to an
//! ordered fallback chain and records which provider actually produced the
//! result.

use std::path::Path;
use std::sync::Arc;

use crate::services::glb;

pub trait MeshProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn generate(
        &self,
        input: &Path,
        output: &Path,
        height_cm: Option<f64>,
    ) -> Result<(), ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no silhouette found in input image")]
    EmptySilhouette,

    #[error("all providers failed, last error: {0}")]
    Exhausted(String),
}

/// Ordered provider chain: the requested provider runs first, then the
/// remaining registered providers in registration order. Failures are
/// explicit `Result`s evaluated here, not unwound control flow.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn MeshProvider>>,
    default: &'static str,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn MeshProvider>>, default: &'static str) -> Self {
        Self { providers, default }
    }

    /// Silhouette revolution first, placeholder as the terminal fallback.
    pub fn with_defaults() -> Self {
        Self::new(
            vec![
                Arc::new(SilhouetteRevolveProvider),
                Arc::new(PlaceholderProvider),
            ],
            "silhouette",
        )
    }

    pub fn default_name(&self) -> &'static str {
        self.default
    }

    fn chain(&self, requested: Option<&str>) -> Vec<Arc<dyn MeshProvider>> {
        let first = requested.unwrap_or(self.default);
        let mut ordered: Vec<Arc<dyn MeshProvider>> = self
            .providers
            .iter()
            .filter(|p| p.name() == first)
            .cloned()
            .collect();
        for p in &self.providers {
            if p.name() != first {
                ordered.push(p.clone());
            }
        }
        ordered
    }

    /// Run the fallback chain; returns the name of the provider that
    /// produced the mesh.
    pub fn generate(
        &self,
        requested: Option<&str>,
        input: &Path,
        output: &Path,
        height_cm: Option<f64>,
    ) -> Result<&'static str, ProviderError> {
        let mut last_error: Option<ProviderError> = None;
        for provider in self.chain(requested) {
            match provider.generate(input, output, height_cm) {
                Ok(()) => return Ok(provider.name()),
                Err(e) => {
                    tracing::warn!(
                        provider = provider.name(),
                        error = %e,
                        "provider failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(ProviderError::Exhausted(
            last_error.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }
}

/// Always succeeds: writes a small valid GLB primitive. Terminal fallback
/// and the output of the in-process simulation path.
pub struct PlaceholderProvider;

impl MeshProvider for PlaceholderProvider {
    fn name(&self) -> &'static str {
        "placeholder"
    }

    fn generate(
        &self,
        _input: &Path,
        output: &Path,
        _height_cm: Option<f64>,
    ) -> Result<(), ProviderError> {
        std::fs::write(output, glb::placeholder_bytes())?;
        Ok(())
    }
}

const PROFILE_SLICES: usize = 64;
const RING_SEGMENTS: usize = 24;
const DEFAULT_HEIGHT_CM: f64 = 170.0;
// Widest body half-width relative to standing height.
const WIDTH_TO_HEIGHT: f32 = 0.18;
const MIN_RADIUS_M: f32 = 0.01;

/// Dev-grade mesh provider: threshold-segments the photo, extracts a per-row
/// half-width profile of the silhouette, and revolves it into a solid of
/// revolution scaled by the height hint.
pub struct SilhouetteRevolveProvider;

impl MeshProvider for SilhouetteRevolveProvider {
    fn name(&self) -> &'static str {
        "silhouette"
    }

    fn generate(
        &self,
        input: &Path,
        output: &Path,
        height_cm: Option<f64>,
    ) -> Result<(), ProviderError> {
        let img = image::open(input)?.to_luma8();
        let profile = half_width_profile(&img).ok_or(ProviderError::EmptySilhouette)?;
        let (positions, indices) = revolve(&profile, height_cm);
        glb::write_mesh(output, &positions, &indices)?;
        Ok(())
    }
}

/// Per-slice silhouette half-widths (pixels), top to bottom over the occupied
/// row range. `None` when the image holds no usable silhouette.
fn half_width_profile(img: &image::GrayImage) -> Option<Vec<f32>> {
    let (w, h) = img.dimensions();
    let foreground = |x: u32, y: u32| img.get_pixel(x, y).0[0] < 128;

    let mut row_widths = Vec::with_capacity(h as usize);
    let (mut y0, mut y1) = (None, 0u32);
    for y in 0..h {
        let xs: Vec<u32> = (0..w).filter(|&x| foreground(x, y)).collect();
        let width = match (xs.first(), xs.last()) {
            (Some(&min), Some(&max)) => {
                if y0.is_none() {
                    y0 = Some(y);
                }
                y1 = y;
                (max - min) as f32 / 2.0
            }
            _ => 0.0,
        };
        row_widths.push(width);
    }

    let y0 = y0?;
    if y1 <= y0 || (y1 - y0) < 8 {
        return None;
    }

    // Sample a fixed number of slices over the occupied range.
    let span = (y1 - y0) as f32;
    let mut profile: Vec<f32> = (0..PROFILE_SLICES)
        .map(|i| {
            let y = y0 as f32 + span * i as f32 / (PROFILE_SLICES - 1) as f32;
            row_widths[y.round() as usize]
        })
        .collect();

    // 3-tap smoothing knocks out single-row segmentation noise.
    let raw = profile.clone();
    for i in 1..profile.len() - 1 {
        profile[i] = (raw[i - 1] + raw[i] + raw[i + 1]) / 3.0;
    }

    Some(profile)
}

/// Revolve the profile around the vertical axis into a closed ring mesh,
/// scaled so the silhouette stands `height_cm` tall in meters.
fn revolve(profile: &[f32], height_cm: Option<f64>) -> (Vec<[f32; 3]>, Vec<u32>) {
    let height_m = (height_cm.unwrap_or(DEFAULT_HEIGHT_CM) / 100.0) as f32;
    let max_half = profile.iter().cloned().fold(1.0f32, f32::max);
    let radius_scale = height_m * WIDTH_TO_HEIGHT / max_half;

    let mut positions = Vec::with_capacity(profile.len() * RING_SEGMENTS);
    for (i, half_width) in profile.iter().enumerate() {
        let y = height_m * (1.0 - i as f32 / (profile.len() - 1) as f32);
        let radius = (half_width * radius_scale).max(MIN_RADIUS_M);
        for s in 0..RING_SEGMENTS {
            let angle = std::f32::consts::TAU * s as f32 / RING_SEGMENTS as f32;
            positions.push([radius * angle.cos(), y, radius * angle.sin()]);
        }
    }

    let ring = RING_SEGMENTS as u32;
    let mut indices = Vec::with_capacity((profile.len() - 1) * RING_SEGMENTS * 6);
    for i in 0..(profile.len() as u32 - 1) {
        for s in 0..ring {
            let a = i * ring + s;
            let b = i * ring + (s + 1) % ring;
            let c = (i + 1) * ring + s;
            let d = (i + 1) * ring + (s + 1) % ring;
            indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }
    (positions, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use std::path::PathBuf;

    fn temp_file(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("photomesh-provider-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    /// White canvas with a dark vertical bar: a crude standing figure.
    fn synthetic_silhouette() -> PathBuf {
        let mut img = GrayImage::from_pixel(64, 128, Luma([255]));
        for y in 10..120 {
            for x in 24..40 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        let path = temp_file("silhouette.png");
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn silhouette_provider_writes_glb() {
        let input = synthetic_silhouette();
        let output = temp_file("out.glb");
        SilhouetteRevolveProvider
            .generate(&input, &output, Some(170.0))
            .unwrap();
        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(&bytes[0..4], b"glTF");
    }

    #[test]
    fn silhouette_provider_rejects_blank_image() {
        let blank = temp_file("blank.png");
        GrayImage::from_pixel(32, 32, Luma([255])).save(&blank).unwrap();
        let output = temp_file("out.glb");
        let err = SilhouetteRevolveProvider
            .generate(&blank, &output, None)
            .unwrap_err();
        assert!(matches!(err, ProviderError::EmptySilhouette));
    }

    #[test]
    fn registry_falls_back_to_placeholder() {
        let registry = ProviderRegistry::with_defaults();
        let blank = temp_file("blank.png");
        GrayImage::from_pixel(32, 32, Luma([255])).save(&blank).unwrap();
        let output = temp_file("out.glb");

        // Silhouette fails on a blank image; placeholder takes over.
        let used = registry
            .generate(Some("silhouette"), &blank, &output, None)
            .unwrap();
        assert_eq!(used, "placeholder");
        assert!(output.exists());
    }

    #[test]
    fn registry_prefers_requested_provider() {
        let registry = ProviderRegistry::with_defaults();
        let input = synthetic_silhouette();
        let output = temp_file("out.glb");
        let used = registry
            .generate(Some("placeholder"), &input, &output, None)
            .unwrap();
        assert_eq!(used, "placeholder");
    }

    #[test]
    fn unknown_provider_name_uses_chain() {
        let registry = ProviderRegistry::with_defaults();
        let input = synthetic_silhouette();
        let output = temp_file("out.glb");
        let used = registry
            .generate(Some("smplx_icon"), &input, &output, Some(180.0))
            .unwrap();
        assert_eq!(used, "silhouette");
    }
}
