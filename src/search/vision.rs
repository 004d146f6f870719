//! Image encoders and color helpers.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{ImageEmbedding, ImageEmbeddingModel, ImageInitOptions};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use tracing::info;

use super::filters::normalize_color;
use super::index::l2_normalize;
use super::Embedding;
use crate::error::{Error, Result};

/// Produces fixed-length vectors for encoded images (JPEG, PNG, WebP...).
#[async_trait]
pub trait ImageEncoder: Send + Sync {
    /// Short identifier shown in `/health` and logs
    fn name(&self) -> &str;

    /// Encode raw image bytes.
    async fn encode(&self, bytes: Vec<u8>) -> Result<Embedding>;
}

/// Which image encoder to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageModelKind {
    /// CLIP ViT-B/32 (OpenAI weights)
    ClipVitB32,
    /// Unicom ViT-B/32
    UnicomVitB32,
    /// Unicom ViT-B/16 (larger)
    UnicomVitB16,
    /// ResNet-50
    Resnet50,
    /// Nomic Embed Vision v1.5
    NomicVision,
    /// Color histogram, no model download
    Hsv,
    /// Image search switched off
    Disabled,
}

impl ImageModelKind {
    /// Resolve an `IMAGE_MODEL` / `IMAGE_PRETRAINED` pair.
    pub fn resolve(model: &str, pretrained: &str) -> Result<Self> {
        let model = model.trim().to_ascii_lowercase().replace('_', "-");
        let pretrained = pretrained.trim().to_ascii_lowercase();
        let kind = match model.as_str() {
            "vit-b-32" | "vit-b/32" | "clip" | "clip-vit-b-32" => {
                if pretrained == "unicom" {
                    ImageModelKind::UnicomVitB32
                } else {
                    ImageModelKind::ClipVitB32
                }
            }
            "vit-b-16" | "vit-b/16" | "unicom-vit-b-16" => ImageModelKind::UnicomVitB16,
            "unicom" | "unicom-vit-b-32" => ImageModelKind::UnicomVitB32,
            "resnet50" | "resnet" | "resnet-50" => ImageModelKind::Resnet50,
            "nomic" | "nomic-embed-vision" => ImageModelKind::NomicVision,
            "hsv" | "histogram" => ImageModelKind::Hsv,
            "none" | "off" | "disabled" => ImageModelKind::Disabled,
            other => {
                return Err(Error::Config(format!("unknown image model '{}'", other)));
            }
        };
        Ok(kind)
    }

    fn fastembed_model(&self) -> Option<ImageEmbeddingModel> {
        match self {
            ImageModelKind::ClipVitB32 => Some(ImageEmbeddingModel::ClipVitB32),
            ImageModelKind::UnicomVitB32 => Some(ImageEmbeddingModel::UnicomVitB32),
            ImageModelKind::UnicomVitB16 => Some(ImageEmbeddingModel::UnicomVitB16),
            ImageModelKind::Resnet50 => Some(ImageEmbeddingModel::Resnet50),
            ImageModelKind::NomicVision => Some(ImageEmbeddingModel::NomicEmbedVisionV15),
            ImageModelKind::Hsv | ImageModelKind::Disabled => None,
        }
    }

    /// Build the encoder; `Ok(None)` when image search is disabled.
    pub fn build(&self) -> Result<Option<Arc<dyn ImageEncoder>>> {
        match self {
            ImageModelKind::Disabled => Ok(None),
            ImageModelKind::Hsv => Ok(Some(Arc::new(HsvHistogramEncoder::default()))),
            _ => Ok(Some(Arc::new(FastEmbedImage::new(*self)?))),
        }
    }
}

/// Pretrained vision model run through FastEmbed.
pub struct FastEmbedImage {
    model: Arc<ImageEmbedding>,
    name: String,
}

impl FastEmbedImage {
    /// Load (downloading on first use) a vision model.
    pub fn new(kind: ImageModelKind) -> Result<Self> {
        let model = kind.fastembed_model().ok_or_else(|| {
            Error::Config(format!("{:?} is not a pretrained vision model", kind))
        })?;
        let name = format!("{:?}", model);
        let embedding = ImageEmbedding::try_new(ImageInitOptions::new(model))
            .map_err(|e| Error::Embedding(format!("failed to load {}: {}", name, e)))?;
        info!("Loaded image embedding model {}", name);
        Ok(Self {
            model: Arc::new(embedding),
            name,
        })
    }
}

#[async_trait]
impl ImageEncoder for FastEmbedImage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn encode(&self, bytes: Vec<u8>) -> Result<Embedding> {
        let format = image::guess_format(&bytes)
            .map_err(|e| Error::InvalidImage(e.to_string()))?;
        let suffix = format
            .extensions_str()
            .first()
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();
        let model = Arc::clone(&self.model);

        tokio::task::spawn_blocking(move || -> Result<Embedding> {
            // FastEmbed reads images from disk.
            let mut file = tempfile::Builder::new()
                .prefix("mercury-query-")
                .suffix(&suffix)
                .tempfile()?;
            file.write_all(&bytes)?;
            file.flush()?;
            let mut vectors = model
                .embed(vec![file.path()], None)
                .map_err(|e| Error::InvalidImage(e.to_string()))?;
            vectors
                .pop()
                .ok_or_else(|| Error::Embedding("encoder returned no vector".to_string()))
        })
        .await
        .map_err(|e| Error::Embedding(format!("embedding task failed: {}", e)))?
    }
}

/// Hue/saturation/value bins of the histogram encoder.
const HSV_BINS: (usize, usize, usize) = (12, 6, 6);

/// Side length images are resized to before analysis.
const ANALYSIS_SIZE: u32 = 64;

/// Normalized HSV color histogram. Coarse, but needs no model.
#[derive(Debug, Clone, Default)]
pub struct HsvHistogramEncoder;

impl HsvHistogramEncoder {
    fn bin_counts(img: &DynamicImage) -> Vec<f32> {
        let (hb, sb, vb) = HSV_BINS;
        let mut hist = vec![0.0f32; hb * sb * vb];
        for (h, s, v) in hsv_pixels(&analysis_rgb(img)) {
            let hi = ((h * hb as f32) as usize).min(hb - 1);
            let si = ((s * sb as f32) as usize).min(sb - 1);
            let vi = ((v * vb as f32) as usize).min(vb - 1);
            hist[(hi * sb + si) * vb + vi] += 1.0;
        }
        hist
    }

    /// Histogram of an already decoded image, unit length for cosine ranking.
    pub fn histogram(img: &DynamicImage) -> Embedding {
        let mut hist = Self::bin_counts(img);
        l2_normalize(&mut hist);
        hist
    }

    /// Same bins as [`histogram`](Self::histogram), but summing to 1 so two
    /// images compare by histogram intersection.
    pub fn distribution(img: &DynamicImage) -> Vec<f32> {
        let mut hist = Self::bin_counts(img);
        let total: f32 = hist.iter().sum();
        if total > 0.0 {
            hist.iter_mut().for_each(|x| *x /= total);
        }
        hist
    }
}

#[async_trait]
impl ImageEncoder for HsvHistogramEncoder {
    fn name(&self) -> &str {
        "hsv-histogram"
    }

    async fn encode(&self, bytes: Vec<u8>) -> Result<Embedding> {
        tokio::task::spawn_blocking(move || {
            let img = image::load_from_memory(&bytes)
                .map_err(|e| Error::InvalidImage(e.to_string()))?;
            Ok(Self::histogram(&img))
        })
        .await
        .map_err(|e| Error::Embedding(format!("embedding task failed: {}", e)))?
    }
}

fn analysis_rgb(img: &DynamicImage) -> RgbImage {
    img.resize_exact(ANALYSIS_SIZE, ANALYSIS_SIZE, FilterType::Triangle)
        .to_rgb8()
}

fn hsv_pixels(rgb: &RgbImage) -> impl Iterator<Item = (f32, f32, f32)> + '_ {
    rgb.pixels().map(|p| {
        rgb_to_hsv(
            p[0] as f32 / 255.0,
            p[1] as f32 / 255.0,
            p[2] as f32 / 255.0,
        )
    })
}

/// RGB in [0, 1] to HSV with hue in [0, 1).
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let v = max;
    let s = if max > 0.0 { delta / max } else { 0.0 };
    if delta <= f32::EPSILON {
        return (0.0, s, v);
    }
    let h = if max == r {
        ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        (b - r) / delta + 2.0
    } else {
        (r - g) / delta + 4.0
    };
    ((h / 6.0).rem_euclid(1.0), s, v)
}

/// First color word found in a file name (`red-runner_02` → `red`).
pub fn color_from_name(name: &str) -> Option<&'static str> {
    name.split(|c: char| !c.is_alphanumeric())
        .filter_map(normalize_color)
        .find(|c| *c != "assorted")
}

/// Coarse dominant color: neutrals first, then a hue vote over saturated pixels.
pub fn dominant_color_name(img: &DynamicImage) -> &'static str {
    let rgb = analysis_rgb(img);
    let pixels: Vec<(f32, f32, f32)> = hsv_pixels(&rgb).collect();
    if pixels.is_empty() {
        return "assorted";
    }
    let n = pixels.len() as f32;
    let mean_s = pixels.iter().map(|p| p.1).sum::<f32>() / n;
    let mean_v = pixels.iter().map(|p| p.2).sum::<f32>() / n;

    if mean_v < 0.18 && mean_s < 0.25 {
        return "black";
    }
    if mean_v > 0.90 && mean_s < 0.08 {
        return "white";
    }
    if mean_s < 0.15 {
        return "grey";
    }

    let saturated: Vec<f32> = pixels
        .iter()
        .filter(|(_, s, v)| *s >= 0.25 && *v >= 0.25)
        .map(|(h, _, _)| h * 360.0)
        .collect();
    if (saturated.len() as f32) < n * 0.03 {
        return if mean_v > 0.35 { "grey" } else { "black" };
    }

    const EDGES: [f32; 10] = [0.0, 15.0, 45.0, 75.0, 150.0, 210.0, 270.0, 315.0, 345.0, 360.0];
    let mut votes = [0usize; 9];
    for hue in saturated {
        let bin = EDGES
            .windows(2)
            .position(|w| hue >= w[0] && hue < w[1])
            .unwrap_or(8);
        votes[bin] += 1;
    }
    let best = votes
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
        .map(|(i, _)| i)
        .unwrap_or(0);
    match best {
        1 => "orange",
        2 => "yellow",
        3 => "green",
        4 | 5 => "blue",
        6 => "purple",
        7 => "pink",
        _ => "red",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::search::index::cosine_similarity;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    /// PNG bytes of a solid-color square.
    pub(crate) fn solid_png(r: u8, g: u8, b: u8) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([r, g, b])));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn solid(r: u8, g: u8, b: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([r, g, b])))
    }

    #[test]
    fn test_resolve_image_models() {
        assert_eq!(
            ImageModelKind::resolve("ViT-B-32", "openai").unwrap(),
            ImageModelKind::ClipVitB32
        );
        assert_eq!(
            ImageModelKind::resolve("ViT-B-32", "unicom").unwrap(),
            ImageModelKind::UnicomVitB32
        );
        assert_eq!(
            ImageModelKind::resolve("resnet50", "").unwrap(),
            ImageModelKind::Resnet50
        );
        assert_eq!(
            ImageModelKind::resolve("HSV", "").unwrap(),
            ImageModelKind::Hsv
        );
        assert!(ImageModelKind::resolve("dall-e", "").is_err());
    }

    #[test]
    fn test_disabled_and_hsv_build_without_downloads() {
        assert!(ImageModelKind::Disabled.build().unwrap().is_none());
        let encoder = ImageModelKind::Hsv.build().unwrap().unwrap();
        assert_eq!(encoder.name(), "hsv-histogram");
    }

    #[test]
    fn test_rgb_to_hsv() {
        let (h, s, v) = rgb_to_hsv(1.0, 0.0, 0.0);
        assert!(h.abs() < 1e-6 && (s - 1.0).abs() < 1e-6 && (v - 1.0).abs() < 1e-6);
        let (h, _, _) = rgb_to_hsv(0.0, 0.0, 1.0);
        assert!((h - 2.0 / 3.0).abs() < 1e-4);
        let (_, s, _) = rgb_to_hsv(0.5, 0.5, 0.5);
        assert_eq!(s, 0.0);
    }

    #[test]
    fn test_dominant_color() {
        assert_eq!(dominant_color_name(&solid(220, 20, 20)), "red");
        assert_eq!(dominant_color_name(&solid(20, 40, 220)), "blue");
        assert_eq!(dominant_color_name(&solid(30, 180, 40)), "green");
        assert_eq!(dominant_color_name(&solid(5, 5, 5)), "black");
        assert_eq!(dominant_color_name(&solid(250, 250, 250)), "white");
        assert_eq!(dominant_color_name(&solid(128, 128, 128)), "grey");
    }

    #[test]
    fn test_color_from_name() {
        assert_eq!(color_from_name("red-runner_02"), Some("red"));
        assert_eq!(color_from_name("Navy Tote"), Some("blue"));
        assert_eq!(color_from_name("runner"), None);
    }

    #[tokio::test]
    async fn test_hsv_encoder_similar_colors_score_higher() {
        let encoder = HsvHistogramEncoder;
        let red = encoder.encode(solid_png(220, 20, 20)).await.unwrap();
        let red2 = encoder.encode(solid_png(215, 25, 25)).await.unwrap();
        let blue = encoder.encode(solid_png(20, 40, 220)).await.unwrap();
        assert!(cosine_similarity(&red, &red2) > cosine_similarity(&red, &blue));
    }

    #[tokio::test]
    async fn test_hsv_encoder_rejects_garbage() {
        let err = HsvHistogramEncoder
            .encode(b"definitely not an image".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
    }
}
