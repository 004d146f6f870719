//! Second ranking pass for image search.
//!
//! Embedding similarity is adjusted by three additive terms:
//! - a bonus when the product's color matches the query's dominant color
//! - the HSV histogram intersection between query and product image
//! - a category prior voted by the leading neighbors
//!
//! Product colors come from the image file name, then the pixels, then the
//! catalog record. `<data_dir>/overrides.json` corrects individual images:
//!
//! ```json
//! { "runner-02.jpg": { "color": "green", "category": "shoes" } }
//! ```

use std::collections::HashMap;
use std::path::Path;

use image::DynamicImage;
use serde::Deserialize;
use tracing::{info, warn};

use super::filters::normalize_color;
use super::vision::{color_from_name, dominant_color_name, HsvHistogramEncoder};
use crate::catalog::{Category, Product};
use crate::config::RerankSection;
use crate::error::Result;

pub const DEFAULT_COLOR_BONUS: f32 = 0.12;
pub const DEFAULT_HISTOGRAM_WEIGHT: f32 = 0.25;
pub const DEFAULT_CATEGORY_PRIOR: f32 = 0.15;
pub const DEFAULT_LEADING_CATEGORY_BONUS: f32 = 0.05;
pub const DEFAULT_PRIOR_WINDOW: usize = 40;

/// Color name used when nothing better is known. Never earns a color bonus.
pub const UNKNOWN_COLOR: &str = "assorted";

/// File under the data directory holding per-image corrections.
pub const OVERRIDES_FILE: &str = "overrides.json";

/// Correction for one image, keyed by file name in [`Overrides`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ImageOverride {
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
}

pub type Overrides = HashMap<String, ImageOverride>;

fn read_overrides(path: &Path) -> Result<Overrides> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Load `<data_dir>/overrides.json`. A missing file means no overrides; an
/// unreadable one is logged and ignored.
pub fn load_overrides(data_dir: &Path) -> Overrides {
    let path = data_dir.join(OVERRIDES_FILE);
    if !path.exists() {
        return Overrides::new();
    }
    match read_overrides(&path) {
        Ok(overrides) => {
            info!("Loaded {} image overrides from {}", overrides.len(), path.display());
            overrides
        }
        Err(e) => {
            warn!("Ignoring {}: {}", path.display(), e);
            Overrides::new()
        }
    }
}

/// Sum of bin-wise minimums of two distributions, in [0, 1].
pub fn histogram_intersection(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x.min(*y)).sum()
}

/// Color signature of a query image.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryProfile {
    pub distribution: Vec<f32>,
    pub color: &'static str,
}

impl QueryProfile {
    pub fn of(img: &DynamicImage) -> Self {
        Self {
            distribution: HsvHistogramEncoder::distribution(img),
            color: dominant_color_name(img),
        }
    }
}

/// Color signature and labels of one indexed product image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageProfile {
    pub distribution: Vec<f32>,
    pub color: String,
    pub category: Category,
}

impl ImageProfile {
    /// Profile a product image, applying any override for its file name.
    pub fn of(product: &Product, img: &DynamicImage, overrides: &Overrides) -> Self {
        let path = Path::new(&product.image);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        let detected = dominant_color_name(img);

        let mut color = color_from_name(stem)
            .or_else(|| (detected != UNKNOWN_COLOR).then_some(detected))
            .or_else(|| product.color.as_deref().and_then(normalize_color))
            .unwrap_or(UNKNOWN_COLOR)
            .to_string();
        let mut category = product.category;

        let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
        if let Some(fix) = overrides.get(file_name) {
            if let Some(c) = fix.color.as_deref().and_then(normalize_color) {
                color = c.to_string();
            }
            if let Some(c) = fix.category {
                category = c;
            }
        }

        Self {
            distribution: HsvHistogramEncoder::distribution(img),
            color,
            category,
        }
    }
}

/// Rerank `(position, similarity)` pairs. `profiles` is indexed by catalog
/// position; positions without a profile keep their bare similarity and cast
/// no category vote. Returns every input pair, best first, ties in catalog order.
pub fn rerank(
    base: &[(usize, f32)],
    profiles: &[Option<ImageProfile>],
    query: &QueryProfile,
    weights: &RerankSection,
) -> Vec<(usize, f32)> {
    let profile = |idx: usize| profiles.get(idx).and_then(Option::as_ref);

    let mut scored: Vec<(usize, f32)> = base
        .iter()
        .map(|&(idx, similarity)| {
            let Some(p) = profile(idx) else {
                return (idx, similarity);
            };
            let mut score = similarity
                + weights.histogram_weight
                    * histogram_intersection(&p.distribution, &query.distribution);
            if query.color != UNKNOWN_COLOR && p.color == query.color {
                score += weights.color_bonus;
            }
            (idx, score)
        })
        .collect();
    sort_ranked(&mut scored);

    let priors = category_priors(&scored, profiles, weights);
    for (idx, score) in scored.iter_mut() {
        if let Some(prior) = profile(*idx).and_then(|p| priors.get(&p.category)) {
            *score += prior;
        }
    }
    sort_ranked(&mut scored);
    scored
}

fn sort_ranked(scored: &mut [(usize, f32)]) {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
}

/// Category share among the leading `prior_window` results, scaled to
/// `category_prior`; the most common category gets `leading_category_bonus` on top.
fn category_priors(
    ranked: &[(usize, f32)],
    profiles: &[Option<ImageProfile>],
    weights: &RerankSection,
) -> HashMap<Category, f32> {
    // Insertion order breaks ties for the leading category
    let mut counts: Vec<(Category, usize)> = Vec::new();
    for &(idx, _) in ranked.iter().take(weights.prior_window) {
        let Some(p) = profiles.get(idx).and_then(Option::as_ref) else {
            continue;
        };
        match counts.iter_mut().find(|(c, _)| *c == p.category) {
            Some((_, n)) => *n += 1,
            None => counts.push((p.category, 1)),
        }
    }
    let total: usize = counts.iter().map(|(_, n)| n).sum();
    if total == 0 {
        return HashMap::new();
    }

    let mut priors: HashMap<Category, f32> = counts
        .iter()
        .map(|&(c, n)| (c, n as f32 / total as f32 * weights.category_prior))
        .collect();
    let leader = counts
        .iter()
        .fold(None::<(Category, usize)>, |best, &(c, n)| match best {
            Some((_, m)) if m >= n => best,
            _ => Some((c, n)),
        });
    if let Some((c, _)) = leader {
        if let Some(prior) = priors.get_mut(&c) {
            *prior += weights.leading_category_bonus;
        }
    }
    priors
}
