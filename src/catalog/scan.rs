//! Build a catalog by scanning `<data_dir>/<category>/<image>` files.

use std::hash::Hasher;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use twox_hash::XxHash64;

use super::{Category, Product};
use crate::error::Result;
use crate::search::vision::{color_from_name, dominant_color_name};

/// Image extensions picked up by the scan.
pub(super) const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Base price per category before the per-file jitter.
fn base_price(category: Category) -> f64 {
    match category {
        Category::Bags => 49.0,
        Category::Caps => 19.0,
        Category::Jackets => 99.0,
        Category::Shoes => 69.0,
        Category::Tops => 25.0,
        Category::Dresses => 59.0,
        Category::Pants => 45.0,
    }
}

/// Deterministic 0.00..15.00 jitter derived from the file stem.
fn price_jitter(stem: &str) -> f64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(stem.as_bytes());
    (hasher.finish() % 1500) as f64 / 100.0
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub(super) fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub(super) fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

/// Scan the data directory and synthesise one product per image.
///
/// Colors come from the file name when it contains a color word, otherwise
/// from the image's dominant color. Prices are a category base plus a
/// stable jitter, so repeated scans yield identical catalogs.
pub fn scan_data_dir(data_dir: &Path) -> Result<Vec<Product>> {
    let mut products = Vec::new();

    for folder in sorted_entries(data_dir)? {
        if !folder.is_dir() {
            continue;
        }
        let Some(category) = folder
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(Category::from_word)
        else {
            debug!("Skipping non-category folder {}", folder.display());
            continue;
        };

        let mut counter = 0;
        for file in sorted_entries(&folder)? {
            if !file.is_file() || !is_image(&file) {
                continue;
            }
            let stem = file
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            if stem.eq_ignore_ascii_case("placeholder") {
                continue;
            }

            let color = match color_from_name(&stem) {
                Some(color) => color.to_string(),
                None => match image::open(&file) {
                    Ok(img) => dominant_color_name(&img).to_string(),
                    Err(e) => {
                        warn!("Could not decode {}: {}", file.display(), e);
                        "assorted".to_string()
                    }
                },
            };

            let relative = file
                .strip_prefix(data_dir)
                .unwrap_or(&file)
                .to_string_lossy()
                .replace('\\', "/");
            let price = ((base_price(category) + price_jitter(&stem)) * 100.0).round() / 100.0;

            counter += 1;
            products.push(Product {
                id: format!("{}-{}", category.as_str(), counter),
                title: format!("{} {}", capitalize(&color), capitalize(category.singular())),
                brand: "Mercury".to_string(),
                category,
                color: Some(color.clone()),
                price,
                description: format!(
                    "A {} {} from our curated catalog.",
                    color,
                    category.singular()
                ),
                image: relative,
            });
        }
    }

    Ok(products)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"not really an image").unwrap();
    }

    #[test]
    fn test_scan_builds_products_from_category_folders() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("shoes/red-runner.jpg"));
        touch(&dir.path().join("shoes/blue_trail.png"));
        touch(&dir.path().join("shoes/placeholder.jpg"));
        touch(&dir.path().join("bag/black-tote.webp"));
        touch(&dir.path().join("misc/readme.jpg"));
        touch(&dir.path().join("caps/notes.txt"));

        let products = scan_data_dir(dir.path()).unwrap();
        assert_eq!(products.len(), 3, "Only images in category folders count");

        let tote = products.iter().find(|p| p.category == Category::Bags).unwrap();
        assert_eq!(tote.id, "bags-1");
        assert_eq!(tote.title, "Black Bag");
        assert_eq!(tote.color.as_deref(), Some("black"));
        assert_eq!(tote.image, "bag/black-tote.webp");
        assert!(tote.price >= 49.0 && tote.price < 64.0);

        let catalog = Catalog::new(products).unwrap();
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_undecodable_image_without_color_word_is_assorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("caps/summer.jpg"));

        let products = scan_data_dir(dir.path()).unwrap();
        assert_eq!(products[0].color.as_deref(), Some("assorted"));
    }

    #[test]
    fn test_scan_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("jackets/green-shell.jpg"));
        let first = scan_data_dir(dir.path()).unwrap();
        let second = scan_data_dir(dir.path()).unwrap();
        assert_eq!(first, second);
    }
}
