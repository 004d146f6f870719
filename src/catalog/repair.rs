//! Repair stale image paths in a loaded catalog.
//!
//! Catalog files drift from the images on disk: files get moved between
//! category folders, renamed to a different extension, or referenced by an
//! old absolute path. Each product whose local image is missing is matched
//! against the data directory by file name, file stem and the
//! `<category>-<n>` id convention (`shoes-3` → `shoe3`).

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::scan::{is_image, sorted_entries, IMAGE_EXTENSIONS};
use super::{Category, Product};

/// Names to look for, most specific first, without duplicates.
fn candidates(product: &Product) -> Vec<String> {
    let image = Path::new(product.image.trim());
    let mut out = Vec::new();
    for name in [image.file_name(), image.file_stem()].into_iter().flatten() {
        if let Some(name) = name.to_str() {
            out.push(name.to_string());
        }
    }
    if let Some((prefix, number)) = product.id.to_ascii_lowercase().rsplit_once('-') {
        let category = Category::from_word(prefix).filter(|c| c.as_str() == prefix);
        if let (Some(category), true) = (category, number.chars().all(|c| c.is_ascii_digit())) {
            if !number.is_empty() {
                out.push(format!("{}{}", category.singular(), number));
            }
        }
    }
    let mut seen = Vec::with_capacity(out.len());
    out.retain(|name| {
        if name.is_empty() || seen.contains(name) {
            return false;
        }
        seen.push(name.clone());
        true
    });
    out
}

/// Folders searched, own category first, data directory root last.
fn folders(data_dir: &Path, category: Category) -> Vec<PathBuf> {
    let mut out = vec![data_dir.join(category.as_str())];
    out.extend(
        Category::ALL
            .iter()
            .filter(|c| **c != category)
            .map(|c| data_dir.join(c.as_str())),
    );
    out.push(data_dir.to_path_buf());
    out
}

fn find(data_dir: &Path, name: &str, category: Category) -> Option<PathBuf> {
    let names: Vec<String> = if is_image(Path::new(name)) {
        vec![name.to_string()]
    } else {
        IMAGE_EXTENSIONS
            .iter()
            .map(|ext| format!("{}.{}", name, ext))
            .collect()
    };
    let folders = folders(data_dir, category);

    let exact = folders
        .iter()
        .flat_map(|folder| names.iter().map(move |n| folder.join(n)))
        .find(|path| path.is_file());
    if exact.is_some() {
        return exact;
    }

    let wanted = name.to_ascii_lowercase();
    folders.iter().find_map(|folder| {
        sorted_entries(folder).ok()?.into_iter().find(|path| {
            let matches = |part: Option<&std::ffi::OsStr>| {
                part.and_then(|p| p.to_str())
                    .is_some_and(|p| p.to_ascii_lowercase() == wanted)
            };
            path.is_file()
                && is_image(path)
                && (matches(path.file_name()) || matches(path.file_stem()))
        })
    })
}

/// Point products with a missing local image at a matching file under
/// `data_dir`. Remote and already valid images are left alone.
///
/// Returns the number of products changed.
pub fn repair_image_paths(products: &mut [Product], data_dir: &Path) -> usize {
    let mut changed = 0;
    for product in products.iter_mut() {
        let image = product.image.trim();
        let remote = ["http://", "https://", "data:"]
            .iter()
            .any(|scheme| image.starts_with(scheme));
        if remote {
            continue;
        }
        if product
            .local_image_path(data_dir)
            .is_some_and(|path| path.is_file())
        {
            continue;
        }

        let found = candidates(product)
            .iter()
            .find_map(|name| find(data_dir, name, product.category));
        let Some(path) = found else {
            debug!("No image found for {} ({})", product.id, product.image);
            continue;
        };
        let Ok(rel) = path.strip_prefix(data_dir) else {
            continue;
        };
        let rel = rel
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect::<Vec<_>>()
            .join("/");
        debug!("Repaired image for {}: {} -> {}", product.id, product.image, rel);
        product.image = rel;
        changed += 1;
    }
    if changed > 0 {
        info!("Repaired {} stale image paths", changed);
    }
    changed
}
