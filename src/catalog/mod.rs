//! Product catalog.
//!
//! The catalog is loaded once at startup into an immutable [`Catalog`]
//! snapshot and shared behind an `Arc` for the lifetime of the process.
//!
//! Two sources are supported:
//! - a JSON file (`catalog.json`), either a bare array of products or an
//!   object with an `items` array
//! - a directory scan of `<data_dir>/<category>/<image>` files, used when
//!   no catalog file exists
//!
//! Image paths in a catalog file are repaired against the data directory
//! on load (see [`repair`]).

pub mod fallback;
pub mod repair;
pub mod scan;

pub use fallback::ImageFallbackChain;
pub use repair::repair_image_paths;
pub use scan::scan_data_dir;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::CatalogSection;
use crate::error::{Error, Result};

/// Product category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Category {
    Bags,
    Caps,
    Jackets,
    Shoes,
    Tops,
    Dresses,
    Pants,
}

impl Category {
    /// Every category, in display order.
    pub const ALL: [Category; 7] = [
        Category::Bags,
        Category::Caps,
        Category::Jackets,
        Category::Shoes,
        Category::Tops,
        Category::Dresses,
        Category::Pants,
    ];

    /// Canonical (plural, lowercase) name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Bags => "bags",
            Category::Caps => "caps",
            Category::Jackets => "jackets",
            Category::Shoes => "shoes",
            Category::Tops => "tops",
            Category::Dresses => "dresses",
            Category::Pants => "pants",
        }
    }

    /// Singular noun used in generated titles and summaries.
    pub fn singular(&self) -> &'static str {
        match self {
            Category::Bags => "bag",
            Category::Caps => "cap",
            Category::Jackets => "jacket",
            Category::Shoes => "shoe",
            Category::Tops => "top",
            Category::Dresses => "dress",
            Category::Pants => "pants",
        }
    }

    /// Map a single word (singular, plural or synonym) to a category.
    pub fn from_word(word: &str) -> Option<Category> {
        let category = match word.trim().to_ascii_lowercase().as_str() {
            "bag" | "bags" | "tote" | "totes" | "backpack" | "backpacks" | "handbag"
            | "handbags" => Category::Bags,
            "cap" | "caps" | "hat" | "hats" | "beanie" | "beanies" => Category::Caps,
            "jacket" | "jackets" | "coat" | "coats" | "windbreaker" | "puffer" => {
                Category::Jackets
            }
            "shoe" | "shoes" | "sneaker" | "sneakers" | "trainer" | "trainers" | "runner"
            | "runners" => Category::Shoes,
            "top" | "tops" | "tee" | "tees" | "t-shirt" | "t-shirts" | "tshirt" | "tshirts"
            | "shirt" | "shirts" => Category::Tops,
            "dress" | "dresses" => Category::Dresses,
            "pant" | "pants" | "trousers" | "jeans" | "joggers" => Category::Pants,
            _ => return None,
        };
        Some(category)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Category::from_word(s).ok_or_else(|| Error::Catalog(format!("unknown category '{}'", s)))
    }
}

impl TryFrom<String> for Category {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// One catalog record. Immutable after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub brand: String,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub description: String,
    /// Path relative to the data directory, absolute path, or URL
    #[serde(alias = "image_path")]
    pub image: String,
}

impl Product {
    /// URL the client should load for this product's image.
    ///
    /// Relative paths are served from the `/data` static mount.
    pub fn image_url(&self) -> String {
        let image = self.image.trim();
        if image.is_empty() {
            return String::new();
        }
        if image.starts_with("http://")
            || image.starts_with("https://")
            || image.starts_with("data:")
            || image.starts_with('/')
        {
            image.to_string()
        } else {
            format!("/data/{}", image.trim_start_matches("./"))
        }
    }

    /// Local file backing the image, if it lives under `data_dir`.
    pub fn local_image_path(&self, data_dir: &Path) -> Option<std::path::PathBuf> {
        let url = self.image_url();
        let rel = url.strip_prefix("/data/")?;
        Some(data_dir.join(rel))
    }

    /// Text used for embedding: title, brand, category, color and description.
    pub fn text_blob(&self) -> String {
        [
            self.title.as_str(),
            self.brand.as_str(),
            self.category.as_str(),
            self.color.as_deref().unwrap_or(""),
            self.description.as_str(),
        ]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    List(Vec<Product>),
    Wrapped { items: Vec<Product> },
}

/// Immutable catalog snapshot.
#[derive(Debug, Clone)]
pub struct Catalog {
    products: Vec<Product>,
    by_id: HashMap<String, usize>,
}

impl Catalog {
    /// Build a catalog, validating every record.
    ///
    /// # Errors
    ///
    /// Fails on duplicate ids, empty ids or titles, and negative or
    /// non-finite prices.
    pub fn new(products: Vec<Product>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(products.len());
        for (idx, product) in products.iter().enumerate() {
            if product.id.trim().is_empty() {
                return Err(Error::Catalog(format!("product #{} has an empty id", idx)));
            }
            if product.title.trim().is_empty() {
                return Err(Error::Catalog(format!(
                    "product '{}' has an empty title",
                    product.id
                )));
            }
            if !product.price.is_finite() || product.price < 0.0 {
                return Err(Error::Catalog(format!(
                    "product '{}' has invalid price {}",
                    product.id, product.price
                )));
            }
            if by_id.insert(product.id.clone(), idx).is_some() {
                return Err(Error::Catalog(format!(
                    "duplicate product id '{}'",
                    product.id
                )));
            }
        }
        Ok(Self { products, by_id })
    }

    fn read_products(path: &Path) -> Result<Vec<Product>> {
        let raw = std::fs::read_to_string(path)?;
        Ok(match serde_json::from_str::<CatalogFile>(&raw)? {
            CatalogFile::List(items) | CatalogFile::Wrapped { items } => items,
        })
    }

    /// Load a catalog from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(Self::read_products(path.as_ref())?)
    }

    /// Load the configured catalog file, or scan the data directory when it is missing.
    pub fn load_or_scan(section: &CatalogSection) -> Result<Self> {
        let path = section.catalog_path();
        let catalog = if path.exists() {
            info!("Loading catalog from: {}", path.display());
            let mut products = Self::read_products(&path)?;
            if section.repair_paths {
                repair_image_paths(&mut products, &section.data_dir);
            }
            Self::new(products)?
        } else {
            info!(
                "No catalog file at {}, scanning {}",
                path.display(),
                section.data_dir.display()
            );
            Self::new(scan_data_dir(&section.data_dir)?)?
        };
        info!("Catalog ready with {} products", catalog.len());
        Ok(catalog)
    }

    /// All products in catalog order.
    pub fn products(&self) -> &[Product] {
        &self.products
    }

    /// Product at a catalog position.
    pub fn get(&self, idx: usize) -> Option<&Product> {
        self.products.get(idx)
    }

    /// Product by id.
    pub fn by_id(&self, id: &str) -> Option<&Product> {
        self.by_id.get(id).and_then(|&idx| self.products.get(idx))
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Product count per category.
    pub fn count_by_category(&self) -> BTreeMap<Category, usize> {
        let mut counts = BTreeMap::new();
        for product in &self.products {
            *counts.entry(product.category).or_insert(0) += 1;
        }
        counts
    }
}
