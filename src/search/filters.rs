//! Hard catalog filters applied before ranking.

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, Category, Product};

/// Normalize a color word to its basic color name.
///
/// Synonyms collapse onto basic colors (`navy` → `blue`, `gray` → `grey`);
/// unknown words yield `None`.
pub fn normalize_color(word: &str) -> Option<&'static str> {
    let color = match word.trim().to_ascii_lowercase().as_str() {
        "black" | "jet" | "onyx" => "black",
        "white" | "ivory" | "cream" | "off-white" => "white",
        "red" | "crimson" | "maroon" | "burgundy" | "scarlet" => "red",
        "blue" | "navy" | "cobalt" | "sky" | "teal" | "azure" => "blue",
        "green" | "olive" | "forest" | "mint" => "green",
        "yellow" | "mustard" => "yellow",
        "orange" | "rust" => "orange",
        "purple" | "violet" | "lilac" => "purple",
        "pink" | "magenta" | "rose" | "fuchsia" => "pink",
        "brown" | "chocolate" => "brown",
        "grey" | "gray" | "charcoal" | "slate" | "silver" => "grey",
        "beige" | "tan" | "camel" | "khaki" => "beige",
        "assorted" | "multicolor" | "multi" => "assorted",
        _ => return None,
    };
    Some(color)
}

/// Category, color and price constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    pub category: Option<Category>,
    pub color: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

impl SearchFilters {
    /// Whether no constraint is set.
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.color.is_none()
            && self.min_price.is_none()
            && self.max_price.is_none()
    }

    /// Normalized color constraint, if any.
    fn color_key(&self) -> Option<&'static str> {
        self.color.as_deref().and_then(normalize_color)
    }

    /// Whether a product satisfies the filters, optionally ignoring color.
    pub fn matches(&self, product: &Product, check_color: bool) -> bool {
        if let Some(category) = self.category {
            if product.category != category {
                return false;
            }
        }
        if check_color {
            if let Some(wanted) = self.color_key() {
                let actual = product.color.as_deref().and_then(normalize_color);
                if actual != Some(wanted) {
                    return false;
                }
            }
        }
        if let Some(min) = self.min_price {
            if product.price < min {
                return false;
            }
        }
        if let Some(max) = self.max_price {
            if product.price > max {
                return false;
            }
        }
        true
    }

    /// Catalog positions passing the filters.
    ///
    /// If nothing passes and a category was requested, the color constraint
    /// is dropped; category and price always stay strict.
    pub fn candidates(&self, catalog: &Catalog) -> Vec<usize> {
        let strict = self.positions(catalog, true);
        if strict.is_empty() && self.category.is_some() && self.color_key().is_some() {
            return self.positions(catalog, false);
        }
        strict
    }

    fn positions(&self, catalog: &Catalog, check_color: bool) -> Vec<usize> {
        catalog
            .products()
            .iter()
            .enumerate()
            .filter(|(_, p)| self.matches(p, check_color))
            .map(|(idx, _)| idx)
            .collect()
    }
}
