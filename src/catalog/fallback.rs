//! Image fallback chain for product cards.
//!
//! A card tries its primary image first, then a category placeholder, then
//! the generic placeholders. When every candidate has failed the card
//! renders no image at all.

use crate::config::ImagesSection;

use super::Product;

/// Ordered image candidates with a cursor scoped to one card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFallbackChain {
    candidates: Vec<String>,
    index: usize,
}

impl ImageFallbackChain {
    /// Build a chain from optional parts, dropping absent, blank and repeated entries.
    pub fn new<I>(primary: Option<&str>, category_fallback: Option<&str>, generic: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut candidates: Vec<String> = Vec::new();
        let generic: Vec<String> = generic
            .into_iter()
            .map(|g| g.as_ref().to_string())
            .collect();
        let ordered = primary
            .into_iter()
            .chain(category_fallback)
            .chain(generic.iter().map(String::as_str));
        for url in ordered {
            let url = url.trim();
            if !url.is_empty() && !candidates.iter().any(|c| c == url) {
                candidates.push(url.to_string());
            }
        }
        Self {
            candidates,
            index: 0,
        }
    }

    /// Chain for a catalog product under the configured placeholders.
    pub fn for_product(product: &Product, images: &ImagesSection) -> Self {
        let primary = product.image_url();
        Self::new(
            Some(primary.as_str()),
            images.category_fallback(product.category),
            &images.generic_fallbacks,
        )
    }

    /// URL to try now; `None` once every candidate has failed.
    pub fn current(&self) -> Option<&str> {
        self.candidates.get(self.index).map(String::as_str)
    }

    /// Record a load failure of the current candidate and move to the next one.
    pub fn advance(&mut self) -> Option<&str> {
        if self.index < self.candidates.len() {
            self.index += 1;
        }
        self.current()
    }

    /// Whether every candidate has failed.
    pub fn is_exhausted(&self) -> bool {
        self.index >= self.candidates.len()
    }

    /// All candidates in try order.
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Consume the chain, returning the candidate list.
    pub fn into_candidates(self) -> Vec<String> {
        self.candidates
    }
}
