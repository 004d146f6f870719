//! Local intent classification and filter extraction for chat messages.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::catalog::Category;
use crate::search::{normalize_color, SearchFilters};

/// What a chat message asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Find products in the catalog
    Recommend,
    /// Search by a photo the user has not sent yet
    ImageSearch,
    /// General conversation
    Chat,
}

/// Intent and filters extracted from a message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    pub intent: Intent,
    pub filters: SearchFilters,
}

const SHOPPING_WORDS: [&str; 9] = [
    "find", "show", "recommend", "suggest", "buy", "need", "want", "looking", "search",
];
const PRICE_WORDS: [&str; 6] = ["under", "over", "below", "above", "between", "cheap"];
const IMAGE_WORDS: [&str; 6] = ["image", "photo", "picture", "pic", "photos", "pictures"];

const NUMBER: &str = r"\$?\s*(\d+(?:\.\d+)?)";

static BETWEEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:between|from)\s*{NUMBER}\s*(?:and|to|-)\s*{NUMBER}"
    ))
    .expect("valid between regex")
});

static MAX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?:\bunder|\bbelow|\bless than|\bcheaper than|\bup to|<=|≤|<)\s*{NUMBER}"
    ))
    .expect("valid max-price regex")
});

static MIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?:\bover|\babove|\bmore than|\bat least|>=|≥|>)\s*{NUMBER}"
    ))
    .expect("valid min-price regex")
});

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .map(|w| w.trim_matches('-').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn capture(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

/// Extract category, color and price bounds.
pub fn extract_filters(text: &str) -> SearchFilters {
    let words = words(text);
    let category = words.iter().find_map(|w| Category::from_word(w));
    let color = words
        .iter()
        .filter_map(|w| normalize_color(w))
        .find(|c| *c != "assorted")
        .map(str::to_string);

    let (mut min_price, mut max_price) = (capture(&MIN_RE, text), capture(&MAX_RE, text));
    if let Some(caps) = BETWEEN_RE.captures(text) {
        let a = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
        let b = caps.get(2).and_then(|m| m.as_str().parse::<f64>().ok());
        if let (Some(a), Some(b)) = (a, b) {
            min_price = Some(a.min(b));
            max_price = Some(a.max(b));
        }
    }

    SearchFilters {
        category,
        color,
        min_price,
        max_price,
    }
}

/// Classify a message and extract its filters.
///
/// Category words mean a recommendation. Without one, a mention of a
/// photo means image search; shopping or price words mean a
/// recommendation; anything else is chat.
pub fn parse_message(text: &str) -> ParsedMessage {
    let filters = extract_filters(text);
    let words = words(text);
    let has = |vocab: &[&str]| words.iter().any(|w| vocab.contains(&w.as_str()));

    let intent = if filters.category.is_some() {
        Intent::Recommend
    } else if has(&IMAGE_WORDS) {
        Intent::ImageSearch
    } else if has(&SHOPPING_WORDS)
        || has(&PRICE_WORDS)
        || filters.min_price.is_some()
        || filters.max_price.is_some()
    {
        Intent::Recommend
    } else {
        Intent::Chat
    };

    ParsedMessage { intent, filters }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommend_with_category_color_and_max_price() {
        let parsed = parse_message("red bag under 80");
        assert_eq!(parsed.intent, Intent::Recommend);
        assert_eq!(parsed.filters.category, Some(Category::Bags));
        assert_eq!(parsed.filters.color.as_deref(), Some("red"));
        assert_eq!(parsed.filters.max_price, Some(80.0));
        assert_eq!(parsed.filters.min_price, None);
    }

    #[test]
    fn test_between_orders_bounds() {
        let filters = extract_filters("jackets between $120 and 60");
        assert_eq!(filters.min_price, Some(60.0));
        assert_eq!(filters.max_price, Some(120.0));

        let filters = extract_filters("shoes from 40 to 90.5");
        assert_eq!(filters.min_price, Some(40.0));
        assert_eq!(filters.max_price, Some(90.5));
    }

    #[test]
    fn test_min_price_and_color_synonyms() {
        let filters = extract_filters("navy cap over $15");
        assert_eq!(filters.category, Some(Category::Caps));
        assert_eq!(filters.color.as_deref(), Some("blue"));
        assert_eq!(filters.min_price, Some(15.0));

        let filters = extract_filters("something in gray");
        assert_eq!(filters.color.as_deref(), Some("grey"));
    }

    #[test]
    fn test_tee_synonyms_map_to_tops() {
        let parsed = parse_message("lightweight running t-shirt");
        assert_eq!(parsed.intent, Intent::Recommend);
        assert_eq!(parsed.filters.category, Some(Category::Tops));
    }

    #[test]
    fn test_image_intent_without_category() {
        assert_eq!(
            parse_message("can I search with a photo?").intent,
            Intent::ImageSearch
        );
        assert_eq!(
            parse_message("photo of red shoes").intent,
            Intent::Recommend,
            "Category words win over image words"
        );
    }

    #[test]
    fn test_chat_intent() {
        for text in ["hi there", "what's your name", "what can you do"] {
            let parsed = parse_message(text);
            assert_eq!(parsed.intent, Intent::Chat, "text: {}", text);
            assert!(parsed.filters.is_empty());
        }
    }

    #[test]
    fn test_price_only_is_recommend() {
        let parsed = parse_message("anything cheap under 20?");
        assert_eq!(parsed.intent, Intent::Recommend);
        assert_eq!(parsed.filters.max_price, Some(20.0));
    }
}
