//! Tag-bag interpretation: category mapping, facility flags, address formatting.

use kidspot_core::{Category, FacilityFlags, TagBag};

/// Returned by [`format_address`] when no address part is tagged.
pub const NO_ADDRESS: &str = "住所情報なし";

/// `(key, accepted values)` alternatives; a rule matches when any alternative does.
type TagRule = (Category, &'static [(&'static str, &'static [&'static str])]);

/// Ordered; the first matching rule wins.
const CATEGORY_RULES: &[TagRule] = &[
    (
        Category::Restaurant,
        &[("amenity", &["restaurant", "fast_food", "food_court"])],
    ),
    (Category::Cafe, &[("amenity", &["cafe", "ice_cream"])]),
    (
        Category::Playground,
        &[("leisure", &["playground"]), ("amenity", &["playground"])],
    ),
    (
        Category::Park,
        &[("leisure", &["park", "garden", "nature_reserve"])],
    ),
    (
        Category::Museum,
        &[("tourism", &["museum", "gallery"]), ("amenity", &["arts_centre", "planetarium"])],
    ),
    (
        Category::Entertainment,
        &[
            ("tourism", &["zoo", "aquarium", "theme_park"]),
            ("leisure", &["water_park", "amusement_arcade", "indoor_play", "trampoline_park"]),
        ],
    ),
    (
        Category::Shopping,
        &[("shop", &["mall", "department_store", "toys", "baby_goods", "supermarket"])],
    ),
    (
        Category::TouristSpot,
        &[("tourism", &["attraction", "viewpoint"])],
    ),
];

/// Total mapping from a tag bag to a category; unmatched bags are tourist spots.
pub fn map_category(tags: &TagBag) -> Category {
    CATEGORY_RULES
        .iter()
        .find(|(_, alternatives)| {
            alternatives
                .iter()
                .any(|(key, values)| tags.has_any(key, values))
        })
        .map(|(category, _)| *category)
        .unwrap_or(Category::TouristSpot)
}

/// Reads facility keys with the `== "yes"` rule. Missing keys are `false`.
pub fn extract_facilities(tags: &TagBag) -> FacilityFlags {
    FacilityFlags {
        kids_menu: tags.is_yes("kids_menu"),
        high_chair: tags.is_yes("highchair"),
        nursing_room: tags.is_yes("baby_feeding"),
        stroller_friendly: tags.is_yes("stroller") || tags.is_yes("wheelchair"),
        diaper_changing: tags.is_yes("changing_table"),
        play_area: tags.is_yes("playground"),
    }
}

const ADDRESS_KEYS: [&str; 6] = [
    "addr:postcode",
    "addr:city",
    "addr:town",
    "addr:suburb",
    "addr:street",
    "addr:housenumber",
];

/// Space-joined address parts in postcode → house-number order.
pub fn format_address(tags: &TagBag) -> String {
    let parts: Vec<&str> = ADDRESS_KEYS.iter().filter_map(|k| tags.get(k)).collect();
    if parts.is_empty() {
        NO_ADDRESS.to_string()
    } else {
        parts.join(" ")
    }
}

/// Venue keywords recognized inside free text (names, hashtags).
pub const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (Category::Cafe, &["カフェ", "cafe", "café", "喫茶"]),
    (Category::Restaurant, &["レストラン", "restaurant", "食堂", "ダイナー"]),
    (Category::Playground, &["遊び場", "キッズパーク", "児童館", "playground"]),
    (Category::Park, &["公園", "パーク", "park", "広場"]),
    (Category::Museum, &["博物館", "美術館", "科学館", "museum"]),
    (Category::Entertainment, &["水族館", "動物園", "遊園地", "aquarium", "zoo"]),
    (Category::Shopping, &["モール", "ショッピング", "百貨店", "mall"]),
];

/// Best guess at a category from a free-text name, if it carries a venue keyword.
pub fn category_from_text(text: &str) -> Option<Category> {
    let lower = text.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(category, _)| *category)
}
