//! Additive child-friendliness scoring over tag bags.
//!
//! Every rule is independent of every other rule, so the order below carries no
//! meaning. Unknown tags contribute nothing; the result is always clamped.

use kidspot_core::{clamp_score, AgeAppropriate, Category, FacilityFlags, TagBag};

use crate::tags::extract_facilities;

fn is_playground(tags: &TagBag) -> bool {
    tags.has("leisure", "playground") || tags.has("amenity", "playground")
}

fn is_zoo_or_aquarium(tags: &TagBag) -> bool {
    tags.has_any("tourism", &["zoo", "aquarium"])
}

fn is_japanese_restaurant(tags: &TagBag) -> bool {
    tags.has("amenity", "restaurant")
        && tags
            .get("cuisine")
            .is_some_and(|c| c.split(';').any(|part| part.trim().eq_ignore_ascii_case("japanese")))
}

fn has_parking(tags: &TagBag) -> bool {
    tags.get("parking").is_some_and(|v| !v.eq_ignore_ascii_case("no"))
}

fn allows_smoking(tags: &TagBag) -> bool {
    tags.has_any("smoking", &["yes", "dedicated"])
}

fn serves_alcohol(tags: &TagBag) -> bool {
    tags.is_yes("alcohol") || tags.has_any("amenity", &["bar", "pub", "biergarten"])
}

fn is_age_restricted(tags: &TagBag) -> bool {
    tags.get("min_age")
        .and_then(|v| v.trim_end_matches('+').parse::<u32>().ok())
        .is_some_and(|age| age >= 18)
}

/// 0..=100 child-friendliness score.
pub fn score(tags: &TagBag) -> u8 {
    let facilities = extract_facilities(tags);
    let mut raw = 0i32;

    if is_playground(tags) {
        raw += 50;
    }
    if tags.has("leisure", "park") {
        raw += 40;
    }
    if is_zoo_or_aquarium(tags) {
        raw += 45;
    }
    if tags.has("amenity", "fast_food") {
        raw += 20;
    }
    if is_japanese_restaurant(tags) {
        raw += 15;
    }

    if facilities.stroller_friendly {
        raw += 15;
    }
    if facilities.nursing_room {
        raw += 20;
    }
    if facilities.diaper_changing {
        raw += 20;
    }
    if facilities.kids_menu {
        raw += 15;
    }
    if facilities.high_chair {
        raw += 10;
    }

    if tags.is_yes("outdoor_seating") {
        raw += 10;
    }
    if tags.is_yes("air_conditioning") {
        raw += 5;
    }
    if has_parking(tags) {
        raw += 10;
    }

    if allows_smoking(tags) {
        raw -= 20;
    }
    if serves_alcohol(tags) {
        raw -= 5;
    }
    if is_age_restricted(tags) {
        raw -= 30;
    }

    clamp_score(raw)
}

/// Per-bucket suitability, each starting at 50 and clamped on its own.
pub fn age_appropriate(tags: &TagBag) -> AgeAppropriate {
    let facilities = extract_facilities(tags);
    let (mut baby, mut toddler, mut child) = (50i32, 50i32, 50i32);

    if is_playground(tags) {
        baby += 10;
        toddler += 40;
        child += 30;
    }
    if tags.has("leisure", "park") {
        baby += 15;
        toddler += 25;
        child += 20;
    }
    if is_zoo_or_aquarium(tags) {
        baby += 10;
        toddler += 30;
        child += 35;
    }
    if tags.has("tourism", "museum") {
        baby -= 10;
        child += 25;
    }
    if tags.has("amenity", "fast_food") {
        toddler += 10;
        child += 15;
    }

    if facilities.diaper_changing {
        baby += 30;
    }
    if facilities.nursing_room {
        baby += 25;
    }
    if facilities.kids_menu {
        toddler += 20;
        child += 25;
    }
    if facilities.high_chair {
        baby += 15;
        toddler += 15;
    }
    if facilities.stroller_friendly {
        baby += 15;
        toddler += 10;
    }

    if allows_smoking(tags) {
        baby -= 40;
        toddler -= 30;
        child -= 20;
    }
    if is_age_restricted(tags) {
        baby -= 50;
        toddler -= 50;
        child -= 50;
    }

    AgeAppropriate::from_raw(baby, toddler, child)
}

/// Synthesizes the tag bag a source without tags would have produced, so
/// inferred facilities flow through the same scoring rules.
pub fn tags_for_inferred(category: Category, facilities: &FacilityFlags) -> TagBag {
    let mut tags = TagBag::new();
    match category {
        Category::Restaurant => tags.insert("amenity", "restaurant"),
        Category::Cafe => tags.insert("amenity", "cafe"),
        Category::Playground => tags.insert("leisure", "playground"),
        Category::Park => tags.insert("leisure", "park"),
        Category::Museum => tags.insert("tourism", "museum"),
        Category::Shopping => tags.insert("shop", "mall"),
        Category::Entertainment | Category::TouristSpot => {}
    }
    let flags = [
        ("kids_menu", facilities.kids_menu),
        ("highchair", facilities.high_chair),
        ("baby_feeding", facilities.nursing_room),
        ("stroller", facilities.stroller_friendly),
        ("changing_table", facilities.diaper_changing),
        ("playground", facilities.play_area),
    ];
    for (key, set) in flags {
        if set {
            tags.insert(key, "yes");
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(pairs: &[(&str, &str)]) -> TagBag {
        pairs.iter().copied().collect()
    }

    #[test]
    fn empty_bag_scores_zero_with_neutral_ages() {
        assert_eq!(score(&TagBag::new()), 0);
        assert_eq!(age_appropriate(&TagBag::new()), AgeAppropriate::from_raw(50, 50, 50));
    }

    #[test]
    fn park_with_changing_table_adds_both_bonuses() {
        let tags = bag(&[("leisure", "park"), ("changing_table", "yes")]);
        assert_eq!(score(&tags), 60);
        let ages = age_appropriate(&tags);
        assert_eq!(ages.baby, 95);
        assert_eq!(ages.toddler, 75);
        assert_eq!(ages.child, 70);
    }

    #[test]
    fn japanese_restaurant_with_kids_facilities() {
        let tags = bag(&[
            ("amenity", "restaurant"),
            ("cuisine", "sushi;japanese"),
            ("kids_menu", "yes"),
            ("highchair", "yes"),
            ("parking", "surface"),
        ]);
        assert_eq!(score(&tags), 15 + 15 + 10 + 10);
    }

    #[test]
    fn penalties_never_go_below_zero() {
        let tags = bag(&[("amenity", "bar"), ("smoking", "yes"), ("min_age", "20")]);
        assert_eq!(score(&tags), 0);
        let ages = age_appropriate(&tags);
        assert_eq!((ages.baby, ages.toddler, ages.child), (0, 0, 0));
    }

    #[test]
    fn stacked_bonuses_clamp_at_one_hundred() {
        let tags = bag(&[
            ("leisure", "playground"),
            ("tourism", "zoo"),
            ("changing_table", "yes"),
            ("baby_feeding", "yes"),
            ("kids_menu", "yes"),
            ("highchair", "yes"),
            ("stroller", "yes"),
        ]);
        assert_eq!(score(&tags), 100);
        let ages = age_appropriate(&tags);
        assert!(ages.baby <= 100 && ages.toddler <= 100 && ages.child <= 100);
        assert_eq!(ages.toddler, 100);
    }

    #[test]
    fn malformed_values_contribute_nothing() {
        let tags = bag(&[("min_age", "adults"), ("parking", "no"), ("cuisine", "")]);
        assert_eq!(score(&tags), 0);
    }

    #[test]
    fn inferred_tags_score_like_real_ones() {
        let flags = FacilityFlags {
            kids_menu: true,
            high_chair: true,
            ..Default::default()
        };
        let tags = tags_for_inferred(Category::Restaurant, &flags);
        assert_eq!(score(&tags), 25);
        assert!(tags.is_yes("kids_menu"));
    }
}
