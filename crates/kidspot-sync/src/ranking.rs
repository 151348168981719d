//! Weekly popularity ranking, seasonal recommendations and profile-aware ordering.

use kidspot_core::CandidateSpot;
use serde::{Deserialize, Serialize};

pub const SEASONAL_BOOST: f64 = 20.0;

/// Composite of rating, review volume, trending flag and facilities, capped at 100.
pub fn popularity_score(spot: &CandidateSpot) -> f64 {
    let f = &spot.facilities;
    let flag = |on: bool, weight: f64| if on { weight } else { 0.0 };

    let raw = spot.rating.map(|r| r * 20.0).unwrap_or(0.0)
        + f64::from(spot.review_count.unwrap_or(0)) * 0.1
        + flag(spot.is_trending, 30.0)
        + flag(f.kids_menu, 10.0)
        + flag(f.high_chair, 8.0)
        + flag(f.nursing_room, 15.0)
        + flag(f.stroller_friendly, 12.0)
        + flag(f.diaper_changing, 15.0)
        + flag(f.play_area, 20.0);
    raw.clamp(0.0, 100.0)
}

/// Recomputes popularity and numbers the spots 1.. in the order given.
pub fn rank_weekly(spots: Vec<CandidateSpot>) -> Vec<CandidateSpot> {
    spots
        .into_iter()
        .enumerate()
        .map(|(i, mut spot)| {
            spot.popularity_score = popularity_score(&spot);
            spot.weekly_rank = Some(i as u32 + 1);
            spot
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
}

impl Season {
    pub fn from_month(month: u32) -> Option<Season> {
        match month {
            3..=5 => Some(Season::Spring),
            6..=8 => Some(Season::Summer),
            9..=11 => Some(Season::Autumn),
            12 | 1 | 2 => Some(Season::Winter),
            _ => None,
        }
    }

    fn features(&self) -> &'static [SeasonalFeature] {
        match self {
            Season::Spring => SPRING_FEATURES,
            Season::Summer => SUMMER_FEATURES,
            Season::Autumn => AUTUMN_FEATURES,
            Season::Winter => WINTER_FEATURES,
        }
    }
}

/// `(recommendation title, keywords)`.
type SeasonalFeature = (&'static str, &'static [&'static str]);

const SPRING_FEATURES: &[SeasonalFeature] = &[
    ("お花見スポット", &["桜", "花見", "cherry blossom"]),
    ("花畑めぐり", &["チューリップ", "菜の花", "ネモフィラ", "花畑", "flower"]),
    ("いちご狩り", &["いちご", "苺", "strawberry"]),
];
const SUMMER_FEATURES: &[SeasonalFeature] = &[
    ("海・水遊び", &["海", "ビーチ", "プール", "水遊び", "beach"]),
    ("涼しい屋内施設", &["水族館", "屋内", "aquarium", "indoor"]),
    ("夏祭り・花火", &["祭り", "花火", "festival"]),
];
const AUTUMN_FEATURES: &[SeasonalFeature] = &[
    ("紅葉狩り", &["紅葉", "もみじ", "autumn leaves"]),
    ("味覚狩り", &["ぶどう狩り", "りんご狩り", "栗拾い", "果樹園", "orchard"]),
    ("ハイキング", &["ハイキング", "山", "hiking"]),
];
const WINTER_FEATURES: &[SeasonalFeature] = &[
    ("温泉", &["温泉", "onsen"]),
    ("イルミネーション", &["イルミネーション", "illumination"]),
    ("室内遊び場", &["室内", "キッズスペース", "屋内", "indoor"]),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub season: Season,
    pub title: String,
    pub keywords: Vec<String>,
    pub region: String,
}

impl Recommendation {
    /// Case-insensitive substring match over name, description and category label.
    pub fn matches(&self, spot: &CandidateSpot) -> bool {
        let haystack = format!(
            "{} {} {}",
            spot.name,
            spot.description.as_deref().unwrap_or_default(),
            spot.category.label_ja()
        )
        .to_lowercase();
        self.keywords.iter().any(|k| haystack.contains(&k.to_lowercase()))
    }
}

/// Fixed calendar table. An invalid month yields nothing.
pub fn seasonal_recommendations(month: u32, region: &str) -> Vec<Recommendation> {
    let Some(season) = Season::from_month(month) else {
        return Vec::new();
    };
    season
        .features()
        .iter()
        .map(|(title, keywords)| Recommendation {
            season,
            title: (*title).to_string(),
            keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            region: region.to_string(),
        })
        .collect()
}

/// +20 popularity once per spot that matches any recommendation, tagged with
/// every recommendation it matched.
pub fn apply_seasonal_boost(spots: Vec<CandidateSpot>, recs: &[Recommendation]) -> Vec<CandidateSpot> {
    spots
        .into_iter()
        .map(|mut spot| {
            let matched: Vec<&Recommendation> = recs.iter().filter(|r| r.matches(&spot)).collect();
            if !matched.is_empty() {
                spot.popularity_score = (spot.popularity_score + SEASONAL_BOOST).min(100.0);
                for rec in matched {
                    if !spot.seasonal_tags.contains(&rec.title) {
                        spot.seasonal_tags.push(rec.title.clone());
                    }
                }
            }
            spot
        })
        .collect()
}

/// Relative importance of each age bucket for a family profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgeWeights {
    pub baby: f64,
    pub toddler: f64,
    pub child: f64,
}

impl AgeWeights {
    /// Scales the triple to sum to 1. Non-positive or non-finite input falls
    /// back to equal weights.
    pub fn normalized(baby: f64, toddler: f64, child: f64) -> Self {
        let parts = [baby, toddler, child].map(|w| if w.is_finite() { w.max(0.0) } else { 0.0 });
        let total: f64 = parts.iter().sum();
        if total <= 0.0 {
            return Self::equal();
        }
        Self {
            baby: parts[0] / total,
            toddler: parts[1] / total,
            child: parts[2] / total,
        }
    }

    pub fn equal() -> Self {
        Self {
            baby: 1.0 / 3.0,
            toddler: 1.0 / 3.0,
            child: 1.0 / 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRanked {
    pub spot: CandidateSpot,
    pub weighted_score: f64,
    pub final_score: f64,
}

/// Sorted by `weighted*0.7 + popularity*0.3`, descending and stable.
pub fn rank_for_profile(spots: Vec<CandidateSpot>, weights: AgeWeights) -> Vec<ProfileRanked> {
    let mut ranked: Vec<ProfileRanked> = spots
        .into_iter()
        .map(|spot| {
            let ages = spot.age_appropriate;
            let weighted_score = f64::from(ages.baby) * weights.baby
                + f64::from(ages.toddler) * weights.toddler
                + f64::from(ages.child) * weights.child;
            let final_score = weighted_score * 0.7 + spot.popularity_score * 0.3;
            ProfileRanked {
                spot,
                weighted_score,
                final_score,
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
    ranked
}
