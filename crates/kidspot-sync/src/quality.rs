//! Rule-based quality gate for candidates headed into the store.

use kidspot_adapters::tags::CATEGORY_KEYWORDS;
use kidspot_core::{CandidateSpot, GeoPoint, PersistedSpot, RegionBounds, SpotSource};
use kidspot_storage::{SpotStore, StoreError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dedup::{name_similarity, DUPLICATE_THRESHOLD};

/// Half-width of the duplicate proximity box, in degrees.
pub const DUPLICATE_EPSILON_DEG: f64 = 0.001;
pub const MIN_VALID_SCORE: u8 = 60;

const SUBSCORE_BASE: i32 = 50;
const FORBIDDEN_NAME_CHARS: [char; 5] = ['<', '>', '"', '\'', '&'];
const URL_MARKERS: [&str; 3] = ["http://", "https://", "www."];

const FAMILY_KEYWORDS: [&str; 16] = [
    "子連れ", "子ども", "子供", "こども", "キッズ", "親子", "ファミリー", "家族", "赤ちゃん", "ベビー",
    "授乳", "おむつ", "kids", "family", "child", "baby",
];

/// Each group adds +5 when any of its words appears.
const SPECIFIC_INFO_KEYWORDS: [&[&str]; 5] = [
    &["営業時間", "hours"],
    &["料金", "price"],
    &["駐車場", "parking"],
    &["予約", "reservation"],
    &["設備", "facilities"],
];

/// The descriptive fields the gate looks at. Borrowed from either a fresh
/// candidate or an existing store record so both score on the same scale.
#[derive(Debug, Clone, Copy)]
pub struct QualityInput<'a> {
    pub name: &'a str,
    pub location: Option<GeoPoint>,
    pub description: Option<&'a str>,
    pub source: Option<SpotSource>,
    pub source_url: Option<&'a str>,
    pub popularity_score: f64,
}

impl<'a> From<&'a CandidateSpot> for QualityInput<'a> {
    fn from(spot: &'a CandidateSpot) -> Self {
        Self {
            name: &spot.name,
            location: spot.location,
            description: spot.description.as_deref(),
            source: Some(spot.source),
            source_url: spot.source_url.as_deref(),
            popularity_score: spot.popularity_score,
        }
    }
}

impl<'a> From<&'a PersistedSpot> for QualityInput<'a> {
    fn from(record: &'a PersistedSpot) -> Self {
        Self::from(&record.spot)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub id: Uuid,
    pub name: String,
    /// 0..=100.
    pub similarity: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub is_valid: bool,
    pub score: u8,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub duplicate: Option<DuplicateMatch>,
}

impl QualityReport {
    pub fn is_duplicate(&self) -> bool {
        self.duplicate.is_some()
    }
}

/// Running tally; turned into a report once every rule has fired.
#[derive(Debug)]
struct Tally {
    points: i32,
    issues: Vec<String>,
    suggestions: Vec<String>,
}

impl Tally {
    fn issue(&mut self, delta: i32, message: impl Into<String>) {
        self.points += delta;
        self.issues.push(message.into());
    }

    fn suggest(&mut self, delta: i32, message: impl Into<String>) {
        self.points += delta;
        self.suggestions.push(message.into());
    }

    fn finish(self, duplicate: Option<DuplicateMatch>) -> QualityReport {
        let score = kidspot_core::clamp_score(self.points);
        QualityReport {
            is_valid: score >= MIN_VALID_SCORE && self.issues.is_empty(),
            score,
            issues: self.issues,
            suggestions: self.suggestions,
            duplicate,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QualityGate {
    region: RegionBounds,
}

impl QualityGate {
    pub fn new(region: RegionBounds) -> Self {
        Self { region }
    }

    /// Every rule except the store lookup. Deterministic and side-effect free.
    pub fn evaluate(&self, input: &QualityInput<'_>) -> QualityReport {
        self.tally(input).finish(None)
    }

    /// Full check: the rules plus a duplicate lookup against the store.
    pub async fn check(
        &self,
        input: &QualityInput<'_>,
        store: &dyn SpotStore,
    ) -> Result<QualityReport, StoreError> {
        let mut tally = self.tally(input);
        let duplicate = find_duplicate(input, store).await?;
        if let Some(found) = &duplicate {
            tally.issue(
                -15,
                format!("possible duplicate of '{}' ({}% similar)", found.name, found.similarity),
            );
        }
        Ok(tally.finish(duplicate))
    }

    fn tally(&self, input: &QualityInput<'_>) -> Tally {
        let mut tally = Tally {
            points: 100,
            issues: Vec::new(),
            suggestions: Vec::new(),
        };

        let name = input.name.trim();
        if name.is_empty() {
            tally.issue(-30, "name is missing");
        } else {
            check_name(name, &mut tally);
        }

        match input.location {
            Some(point) if point.is_valid() => {
                if !self.region.contains(&point) {
                    tally.issue(-20, "coordinates are outside the service region");
                }
            }
            _ => tally.issue(-25, "coordinates are missing or invalid"),
        }

        check_description(input.description, &mut tally);
        check_source(input, &mut tally);
        tally
    }
}

fn check_name(name: &str, tally: &mut Tally) {
    let mut sub = SUBSCORE_BASE;
    let length = name.chars().count();
    if length < 2 {
        sub -= 20;
        tally.issues.push("name is shorter than 2 characters".into());
    } else if length > 50 {
        sub -= 10;
        tally.issues.push("name is longer than 50 characters".into());
    }
    if name.contains(FORBIDDEN_NAME_CHARS) {
        sub -= 15;
        tally.issues.push("name contains markup characters".into());
    }
    let lower = name.to_lowercase();
    if URL_MARKERS.iter().any(|m| lower.contains(m)) {
        sub -= 25;
        tally.issues.push("name contains a URL".into());
    }
    if !name.chars().any(is_name_script) {
        sub -= 5;
        tally.suggestions.push("name has no Japanese or Latin letters".into());
    }
    if CATEGORY_KEYWORDS
        .iter()
        .any(|(_, words)| words.iter().any(|w| lower.contains(w)))
    {
        sub += 10;
    }
    tally.points += sub - SUBSCORE_BASE;
}

fn is_name_script(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{309F}'   // hiragana
        | '\u{30A0}'..='\u{30FF}' // katakana
        | '\u{4E00}'..='\u{9FFF}' // CJK unified ideographs
        | '\u{FF66}'..='\u{FF9F}' // half-width katakana
    ) || c.is_ascii_alphabetic()
}

fn check_description(description: Option<&str>, tally: &mut Tally) {
    let text = description.map(str::trim).unwrap_or_default();
    if text.is_empty() {
        tally.suggest(-SUBSCORE_BASE, "add a description");
        return;
    }

    let mut sub = SUBSCORE_BASE;
    let length = text.chars().count();
    if length < 10 {
        sub -= 20;
        tally.suggestions.push("description is very short".into());
    } else if length > 500 {
        sub -= 10;
        tally.suggestions.push("description is longer than 500 characters".into());
    }

    let lower = text.to_lowercase();
    if FAMILY_KEYWORDS.iter().any(|k| lower.contains(k)) {
        sub += 15;
    } else {
        tally
            .suggestions
            .push("mention what makes the spot family friendly".into());
    }
    for group in SPECIFIC_INFO_KEYWORDS {
        if group.iter().any(|k| lower.contains(k)) {
            sub += 5;
        }
    }
    tally.points += sub - SUBSCORE_BASE;
}

fn check_source(input: &QualityInput<'_>, tally: &mut Tally) {
    let has_url = input.source_url.is_some_and(|u| !u.trim().is_empty());
    match input.source {
        Some(SpotSource::Instagram) => tally.points += if has_url { 15 } else { 10 },
        Some(SpotSource::Twitter) => tally.points += if has_url { 10 } else { 5 },
        Some(_) => {}
        None => tally.suggest(-10, "record where this spot came from"),
    }
    if input.popularity_score > 70.0 {
        tally.points += 10;
    }
}

/// Exact name match first, then the best similar name inside the proximity box.
pub async fn find_duplicate(
    input: &QualityInput<'_>,
    store: &dyn SpotStore,
) -> Result<Option<DuplicateMatch>, StoreError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Ok(None);
    }
    if let Some(found) = store.find_by_name(name).await? {
        return Ok(Some(DuplicateMatch {
            id: found.id,
            name: found.spot.name,
            similarity: 100,
        }));
    }
    let Some(point) = input.location.filter(GeoPoint::is_valid) else {
        return Ok(None);
    };

    let nearby = store.find_near(point, DUPLICATE_EPSILON_DEG).await?;
    let best = nearby
        .into_iter()
        .map(|record| (name_similarity(name, &record.spot.name), record))
        .filter(|(similarity, _)| *similarity > DUPLICATE_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0));

    Ok(best.map(|(similarity, record)| DuplicateMatch {
        id: record.id,
        name: record.spot.name,
        similarity: (similarity * 100.0).round() as u8,
    }))
}
