//! Opening-hours interpretation and the crowd-level heuristic.
//!
//! Both are best-effort. Hours text that cannot be read yields a closed,
//! unknown-hours status rather than an error, and the crowd table is a fixed
//! guess keyed by category and local wall-clock time.

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use kidspot_core::{Category, CrowdLevel, OpeningStatus};
use once_cell::sync::Lazy;
use regex::Regex;

const ALWAYS_OPEN_MARKERS: [&str; 4] = ["24時間", "24/7", "24 hours", "24h"];
const ALWAYS_OPEN_LABEL: &str = "24時間";

static HOURS_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,2}):(\d{2})\s*-\s*(\d{1,2}):(\d{2})").expect("hours range regex")
});

/// Folds full-width digits, colons and the usual range separators into ASCII.
fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
            '：' => ':',
            '〜' | '～' | '~' | '–' | '—' | '－' => '-',
            _ => c,
        })
        .collect()
}

fn to_minutes(hour: &str, minute: &str) -> Option<u32> {
    let h: u32 = hour.parse().ok()?;
    let m: u32 = minute.parse().ok()?;
    if h > 24 || m > 59 || (h == 24 && m > 0) {
        return None;
    }
    Some(h * 60 + m)
}

fn hhmm(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// First `HH:MM-HH:MM` range found in the text, in minutes since midnight.
fn parse_range(text: &str) -> Option<(u32, u32)> {
    let caps = HOURS_RANGE.captures(text)?;
    let start = to_minutes(&caps[1], &caps[2])?;
    let end = to_minutes(&caps[3], &caps[4])?;
    Some((start, end))
}

pub fn is_always_open(text: &str) -> bool {
    let lower = normalize(text).to_lowercase();
    ALWAYS_OPEN_MARKERS.iter().any(|m| lower.contains(m))
}

/// Reads an opening-hours string at the given local time.
///
/// The range is inclusive at both ends. A range whose end precedes its start
/// runs past midnight and is open when `now >= start` or `now <= end`.
pub fn parse_hours(text: &str, now: NaiveDateTime) -> OpeningStatus {
    let text = text.trim();
    if text.is_empty() {
        return OpeningStatus::default();
    }
    if is_always_open(text) {
        return OpeningStatus {
            is_open: true,
            next_change: None,
            today_hours: Some(ALWAYS_OPEN_LABEL.to_string()),
        };
    }
    let Some((start, end)) = parse_range(&normalize(text)) else {
        return OpeningStatus::default();
    };

    let current = now.hour() * 60 + now.minute();
    let overnight = start > end;
    let is_open = if overnight {
        current >= start || current <= end
    } else {
        (start..=end).contains(&current)
    };

    let next_change = if is_open {
        format!("closes at {}", hhmm(end))
    } else if current < start {
        format!("opens at {}", hhmm(start))
    } else {
        format!("opens tomorrow at {}", hhmm(start))
    };

    OpeningStatus {
        is_open,
        next_change: Some(next_change),
        today_hours: Some(format!("{}-{}", hhmm(start), hhmm(end))),
    }
}

/// `None` when the hours are missing or unreadable, so "unknown" is never
/// reported as "closed".
pub fn open_now(hours: Option<&str>, now: NaiveDateTime) -> Option<bool> {
    let status = parse_hours(hours?, now);
    status.today_hours.map(|_| status.is_open)
}

fn is_weekend(now: NaiveDateTime) -> bool {
    matches!(now.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Advisory crowd guess. Hour bounds are inclusive.
pub fn predict_crowd(category: Category, now: NaiveDateTime) -> CrowdLevel {
    let hour = now.hour();
    let weekend = is_weekend(now);
    match category {
        Category::Restaurant => {
            let meal = (11..=13).contains(&hour) || (18..=20).contains(&hour);
            if meal || (weekend && (11..=14).contains(&hour)) {
                CrowdLevel::Crowded
            } else {
                CrowdLevel::Quiet
            }
        }
        Category::Park | Category::Playground => {
            if weekend && (10..=16).contains(&hour) {
                CrowdLevel::Crowded
            } else if !weekend && (15..=17).contains(&hour) {
                CrowdLevel::SomewhatCrowded
            } else {
                CrowdLevel::Quiet
            }
        }
        Category::Shopping => {
            if weekend && (13..=19).contains(&hour) {
                CrowdLevel::Crowded
            } else if !weekend && (17..=19).contains(&hour) {
                CrowdLevel::SomewhatCrowded
            } else {
                CrowdLevel::Quiet
            }
        }
        Category::Museum if weekend && (10..=16).contains(&hour) => CrowdLevel::SomewhatCrowded,
        _ => CrowdLevel::Quiet,
    }
}
