//! Shared amount and date extraction over normalized text.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;

// ---------------------------------------------------------------------------
// Amounts
// ---------------------------------------------------------------------------

fn amount_patterns() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"(?i)\bRs\.?\s*([0-9][0-9,]*(?:\.[0-9]{1,2})?)",
            r"(?i)\bINR\s*([0-9][0-9,]*(?:\.[0-9]{1,2})?)",
            r"₹\s*([0-9][0-9,]*(?:\.[0-9]{1,2})?)",
            r"\b([0-9]{1,3}(?:,[0-9]{3})+\.[0-9]{2}|[0-9]+\.[0-9]{2})\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("invalid amount regex"))
        .collect()
    })
}

/// Parse a captured amount token into minor units. Rejects zero and negatives.
pub fn amount_to_minor_units(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .replace(',', "")
        .replace("Rs.", "")
        .replace("Rs", "")
        .replace("INR", "")
        .replace('₹', "");
    let value: f64 = cleaned.trim().parse().ok()?;
    major_to_minor(value)
}

/// `round(value * 100)`, rejecting non-finite and non-positive values.
pub fn major_to_minor(value: f64) -> Option<i64> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    let minor = (value * 100.0).round();
    if minor <= 0.0 || minor > i64::MAX as f64 {
        return None;
    }
    Some(minor as i64)
}

/// Try each pattern in order; the first capture that parses wins.
pub fn extract_amount_with(text: &str, patterns: &[Regex]) -> Option<i64> {
    for re in patterns {
        for caps in re.captures_iter(text) {
            if let Some(minor) = caps.get(1).and_then(|m| amount_to_minor_units(m.as_str())) {
                return Some(minor);
            }
        }
    }
    None
}

pub fn extract_amount(text: &str) -> Option<i64> {
    extract_amount_with(text, amount_patterns())
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum DateShape {
    /// 05-Jan-25, 05 Jan 2025
    DayMonthAbbrYear,
    /// 05-01-25, 05/01/2025
    NumericDayMonthYear,
    /// 2025-01-05
    IsoYearFirst,
    /// Jan 5, 2025
    MonthNameFirst,
    /// 5th January 2025
    Textual,
}

fn date_patterns() -> &'static [(DateShape, Regex)] {
    static RES: OnceLock<Vec<(DateShape, Regex)>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            (
                DateShape::DayMonthAbbrYear,
                r"\b(\d{1,2})[-/ ]([A-Za-z]{3})[-/ ,]+(\d{4}|\d{2})\b",
            ),
            (
                DateShape::NumericDayMonthYear,
                r"\b(\d{1,2})[-/.](\d{1,2})[-/.](\d{4}|\d{2})\b",
            ),
            (DateShape::IsoYearFirst, r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b"),
            (
                DateShape::MonthNameFirst,
                r"\b([A-Za-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})\b",
            ),
            (
                DateShape::Textual,
                r"\b(\d{1,2})(?:st|nd|rd|th)?\s+(?:of\s+)?([A-Za-z]{3,9}),?\s+(\d{4})\b",
            ),
        ]
        .into_iter()
        .map(|(shape, p)| (shape, Regex::new(p).expect("invalid date regex")))
        .collect()
    })
}

fn month_from_name(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    let key = lower.get(..3)?;
    let month = match key {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    // Reject words like "junk" or "marching" that merely start with a month.
    let full = [
        "january", "february", "march", "april", "may", "june", "july", "august",
        "september", "october", "november", "december",
    ][month as usize - 1];
    if lower.len() == 3 || full.starts_with(lower.as_str()) {
        Some(month)
    } else {
        None
    }
}

/// Two-digit and mis-parsed centuries are assumed to be 20xx.
pub fn normalize_year(year: i32) -> i32 {
    if year < 100 {
        year + 2000
    } else if (1900..2000).contains(&year) {
        year + 100
    } else if year < 1900 {
        year + 2000
    } else {
        year
    }
}

fn build_date(shape: DateShape, caps: &regex::Captures) -> Option<NaiveDate> {
    let num = |i: usize| -> Option<i32> { caps.get(i)?.as_str().parse().ok() };
    let (year, month, day) = match shape {
        DateShape::DayMonthAbbrYear => (num(3)?, month_from_name(caps.get(2)?.as_str())?, num(1)?),
        DateShape::NumericDayMonthYear => (num(3)?, u32::try_from(num(2)?).ok()?, num(1)?),
        DateShape::IsoYearFirst => (num(1)?, u32::try_from(num(2)?).ok()?, num(3)?),
        DateShape::MonthNameFirst => (num(3)?, month_from_name(caps.get(1)?.as_str())?, num(2)?),
        DateShape::Textual => (num(3)?, month_from_name(caps.get(2)?.as_str())?, num(1)?),
    };
    NaiveDate::from_ymd_opt(normalize_year(year), month, u32::try_from(day).ok()?)
}

/// Lenient last resort for whole-string dates (RFC 2822, RFC 3339, a few layouts).
fn parse_native(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%d-%m-%Y %H:%M:%S", "%Y/%m/%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in ["%Y/%m/%d", "%d %B %Y", "%B %d %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(text, fmt) {
            return Some(d);
        }
    }
    None
}

pub fn extract_date(text: &str) -> Option<NaiveDate> {
    for (shape, re) in date_patterns() {
        for caps in re.captures_iter(text) {
            if let Some(date) = build_date(*shape, &caps) {
                return Some(date);
            }
        }
    }
    parse_native(text)
}
