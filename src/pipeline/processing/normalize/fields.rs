//! Field-level parsers for raw listing text. Every parser returns `None` for
//! input it cannot read; callers decide whether that deserves a warning.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::domain::{AccountCategory, InterestFrequency, RawRecord};

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid regex"));

static MONEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(k|m|million)?\b").expect("valid regex"));

static PERIOD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+)\s*-?\s*(months?|mths?|years?|yrs?|days?)\b").expect("valid regex")
});

static DMY_NUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[/.-](\d{1,2})[/.-](\d{4})\b").expect("valid regex"));

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("valid regex"));

static DMY_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+([a-z]{3,9})\s+(\d{4})\b").expect("valid regex")
});

static ISA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bisas?\b").expect("valid regex"));

/// A length of time as written in a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Months(u32),
    Days(u32),
}

impl Period {
    /// Whole months; day counts convert at 30 days a month
    pub fn as_months(&self) -> Option<u32> {
        match *self {
            Period::Months(m) => Some(m),
            Period::Days(d) if d >= 30 => Some(d / 30),
            Period::Days(_) => None,
        }
    }

    /// Days; months convert at 30 days a month. None when the count overflows.
    pub fn as_days(&self) -> Option<u32> {
        match *self {
            Period::Months(m) => m.checked_mul(30),
            Period::Days(d) => Some(d),
        }
    }
}

/// String form of a scalar JSON value; empty strings count as absent
pub fn text(raw: &RawRecord, field: &str) -> Option<String> {
    match raw.get(field)? {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// First non-empty value among `fields`, in order
pub fn first_text(raw: &RawRecord, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| text(raw, field))
}

/// Percentage rate in 0-100. Currency, percent and thousands symbols are
/// stripped before reading the first number.
pub fn parse_rate(input: &str) -> Option<f64> {
    let cleaned: String = input
        .chars()
        .filter(|c| !matches!(c, '£' | '$' | '€' | '%' | ','))
        .collect();
    let value: f64 = NUMBER.find(&cleaned)?.as_str().parse().ok()?;
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Some(value)
    } else {
        None
    }
}

/// Money amount; `k` and `m` suffixes are honoured
pub fn parse_money(input: &str) -> Option<f64> {
    let cleaned: String = input
        .chars()
        .filter(|c| !matches!(c, '£' | '$' | '€' | ','))
        .collect();
    let caps = MONEY.captures(&cleaned)?;
    let amount: f64 = caps.get(1)?.as_str().parse().ok()?;
    let multiplier = match caps.get(2).map(|m| m.as_str().to_lowercase()) {
        Some(ref s) if s == "k" => 1_000.0,
        Some(ref s) if s == "m" || s == "million" => 1_000_000.0,
        _ => 1.0,
    };
    Some(amount * multiplier)
}

/// "N months", "N years" or "N days", case-insensitive
pub fn parse_period(input: &str) -> Option<Period> {
    let caps = PERIOD.captures(input)?;
    let n: u32 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_lowercase();
    if unit.starts_with('m') {
        Some(Period::Months(n))
    } else if unit.starts_with('y') {
        Some(Period::Months(n.checked_mul(12)?))
    } else {
        Some(Period::Days(n))
    }
}

fn month_from_name(name: &str) -> Option<u32> {
    let lowered = name.to_lowercase();
    let months = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    months
        .iter()
        .position(|m| lowered.starts_with(m))
        .map(|i| i as u32 + 1)
}

/// First calendar date found in free text (dd/mm/yyyy, yyyy-mm-dd or "31 March 2026")
pub fn parse_end_date(input: &str) -> Option<NaiveDate> {
    if let Some(caps) = ISO_DATE.captures(input) {
        let date = NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        );
        if date.is_some() {
            return date;
        }
    }
    if let Some(caps) = DMY_NUMERIC.captures(input) {
        let date = NaiveDate::from_ymd_opt(
            caps[3].parse().ok()?,
            caps[2].parse().ok()?,
            caps[1].parse().ok()?,
        );
        if date.is_some() {
            return date;
        }
    }
    let caps = DMY_WORDS.captures(input)?;
    NaiveDate::from_ymd_opt(
        caps[3].parse().ok()?,
        month_from_name(&caps[2])?,
        caps[1].parse().ok()?,
    )
}

/// Whole calendar months from `start` to `end`; `None` when `end` is not later
pub fn months_between(start: NaiveDate, end: NaiveDate) -> Option<u32> {
    let mut months = (end.year() - start.year()) * 12 + end.month() as i32 - start.month() as i32;
    if end.day() < start.day() {
        months -= 1;
    }
    if months > 0 {
        Some(months as u32)
    } else {
        None
    }
}

pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

pub fn parse_frequency(input: &str) -> Option<InterestFrequency> {
    let lowered = input.to_lowercase();
    if lowered.contains("maturity") {
        Some(InterestFrequency::OnMaturity)
    } else if lowered.contains("month") {
        Some(InterestFrequency::Monthly)
    } else if lowered.contains("quarter") {
        Some(InterestFrequency::Quarterly)
    } else if lowered.contains("annual") || lowered.contains("year") {
        Some(InterestFrequency::Annually)
    } else {
        None
    }
}

/// FSCS protection flag; anything unreadable leaves the default in place
pub fn parse_fscs(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => {
            let lowered = s.trim().to_lowercase();
            if lowered.starts_with("no") || lowered.starts_with("not") || lowered == "false" {
                Some(false)
            } else if lowered.starts_with("yes")
                || lowered == "true"
                || lowered.contains("protected")
                || lowered.contains("fscs")
            {
                Some(true)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Category signalled by keywords in free text.
///
/// ISA wins over everything, then notice, limited access, fixed terms and
/// finally easy access. "No notice" is an easy-access phrase, not a notice one.
pub fn classify_category(input: &str) -> Option<AccountCategory> {
    let lowered = input.to_lowercase().replace("no notice", "instant");
    if ISA.is_match(&lowered) {
        Some(AccountCategory::CashIsa)
    } else if lowered.contains("notice") {
        Some(AccountCategory::Notice)
    } else if lowered.contains("limited") {
        Some(AccountCategory::LimitedAccess)
    } else if lowered.contains("fixed")
        || lowered.contains("bond")
        || matches!(parse_period(&lowered), Some(Period::Months(_)))
    {
        Some(AccountCategory::FixedTerm)
    } else if lowered.contains("easy") || lowered.contains("instant") || lowered.contains("variable") {
        Some(AccountCategory::EasyAccess)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("4.50%"), Some(4.5));
        assert_eq!(parse_rate(" 0.00 % AER"), Some(0.0));
        assert_eq!(parse_rate("N/A"), None);
        assert_eq!(parse_rate("450%"), None);
        assert_eq!(parse_rate("-1%"), None);
    }

    #[test]
    fn test_parse_money() {
        assert_eq!(parse_money("£5,000"), Some(5000.0));
        assert_eq!(parse_money("£1m"), Some(1_000_000.0));
        assert_eq!(parse_money("85k"), Some(85_000.0));
        assert_eq!(parse_money("none"), None);
    }

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period("12 months"), Some(Period::Months(12)));
        assert_eq!(parse_period("2 Years"), Some(Period::Months(24)));
        assert_eq!(parse_period("95 day notice"), Some(Period::Days(95)));
        assert_eq!(parse_period("1-year fixed"), Some(Period::Months(12)));
        assert_eq!(parse_period("instant"), None);
    }

    #[test]
    fn test_period_conversions() {
        assert_eq!(Period::Months(3).as_days(), Some(90));
        assert_eq!(Period::Days(95).as_days(), Some(95));
        assert_eq!(Period::Days(95).as_months(), Some(3));
        assert_eq!(Period::Days(7).as_months(), None);
    }

    #[test]
    fn test_month_count_too_large_for_days() {
        let period = parse_period("200000000 months").unwrap();
        assert_eq!(period, Period::Months(200_000_000));
        assert_eq!(period.as_days(), None);
    }

    #[test]
    fn test_end_date_forms() {
        let expected = NaiveDate::from_ymd_opt(2026, 3, 31);
        assert_eq!(parse_end_date("Fixed until 31/03/2026"), expected);
        assert_eq!(parse_end_date("matures 2026-03-31"), expected);
        assert_eq!(parse_end_date("Bond ends 31st March 2026"), expected);
        assert_eq!(parse_end_date("no date here"), None);
    }

    #[test]
    fn test_months_between() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
        assert_eq!(months_between(start, end), Some(12));
        let short = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        assert_eq!(months_between(start, short), Some(11));
        assert_eq!(months_between(end, start), None);
    }

    #[test]
    fn test_classify_category() {
        assert_eq!(classify_category("Fixed Rate Cash ISA"), Some(AccountCategory::CashIsa));
        assert_eq!(classify_category("95 Day Notice"), Some(AccountCategory::Notice));
        assert_eq!(classify_category("No notice, easy access"), Some(AccountCategory::EasyAccess));
        assert_eq!(classify_category("12 months"), Some(AccountCategory::FixedTerm));
        assert_eq!(classify_category("Limited Access Saver"), Some(AccountCategory::LimitedAccess));
        assert_eq!(classify_category("Savings"), None);
        // "Isambard" is not an ISA
        assert_eq!(classify_category("Isambard Saver"), None);
    }

    #[test]
    fn test_fscs_and_frequency() {
        assert_eq!(parse_fscs(&json!(false)), Some(false));
        assert_eq!(parse_fscs(&json!("Yes")), Some(true));
        assert_eq!(parse_fscs(&json!("Not covered")), Some(false));
        assert_eq!(parse_fscs(&json!(3)), None);
        assert_eq!(parse_frequency("Paid monthly"), Some(InterestFrequency::Monthly));
        assert_eq!(parse_frequency("On maturity"), Some(InterestFrequency::OnMaturity));
        assert_eq!(parse_frequency("Yearly"), Some(InterestFrequency::Annually));
    }

    #[test]
    fn test_first_text_skips_blanks() {
        let raw = json!({"name": "  ", "bankName": "Tandem Bank Plc", "aer": 4.5});
        assert_eq!(first_text(&raw, &["name", "bankName"]).as_deref(), Some("Tandem Bank Plc"));
        assert_eq!(text(&raw, "aer").as_deref(), Some("4.5"));
        assert_eq!(text(&raw, "missing"), None);
    }
}
