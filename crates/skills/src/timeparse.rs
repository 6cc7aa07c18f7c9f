//! Time-range parsing for queries like "明天开庭" or "9月10日到9月20日".
//!
//! Produces half-open `[from, to)` date windows in the agent timezone.
//! Only explicit, unambiguous phrases resolve; everything else returns
//! `None` and the caller falls through to other query sources.

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;

use cf_domain::types::DateRange;

fn range(from: NaiveDate, to_exclusive: NaiveDate) -> DateRange {
    DateRange {
        from: from.format("%Y-%m-%d").to_string(),
        to: to_exclusive.format("%Y-%m-%d").to_string(),
        time_from: None,
        time_to: None,
    }
}

fn single_day(day: NaiveDate) -> DateRange {
    range(day, day + Duration::days(1))
}

fn week_start(today: NaiveDate) -> NaiveDate {
    let offset = today.weekday().num_days_from_monday() as i64;
    today - Duration::days(offset)
}

fn month_start(today: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(today.year(), today.month(), 1).expect("first of month")
}

fn next_month_start(today: NaiveDate) -> NaiveDate {
    if today.month() == 12 {
        NaiveDate::from_ymd_opt(today.year() + 1, 1, 1).expect("january")
    } else {
        NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1).expect("first of month")
    }
}

/// Parse an explicit date mention: `2024-09-10`, `2024/9/10`, `9月10日`,
/// `2024年9月10日`. Month-day forms resolve against `today`'s year.
fn parse_explicit_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let iso = Regex::new(r"(\d{4})[-/](\d{1,2})[-/](\d{1,2})").expect("static regex");
    if let Some(caps) = iso.captures(text) {
        return NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        );
    }
    let cn = Regex::new(r"(?:(\d{4})年)?(\d{1,2})月(\d{1,2})[日号]").expect("static regex");
    if let Some(caps) = cn.captures(text) {
        let year = caps
            .get(1)
            .and_then(|y| y.as_str().parse().ok())
            .unwrap_or(today.year());
        return NaiveDate::from_ymd_opt(year, caps[2].parse().ok()?, caps[3].parse().ok()?);
    }
    None
}

/// Resolve a natural-language time range. `today` is the current date in
/// the agent timezone.
pub fn parse_time_range(query: &str, today: NaiveDate) -> Option<DateRange> {
    // Relative words first (longest phrases before their prefixes).
    if query.contains("后天") {
        return Some(single_day(today + Duration::days(2)));
    }
    if query.contains("明天") {
        return Some(single_day(today + Duration::days(1)));
    }
    if query.contains("昨天") {
        return Some(single_day(today - Duration::days(1)));
    }
    if query.contains("今天") || query.contains("今日") {
        return Some(single_day(today));
    }
    if query.contains("下周") {
        let start = week_start(today) + Duration::days(7);
        return Some(range(start, start + Duration::days(7)));
    }
    if query.contains("本周") || query.contains("这周") {
        let start = week_start(today);
        return Some(range(start, start + Duration::days(7)));
    }
    if query.contains("下个月") || query.contains("下月") {
        let start = next_month_start(today);
        let end = next_month_start(start);
        return Some(range(start, end));
    }
    if query.contains("本月") || query.contains("这个月") {
        return Some(range(month_start(today), next_month_start(today)));
    }

    // "最近N天" looks back, "未来N天"/"N天内" looks forward.
    let recent = Regex::new(r"最近(\d{1,3})天").expect("static regex");
    if let Some(caps) = recent.captures(query) {
        let days: i64 = caps[1].parse().ok()?;
        return Some(range(today - Duration::days(days), today + Duration::days(1)));
    }
    let ahead = Regex::new(r"(?:未来|接下来)?(\d{1,3})天内").expect("static regex");
    if let Some(caps) = ahead.captures(query) {
        let days: i64 = caps[1].parse().ok()?;
        return Some(range(today, today + Duration::days(days)));
    }

    // Explicit range "A到B" / "A至B".
    for sep in ["到", "至", "~"] {
        if let Some((left, right)) = query.split_once(sep) {
            if let (Some(from), Some(to)) = (
                parse_explicit_date(left, today),
                parse_explicit_date(right, today),
            ) {
                if from <= to {
                    return Some(range(from, to + Duration::days(1)));
                }
            }
        }
    }

    // Single explicit date.
    parse_explicit_date(query, today).map(single_day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        // A Tuesday.
        NaiveDate::from_ymd_opt(2024, 9, 10).unwrap()
    }

    #[test]
    fn tomorrow_is_one_day_window() {
        let r = parse_time_range("明天开庭的案件", today()).unwrap();
        assert_eq!(r.from, "2024-09-11");
        assert_eq!(r.to, "2024-09-12");
    }

    #[test]
    fn this_week_starts_monday() {
        let r = parse_time_range("本周开庭", today()).unwrap();
        assert_eq!(r.from, "2024-09-09");
        assert_eq!(r.to, "2024-09-16");
    }

    #[test]
    fn explicit_cn_range_is_inclusive_exclusive() {
        let r = parse_time_range("9月10日到9月20日的开庭", today()).unwrap();
        assert_eq!(r.from, "2024-09-10");
        assert_eq!(r.to, "2024-09-21");
    }

    #[test]
    fn iso_date_resolves_as_single_day() {
        let r = parse_time_range("2024-10-01 的截止事项", today()).unwrap();
        assert_eq!(r.from, "2024-10-01");
        assert_eq!(r.to, "2024-10-02");
    }

    #[test]
    fn month_boundary_rolls_year() {
        let dec = NaiveDate::from_ymd_opt(2024, 12, 15).unwrap();
        let r = parse_time_range("下个月的开庭", dec).unwrap();
        assert_eq!(r.from, "2025-01-01");
        assert_eq!(r.to, "2025-02-01");
    }

    #[test]
    fn plain_queries_do_not_resolve() {
        assert!(parse_time_range("查所有案件", today()).is_none());
    }
}
