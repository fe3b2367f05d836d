//! Timezone-aware 5-field cron evaluation (min hour dom month dow).
//!
//! Expressions are parsed once into a [`CronExpr`]; evaluation walks
//! forward minute by minute in the job's timezone. DST handling:
//! local times inside a spring-forward gap are skipped, fall-back
//! overlaps resolve to the earliest mapping.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// One year of minutes bounds the forward scan.
const MAX_SCAN_MINUTES: u32 = 366 * 24 * 60;

#[derive(Debug, Clone, PartialEq)]
enum FieldPart {
    Any,
    Step(u32),
    Value(u32),
    Range(u32, u32),
}

#[derive(Debug, Clone)]
struct CronField {
    parts: Vec<FieldPart>,
}

impl CronField {
    fn parse(raw: &str, min: u32, max: u32) -> Option<Self> {
        if raw == "*" {
            return Some(Self {
                parts: vec![FieldPart::Any],
            });
        }
        if let Some(step) = raw.strip_prefix("*/") {
            let n: u32 = step.parse().ok()?;
            if n == 0 {
                return None;
            }
            return Some(Self {
                parts: vec![FieldPart::Step(n)],
            });
        }

        let mut parts = Vec::new();
        for piece in raw.split(',') {
            if let Some((lo, hi)) = piece.split_once('-') {
                let lo: u32 = lo.parse().ok()?;
                let hi: u32 = hi.parse().ok()?;
                if lo > hi || hi > max || lo < min {
                    return None;
                }
                parts.push(FieldPart::Range(lo, hi));
            } else {
                let v: u32 = piece.parse().ok()?;
                if v < min || v > max {
                    return None;
                }
                parts.push(FieldPart::Value(v));
            }
        }
        (!parts.is_empty()).then_some(Self { parts })
    }

    fn matches(&self, value: u32) -> bool {
        self.parts.iter().any(|p| match p {
            FieldPart::Any => true,
            FieldPart::Step(n) => value % n == 0,
            FieldPart::Value(v) => value == *v,
            FieldPart::Range(lo, hi) => value >= *lo && value <= *hi,
        })
    }
}

/// A parsed and validated cron expression.
#[derive(Debug, Clone)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    dom: CronField,
    month: CronField,
    dow: CronField,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Option<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return None;
        }
        Some(Self {
            minute: CronField::parse(fields[0], 0, 59)?,
            hour: CronField::parse(fields[1], 0, 23)?,
            dom: CronField::parse(fields[2], 1, 31)?,
            month: CronField::parse(fields[3], 1, 12)?,
            dow: CronField::parse(fields[4], 0, 6)?,
        })
    }

    fn matches_local(&self, dt: &NaiveDateTime) -> bool {
        self.minute.matches(dt.minute())
            && self.hour.matches(dt.hour())
            && self.dom.matches(dt.day())
            && self.month.matches(dt.month())
            && self.dow.matches(dt.weekday().num_days_from_sunday())
    }

    /// Next occurrence strictly after `after`, evaluated in `tz`,
    /// returned in UTC.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let local_after = after.with_timezone(&tz).naive_local();
        let to_next_minute = 60 - local_after.second() as i64;
        let mut candidate = local_after + chrono::Duration::seconds(to_next_minute);
        candidate = candidate.with_second(0).unwrap_or(candidate);

        for _ in 0..MAX_SCAN_MINUTES {
            if self.matches_local(&candidate) {
                match tz.from_local_datetime(&candidate) {
                    chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                    chrono::LocalResult::Ambiguous(earliest, _) => {
                        return Some(earliest.with_timezone(&Utc));
                    }
                    // Spring-forward gap: this local minute does not exist.
                    chrono::LocalResult::None => {}
                }
            }
            candidate += chrono::Duration::minutes(1);
        }
        None
    }
}

/// Parse an IANA timezone name, falling back to UTC.
pub fn parse_tz(tz: Option<&str>) -> Tz {
    match tz {
        Some(name) => name.parse::<Tz>().unwrap_or_else(|_| {
            tracing::warn!(timezone = name, "unknown timezone, using UTC");
            chrono_tz::UTC
        }),
        None => chrono_tz::UTC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(CronExpr::parse("* * * *").is_none());
        assert!(CronExpr::parse("61 * * * *").is_none());
        assert!(CronExpr::parse("*/0 * * * *").is_none());
        assert!(CronExpr::parse("a b c d e").is_none());
        assert!(CronExpr::parse("9-5 * * * *").is_none());
    }

    #[test]
    fn step_values_match_multiples() {
        let expr = CronExpr::parse("*/15 * * * *").unwrap();
        let next = expr.next_after(utc(2026, 6, 15, 10, 1), chrono_tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 6, 15, 10, 15));
    }

    #[test]
    fn specific_time_daily() {
        let expr = CronExpr::parse("30 9 * * *").unwrap();
        let next = expr.next_after(utc(2026, 6, 15, 10, 0), chrono_tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 6, 16, 9, 30));
    }

    #[test]
    fn comma_and_range_fields() {
        let expr = CronExpr::parse("0,30 9-17 * * *").unwrap();
        let next = expr.next_after(utc(2026, 6, 15, 17, 31), chrono_tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 6, 16, 9, 0));
    }

    #[test]
    fn weekday_field_uses_sunday_zero() {
        // 2026-06-15 is a Monday (dow 1).
        let expr = CronExpr::parse("0 12 * * 0").unwrap();
        let next = expr.next_after(utc(2026, 6, 15, 0, 0), chrono_tz::UTC).unwrap();
        assert_eq!(next, utc(2026, 6, 21, 12, 0));
    }

    #[test]
    fn timezone_evaluation_returns_utc() {
        let tz = parse_tz(Some("Asia/Tokyo"));
        let expr = CronExpr::parse("0 9 * * *").unwrap();
        let next = expr.next_after(utc(2026, 6, 15, 12, 0), tz).unwrap();
        // 9:00 JST is 0:00 UTC.
        assert_eq!(next, utc(2026, 6, 16, 0, 0));
    }

    #[test]
    fn spring_forward_gap_is_skipped() {
        let tz = parse_tz(Some("US/Eastern"));
        let expr = CronExpr::parse("30 2 * * *").unwrap();
        // DST started 2024-03-10; 02:30 local did not exist that day.
        let next = expr
            .next_after(utc(2024, 3, 10, 6, 0), tz)
            .unwrap();
        assert_eq!(next, utc(2024, 3, 11, 6, 30));
    }

    #[test]
    fn fall_back_overlap_takes_earliest() {
        let tz = parse_tz(Some("US/Eastern"));
        let expr = CronExpr::parse("30 1 * * *").unwrap();
        let next = expr.next_after(utc(2024, 11, 3, 4, 0), tz).unwrap();
        assert_eq!(next.hour(), 5);
        assert_eq!(next.minute(), 30);
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        assert_eq!(parse_tz(Some("Mars/OlympusMons")), chrono_tz::UTC);
        assert_eq!(parse_tz(None), chrono_tz::UTC);
    }
}
