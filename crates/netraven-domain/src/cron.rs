//! Strict 5-field (minute hour day-of-month month day-of-week) UTC cron,
//! per spec: no seconds field, no named shortcuts (`@daily` etc).
//!
//! Delegates the actual field matching to the `cron` crate, which natively
//! parses 6/7-field expressions with a leading seconds field; we prepend a
//! fixed `0` seconds field and reject anything that isn't exactly 5
//! whitespace-separated fields up front.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;

fn to_six_field(expr: &str) -> Result<String, String> {
    if expr.trim_start().starts_with('@') {
        return Err("named shortcuts (e.g. @daily) are not supported".to_string());
    }
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(format!(
            "expected exactly 5 fields (minute hour dom month dow), got {}",
            fields.len()
        ));
    }
    Ok(format!("0 {}", fields.join(" ")))
}

pub fn validate(expr: &str) -> Result<(), String> {
    let six = to_six_field(expr)?;
    CronSchedule::from_str(&six).map_err(|e| e.to_string())?;
    Ok(())
}

/// The earliest fire time strictly after `after` for `expr`, or `None` if
/// the expression (pathologically) never matches again.
pub fn next_after(expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let six = to_six_field(expr).ok()?;
    let schedule = CronSchedule::from_str(&six).ok()?;
    schedule.after(&after).next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_named_shortcuts() {
        assert!(validate("@daily").is_err());
    }

    #[test]
    fn rejects_six_field_seconds_expression() {
        assert!(validate("0 */5 * * * *").is_err());
    }

    #[test]
    fn accepts_standard_five_field() {
        assert!(validate("*/5 * * * *").is_ok());
        assert!(validate("0 9 * * 1-5").is_ok());
    }

    #[test]
    fn next_after_is_strictly_greater_and_idempotent_on_recompute() {
        let now = DateTime::parse_from_rfc3339("2026-07-28T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let first = next_after("*/15 * * * *", now).expect("schedule should fire again");
        assert!(first > now);
        let second = next_after("*/15 * * * *", first).expect("schedule should fire again");
        assert!(second > first);
    }
}
