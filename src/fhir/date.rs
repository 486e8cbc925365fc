//! FHIR date/dateTime/instant parsing.
//!
//! FHIR allows partial dates (`2020`, `2020-05`) and date-times without a
//! zone; all are normalised to UTC, partial dates to their first instant.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

pub fn parse_fhir_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    let date = match raw.len() {
        4 => NaiveDate::from_ymd_opt(raw.parse().ok()?, 1, 1),
        7 => NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d").ok(),
        _ => NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok(),
    }?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

/// First parseable date among the given JSON pointers, in order
pub fn first_date(resource: &Value, pointers: &[&str]) -> Option<DateTime<Utc>> {
    pointers.iter().find_map(|p| {
        resource
            .pointer(p)
            .and_then(Value::as_str)
            .and_then(parse_fhir_date)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_parse_variants() {
        let expected = Utc.with_ymd_and_hms(2020, 5, 1, 10, 30, 0).unwrap();
        assert_eq!(parse_fhir_date("2020-05-01T10:30:00Z"), Some(expected));
        assert_eq!(parse_fhir_date("2020-05-01T16:00:00+05:30"), Some(expected));
        assert_eq!(parse_fhir_date("2020-05-01T10:30:00"), Some(expected));
        assert_eq!(
            parse_fhir_date("2020-05-01"),
            Some(Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            parse_fhir_date("2020-05"),
            Some(Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            parse_fhir_date("2020"),
            Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_fhir_date("yesterday"), None);
        assert_eq!(parse_fhir_date(""), None);
    }

    #[test]
    fn test_first_date_order() {
        let obs = json!({"effectiveDateTime": "2021-01-01", "issued": "garbage"});
        assert_eq!(
            first_date(&obs, &["/issued", "/effectiveDateTime"]),
            Some(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(first_date(&obs, &["/recorded"]), None);
    }
}
