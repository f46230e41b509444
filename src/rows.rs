//! Row normalization.
//!
//! Flattens decoded tweet-table records into [`TweetRow`]s with total
//! coercion: a malformed cell never drops a row, it degrades to the field's
//! empty value. Row order is preserved because the embedding matrix is
//! aligned with the table by position.

use crate::error::Result;
use crate::model::TweetRow;
use crate::table::{self, Cell, Record};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rayon::prelude::*;
use tracing::info;

/// Columns read from the tweet table. Both spellings of the account and
/// username columns appear in the wild.
pub const TWEET_COLUMNS: &[&str] = &[
    "tweet_id",
    "account_id",
    "accountId",
    "cluster",
    "cluster_prob",
    "favorite_count",
    "reply_to_user_id",
    "reply_to_username",
    "reply_to_tweet_id",
    "username",
    "userName",
    "full_text",
    "created_at",
];

/// Decode a tweet table and normalize every row.
///
/// # Errors
///
/// Propagates table decode errors. Individual cells never fail.
pub fn decode_rows(bytes: Bytes) -> Result<Vec<TweetRow>> {
    let records = table::decode(bytes, TWEET_COLUMNS)?;
    let rows = normalize_rows(records);
    info!(rows = rows.len(), "Normalized tweet rows");
    Ok(rows)
}

/// Normalize records in parallel, keeping their order.
#[must_use]
pub fn normalize_rows(records: Vec<Record>) -> Vec<TweetRow> {
    records.into_par_iter().map(|r| normalize_record(&r)).collect()
}

/// Normalize one record.
#[must_use]
pub fn normalize_record(record: &Record) -> TweetRow {
    let field = |names: &[&str]| {
        names
            .iter()
            .map(|name| record.get(*name).map(to_text).unwrap_or_default())
            .find(|text| !text.is_empty())
            .unwrap_or_default()
    };

    let (created_at, created_at_text) = match record.get("created_at") {
        Some(Cell::Timestamp(ts)) => (Some(*ts), None),
        Some(cell) => {
            let text = to_text(cell);
            match parse_timestamp(&text) {
                Some(ts) => (Some(ts), None),
                None if text.is_empty() => (None, None),
                None => (None, Some(text)),
            }
        }
        None => (None, None),
    };

    TweetRow {
        tweet_id: field(&["tweet_id"]),
        account_id: field(&["account_id", "accountId"]),
        cluster_id: field(&["cluster"]),
        cluster_probability: record.get("cluster_prob").map_or(0.0, to_float),
        favorite_count: record.get("favorite_count").map_or(0, to_int).max(0),
        reply_to_user_id: field(&["reply_to_user_id"]),
        reply_to_username: field(&["reply_to_username"]),
        reply_to_tweet_id: field(&["reply_to_tweet_id"]),
        username: field(&["username", "userName"]),
        full_text: record
            .get("full_text")
            .and_then(Cell::as_text)
            .unwrap_or_default()
            .to_string(),
        created_at,
        created_at_text,
    }
}

// =============================================================================
// Coercion helpers
// =============================================================================

/// Cell as trimmed text. Integral floats print without a fraction; NaN and
/// nulls become empty.
#[must_use]
pub fn to_text(cell: &Cell) -> String {
    match cell {
        Cell::Text(s) => s.trim().to_string(),
        Cell::Int(v) => v.to_string(),
        Cell::Float(f) if f.is_nan() => String::new(),
        Cell::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{f:.0}"),
        Cell::Float(f) => f.to_string(),
        Cell::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        Cell::Timestamp(ts) => ts.to_rfc3339(),
        Cell::Null | Cell::Bytes(_) | Cell::List(_) => String::new(),
    }
}

/// Cell as an integer; non-numeric values become 0.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn to_int(cell: &Cell) -> i64 {
    match cell {
        Cell::Text(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map_or(0, |f| f.trunc() as i64),
        other => other.as_i64().unwrap_or(0),
    }
}

/// Cell as a float; non-numeric values and NaN become 0.
#[must_use]
pub fn to_float(cell: &Cell) -> f64 {
    let value = match cell {
        Cell::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        other => other.as_f64().unwrap_or(0.0),
    };
    if value.is_nan() { 0.0 } else { value }
}

/// Parse the timestamp spellings found in tweet tables: RFC 3339, pandas'
/// `str()` form, naive ISO, the X API format, and bare dates. Naive values
/// are taken as UTC.
#[must_use]
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z", "%a %b %d %H:%M:%S %z %Y"] {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cells: &[(&str, Cell)]) -> Record {
        cells
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn normalizes_full_record() {
        let row = normalize_record(&record(&[
            ("tweet_id", Cell::Text(" 100 ".into())),
            ("accountId", Cell::Int(42)),
            ("cluster", Cell::Float(3.0)),
            ("cluster_prob", Cell::Float(0.75)),
            ("favorite_count", Cell::Text("12".into())),
            ("reply_to_username", Cell::Text("bob".into())),
            ("userName", Cell::Text("alice".into())),
            ("full_text", Cell::Text("hello".into())),
            ("created_at", Cell::Text("2023-01-05 10:00:00+00:00".into())),
        ]));
        assert_eq!(row.tweet_id, "100");
        assert_eq!(row.account_id, "42");
        assert_eq!(row.cluster_id, "3");
        assert!((row.cluster_probability - 0.75).abs() < f64::EPSILON);
        assert_eq!(row.favorite_count, 12);
        assert_eq!(row.username, "alice");
        assert_eq!(row.reply_to_username, "bob");
        assert_eq!(
            row.created_at.unwrap().to_rfc3339(),
            "2023-01-05T10:00:00+00:00"
        );
    }

    #[test]
    fn malformed_cells_degrade() {
        let row = normalize_record(&record(&[
            ("tweet_id", Cell::Text("7".into())),
            ("favorite_count", Cell::Text("lots".into())),
            ("cluster_prob", Cell::Float(f64::NAN)),
            ("created_at", Cell::Text("yesterday-ish".into())),
        ]));
        assert_eq!(row.favorite_count, 0);
        assert!(row.cluster_probability.abs() < f64::EPSILON);
        assert_eq!(row.created_at, None);
        assert_eq!(row.created_at_text.as_deref(), Some("yesterday-ish"));
        assert_eq!(row.username, "");
    }

    #[test]
    fn order_is_preserved() {
        let records: Vec<Record> = (0..100)
            .map(|i| record(&[("tweet_id", Cell::Int(i))]))
            .collect();
        let rows = normalize_rows(records);
        assert!(rows.iter().enumerate().all(|(i, r)| r.tweet_id == i.to_string()));
    }

    #[test]
    fn timestamp_spellings() {
        let expected = "2023-04-01T12:30:00+00:00";
        for text in [
            "2023-04-01T12:30:00Z",
            "2023-04-01 12:30:00+00:00",
            "2023-04-01 12:30:00",
            "2023-04-01T12:30:00.000",
            "Sat Apr 01 12:30:00 +0000 2023",
        ] {
            assert_eq!(
                parse_timestamp(text).map(|t| t.to_rfc3339()).as_deref(),
                Some(expected),
                "{text}"
            );
        }
        assert!(parse_timestamp("2023-04-01").is_some());
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("nope").is_none());
    }

    #[test]
    fn text_coercion() {
        assert_eq!(to_text(&Cell::Float(5.0)), "5");
        assert_eq!(to_text(&Cell::Float(0.5)), "0.5");
        assert_eq!(to_text(&Cell::Float(f64::NAN)), "");
        assert_eq!(to_text(&Cell::Null), "");
        assert_eq!(to_int(&Cell::Text("3.9".into())), 3);
    }
}
