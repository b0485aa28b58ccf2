use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

pub fn parse_json<T: serde::de::DeserializeOwned>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

pub fn to_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub fn from_micros(
    micros: i64,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| StoreError::CorruptRow {
        table,
        column,
        detail: format!("timestamp out of range: {micros}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use trail_core::EventType;

    #[test]
    fn micros_roundtrip_preserves_precision() {
        let now = Utc::now();
        let back = from_micros(to_micros(&now), "events", "timestamp").unwrap();
        assert_eq!(back.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn parse_enum_failure_names_column() {
        let result: Result<EventType, _> = parse_enum("file_rename", "events", "event_type");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "events", column: "event_type", .. })
        ));
    }

    #[test]
    fn parse_json_typed() {
        let files: Vec<String> = parse_json(r#"["a.rs","b.rs"]"#, "actions", "files").unwrap();
        assert_eq!(files.len(), 2);
        assert!(parse_json::<Vec<String>>("{", "actions", "files").is_err());
    }
}
