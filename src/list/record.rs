use serde::{Deserialize, Serialize};
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::OffsetDateTime;

use super::Item;

/// Wire shape of one persisted item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemRecord {
    pub id: i64,
    pub text: String,
    pub date: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub edited: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl From<&Item> for ItemRecord {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id,
            text: item.text.clone(),
            date: format_date(item.date),
            edited: item.edited,
        }
    }
}

/// Read side of [`ItemRecord`]: `date` may be a string, a number of epoch
/// milliseconds, `null`, or missing.
#[derive(Debug, Deserialize)]
struct StoredRecord {
    id: i64,
    text: String,
    #[serde(default)]
    date: Option<serde_json::Value>,
    #[serde(default)]
    edited: bool,
}

#[derive(Debug, Default)]
pub struct Decoded {
    pub items: Vec<Item>,
    pub skipped: usize,
    pub repaired_dates: usize,
}

pub fn encode(items: &[Item]) -> Result<String, serde_json::Error> {
    let records = items.iter().map(ItemRecord::from).collect::<Vec<_>>();
    serde_json::to_string(&records)
}

/// Fails only when `raw` is not a JSON array. Entries that do not look like
/// items are skipped; unreadable dates become `now`.
pub fn decode(raw: &str, now: OffsetDateTime) -> Result<Decoded, serde_json::Error> {
    let values: Vec<serde_json::Value> = serde_json::from_str(raw)?;
    let mut decoded = Decoded::default();
    for (index, value) in values.into_iter().enumerate() {
        let record: StoredRecord = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(index, %err, "skipping malformed stored item");
                decoded.skipped += 1;
                continue;
            }
        };
        if record.text.trim().is_empty() {
            tracing::warn!(index, id = record.id, "skipping stored item with empty text");
            decoded.skipped += 1;
            continue;
        }
        if decoded.items.iter().any(|item| item.id == record.id) {
            tracing::warn!(index, id = record.id, "skipping stored item with duplicate id");
            decoded.skipped += 1;
            continue;
        }
        let date = match record.date.as_ref().and_then(date_from_value) {
            Some(date) => date,
            None => {
                tracing::warn!(id = record.id, date = ?record.date, "unreadable item date, using now");
                decoded.repaired_dates += 1;
                now
            }
        };
        decoded.items.push(Item {
            id: record.id,
            text: record.text,
            date,
            edited: record.edited,
        });
    }
    Ok(decoded)
}

fn date_from_value(value: &serde_json::Value) -> Option<OffsetDateTime> {
    match value {
        serde_json::Value::String(raw) => parse_date(raw),
        serde_json::Value::Number(number) => from_millis(number.as_i64()?),
        _ => None,
    }
}

fn from_millis(millis: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
}

/// Accepts RFC 3339, general ISO 8601, or epoch milliseconds.
pub fn parse_date(raw: &str) -> Option<OffsetDateTime> {
    let trimmed = raw.trim();
    if let Ok(date) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Some(date);
    }
    if let Ok(date) = OffsetDateTime::parse(trimmed, &Iso8601::DEFAULT) {
        return Some(date);
    }
    from_millis(trimmed.parse::<i64>().ok()?)
}

pub fn format_date(date: OffsetDateTime) -> String {
    date.format(&Rfc3339)
        .unwrap_or_else(|_| (date.unix_timestamp_nanos() / 1_000_000).to_string())
}

pub fn truncate_to_millis(date: OffsetDateTime) -> OffsetDateTime {
    date.replace_millisecond(date.millisecond()).unwrap_or(date)
}
