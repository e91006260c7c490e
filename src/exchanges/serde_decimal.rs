//! Decimal deserializers for venues that mix JSON numbers and numeric strings.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Str(String),
    Num(serde_json::Number),
}

fn parse_flexible(raw: &str) -> Result<Decimal, rust_decimal::Error> {
    Decimal::from_str(raw).or_else(|_| Decimal::from_scientific(raw))
}

/// Accepts `"1.5"`, `1.5` and `1.5e-3`.
pub fn flexible_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Str(s) => s,
        NumberOrString::Num(n) => n.to_string(),
    };
    parse_flexible(raw.trim()).map_err(serde::de::Error::custom)
}

/// Like [`flexible_decimal`], with `null` and `""` read as absent.
pub fn flexible_decimal_opt<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Option::<NumberOrString>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(NumberOrString::Str(s)) => s,
        Some(NumberOrString::Num(n)) => n.to_string(),
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    parse_flexible(raw)
        .map(Some)
        .map_err(serde::de::Error::custom)
}
