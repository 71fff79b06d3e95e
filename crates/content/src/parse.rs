//! Tolerant decoding of model output
//!
//! Models wrap JSON in markdown fences, leave trailing commas, drop quotes
//! around keys, or surround the object with chatter. Decoding tries, in
//! order: strict JSON, JSON5, then the outermost `{...}` / `[...]` span
//! under both parsers.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Remove a surrounding markdown code fence (with or without a language tag)
/// and outer whitespace.
pub fn strip_code_fence(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // drop the info string ("json", "JSON5", ...) up to the first newline
        text = match rest.find('\n') {
            Some(newline) if rest[..newline].chars().all(|c| c.is_ascii_alphanumeric()) => {
                &rest[newline + 1..]
            }
            _ => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
        };
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Decode model output into a JSON value, or `None` if nothing readable.
pub fn parse_lenient(raw: &str) -> Option<Value> {
    let text = strip_code_fence(raw);
    if text.is_empty() {
        return None;
    }
    decode(text).or_else(|| embedded_span(text).and_then(decode))
}

fn decode(text: &str) -> Option<Value> {
    serde_json::from_str(text)
        .ok()
        .or_else(|| json5::from_str(text).ok())
}

/// Outermost object or array span, whichever opens first.
fn embedded_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') {
        '}'
    } else {
        ']'
    };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Models emit numbers as `10`, `10.0` or `"10"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Int(u64),
    Float(f64),
    Text(String),
    Bool(bool),
}

pub(crate) fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let n = match Option::<Loose>::deserialize(deserializer)? {
        Some(Loose::Int(n)) => n.min(u32::MAX as u64) as u32,
        Some(Loose::Float(f)) if f.is_finite() && f >= 0.0 => f.round().min(u32::MAX as f64) as u32,
        Some(Loose::Text(s)) => s.trim().parse::<f64>().map_or(0, |f| f.max(0.0) as u32),
        _ => 0,
    };
    Ok(n)
}

/// Identifiers and answers arrive as strings, numbers or booleans.
pub(crate) fn lenient_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<String, D::Error> {
    Ok(lenient_optional_string(deserializer)?.unwrap_or_default())
}

pub(crate) fn lenient_optional_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Loose>::deserialize(deserializer)? {
        Some(Loose::Int(n)) => Some(n.to_string()),
        Some(Loose::Float(f)) => Some(f.to_string()),
        Some(Loose::Text(s)) => Some(s),
        Some(Loose::Bool(b)) => Some(b.to_string()),
        None => None,
    })
}
