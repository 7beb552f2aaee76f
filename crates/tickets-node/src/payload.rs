//! Inspection of upstream responses before they are cached.
//!
//! Only the upstream's generic envelope is looked at (`status`,
//! `httpstatus`, `c_url`, `data`); the ticket data itself stays opaque.

use bytes::Bytes;
use serde_json::{Map, Value};

/// Upstream path of the availability query.
pub const QUERY_ENTRY: &str = "leftTicket/query";

/// Upstream path of the price query.
pub const PRICE_ENTRY: &str = "leftTicket/queryTicketPrice";

/// Body returned when nothing could be fetched or cached.
pub const EMPTY_BODY: &str = r#"{"isempty":1}"#;

/// Body returned when a price query timed out and nothing is cached.
pub const TIMEOUT_BODY: &str = r#"{"result":"timeout"}"#;

/// The new entry point when the upstream reports that the query moved.
///
/// The upstream answers `{"status": false, "c_url": "leftTicket/queryZ"}`
/// when it rotates its query path.
pub fn moved_entry(body: &[u8]) -> Option<String> {
    let object = parse_object(body)?;
    if object.get("status").and_then(Value::as_bool) != Some(false) {
        return None;
    }
    match object.get("c_url").and_then(Value::as_str) {
        Some(entry) if !entry.is_empty() => Some(entry.to_string()),
        _ => None,
    }
}

/// Returns the body to cache if `body` is a usable availability answer.
pub fn accept_tickets(body: &[u8]) -> Option<Bytes> {
    let object = parse_object(body)?;
    let ok = object.get("status").and_then(Value::as_bool) == Some(true)
        && object.get("httpstatus").and_then(Value::as_u64) == Some(200);
    if !ok {
        return None;
    }
    stamp(object, now())
}

/// Verdict on an upstream price answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceVerdict {
    /// Not a usable answer; serve from cache.
    Rejected,
    /// Well-formed but carries no prices; serve it, don't cache it.
    Empty,
    /// Serve it and cache the contained body.
    Accepted(Bytes),
}

/// Classify an upstream price answer.
pub fn inspect_price(body: &[u8]) -> PriceVerdict {
    let Some(object) = parse_object(body) else {
        return PriceVerdict::Rejected;
    };
    if object.get("status").and_then(Value::as_bool) != Some(true) {
        return PriceVerdict::Rejected;
    }

    let has_prices = object
        .get("data")
        .and_then(Value::as_object)
        .is_some_and(|data| data.keys().any(|k| k != "train_no" && k != "OT"));
    if !has_prices {
        return PriceVerdict::Empty;
    }

    match stamp(object, now()) {
        Some(stamped) => PriceVerdict::Accepted(stamped),
        None => PriceVerdict::Rejected,
    }
}

fn parse_object(body: &[u8]) -> Option<Map<String, Value>> {
    match serde_json::from_slice(body).ok()? {
        Value::Object(object) => Some(object),
        _ => None,
    }
}

fn stamp(mut object: Map<String, Value>, updated_at: u64) -> Option<Bytes> {
    object.insert("updatetime".to_string(), Value::from(updated_at));
    serde_json::to_vec(&object).ok().map(Bytes::from)
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
