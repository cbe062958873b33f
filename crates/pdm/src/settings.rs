//! User-editable settings stored in the `settings` table.
//!
//! Values are saved as strings and applied on the next start.

use pdmcore::config;
use pdmcore::storage::db;
use pdmcore::DbConnection;
use serde_json::{Map, Value};

pub const MAX_CONCURRENT: &str = "maxConcurrent";
pub const AUTO_TELEGRAM_UPLOAD: &str = "autoTelegramUpload";
pub const DELETE_AFTER_UPLOAD: &str = "deleteAfterUpload";
pub const TELEGRAM_CHANNEL: &str = "telegramChannel";

pub const KEYS: [&str; 4] = [MAX_CONCURRENT, AUTO_TELEGRAM_UPLOAD, DELETE_AFTER_UPLOAD, TELEGRAM_CHANNEL];

const MAX_CONCURRENT_LIMIT: u64 = 20;

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Check one incoming value and turn it into its stored form.
pub fn normalize(key: &str, value: &Value) -> Result<String, String> {
    match key {
        MAX_CONCURRENT => {
            let n = match value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            };
            match n {
                Some(n) if (1..=MAX_CONCURRENT_LIMIT).contains(&n) => Ok(n.to_string()),
                _ => Err(format!("{} must be between 1 and {}", key, MAX_CONCURRENT_LIMIT)),
            }
        }
        AUTO_TELEGRAM_UPLOAD | DELETE_AFTER_UPLOAD => parse_bool(value)
            .map(|b| b.to_string())
            .ok_or_else(|| format!("{} must be true or false", key)),
        TELEGRAM_CHANNEL => match value {
            Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            _ => Err(format!("{} must be a channel id or @name", key)),
        },
        other => Err(format!("Unknown setting: {}", other)),
    }
}

/// Stored string back to JSON, typed by key.
fn typed(key: &str, raw: &str) -> Value {
    match key {
        MAX_CONCURRENT => raw.parse::<u64>().map(Value::from).unwrap_or(Value::Null),
        AUTO_TELEGRAM_UPLOAD | DELETE_AFTER_UPLOAD => raw.parse::<bool>().map(Value::Bool).unwrap_or(Value::Null),
        _ => Value::String(raw.to_string()),
    }
}

/// Values from the environment, before any stored override.
pub fn defaults() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(MAX_CONCURRENT.into(), Value::from(*config::server::MAX_WORKERS));
    map.insert(AUTO_TELEGRAM_UPLOAD.into(), Value::Bool(*config::telegram::AUTO_UPLOAD));
    map.insert(DELETE_AFTER_UPLOAD.into(), Value::Bool(*config::telegram::DELETE_AFTER_UPLOAD));
    map.insert(
        TELEGRAM_CHANNEL.into(),
        config::telegram::CHANNEL_ID.clone().map_or(Value::Null, Value::String),
    );
    map
}

/// Defaults overlaid with whatever the user saved.
pub fn effective(conn: &DbConnection) -> rusqlite::Result<Map<String, Value>> {
    let mut map = defaults();
    for (key, raw) in db::all_settings(conn)? {
        if KEYS.contains(&key.as_str()) {
            map.insert(key.clone(), typed(&key, &raw));
        }
    }
    Ok(map)
}

pub fn stored_bool(conn: &DbConnection, key: &str) -> Option<bool> {
    db::get_setting(conn, key).ok().flatten().and_then(|raw| raw.parse().ok())
}

pub fn stored_max_concurrent(conn: &DbConnection) -> Option<usize> {
    db::get_setting(conn, MAX_CONCURRENT)
        .ok()
        .flatten()
        .and_then(|raw| raw.parse::<usize>().ok())
        .filter(|n| *n >= 1)
}

pub fn stored_channel(conn: &DbConnection) -> Option<String> {
    db::get_setting(conn, TELEGRAM_CHANNEL).ok().flatten()
}
