use aes_gcm::aead::{rand_core::RngCore, OsRng};
use chrono::{NaiveDate, SecondsFormat, Utc};
use std::fs;
use std::path::PathBuf;

use crate::error::AppError;

pub fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn new_id() -> String {
    let mut bytes = [0_u8; 10];
    OsRng.fill_bytes(&mut bytes);
    let mut hex = String::new();
    for b in bytes {
        hex.push_str(format!("{:02x}", b).as_str());
    }
    format!("id-{}-{hex}", Utc::now().timestamp_millis())
}

/// Strips control characters and caps the length in chars.
pub fn clamp_string(value: &str, max_len: usize, trim: bool) -> String {
    let mut out = if trim {
        value.trim().to_string()
    } else {
        value.to_string()
    };
    out = out
        .chars()
        .filter(|ch| {
            let code = *ch as u32;
            code >= 32 && code != 127
        })
        .collect();
    if out.chars().count() > max_len {
        out = out.chars().take(max_len).collect();
    }
    out
}

/// Like `clamp_string` but keeps line breaks, for multi-line notes.
pub fn clamp_multiline(value: &str, max_len: usize) -> String {
    let normalized = value.replace("\r\n", "\n");
    normalized
        .lines()
        .map(|line| clamp_string(line, max_len, false))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .chars()
        .take(max_len)
        .collect()
}

/// Renders a cell the way a spreadsheet would show it.
pub fn js_like_value_string(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::Null) | None => String::new(),
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(serde_json::Value::Number(number)) => number.to_string(),
        Some(serde_json::Value::Bool(boolean)) => boolean.to_string(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|entry| js_like_value_string(Some(entry)))
            .collect::<Vec<_>>()
            .join(","),
        Some(serde_json::Value::Object(_)) => "[object Object]".to_string(),
    }
}

fn detect_meridiem(raw: &str) -> Option<char> {
    let compact: String = raw
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '.')
        .collect();
    if compact.contains("am") || compact.ends_with('a') {
        Some('a')
    } else if compact.contains("pm") || compact.ends_with('p') {
        Some('p')
    } else {
        None
    }
}

/// Parses loose clock input (`9`, `930`, `9:30am`, `17:00`) into minutes
/// after midnight.
pub fn parse_clock_time(value: &str) -> Option<i64> {
    let raw = value.trim().to_lowercase();
    if raw.is_empty() {
        return None;
    }
    let meridiem = detect_meridiem(raw.as_str());
    let cleaned: String = raw
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == ':')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let (mut hours, minutes) = if cleaned.contains(':') {
        let parts: Vec<&str> = cleaned.split(':').collect();
        if parts.len() != 2 {
            return None;
        }
        let h = parts[0].parse::<i64>().ok()?;
        let m = parts[1].parse::<i64>().ok()?;
        (h, m)
    } else {
        let digits = cleaned.as_str();
        match digits.len() {
            1 | 2 => (digits.parse::<i64>().ok()?, 0),
            3 => (
                digits[0..1].parse::<i64>().ok()?,
                digits[1..3].parse::<i64>().ok()?,
            ),
            4 => (
                digits[0..2].parse::<i64>().ok()?,
                digits[2..4].parse::<i64>().ok()?,
            ),
            _ => return None,
        }
    };
    if !(0..=59).contains(&minutes) {
        return None;
    }

    if let Some(mark) = meridiem {
        if !(1..=12).contains(&hours) {
            return None;
        }
        if mark == 'a' {
            if hours == 12 {
                hours = 0;
            }
        } else if mark == 'p' && hours != 12 {
            hours += 12;
        }
    } else if !(0..=23).contains(&hours) {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Minutes between two clock strings, wrapping past midnight.
pub fn span_minutes(start: &str, end: &str) -> Option<i64> {
    let start = parse_clock_time(start)?;
    let end = parse_clock_time(end)?;
    let mut diff = end - start;
    if diff < 0 {
        diff += 24 * 60;
    }
    Some(diff)
}

pub fn format_hours(minutes: Option<i64>) -> String {
    match minutes {
        Some(value) => format!("{:.2}", value as f64 / 60.0),
        None => "".to_string(),
    }
}

/// Accepts `YYYY-MM-DD`, `M/D/YYYY` and `M/D/YY`.
pub fn parse_loose_date(value: &str) -> Option<NaiveDate> {
    let raw = value.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    let parts: Vec<&str> = raw.split('/').map(|part| part.trim()).collect();
    if parts.len() != 3
        || parts
            .iter()
            .any(|part| part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }
    let month = parts[0].parse::<u32>().ok()?;
    let day = parts[1].parse::<u32>().ok()?;
    let mut year = parts[2].parse::<i32>().ok()?;
    if parts[2].len() == 2 {
        year += 2000;
    } else if parts[2].len() != 4 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

pub fn write_text_file(path: PathBuf, content: &str) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

pub fn sanitize_filename(value: &str, fallback: &str) -> String {
    let mut out = String::new();
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}
