//! Rating level normalization.

use serde_json::Value;
use tracing::warn;

/// Highest canonical rating level.
pub const MAX_RATING: u8 = 6;

/// Canonical labels and the level each one maps to.
///
/// Lookups are case-insensitive. `mature+` is accepted as an alias of
/// `mature-plus` because the API emits both spellings.
pub const RATING_LABELS: &[(&str, u8)] = &[
    ("none", 0),
    ("soft", 1),
    ("mature", 2),
    ("mature-plus", 4),
    ("mature+", 4),
    ("x", 5),
    ("xxx", 6),
];

/// Normalizes a raw rating value to a level in `0..=6`.
///
/// Accepted inputs:
/// - integers in range (`3`), or integral floats (`3.0`)
/// - numeric strings (`"3"`)
/// - canonical labels in any case (`"Mature"`, `"XXX"`)
/// - booleans (`false` → 0, `true` → 1)
///
/// `null`, out-of-range numbers and anything unrecognized yield 0, the
/// safest level. Unrecognized non-null input is logged.
///
/// # Examples
///
/// ```
/// use harvester_core::classify::classify;
/// use serde_json::json;
///
/// assert_eq!(classify(&json!(5)), 5);
/// assert_eq!(classify(&json!("mature")), 2);
/// assert_eq!(classify(&json!(null)), 0);
/// assert_eq!(classify(&json!("garbage")), 0);
/// ```
#[must_use]
pub fn classify(raw: &Value) -> u8 {
    match raw {
        Value::Null => 0,
        Value::Bool(flag) => u8::from(*flag),
        Value::Number(number) => {
            let level = number
                .as_u64()
                .or_else(|| number.as_f64().and_then(integral_f64));
            level_in_range(level).unwrap_or_else(|| {
                warn!(raw = %number, "rating level out of range, defaulting to 0");
                0
            })
        }
        Value::String(text) => classify_label(text),
        Value::Array(_) | Value::Object(_) => {
            warn!(raw = %raw, "unrecognized rating value, defaulting to 0");
            0
        }
    }
}

/// Normalizes a rating given as text: a numeric string or a canonical label.
///
/// Returns 0 for anything unrecognized.
#[must_use]
pub fn classify_label(text: &str) -> u8 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0;
    }

    if let Ok(number) = trimmed.parse::<u64>() {
        return level_in_range(Some(number)).unwrap_or_else(|| {
            warn!(raw = %text, "rating level out of range, defaulting to 0");
            0
        });
    }

    let lowered = trimmed.to_ascii_lowercase();
    RATING_LABELS
        .iter()
        .find(|(label, _)| *label == lowered)
        .map(|(_, level)| *level)
        .unwrap_or_else(|| {
            warn!(raw = %text, "unknown rating label, defaulting to 0");
            0
        })
}

fn level_in_range(level: Option<u64>) -> Option<u8> {
    level
        .filter(|value| *value <= u64::from(MAX_RATING))
        .and_then(|value| u8::try_from(value).ok())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn integral_f64(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0 && value.fract() == 0.0).then_some(value as u64)
}
