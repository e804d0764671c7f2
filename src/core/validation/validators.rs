//! Parameter validators
//!
//! One pure function per type tag: raw request text in, parsed value or
//! [`ValidationFailure`] out. PASSWORD is the single exception to purity: it
//! draws a random salt and returns the derived hash instead of the input.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use uuid::Uuid;
use validator::ValidateEmail;

use super::password::PasswordHash;
use super::types::{
    DateConditions, FloatConditions, IntegerConditions, ParamType, ParamValue, RawValue,
    StringConditions,
};
use crate::core::query::{OrderDirection, OrderMap};

pub const EMAIL_MAX_LENGTH: usize = 128;
pub const PASSWORD_MIN_LENGTH: usize = 12;
pub const PASSWORD_MAX_LENGTH: usize = 1024;

/// Largest integer every client can represent exactly (2^53 - 1)
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

const TRUE_WORDS: &[&str] = &["true", "1", "+", "y", "yes"];
const FALSE_WORDS: &[&str] = &["false", "0", "-", "n", "no"];

static CANONICAL_UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("uuid pattern is valid")
});

/// A raw value rejected by a validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub raw: String,
    pub reason: String,
}

impl ValidationFailure {
    fn new(raw: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' {}", self.raw, self.reason)
    }
}

impl std::error::Error for ValidationFailure {}

type Outcome = Result<ParamValue, ValidationFailure>;

/// Validate a raw value against a type
///
/// Many-valued input is validated element by element with the scalar rule and
/// comes back as [`ParamValue::List`]. ORDER is the exception: its fragments
/// are merged into a single ordering map.
pub fn parse(ty: &ParamType, raw: &RawValue) -> Outcome {
    if let ParamType::Order(columns) = ty {
        return parse_order(columns, &raw.fragments());
    }

    match raw {
        RawValue::Single(value) => parse_scalar(ty, value),
        RawValue::Many(values) => values
            .iter()
            .map(|value| parse_scalar(ty, value))
            .collect::<Result<Vec<_>, _>>()
            .map(ParamValue::List),
    }
}

/// Validate one fragment
pub fn parse_scalar(ty: &ParamType, raw: &str) -> Outcome {
    match ty {
        ParamType::Boolean => parse_boolean(raw),
        ParamType::Email => parse_email(raw),
        ParamType::Password => parse_password(raw),
        ParamType::Uuid => parse_uuid(raw),
        ParamType::Date(conditions) => parse_date(raw, conditions),
        ParamType::Enum(members) => parse_enum(raw, members),
        ParamType::Float(conditions) => parse_float(raw, conditions),
        ParamType::Integer(conditions) => parse_integer(raw, conditions),
        ParamType::Order(columns) => parse_order(columns, &[raw]),
        ParamType::String(conditions) => parse_string(raw, conditions),
        ParamType::File { .. } => Err(ValidationFailure::new(
            raw,
            "must be sent as a multipart file",
        )),
    }
}

pub fn parse_boolean(raw: &str) -> Outcome {
    let lowered = raw.trim().to_lowercase();
    if TRUE_WORDS.contains(&lowered.as_str()) {
        Ok(ParamValue::Bool(true))
    } else if FALSE_WORDS.contains(&lowered.as_str()) {
        Ok(ParamValue::Bool(false))
    } else {
        Err(ValidationFailure::new(raw, "is not a boolean"))
    }
}

pub fn parse_email(raw: &str) -> Outcome {
    if raw.chars().count() > EMAIL_MAX_LENGTH {
        return Err(ValidationFailure::new(
            raw,
            format!("must be at most {} characters", EMAIL_MAX_LENGTH),
        ));
    }
    if !raw.to_string().validate_email() {
        return Err(ValidationFailure::new(raw, "is not a valid email address"));
    }
    Ok(ParamValue::Text(raw.to_string()))
}

pub fn parse_password(raw: &str) -> Outcome {
    let length = raw.chars().count();
    if !(PASSWORD_MIN_LENGTH..=PASSWORD_MAX_LENGTH).contains(&length) {
        // Never echo a password back
        return Err(ValidationFailure::new(
            "********",
            format!(
                "must be between {} and {} characters",
                PASSWORD_MIN_LENGTH, PASSWORD_MAX_LENGTH
            ),
        ));
    }
    Ok(ParamValue::Password(PasswordHash::derive(raw)))
}

pub fn parse_uuid(raw: &str) -> Outcome {
    if !CANONICAL_UUID.is_match(raw) {
        return Err(ValidationFailure::new(raw, "is not a UUID"));
    }
    Uuid::parse_str(raw)
        .map(ParamValue::Uuid)
        .map_err(|_| ValidationFailure::new(raw, "is not a UUID"))
}

/// Epoch milliseconds, RFC 3339, `YYYY-MM-DDTHH:MM:SS` or `YYYY-MM-DD`
pub fn parse_date(raw: &str, conditions: &DateConditions) -> Outcome {
    let trimmed = raw.trim();
    let parsed = match trimmed.parse::<f64>() {
        Ok(millis) if millis.is_finite() => DateTime::from_timestamp_millis(millis as i64),
        Ok(_) => None,
        Err(_) => DateTime::parse_from_rfc3339(trimmed)
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|d| d.and_utc())
            })
            .or_else(|| {
                NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|d| d.and_utc())
            }),
    };

    let date = parsed.ok_or_else(|| ValidationFailure::new(raw, "is not a date"))?;

    if let Some(earliest) = conditions.earliest {
        if date < earliest {
            return Err(ValidationFailure::new(
                raw,
                format!("must not be before {}", earliest.to_rfc3339()),
            ));
        }
    }
    if let Some(latest) = conditions.latest {
        if date > latest {
            return Err(ValidationFailure::new(
                raw,
                format!("must not be after {}", latest.to_rfc3339()),
            ));
        }
    }
    Ok(ParamValue::Date(date))
}

pub fn parse_enum(raw: &str, members: &[String]) -> Outcome {
    if members.iter().any(|m| m == raw) {
        Ok(ParamValue::Text(raw.to_string()))
    } else {
        Err(ValidationFailure::new(
            raw,
            format!("must be one of: {}", members.join(", ")),
        ))
    }
}

fn parse_number(raw: &str) -> Result<f64, ValidationFailure> {
    match raw.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(ValidationFailure::new(raw, "is not a number")),
    }
}

fn check_range<T: PartialOrd + fmt::Display>(
    raw: &str,
    value: T,
    min: Option<T>,
    max: Option<T>,
) -> Result<(), ValidationFailure> {
    if let Some(min) = min {
        if value < min {
            return Err(ValidationFailure::new(raw, format!("must be at least {}", min)));
        }
    }
    if let Some(max) = max {
        if value > max {
            return Err(ValidationFailure::new(raw, format!("must be at most {}", max)));
        }
    }
    Ok(())
}

/// Digits after the decimal point, ignoring trailing zeros
fn decimal_places(raw: &str) -> u32 {
    let mantissa = raw.trim().split(['e', 'E']).next().unwrap_or_default();
    match mantissa.split_once('.') {
        Some((_, fraction)) => fraction.trim_end_matches('0').len() as u32,
        None => 0,
    }
}

pub fn parse_float(raw: &str, conditions: &FloatConditions) -> Outcome {
    let value = parse_number(raw)?;
    check_range(raw, value, conditions.min, conditions.max)?;
    if let Some(decimals) = conditions.decimals {
        if decimal_places(raw) > decimals {
            return Err(ValidationFailure::new(
                raw,
                format!("must have at most {} decimal places", decimals),
            ));
        }
    }
    Ok(ParamValue::Float(value))
}

pub fn parse_integer(raw: &str, conditions: &IntegerConditions) -> Outcome {
    let value = parse_number(raw)?;
    if value.fract() != 0.0 {
        return Err(ValidationFailure::new(raw, "is not an integer"));
    }
    if value.abs() > MAX_SAFE_INTEGER {
        return Err(ValidationFailure::new(raw, "is out of the integer range"));
    }
    let value = value as i64;
    check_range(raw, value, conditions.min, conditions.max)?;
    Ok(ParamValue::Integer(value))
}

/// Merge every fragment into one ordering map; a repeated column keeps its
/// first position and takes the last direction
pub fn parse_order(columns: &[String], fragments: &[&str]) -> Outcome {
    let mut order = OrderMap::new();
    for fragment in fragments {
        let fragment = fragment.trim();
        let (column, direction) = match fragment.strip_prefix('-') {
            Some(column) => (column, OrderDirection::Desc),
            None => (fragment, OrderDirection::Asc),
        };
        if column.is_empty() {
            return Err(ValidationFailure::new(fragment, "is not an ordering column"));
        }
        if !columns.iter().any(|c| c == column) {
            return Err(ValidationFailure::new(
                fragment,
                format!("must order by one of: {}", columns.join(", ")),
            ));
        }
        order.insert(column.to_string(), direction);
    }
    Ok(ParamValue::Order(order))
}

pub fn parse_string(raw: &str, conditions: &StringConditions) -> Outcome {
    let length = raw.chars().count();
    if let Some(min) = conditions.min_length {
        if length < min {
            return Err(ValidationFailure::new(
                raw,
                format!("must be at least {} characters", min),
            ));
        }
    }
    if let Some(max) = conditions.max_length {
        if length > max {
            return Err(ValidationFailure::new(
                raw,
                format!("must be at most {} characters", max),
            ));
        }
    }
    if let Some(pattern) = &conditions.pattern {
        if !pattern.is_match(raw) {
            return Err(ValidationFailure::new(
                raw,
                format!("must match {}", pattern.as_str()),
            ));
        }
    }
    Ok(ParamValue::Text(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn single(s: &str) -> RawValue {
        RawValue::Single(s.to_string())
    }

    fn many(items: &[&str]) -> RawValue {
        RawValue::Many(items.iter().map(|s| s.to_string()).collect())
    }

    fn integer(min: i64, max: i64) -> ParamType {
        ParamType::integer(Some(min), Some(max))
    }

    // === INTEGER ===

    #[test]
    fn test_integer_in_range() {
        let value = parse(&integer(0, 10), &single("7")).unwrap();
        assert_eq!(value.as_i64(), Some(7));
    }

    #[test]
    fn test_integer_above_max_fails() {
        let err = parse(&integer(0, 10), &single("11")).unwrap_err();
        assert_eq!(err.raw, "11");
        assert!(err.reason.contains("at most 10"));
    }

    #[test]
    fn test_integer_rejects_fraction() {
        assert!(parse(&ParamType::integer(None, None), &single("7.5")).is_err());
    }

    #[test]
    fn test_integer_rejects_non_numbers() {
        let ty = ParamType::integer(None, None);
        assert!(parse(&ty, &single("seven")).is_err());
        assert!(parse(&ty, &single("")).is_err());
        assert!(parse(&ty, &single("inf")).is_err());
        assert!(parse(&ty, &single("1e300")).is_err());
    }

    #[test]
    fn test_integer_array_validates_each_element() {
        let value = parse(&integer(0, 10), &many(&["1", "2"])).unwrap();
        let items: Vec<i64> = value.items().iter().filter_map(|v| v.as_i64()).collect();
        assert_eq!(items, vec![1, 2]);
        assert!(parse(&integer(0, 10), &many(&["1", "20"])).is_err());
    }

    // === FLOAT ===

    #[test]
    fn test_float_decimals() {
        let ty = ParamType::Float(FloatConditions {
            decimals: Some(2),
            ..Default::default()
        });
        assert!(parse(&ty, &single("3.14")).is_ok());
        assert!(parse(&ty, &single("3.140")).is_ok());
        assert!(parse(&ty, &single("3.141")).is_err());
    }

    #[test]
    fn test_float_range() {
        let ty = ParamType::Float(FloatConditions {
            min: Some(0.5),
            max: Some(1.5),
            decimals: None,
        });
        assert!(parse(&ty, &single("1.0")).is_ok());
        assert!(parse(&ty, &single("0.1")).is_err());
        assert!(parse(&ty, &single("NaN")).is_err());
    }

    // === ORDER ===

    #[test]
    fn test_order_merges_fragments() {
        let ty = ParamType::order(["name", "time_created"]);
        let value = parse(&ty, &many(&["name", "-time_created"])).unwrap();
        let ParamValue::Order(order) = value else {
            panic!("expected an order map");
        };
        assert_eq!(order.get("name"), Some(&OrderDirection::Asc));
        assert_eq!(order.get("time_created"), Some(&OrderDirection::Desc));
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn test_order_rejects_unlisted_column() {
        let ty = ParamType::order(["name"]);
        assert!(parse(&ty, &many(&["bogus"])).is_err());
        assert!(parse(&ty, &single("-bogus")).is_err());
        assert!(parse(&ty, &single("-")).is_err());
    }

    #[test]
    fn test_order_later_duplicate_wins() {
        let ty = ParamType::order(["name", "size"]);
        let ParamValue::Order(order) = parse(&ty, &many(&["name", "size", "-name"])).unwrap()
        else {
            panic!("expected an order map");
        };
        assert_eq!(order.get("name"), Some(&OrderDirection::Desc));
        let columns: Vec<_> = order.keys().cloned().collect();
        assert_eq!(columns, vec!["name", "size"]);
    }

    // === BOOLEAN ===

    #[test]
    fn test_boolean_words() {
        for word in ["true", "TRUE", "1", "+", "y", "Yes"] {
            assert_eq!(parse_boolean(word).unwrap().as_bool(), Some(true), "{}", word);
        }
        for word in ["false", "0", "-", "N", "no"] {
            assert_eq!(parse_boolean(word).unwrap().as_bool(), Some(false), "{}", word);
        }
        assert!(parse_boolean("maybe").is_err());
    }

    // === EMAIL ===

    #[test]
    fn test_email() {
        assert!(parse_email("ada@example.com").is_ok());
        assert!(parse_email("not-an-email").is_err());
        let long = format!("{}@example.com", "a".repeat(120));
        assert!(parse_email(&long).is_err());
    }

    // === PASSWORD ===

    #[test]
    fn test_password_length_bounds() {
        assert!(parse_password("short").is_err());
        assert!(parse_password(&"x".repeat(1025)).is_err());
        let ParamValue::Password(hash) = parse_password("long enough secret").unwrap() else {
            panic!("expected a password hash");
        };
        assert!(hash.verify("long enough secret"));
    }

    #[test]
    fn test_password_failure_does_not_echo() {
        let err = parse_password("hunter2").unwrap_err();
        assert!(!err.to_string().contains("hunter2"));
    }

    // === UUID ===

    #[test]
    fn test_uuid_canonical_only() {
        let id = Uuid::new_v4();
        assert_eq!(parse_uuid(&id.to_string()).unwrap().as_uuid(), Some(id));
        assert!(parse_uuid(&id.simple().to_string()).is_err());
        assert!(parse_uuid(&format!("{{{}}}", id)).is_err());
        assert!(parse_uuid("not-a-uuid").is_err());
    }

    // === DATE ===

    #[test]
    fn test_date_formats() {
        let none = DateConditions::default();
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        for raw in ["2024-01-15", "2024-01-15T00:00:00Z", "2024-01-15T00:00:00", "1705276800000"] {
            let ParamValue::Date(d) = parse_date(raw, &none).unwrap() else {
                panic!("expected a date");
            };
            assert_eq!(d, expected, "{}", raw);
        }
        assert!(parse_date("yesterday", &none).is_err());
    }

    #[test]
    fn test_date_range() {
        let conditions = DateConditions {
            earliest: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            latest: Some(Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap()),
        };
        assert!(parse_date("2024-06-01", &conditions).is_ok());
        assert!(parse_date("2023-06-01", &conditions).is_err());
        assert!(parse_date("2025-06-01", &conditions).is_err());
    }

    // === ENUM ===

    #[test]
    fn test_enum_membership() {
        let ty = ParamType::enumeration(["draft", "published"]);
        assert!(parse(&ty, &single("draft")).is_ok());
        assert!(parse(&ty, &single("Draft")).is_err());
    }

    // === STRING ===

    #[test]
    fn test_string_bounds_and_pattern() {
        let conditions =
            StringConditions::length(2, 5).with_pattern(Regex::new("^[a-z]+$").unwrap());
        assert!(parse_string("abc", &conditions).is_ok());
        assert!(parse_string("a", &conditions).is_err());
        assert!(parse_string("abcdef", &conditions).is_err());
        assert!(parse_string("ABC", &conditions).is_err());
    }

    #[test]
    fn test_string_length_counts_characters() {
        let conditions = StringConditions::length(1, 3);
        assert!(parse_string("été", &conditions).is_ok());
    }

    // === FILE ===

    #[test]
    fn test_file_cannot_come_from_text() {
        assert!(parse(&ParamType::File { max_count: 1 }, &single("x")).is_err());
    }
}
