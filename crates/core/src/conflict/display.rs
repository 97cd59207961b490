//! Display-name and display-text formatting for conflict columns.
//!
//! Nothing in here affects whether a column is concordant; it only decides
//! what the presentation layer shows.

use std::path::Path;

use serde_json::Value;

use crate::models::{ColumnDefinition, ElementType};

/// Locale-aware formatter for column headings and cell values.
#[derive(Debug, Clone)]
pub struct DisplayFormatter {
    full_locale: String,
    language: String,
}

impl Default for DisplayFormatter {
    fn default() -> Self {
        Self::new("en_US")
    }
}

impl DisplayFormatter {
    /// `locale` is an ODK style locale such as `en_US` or `fr`.
    pub fn new(locale: &str) -> Self {
        let language = locale
            .split_once('_')
            .map_or(locale, |(lang, _)| lang)
            .to_string();
        Self {
            full_locale: locale.to_string(),
            language,
        }
    }

    /// Heading for a column: the localized persisted override if there is
    /// one, otherwise a name derived from the element key.
    pub fn column_display_name(&self, column: &ColumnDefinition) -> String {
        match column.display_name.as_deref() {
            Some(persisted) => self.localized_display_name(persisted),
            None => simple_display_name(&column.element_key),
        }
    }

    /// Resolve a persisted display name.
    ///
    /// A JSON string yields its contents. A JSON object is looked up by full
    /// locale, then language, then `default`. Anything else is returned
    /// verbatim.
    pub fn localized_display_name(&self, persisted: &str) -> String {
        let trimmed = persisted.trim();
        if trimmed.starts_with('"') && trimmed.ends_with('"') {
            if let Ok(Value::String(s)) = serde_json::from_str::<Value>(trimmed) {
                return s;
            }
        } else if trimmed.starts_with('{') {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
                let picked = [
                    self.full_locale.as_str(),
                    self.language.as_str(),
                    "default",
                ]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str));
                if let Some(name) = picked {
                    return name.to_string();
                }
            }
        }
        persisted.to_string()
    }

    /// Human-readable text for a raw stored value.
    pub fn display_text(&self, element_type: &ElementType, raw: Option<&str>) -> String {
        let Some(raw) = raw else {
            return String::new();
        };
        match element_type {
            ElementType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" => "true".to_string(),
                "0" | "false" => "false".to_string(),
                _ => raw.to_string(),
            },
            ElementType::Array | ElementType::Object | ElementType::Custom(_) => {
                match serde_json::from_str::<Value>(raw) {
                    Ok(v @ (Value::Array(_) | Value::Object(_))) => v.to_string(),
                    _ => raw.to_string(),
                }
            }
            ElementType::RowPath | ElementType::ConfigPath => Path::new(raw)
                .file_name()
                .map_or_else(|| raw.to_string(), |n| n.to_string_lossy().into_owned()),
            ElementType::DateTime | ElementType::Date => shorten_odk_timestamp(raw),
            ElementType::String
            | ElementType::Integer
            | ElementType::Number
            | ElementType::Time => raw.to_string(),
        }
    }
}

/// Derive a heading from an element key: underscores become spaces, and a
/// space at either end is turned back into an underscore so the edges of
/// the key stay visible.
pub fn simple_display_name(element_key: &str) -> String {
    let mut name = element_key.replace('_', " ");
    if name.starts_with(' ') {
        name.replace_range(..1, "_");
    }
    if name.ends_with(' ') {
        let last = name.len() - 1;
        name.replace_range(last.., "_");
    }
    name
}

/// ODK stores date-times as `yyyy-MM-ddTHH:mm:ss.SSSSSSSSS`; show them to
/// the second.
fn shorten_odk_timestamp(raw: &str) -> String {
    match raw.split_once('.') {
        Some((head, frac)) if head.len() == 19 && frac.chars().all(|c| c.is_ascii_digit()) => {
            head.to_string()
        }
        _ => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_display_name() {
        assert_eq!(simple_display_name("first_name"), "first name");
        assert_eq!(simple_display_name("_leading"), "_leading");
        assert_eq!(simple_display_name("trailing_"), "trailing_");
        assert_eq!(simple_display_name("plain"), "plain");
    }

    #[test]
    fn test_localized_display_name() {
        let fmt = DisplayFormatter::new("fr_CA");
        assert_eq!(fmt.localized_display_name("\"Age\""), "Age");
        assert_eq!(
            fmt.localized_display_name(r#"{"default":"Age","fr":"Âge"}"#),
            "Âge"
        );
        assert_eq!(
            fmt.localized_display_name(r#"{"default":"Age","fr_CA":"Âge (CA)","fr":"Âge"}"#),
            "Âge (CA)"
        );
        assert_eq!(
            DisplayFormatter::new("de").localized_display_name(r#"{"default":"Age","fr":"Âge"}"#),
            "Age"
        );
        assert_eq!(fmt.localized_display_name("Plain text"), "Plain text");
    }

    #[test]
    fn test_column_display_name_prefers_override() {
        let fmt = DisplayFormatter::default();
        let mut col = ColumnDefinition::retained("house_number", ElementType::Integer);
        assert_eq!(fmt.column_display_name(&col), "house number");
        col.display_name = Some("\"House #\"".into());
        assert_eq!(fmt.column_display_name(&col), "House #");
    }

    #[test]
    fn test_display_text_by_type() {
        let fmt = DisplayFormatter::default();
        assert_eq!(fmt.display_text(&ElementType::String, None), "");
        assert_eq!(fmt.display_text(&ElementType::Boolean, Some("1")), "true");
        assert_eq!(
            fmt.display_text(&ElementType::Array, Some("[ 1, 2 ]")),
            "[1,2]"
        );
        assert_eq!(
            fmt.display_text(&ElementType::RowPath, Some("uuid:1/photo.jpg")),
            "photo.jpg"
        );
        assert_eq!(
            fmt.display_text(&ElementType::DateTime, Some("2014-03-01T10:11:12.123456789")),
            "2014-03-01T10:11:12"
        );
        assert_eq!(fmt.display_text(&ElementType::Number, Some("3.5")), "3.5");
    }
}
