use std::sync::LazyLock;

use regex::Regex;

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<.*?>").unwrap());
static REPEATED_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" +").unwrap());
static PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[!@#$<>|]").unwrap());

/// Trims, strips leftover HTML tags and collapses runs of spaces.
pub fn normalize_text(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let without_tags = HTML_TAG.replace_all(trimmed, "");
    REPEATED_SPACE.replace_all(&without_tags, " ").into_owned()
}

/// Normalizes a scraped header or cell: drops `!@#$<>|` then applies
/// [`normalize_text`].
pub fn normalize_keyword(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let cleaned = PUNCTUATION.replace_all(value, "");
    normalize_text(&cleaned)
}

/// Parses a reported number, tolerating thousands separators and a leading
/// `+` (as in "+1,204"). Empty, `N/A` and unparseable cells are absent.
pub fn parse_number(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("n/a") {
        return None;
    }
    let cleaned = trimmed.replace(',', "");
    let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);
    cleaned.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Truncating float-to-count conversion; absent stays absent.
pub fn to_count(value: Option<f64>) -> Option<i64> {
    value.map(|value| value.trunc() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_scraped_header() {
        assert_eq!(normalize_keyword("  Total   Cases  "), "Total Cases");
        assert_eq!(normalize_text("<b>Greece</b>"), "Greece");
        assert_eq!(normalize_keyword("Serious,Critical"), "Serious,Critical");
        assert_eq!(normalize_keyword("Country,Other   #"), "Country,Other");
        assert_eq!(normalize_text("New   Cases"), "New Cases");
    }

    #[test]
    fn parse_reported_numbers() {
        assert_eq!(parse_number("1,234,567"), Some(1_234_567.0));
        assert_eq!(parse_number("+85"), Some(85.0));
        assert_eq!(parse_number("N/A"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(to_count(parse_number("12.9")), Some(12));
    }
}
