//! Daily-rate extraction from free text and loosely typed scraper fields.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value as JsonValue;

const NUM: &str = r"(\d{1,3}(?:[., \x{A0}\x{202F}]\d{3})+(?:[.,]\d{1,2})?|\d+(?:[.,]\d{1,2})?)";
/// Keeps a match from starting inside a longer number.
const LEFT_EDGE: &str = r"(?:^|[^\d.,])";
const CUR: &str = r"(€|\$|£|euros?|eur|usd|gbp)";
const SEP: &str = r"(?:-|–|—|à|to)";
const PREFIX_SYMBOL: &str = r"(?:€|\$|£)?";
const KEYWORD: &str = r"(?:tjm|tarif|daily\s+rate)\s*:?\s*";

static BETWEEN: Lazy<Regex> = Lazy::new(|| {
    rate_regex(&format!(r"entre\s+{NUM}\s*{PREFIX_SYMBOL}\s*et\s+{NUM}\s*{CUR}"))
});
static RANGE: Lazy<Regex> = Lazy::new(|| {
    rate_regex(&format!(
        r"{LEFT_EDGE}{NUM}\s*{PREFIX_SYMBOL}\s*{SEP}\s*{NUM}\s*{CUR}"
    ))
});
static KEYWORD_RANGE: Lazy<Regex> = Lazy::new(|| {
    rate_regex(&format!(
        r"{KEYWORD}{NUM}\s*{PREFIX_SYMBOL}\s*{SEP}\s*{NUM}\s*{CUR}?"
    ))
});
static KEYWORD_SINGLE: Lazy<Regex> =
    Lazy::new(|| rate_regex(&format!(r"{KEYWORD}{NUM}\s*{CUR}?")));
static SINGLE: Lazy<Regex> =
    Lazy::new(|| rate_regex(&format!(r"{LEFT_EDGE}{NUM}\s*{CUR}")));

fn rate_regex(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){pattern}")).expect("rate pattern compiles")
}

/// Rate bounds found in text. Single values yield `min == max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedRate {
    pub min: f64,
    pub max: f64,
    pub currency: Option<&'static str>,
}

/// Extract a daily rate from free text. Returns `None` when nothing matches.
///
/// Ranges are returned as written, so `600-500€` yields `min = 600`; ordering
/// is checked later by the quality scorer. Thousands may be grouped with
/// spaces, dots or commas (`1 200`, `1.200`, `1,200`). Amounts outside 2 to 5
/// integer digits, or numbers that only partly match, are not rates.
pub fn parse_rate_text(text: &str) -> Option<ParsedRate> {
    if text.trim().is_empty() {
        return None;
    }

    for pattern in [&*BETWEEN, &*RANGE, &*KEYWORD_RANGE] {
        if let Some(rate) = pattern
            .captures_iter(text)
            .find_map(|caps| range_from(text, &caps))
        {
            return Some(rate);
        }
    }

    for pattern in [&*KEYWORD_SINGLE, &*SINGLE] {
        let single = pattern.captures_iter(text).find_map(|caps| {
            let value = number_at(text, &caps, 1)?;
            Some(ParsedRate {
                min: value,
                max: value,
                currency: caps.get(2).and_then(|m| currency_code(m.as_str())),
            })
        });
        if single.is_some() {
            return single;
        }
    }

    None
}

fn range_from(text: &str, caps: &Captures<'_>) -> Option<ParsedRate> {
    let min = number_at(text, caps, 1)?;
    let max = number_at(text, caps, 2)?;
    Some(ParsedRate {
        min,
        max,
        currency: caps.get(3).and_then(|m| currency_code(m.as_str())),
    })
}

/// Value of capture `group`, unless the digits run on past the match.
fn number_at(text: &str, caps: &Captures<'_>, group: usize) -> Option<f64> {
    let m = caps.get(group)?;
    let mut rest = text[m.end()..].chars();
    let runs_on = match rest.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('.' | ',') => rest.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    };
    if runs_on {
        return None;
    }
    parse_number(m.as_str())
}

/// A trailing `.`/`,` with one or two digits is a decimal part; any other
/// separator groups thousands.
fn parse_number(raw: &str) -> Option<f64> {
    let (int_part, fraction) = match raw.rfind(|c: char| c == '.' || c == ',') {
        Some(idx) if raw.len() - idx - 1 <= 2 => (&raw[..idx], Some(&raw[idx + 1..])),
        _ => (raw, None),
    };
    let digits = int_part.chars().filter(|c| c.is_ascii_digit()).collect::<String>();
    if !(2..=5).contains(&digits.len()) {
        return None;
    }
    match fraction {
        Some(fraction) => format!("{digits}.{fraction}").parse().ok(),
        None => digits.parse().ok(),
    }
}

/// Map a currency marker (`€`, `eur`, `$`, `GBP`, ...) to its ISO code.
pub fn currency_code(marker: &str) -> Option<&'static str> {
    match marker.trim().to_lowercase().as_str() {
        "€" | "eur" | "euro" | "euros" => Some("EUR"),
        "$" | "usd" => Some("USD"),
        "£" | "gbp" => Some("GBP"),
        _ => None,
    }
}

/// Parse a scraper-provided `tjm_min` / `tjm_max` value.
///
/// Accepts numbers and numeric-looking strings (`"550"`, `"550 €"`, `"1 200"`,
/// `"550,5"`). Non-positive or unparseable values yield `None`.
pub fn parse_rate_value(value: &JsonValue) -> Option<f64> {
    let parsed = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => {
            let cleaned = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
                .collect::<String>()
                .replace(',', ".");
            if cleaned.is_empty() {
                None
            } else {
                cleaned.parse::<f64>().ok()
            }
        }
        _ => None,
    };
    parsed.filter(|v| v.is_finite() && *v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dash_ranges_with_euro_parse_in_order() {
        for (min, max) in [(400, 550), (350, 450), (10, 99), (600, 1200), (1200, 1500)] {
            let text = format!("{min}-{max}€");
            let rate = parse_rate_text(&text).expect("range");
            assert_eq!(rate.min, min as f64, "{text}");
            assert_eq!(rate.max, max as f64, "{text}");
            assert_eq!(rate.currency, Some("EUR"));
        }
    }

    #[test]
    fn french_and_keyword_forms() {
        let rate = parse_rate_text("Mission longue, 500 à 650 € par jour").unwrap();
        assert_eq!((rate.min, rate.max), (500.0, 650.0));

        let rate = parse_rate_text("TJM: 580€").unwrap();
        assert_eq!((rate.min, rate.max, rate.currency), (580.0, 580.0, Some("EUR")));

        let rate = parse_rate_text("tjm 450 - 520").unwrap();
        assert_eq!((rate.min, rate.max, rate.currency), (450.0, 520.0, None));

        let rate = parse_rate_text("rémunération entre 400 et 480 euros").unwrap();
        assert_eq!((rate.min, rate.max), (400.0, 480.0));

        let rate = parse_rate_text("500€ - 600€ HT").unwrap();
        assert_eq!((rate.min, rate.max), (500.0, 600.0));
    }

    #[test]
    fn detects_non_euro_currencies_and_grouped_thousands() {
        let rate = parse_rate_text("Daily rate: 700-800 USD").unwrap();
        assert_eq!(rate.currency, Some("USD"));

        let rate = parse_rate_text("jusqu'à 1 100 €").unwrap();
        assert_eq!(rate.min, 1100.0);

        let rate = parse_rate_text("£650 per day or 650£").unwrap();
        assert_eq!(rate.currency, Some("GBP"));
    }

    #[test]
    fn dot_and_comma_grouped_thousands_and_decimals() {
        let rate = parse_rate_text("TJM 1.200€").unwrap();
        assert_eq!((rate.min, rate.max), (1200.0, 1200.0));

        let rate = parse_rate_text("TJM: 1,100 €").unwrap();
        assert_eq!((rate.min, rate.max), (1100.0, 1100.0));

        let rate = parse_rate_text("450.5-600€").unwrap();
        assert_eq!((rate.min, rate.max), (450.5, 600.0));

        let rate = parse_rate_text("entre 1 000,50 et 1.200 €").unwrap();
        assert_eq!((rate.min, rate.max), (1000.5, 1200.0));

        let rate = parse_rate_text("TJM: 500. Démarrage ASAP").unwrap();
        assert_eq!(rate.min, 500.0);
    }

    #[test]
    fn never_returns_part_of_a_longer_number() {
        assert_eq!(parse_rate_text("150000€"), None);
        assert_eq!(parse_rate_text("tjm 150000"), None);
        assert_eq!(parse_rate_text("TJM 1,1000 €"), None);
        assert_eq!(parse_rate_text("5-8€"), None);

        let rate = parse_rate_text("Budget 150000€ sur 6 mois, soit 650€ par jour").unwrap();
        assert_eq!((rate.min, rate.max), (650.0, 650.0));
    }

    #[test]
    fn reversed_ranges_are_returned_as_written() {
        let rate = parse_rate_text("700-500€").unwrap();
        assert_eq!((rate.min, rate.max), (700.0, 500.0));
    }

    #[test]
    fn no_rate_found_yields_none() {
        assert_eq!(parse_rate_text(""), None);
        assert_eq!(parse_rate_text("Développeur Rust senior, 5 ans d'expérience"), None);
        assert_eq!(parse_rate_text("Salaire 55k€ brut"), None);
    }

    #[test]
    fn rate_values_accept_numbers_and_numeric_strings() {
        assert_eq!(parse_rate_value(&json!(550)), Some(550.0));
        assert_eq!(parse_rate_value(&json!("550 €")), Some(550.0));
        assert_eq!(parse_rate_value(&json!("1 200")), Some(1200.0));
        assert_eq!(parse_rate_value(&json!("550,5")), Some(550.5));
        assert_eq!(parse_rate_value(&json!("")), None);
        assert_eq!(parse_rate_value(&json!(0)), None);
        assert_eq!(parse_rate_value(&json!(-10)), None);
        assert_eq!(parse_rate_value(&json!(null)), None);
    }

    #[test]
    fn currency_markers_map_to_iso_codes() {
        assert_eq!(currency_code("€"), Some("EUR"));
        assert_eq!(currency_code("Euros"), Some("EUR"));
        assert_eq!(currency_code("usd"), Some("USD"));
        assert_eq!(currency_code("CHF"), None);
    }
}
