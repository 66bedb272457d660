//! Parsing and formatting of amounts, numbers and dates found in
//! document text.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::patterns::{AMOUNT_PATTERN, CURRENCY_CODE, DATE_DMY, DATE_LONG, DATE_LONG_US, DATE_YMD, NUMBER_PATTERN};

/// Parse an amount in any common notation ("1 234,56", "1,234.56", "$1234").
pub fn parse_amount(s: &str) -> Option<Decimal> {
    let negative = s.trim_start().starts_with('-') || (s.contains('(') && s.contains(')'));

    // Keep digits and separators only
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();

    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        // Both present: whichever comes last is the decimal separator
        (Some(c), Some(d)) if c > d => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(c), None) => {
            let decimals = cleaned.len() - c - 1;
            if cleaned.matches(',').count() == 1 && decimals <= 2 {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (None, Some(_)) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        _ => cleaned,
    };

    let value = Decimal::from_str(&normalized).ok()?;
    Some(if negative { -value } else { value })
}

/// Parse a whole value as a number.
///
/// After removing a currency marker the rest must be a plain number
/// (`-42`, `15,00`) or a grouped amount (`1 234,56`, `12.345.678,90`).
/// Dates, phone numbers and other digit-bearing text are rejected.
pub fn parse_number(s: &str) -> Option<Decimal> {
    let stripped = CURRENCY_CODE.replace_all(s, "");
    if !NUMBER_PATTERN.is_match(&stripped) && !AMOUNT_PATTERN.is_match(&stripped) {
        return None;
    }
    parse_amount(&stripped)
}

/// Currency code mentioned in a value, normalised to ISO form.
pub fn detect_currency(s: &str) -> Option<String> {
    let caps = CURRENCY_CODE.captures(s)?;
    if let Some(code) = caps.get(1) {
        return Some(code.as_str().to_uppercase());
    }
    if let Some(symbol) = caps.get(2) {
        return currency_for_symbol(symbol.as_str()).map(str::to_string);
    }
    caps.get(3).map(|_| "PLN".to_string())
}

fn currency_for_symbol(symbol: &str) -> Option<&'static str> {
    match symbol {
        "$" => Some("USD"),
        "€" => Some("EUR"),
        "£" => Some("GBP"),
        "¥" => Some("JPY"),
        _ => None,
    }
}

/// Format an amount with thousands grouping, e.g. `1,234.56`.
pub fn format_amount(amount: Decimal, thousands_sep: char, decimal_sep: char) -> String {
    let s = format!("{:.2}", amount.round_dp(2));
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", s.as_str()),
    };
    let Some((integer_part, decimal_part)) = digits.split_once('.') else {
        return s;
    };

    // Add thousand separators
    let chars: Vec<char> = integer_part.chars().collect();
    let mut formatted = String::new();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            formatted.push(thousands_sep);
        }
        formatted.push(*c);
    }

    format!("{}{}{}{}", sign, formatted, decimal_sep, decimal_part)
}

/// Format an amount the way the given currency is usually written.
pub fn format_currency(amount: Decimal, currency: &str) -> String {
    match currency.trim().to_uppercase().as_str() {
        "USD" => prefix_sign(amount, "$", format_amount(amount.abs(), ',', '.')),
        "GBP" => prefix_sign(amount, "£", format_amount(amount.abs(), ',', '.')),
        "EUR" => format!("{} €", format_amount(amount, '.', ',')),
        "PLN" => format!("{} zł", format_amount(amount, ' ', ',')),
        "CHF" => format!("CHF {}", format_amount(amount, '\'', '.')),
        other => format!("{} {}", format_amount(amount, ',', '.'), other),
    }
}

fn prefix_sign(amount: Decimal, symbol: &str, body: String) -> String {
    if amount.is_sign_negative() && !amount.is_zero() {
        format!("-{}{}", symbol, body)
    } else {
        format!("{}{}", symbol, body)
    }
}

/// Parse a date in day-first, ISO or long notation.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    if let Some(caps) = DATE_YMD.captures(s) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if let Some(caps) = DATE_DMY.captures(s) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year = parse_year(&caps[3]);
        // Fall back to month-first when the day-first reading is impossible
        return NaiveDate::from_ymd_opt(year, month, day)
            .or_else(|| NaiveDate::from_ymd_opt(year, day, month));
    }

    if let Some(caps) = DATE_LONG.captures(s) {
        let day: u32 = caps[1].parse().ok()?;
        let month = month_to_number(&caps[2])?;
        let year: i32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if let Some(caps) = DATE_LONG_US.captures(s) {
        let month = month_to_number(&caps[1])?;
        let day: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    None
}

fn parse_year(s: &str) -> i32 {
    let year: i32 = s.parse().unwrap_or(0);
    if s.len() == 2 { 2000 + year } else { year }
}

fn month_to_number(month: &str) -> Option<u32> {
    let month = month.to_lowercase();
    let number = match month.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(number)
}
