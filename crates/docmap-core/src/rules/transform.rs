//! Named value transformations applied by actions.
//!
//! A transformation spec is `name` or `name:argument`, for example
//! `uppercase`, `prefix:INV-`, `currency:EUR`, `date:%d/%m/%Y` or
//! `convert:EUR->USD`. Names not built in are looked up among the
//! registered custom transformations.

use std::fmt::Write;

use regex::Regex;
use rust_decimal::Decimal;

use crate::extraction::values::{detect_currency, format_currency, parse_amount, parse_date};
use crate::models::TransformConfig;
use crate::registry::Registry;

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Result of applying a transformation spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    Applied(String),
    /// No built-in or registered transformation has this name; callers
    /// pass the value through unchanged.
    Unknown,
}

/// Applies transformation specs using the configured currencies and rates.
#[derive(Debug, Clone, Default)]
pub struct Transformer {
    config: TransformConfig,
    registry: Registry,
}

impl Transformer {
    pub fn new(config: TransformConfig, registry: Registry) -> Self {
        Self { config, registry }
    }

    /// Apply `spec` to `value`. `Err` means the transformation is known
    /// but could not process this value.
    pub fn apply(&self, spec: &str, value: &str) -> Result<TransformOutcome, String> {
        let (name, argument) = match spec.split_once(':') {
            Some((name, argument)) => (name.trim(), Some(argument)),
            None => (spec.trim(), None),
        };

        let transformed = match name.to_lowercase().as_str() {
            "uppercase" | "upper" => value.to_uppercase(),
            "lowercase" | "lower" => value.to_lowercase(),
            "titlecase" | "title" => title_case(value),
            "trim" => value.trim().to_string(),
            "prefix" => format!("{}{}", required(name, argument)?, value),
            "suffix" => format!("{}{}", value, required(name, argument)?),
            "replace" => {
                let (from, to) = pair(name, argument, "=>")?;
                value.replace(from, to)
            }
            "regex_replace" => {
                let (pattern, to) = pair(name, argument, "=>")?;
                let regex = Regex::new(pattern).map_err(|e| format!("regex_replace: {}", e))?;
                regex.replace_all(value, to).into_owned()
            }
            "currency" => self.currency(value, argument)?,
            "date" => reformat_date(value, argument.unwrap_or(DEFAULT_DATE_FORMAT))?,
            "convert" => self.convert(value, argument)?,
            _ => match self.registry.transform(name) {
                Some(handler) => handler.apply(value, argument)?,
                None => return Ok(TransformOutcome::Unknown),
            },
        };

        Ok(TransformOutcome::Applied(transformed))
    }

    fn currency(&self, value: &str, argument: Option<&str>) -> Result<String, String> {
        let amount = parse_amount(value).ok_or_else(|| format!("`{}` is not an amount", value))?;
        let code = argument
            .map(|a| a.trim().to_uppercase())
            .filter(|a| !a.is_empty())
            .or_else(|| detect_currency(value))
            .unwrap_or_else(|| self.config.default_currency.clone());
        Ok(format_currency(amount, &code))
    }

    fn convert(&self, value: &str, argument: Option<&str>) -> Result<String, String> {
        let (from, to) = pair("convert", argument, "->")?;
        let amount = parse_amount(value).ok_or_else(|| format!("`{}` is not an amount", value))?;
        let rate = self
            .config
            .rate(from, to)
            .ok_or_else(|| format!("no exchange rate for {}->{}", from.trim(), to.trim()))?;
        let converted: Decimal = amount
            .checked_mul(rate)
            .ok_or_else(|| "conversion overflowed".to_string())?;
        Ok(format!("{:.2}", converted.round_dp(2)))
    }
}

fn required<'a>(name: &str, argument: Option<&'a str>) -> Result<&'a str, String> {
    argument.ok_or_else(|| format!("`{}` needs an argument", name))
}

fn pair<'a>(name: &str, argument: Option<&'a str>, separator: &str) -> Result<(&'a str, &'a str), String> {
    required(name, argument)?
        .split_once(separator)
        .ok_or_else(|| format!("`{}` expects `<from>{}<to>`", name, separator))
}

fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn reformat_date(value: &str, format: &str) -> Result<String, String> {
    let date = parse_date(value).ok_or_else(|| format!("`{}` is not a date", value))?;
    let mut out = String::new();
    write!(out, "{}", date.format(format)).map_err(|_| format!("invalid date format `{}`", format))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TransformHandler;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    fn applied(spec: &str, value: &str) -> String {
        match Transformer::default().apply(spec, value) {
            Ok(TransformOutcome::Applied(v)) => v,
            other => panic!("{} on {:?} gave {:?}", spec, value, other),
        }
    }

    #[test]
    fn test_case_and_trim() {
        assert_eq!(applied("uppercase", "acme"), "ACME");
        assert_eq!(applied("LOWER", "ACME"), "acme");
        assert_eq!(applied("titlecase", "acme  supplies LTD"), "Acme Supplies Ltd");
        assert_eq!(applied("trim", "  x  "), "x");
    }

    #[test]
    fn test_affixes_and_replace() {
        assert_eq!(applied("prefix:INV-", "001"), "INV-001");
        assert_eq!(applied("suffix: kg", "12"), "12 kg");
        assert_eq!(applied("replace:-=>/", "2024-01-15"), "2024/01/15");
        assert_eq!(applied(r"regex_replace:\s+=> ", "a   b\tc"), "a b c");
    }

    #[test]
    fn test_currency_formatting() {
        assert_eq!(applied("currency", "1234.5"), "$1,234.50");
        assert_eq!(applied("currency:EUR", "1234.5"), "1.234,50 €");
        assert_eq!(applied("currency", "1 234,50 zł"), "1 234,50 zł");
    }

    #[test]
    fn test_date_reformat() {
        assert_eq!(applied("date", "15.01.2024"), "2024-01-15");
        assert_eq!(applied("date:%d/%m/%Y", "2024-01-15"), "15/01/2024");
    }

    #[test]
    fn test_currency_conversion() {
        let mut config = TransformConfig::default();
        config
            .exchange_rates
            .insert("EUR->USD".to_string(), Decimal::from_str("1.10").unwrap());
        let transformer = Transformer::new(config, Registry::new());

        assert_eq!(
            transformer.apply("convert:EUR->USD", "100,00 €"),
            Ok(TransformOutcome::Applied("110.00".to_string()))
        );
        assert!(transformer.apply("convert:GBP->USD", "100").is_err());
    }

    #[test]
    fn test_known_transformation_on_bad_input_fails() {
        let transformer = Transformer::default();
        assert!(transformer.apply("currency", "n/a").is_err());
        assert!(transformer.apply("date", "someday").is_err());
        assert!(transformer.apply("prefix", "x").is_err());
        assert!(transformer.apply("replace:nothing", "x").is_err());
    }

    #[test]
    fn test_unknown_transformation() {
        assert_eq!(Transformer::default().apply("rot13", "abc"), Ok(TransformOutcome::Unknown));
    }

    struct Initials;

    impl TransformHandler for Initials {
        fn apply(&self, value: &str, _argument: Option<&str>) -> Result<String, String> {
            Ok(value.split_whitespace().filter_map(|w| w.chars().next()).collect())
        }
    }

    #[test]
    fn test_registered_transformation() {
        let mut registry = Registry::new();
        registry.register_transform("initials", Initials);
        let transformer = Transformer::new(TransformConfig::default(), registry);

        assert_eq!(
            transformer.apply("initials", "Acme Supplies Ltd"),
            Ok(TransformOutcome::Applied("ASL".to_string()))
        );
    }
}
