//! Common regex patterns for value validation and pattern learning.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Amounts: 1,234.56 / 1 234,56 / 1234.56 / 1234, optional currency marker
    pub static ref AMOUNT_PATTERN: Regex = Regex::new(
        r"^\s*(?:[$€£¥]|[A-Z]{3}|zł)?\s*-?\d{1,3}(?:[\s\u{00a0},.']?\d{3})*(?:[,.]\d{1,2})?\s*(?:[$€£¥]|[A-Z]{3}|zł)?\s*$"
    ).unwrap();

    pub static ref CURRENCY_CODE: Regex = Regex::new(
        r"(?i)\b(USD|EUR|GBP|PLN|CHF|JPY|CAD|AUD)\b|([$€£¥])|(zł)"
    ).unwrap();

    // Plain numbers, integer or decimal
    pub static ref NUMBER_PATTERN: Regex = Regex::new(
        r"^\s*[-+]?\d+(?:[.,]\d+)?\s*$"
    ).unwrap();

    // Dates
    pub static ref DATE_DMY: Regex = Regex::new(
        r"^\s*(\d{1,2})[./\-](\d{1,2})[./\-](\d{4}|\d{2})\s*$"
    ).unwrap();

    pub static ref DATE_YMD: Regex = Regex::new(
        r"^\s*(\d{4})[./\-](\d{1,2})[./\-](\d{1,2})\s*$"
    ).unwrap();

    pub static ref DATE_LONG: Regex = Regex::new(
        r"(?i)^\s*(\d{1,2})\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?,?\s+(\d{4})\s*$"
    ).unwrap();

    pub static ref DATE_LONG_US: Regex = Regex::new(
        r"(?i)^\s*(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2}),?\s+(\d{4})\s*$"
    ).unwrap();

    // Email
    pub static ref EMAIL: Regex = Regex::new(
        r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$"
    ).unwrap();

    // Identifiers: account numbers, invoice numbers, order references
    pub static ref IDENTIFIER: Regex = Regex::new(
        r"^[A-Za-z0-9][A-Za-z0-9/\-_.#]*$"
    ).unwrap();

    // Character-class runs used when generalising a taught value
    pub static ref VALUE_RUNS: Regex = Regex::new(
        r"[0-9]+|\p{L}+|\s+|."
    ).unwrap();

    // Whitespace inside a taught label
    pub static ref LABEL_WHITESPACE: Regex = Regex::new(r"\s+").unwrap();

    // Column boundaries: pipes, tabs or wide gaps
    pub static ref COLUMN_BREAK: Regex = Regex::new(r"\||\t|\s{3,}").unwrap();
}
