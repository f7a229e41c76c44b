//! Structured token extraction from normalized text.
//!
//! Regex harvesting of the token shapes the downstream field-normalization
//! stage cares about. Always attempted, independent of the language mode;
//! the business vocabulary is tuning data like the normalization tables.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;

use crate::prelude::*;

/// Shipping/customs/finance terms worth flagging for the compliance layer.
static BUSINESS_VOCABULARY: &[&str] = &[
    "شرکت",
    "سازمان",
    "موسسه",
    "فاکتور",
    "بارنامه",
    "گواهی",
    "بیمه",
    "شماره",
    "تاریخ",
    "مبلغ",
    "ریال",
    "تومان",
    "آدرس",
    "تلفن",
    "کد",
    "وزن",
    "تعداد",
    "شرح",
    "بانک",
    "حساب",
    "نام",
    "پرداخت",
    "حمل",
    "گمرک",
    "صادرات",
    "واردات",
    "محموله",
    "کانتینر",
    "بارگیری",
];

static PERSIAN_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{0600}-\u{06FF}]+").expect("failed to compile regex"));

static PERSIAN_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[۰-۹]+").expect("failed to compile regex"));

static ARABIC_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+").expect("failed to compile regex"));

/// Optional country/trunk prefix followed by 10–15 digits.
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+98|0)?[0-9]{10,15}").expect("failed to compile regex")
});

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
        .expect("failed to compile regex")
});

/// The four date shapes seen on trade documents.
static DATE_RES: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        Regex::new(r"\d{4}/\d{2}/\d{2}").expect("failed to compile regex"),
        Regex::new(r"\d{2}/\d{2}/\d{4}").expect("failed to compile regex"),
        Regex::new(r"\d{4}-\d{2}-\d{2}").expect("failed to compile regex"),
        Regex::new(r"\d{2}-\d{2}-\d{4}").expect("failed to compile regex"),
    ]
});

/// Structured tokens harvested from one document's normalized text.
#[derive(Clone, Debug, Default, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StructuredData {
    /// De-duplicated Persian-script word tokens, in first-seen order.
    pub persian_words: Vec<String>,
    /// The subset of `persian_words` present in the business vocabulary.
    pub business_words: Vec<String>,
    /// Runs of Persian digits.
    pub persian_numbers: Vec<String>,
    /// Runs of ASCII digits.
    pub arabic_numbers: Vec<String>,
    /// Phone-number-shaped tokens.
    pub phone_numbers: Vec<String>,
    /// Email-shaped tokens.
    pub emails: Vec<String>,
    /// De-duplicated date-shaped tokens.
    pub dates: Vec<String>,
}

/// Harvest structured tokens from normalized text.
pub fn extract(text: &str) -> StructuredData {
    let persian_words = dedup_matches(&PERSIAN_WORD_RE, text);
    let business_words = persian_words
        .iter()
        .filter(|word| BUSINESS_VOCABULARY.contains(&word.as_str()))
        .cloned()
        .collect();

    let persian_numbers = all_matches(&PERSIAN_NUMBER_RE, text);
    let arabic_numbers = all_matches(&ARABIC_NUMBER_RE, text);
    let phone_numbers = all_matches(&PHONE_RE, text);
    let emails = all_matches(&EMAIL_RE, text);

    let mut seen = HashSet::new();
    let mut dates = vec![];
    for re in DATE_RES.iter() {
        for m in re.find_iter(text) {
            if seen.insert(m.as_str().to_string()) {
                dates.push(m.as_str().to_string());
            }
        }
    }

    StructuredData {
        persian_words,
        business_words,
        persian_numbers,
        arabic_numbers,
        phone_numbers,
        emails,
        dates,
    }
}

fn all_matches(re: &Regex, text: &str) -> Vec<String> {
    re.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

fn dedup_matches(re: &Regex, text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut matches = vec![];
    for m in re.find_iter(text) {
        if seen.insert(m.as_str().to_string()) {
            matches.push(m.as_str().to_string());
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_line_yields_one_email_phone_and_date() {
        let data = extract("Contact: a@b.com, 09123456789, date 2024-01-05");
        assert_eq!(data.emails, vec!["a@b.com"]);
        assert_eq!(data.phone_numbers, vec!["09123456789"]);
        assert_eq!(data.dates, vec!["2024-01-05"]);
    }

    #[test]
    fn persian_words_are_deduplicated_in_order() {
        let data = extract("فاکتور شماره فاکتور گمرک");
        assert_eq!(data.persian_words, vec!["فاکتور", "شماره", "گمرک"]);
    }

    #[test]
    fn business_words_are_the_vocabulary_subset() {
        let data = extract("فاکتور تستی از گمرک");
        assert!(data.business_words.contains(&"فاکتور".to_string()));
        assert!(data.business_words.contains(&"گمرک".to_string()));
        assert!(!data.business_words.contains(&"تستی".to_string()));
    }

    #[test]
    fn digit_runs_split_by_script() {
        let data = extract("کد ۱۲۳ و 456");
        assert_eq!(data.persian_numbers, vec!["۱۲۳"]);
        assert_eq!(data.arabic_numbers, vec!["456"]);
    }

    #[test]
    fn phone_prefix_forms_are_accepted() {
        let data = extract("tel +989121234567 or 02112345678");
        assert_eq!(data.phone_numbers.len(), 2);
        assert_eq!(data.phone_numbers[0], "+989121234567");
    }

    #[test]
    fn short_digit_runs_are_not_phone_numbers() {
        let data = extract("order 123456 from 2023");
        assert!(data.phone_numbers.is_empty());
    }

    #[test]
    fn duplicate_dates_collapse_across_patterns() {
        let data = extract("due 2024/01/05 and again 2024/01/05, paid 05-01-2024");
        assert_eq!(data.dates, vec!["2024/01/05", "05-01-2024"]);
    }

    #[test]
    fn empty_text_yields_empty_data() {
        assert_eq!(extract(""), StructuredData::default());
    }
}
