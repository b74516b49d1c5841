use std::fmt;

/// Characters people and forms put between digits.
const SEPARATORS: &[char] = &[' ', '-', '.', '(', ')', '\u{a0}'];

/// E.164 allows at most 15 digits including the country code.
const MAX_DIGITS: usize = 15;

/// Country code plus at least seven subscriber digits.
const MIN_DIGITS: usize = 8;

/// A dialable number in E.164 form, e.g. `+15035551234`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of validating a raw phone value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhoneCheck {
    Valid(PhoneNumber),
    Invalid,
    Missing,
}

/// Validates free-form phone input and normalizes it to E.164.
#[derive(Debug, Clone)]
pub struct PhoneValidator {
    default_country_code: String,
}

impl Default for PhoneValidator {
    fn default() -> Self {
        Self::new("1")
    }
}

impl PhoneValidator {
    /// `default_country_code` is applied to bare 10-digit national numbers.
    pub fn new(default_country_code: &str) -> Self {
        Self {
            default_country_code: default_country_code.trim_start_matches('+').to_string(),
        }
    }

    pub fn validate(&self, raw: Option<&str>) -> PhoneCheck {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return PhoneCheck::Missing;
        };

        let compact: String = raw.chars().filter(|c| !SEPARATORS.contains(c)).collect();
        let (plus, digits) = match compact.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, compact.as_str()),
        };

        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return PhoneCheck::Invalid;
        }

        let e164 = if plus {
            digits.to_string()
        } else if digits.len() == 10 {
            format!("{}{digits}", self.default_country_code)
        } else if digits.len() > 10 {
            digits.to_string()
        } else {
            return PhoneCheck::Invalid;
        };

        if !(MIN_DIGITS..=MAX_DIGITS).contains(&e164.len()) || e164.starts_with('0') {
            return PhoneCheck::Invalid;
        }

        PhoneCheck::Valid(PhoneNumber(format!("+{e164}")))
    }
}

/// Digits only, for comparing numbers written in different formats.
pub fn digits_only(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

/// Whether two phone strings denote the same number.
pub fn phones_match(a: &str, b: &str) -> bool {
    let a = digits_only(a);
    !a.is_empty() && a == digits_only(b)
}
