use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, NaiveDate, Utc};
use rand_core::OsRng;

use crate::errors::AppError;

const MIN_PASSWORD_LENGTH: usize = 8;

pub fn hash_password(password: &str) -> Result<String, AppError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::bad_request(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::internal(format!("failed to hash password: {err}")))
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|err| AppError::internal(format!("invalid password hash: {err}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// True when `key` is a calendar month in `YYYY-MM` form.
pub fn valid_month_key(key: &str) -> bool {
    key.len() == 7 && NaiveDate::parse_from_str(&format!("{key}-01"), "%Y-%m-%d").is_ok()
}

const ONES: [&str; 20] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen",
];

const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

const SCALES: [&str; 7] = [
    "", "thousand", "million", "billion", "trillion", "quadrillion", "quintillion",
];

/// English words for an amount, used for the `net_pay_words` payslip field.
/// Negative amounts (deductions exceeding earnings) are prefixed with "minus".
pub fn amount_in_words(amount: i64) -> String {
    if amount == 0 {
        return "zero".to_string();
    }

    let mut n = amount.unsigned_abs();
    let mut groups: Vec<u16> = Vec::new();
    while n > 0 {
        groups.push((n % 1000) as u16);
        n /= 1000;
    }

    let mut parts: Vec<String> = Vec::new();
    for (idx, group) in groups.iter().enumerate().rev() {
        if *group == 0 {
            continue;
        }
        let mut words = triplet_words(*group);
        if !SCALES[idx].is_empty() {
            words.push(' ');
            words.push_str(SCALES[idx]);
        }
        parts.push(words);
    }

    let words = parts.join(" ");
    if amount < 0 {
        format!("minus {words}")
    } else {
        words
    }
}

fn triplet_words(n: u16) -> String {
    let mut out = String::new();
    let hundreds = (n / 100) as usize;
    let rem = (n % 100) as usize;

    if hundreds > 0 {
        out.push_str(ONES[hundreds]);
        out.push_str(" hundred");
    }
    if rem > 0 {
        if !out.is_empty() {
            out.push(' ');
        }
        if rem < 20 {
            out.push_str(ONES[rem]);
        } else {
            out.push_str(TENS[rem / 10]);
            if rem % 10 > 0 {
                out.push('-');
                out.push_str(ONES[rem % 10]);
            }
        }
    }
    out
}
