//! # Fractional Indices
//!
//! Order keys are strings over the printable ASCII range `' '..='~'`,
//! compared lexicographically. A new key can always be synthesized
//! strictly between two existing ones, so inserting never requires
//! renumbering siblings.
//!
//! Allocation is deterministic: the same bounds always produce the same
//! key. Replicas that repair the same collision agree on the result.

use thiserror::Error;

pub const MIN_DIGIT: u8 = b' ';
pub const MAX_DIGIT: u8 = b'~';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdxError {
    #[error("order key is empty")]
    Empty,

    #[error("order key digit {0:?} is outside the alphabet")]
    OutOfAlphabet(char),

    #[error("order key {0:?} ends with the minimum digit")]
    TrailingMinDigit(String),

    #[error("invalid index: {low:?} is not below {high:?}")]
    Inverted { low: String, high: String },

    #[error("no key fits between {low:?} and {high:?}")]
    NoRoom { low: String, high: String },
}

/// Check that a client-supplied key can be stored
///
/// Keys must be non-empty, inside the alphabet, and must not end with
/// [`MIN_DIGIT`] (nothing could ever be allocated directly below them).
pub fn validate(idx: &str) -> Result<(), IdxError> {
    if idx.is_empty() {
        return Err(IdxError::Empty);
    }
    validate_digits(idx)?;
    if idx.as_bytes().last() == Some(&MIN_DIGIT) {
        return Err(IdxError::TrailingMinDigit(idx.to_string()));
    }
    Ok(())
}

fn validate_digits(idx: &str) -> Result<(), IdxError> {
    match idx
        .chars()
        .find(|c| !c.is_ascii() || !(MIN_DIGIT..=MAX_DIGIT).contains(&(*c as u8)))
    {
        Some(c) => Err(IdxError::OutOfAlphabet(c)),
        None => Ok(()),
    }
}

/// Allocate a key strictly between `low` and `high`
///
/// `None` means the side is unbounded.
pub fn between(low: Option<&str>, high: Option<&str>) -> Result<String, IdxError> {
    let low = low.unwrap_or("");
    validate_digits(low)?;
    if let Some(high) = high {
        validate_digits(high)?;
        if low >= high {
            return Err(IdxError::Inverted {
                low: low.to_string(),
                high: high.to_string(),
            });
        }
    }

    let before = low.as_bytes();
    let after = high.map(str::as_bytes).unwrap_or(&[]);

    let mut found_difference = false;
    let mut result = Vec::with_capacity(before.len() + 1);
    let mut i = 0;

    loop {
        // Past the end, the lower bound reads as the minimum digit and the
        // upper bound as one past the maximum.
        let digit_before = before.get(i).copied().unwrap_or(MIN_DIGIT) as u16;
        let digit_after = match after.get(i) {
            Some(digit) if !found_difference => *digit as u16,
            _ => MAX_DIGIT as u16 + 1,
        };

        let pick = (digit_before + digit_after) >> 1;
        result.push(pick as u8);

        if pick <= digit_before {
            // Adjacent digits: once the shared prefix ends, every later
            // upper-bound digit is effectively larger than the maximum.
            if digit_before < digit_after {
                found_difference = true;
            }
            i += 1;
            continue;
        }

        let key: String = result.into_iter().map(char::from).collect();
        let fits = low < key.as_str() && high.map_or(true, |high| key.as_str() < high);
        if !fits {
            return Err(IdxError::NoRoom {
                low: low.to_string(),
                high: high.unwrap_or_default().to_string(),
            });
        }
        return Ok(key);
    }
}

/// Allocate a key before every key in `peers`
pub fn before_first<'a>(mut peers: impl Iterator<Item = &'a str>) -> Result<String, IdxError> {
    between(None, peers.next())
}
