//! Exit key notation.
//!
//! A sequence is written as tokens separated by commas or spaces. Each token
//! is caret notation (`^]`, `^D`, `^?`) or a hex byte (`0x1d`). `none` or an
//! empty string disables the exit key.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid exit key '{token}': expected caret notation like ^] or a hex byte like 0x1d")]
pub struct ExitKeyError {
    token: String,
}

/// Parse an exit key sequence.
///
/// # Errors
/// Returns the first token that is neither caret nor hex notation.
pub fn parse_exit_key(s: &str) -> Result<Vec<u8>, ExitKeyError> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("none") {
        return Ok(Vec::new());
    }
    s.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(|token| {
            parse_token(token).ok_or_else(|| ExitKeyError {
                token: token.to_string(),
            })
        })
        .collect()
}

fn parse_token(token: &str) -> Option<u8> {
    if let Some(rest) = token.strip_prefix('^') {
        let mut chars = rest.chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        return match c.to_ascii_uppercase() {
            '?' => Some(0x7f),
            c @ '@'..='_' => Some(c as u8 ^ 0x40),
            _ => None,
        };
    }
    let hex = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))?;
    u8::from_str_radix(hex, 16).ok()
}

/// Render a sequence the way it would be typed.
#[must_use]
pub fn describe_exit_key(sequence: &[u8]) -> String {
    sequence
        .iter()
        .map(|&b| match b {
            0x00..=0x1f => format!("^{}", char::from(b ^ 0x40)),
            0x7f => "^?".to_string(),
            0x20..=0x7e => char::from(b).to_string(),
            _ => format!("0x{b:02x}"),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
