// src/pipeline/normalize.rs
use async_trait::async_trait;

use super::{AdmissionStage, RequestContext};
use crate::error::AdmissionError;

const MAX_NUMBER_LEN: usize = 32;
const MAX_USER_LEN: usize = 64;

/// Rewrites the dialed and calling identities into canonical form.
pub struct NormalizeNumbers;

#[async_trait]
impl AdmissionStage for NormalizeNumbers {
    fn name(&self) -> &'static str {
        "normalize_numbers"
    }

    async fn process(&self, ctx: &mut RequestContext) -> Result<(), AdmissionError> {
        let request = ctx.request();

        let called = request
            .dialed_user()
            .and_then(normalize_destination)
            .ok_or_else(|| AdmissionError::InvalidDestination(request.request_uri.clone()))?;

        // The caller is informational only; keep it raw when it is not a number.
        let calling = request
            .calling_user()
            .map(|user| normalize_number(user).unwrap_or_else(|| user.to_string()));

        ctx.called_number = Some(called);
        ctx.calling_number = calling;
        Ok(())
    }
}

/// Canonical form of a dialable number: visual separators dropped, a `00`
/// international prefix turned into `+`.
pub fn normalize_number(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());

    for c in raw.trim().chars() {
        match c {
            '+' if out.is_empty() => out.push('+'),
            '0'..='9' | '*' | '#' => out.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return None,
        }
    }

    if out.len() > 2 && out.starts_with("00") {
        out.replace_range(..2, "+");
    }

    let has_digit = out.chars().any(|c| c.is_ascii_digit());
    (has_digit && out.len() <= MAX_NUMBER_LEN).then_some(out)
}

/// A destination is either a dialable number or a plain SIP user name.
pub fn normalize_destination(raw: &str) -> Option<String> {
    normalize_number(raw).or_else(|| {
        let user = raw.trim();
        let valid = !user.is_empty()
            && user.len() <= MAX_USER_LEN
            && user.chars().any(|c| c.is_ascii_alphabetic())
            && user
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '~' | '+'));
        valid.then(|| user.to_string())
    })
}
