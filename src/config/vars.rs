//! Environment variable interpolation for config files.
//!
//! Supported forms:
//! - `$VAR` or `${VAR}`: value of VAR, an error if it is unset
//! - `${VAR:-fallback}`: fallback when VAR is unset or empty
//! - `${VAR-fallback}`: fallback only when VAR is unset
//! - `$$`: a literal `$`
//!
//! Credentials for the archive bucket are usually supplied this way, e.g.
//! `aws_secret_access_key: ${AWS_SECRET_ACCESS_KEY}`.

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)   # 1: braced name
            (?: (:?-) ([^}]*) )?       # 2: operator, 3: fallback
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)     # 4: bare name
        ",
    )
    .expect("Invalid regex pattern")
});

/// Output of [`interpolate`].
#[derive(Debug)]
pub struct InterpolationResult {
    pub text: String,
    /// One message per unresolved or rejected variable.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Substitute environment variables in `input`.
///
/// Errors are collected rather than returned early so that a single run
/// reports every missing variable.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| {
            resolve(caps).unwrap_or_else(|message| {
                errors.push(message);
                caps[0].to_string()
            })
        })
        .into_owned();

    InterpolationResult { text, errors }
}

fn resolve(caps: &Captures) -> Result<String, String> {
    if &caps[0] == "$$" {
        return Ok("$".to_string());
    }

    let name = caps
        .get(1)
        .or_else(|| caps.get(4))
        .map(|m| m.as_str())
        .unwrap_or_default();
    let operator = caps.get(2).map(|m| m.as_str());
    let fallback = caps.get(3).map(|m| m.as_str());

    match env::var(name) {
        Ok(value) if value.contains('\n') || value.contains('\r') => Err(format!(
            "environment variable '{name}' contains newlines, which is not allowed"
        )),
        Ok(value) if value.is_empty() && operator == Some(":-") => {
            Ok(fallback.unwrap_or_default().to_string())
        }
        Ok(value) => Ok(value),
        Err(_) => fallback
            .map(str::to_string)
            .ok_or_else(|| format!("environment variable '{name}' is not set")),
    }
}
