//! Typed environment-variable lookups
//!
//! Unset and empty variables fall back to the supplied default. A variable that
//! is set but does not parse is an error, never a silent default.

use crate::error::{CommonError, Result};
use std::str::FromStr;

/// Read a variable, treating an empty value as unset
pub fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read a string variable with a default
pub fn string_or(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| default.to_string())
}

/// Read and parse a variable with a default
pub fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| CommonError::invalid_env(key, &raw, e)),
        None => Ok(default),
    }
}

/// Read a boolean flag with a default
///
/// Accepts `true/false`, `1/0`, `yes/no` and `on/off` in any case.
pub fn flag_or(key: &str, default: bool) -> Result<bool> {
    match var(key) {
        Some(raw) => parse_flag(&raw).ok_or_else(|| {
            CommonError::invalid_env(key, &raw, "expected true/false, 1/0, yes/no or on/off")
        }),
        None => Ok(default),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
