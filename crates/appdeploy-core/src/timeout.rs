//! Build timeouts given as seconds or `1h2m3s` durations.

use std::fmt;

use crate::{Error, Result};

/// Upper bound of a remote build, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildTimeout {
    pub seconds: u64,
}

impl BuildTimeout {
    /// Parse `1234`, `60s`, `2m` or combinations such as `1h2m3s`.
    ///
    /// A bare number is seconds.
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || Error::InvalidTimeout {
            value: value.to_owned(),
        };
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }
        if let Ok(seconds) = trimmed.parse::<u64>() {
            return Ok(Self { seconds });
        }

        let mut total: u64 = 0;
        let mut digits = String::new();
        let mut last_unit = u64::MAX;
        for c in trimmed.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            let unit = match c.to_ascii_lowercase() {
                'h' => 3600,
                'm' => 60,
                's' => 1,
                _ => return Err(invalid()),
            };
            // Units must appear at most once, largest first.
            if digits.is_empty() || unit >= last_unit {
                return Err(invalid());
            }
            let n: u64 = digits.parse().map_err(|_| invalid())?;
            total = n
                .checked_mul(unit)
                .and_then(|v| total.checked_add(v))
                .ok_or_else(invalid)?;
            digits.clear();
            last_unit = unit;
        }
        if !digits.is_empty() {
            return Err(invalid());
        }
        Ok(Self { seconds: total })
    }
}

impl fmt::Display for BuildTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.seconds)
    }
}
