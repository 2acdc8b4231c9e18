//! Memory budget helpers shared by pool-backed data structures.
//!
//! Budgets come from environment variables holding a byte size, either plain
//! (`1073741824`) or with a binary suffix (`512MB`, `1GB`).

use crate::Error;
use std::env;

/// Read a byte budget from the environment variable `var`.
///
/// Returns `Ok(None)` when the variable is unset.
///
/// ```ignore
/// export RUSTCV_TSDF_MAX_BYTES=512MB
/// let budget = read_budget_from_env("RUSTCV_TSDF_MAX_BYTES")?;
/// assert_eq!(budget, Some(512 * 1024 * 1024));
/// ```
pub fn read_budget_from_env(var: &str) -> crate::Result<Option<usize>> {
    let raw = match env::var(var) {
        Ok(v) => v,
        Err(env::VarError::NotPresent) => return Ok(None),
        Err(e) => return Err(Error::MemoryError(format!("Failed to read {var}: {e}"))),
    };

    let parsed = parse_bytes_with_suffix(&raw)?;
    if parsed == 0 {
        return Err(Error::MemoryError(format!("{var} must be >= 1")));
    }

    Ok(Some(parsed))
}

/// Parse a byte size with an optional `KB`, `MB`, `GB` or `B` suffix.
///
/// Case-insensitive; underscores are ignored (`1_000_000`).
pub fn parse_bytes_with_suffix(raw: &str) -> crate::Result<usize> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(Error::MemoryError("Memory size cannot be empty".to_string()));
    }

    let upper = s.to_ascii_uppercase().replace('_', "");
    let (number_part, multiplier): (&str, usize) = if let Some(v) = upper.strip_suffix("KB") {
        (v, 1024)
    } else if let Some(v) = upper.strip_suffix("MB") {
        (v, 1024 * 1024)
    } else if let Some(v) = upper.strip_suffix("GB") {
        (v, 1024 * 1024 * 1024)
    } else if let Some(v) = upper.strip_suffix('B') {
        (v, 1)
    } else {
        (upper.as_str(), 1)
    };

    let base: usize = number_part.trim().parse().map_err(|_| {
        Error::MemoryError(format!(
            "Memory size must be like '134217728', '512MB', or '2GB'; got '{raw}'"
        ))
    })?;

    base.checked_mul(multiplier).ok_or_else(|| {
        Error::MemoryError(format!("Memory size value '{raw}' is too large (would overflow)"))
    })
}

/// Number of fixed-size slots of `slot_bytes` that fit in `budget_bytes`.
pub fn slots_in_budget(budget_bytes: usize, slot_bytes: usize) -> usize {
    if slot_bytes == 0 {
        return 0;
    }
    budget_bytes / slot_bytes
}

/// `true` if `required_bytes` fits in `budget`; no budget means no limit.
pub fn fits_in_budget(required_bytes: usize, budget: Option<usize>) -> bool {
    match budget {
        Some(b) => required_bytes <= b,
        None => true,
    }
}
