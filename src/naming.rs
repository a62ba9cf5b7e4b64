//! Collision-free names for the resources a test creates.

use rand::Rng;

use crate::error::{PotemkinError, Result};

pub const DEFAULT_RANDOM_DIGITS: u32 = 10;
const MAX_RANDOM_DIGITS: u32 = 18;

/// `stem` followed by the current epoch seconds, e.g. `eip-test1760000000`
pub fn unique_stack_name(stem: &str) -> String {
    format!("{stem}{}", chrono::Utc::now().timestamp())
}

/// `name` followed by a random number of exactly `digits` digits
pub fn random_name(name: &str, digits: u32) -> Result<String> {
    if digits == 0 || digits > MAX_RANDOM_DIGITS {
        return Err(PotemkinError::InvalidConfig(format!(
            "random name digits must be between 1 and {MAX_RANDOM_DIGITS}, got {digits}"
        )));
    }

    let low = 10u64.pow(digits - 1);
    let high = 10u64.pow(digits) - 1;
    let suffix = rand::thread_rng().gen_range(low..=high);
    Ok(format!("{name}{suffix}"))
}
