//! Shared range-validation helpers used by all section validators.

/// Push an error if `value` is outside `[min, max]` (integer).
pub(crate) fn validate_range(errors: &mut Vec<String>, name: &str, value: u32, min: u32, max: u32) {
    if value < min || value > max {
        errors.push(format!("{name} = {value} is out of range [{min}, {max}]"));
    }
}

/// Push an error if `value` is outside `[min, max]` (float).
pub(crate) fn validate_range_f64(
    errors: &mut Vec<String>,
    name: &str,
    value: f64,
    min: f64,
    max: f64,
) {
    if !(min..=max).contains(&value) {
        errors.push(format!("{name} = {value} is out of range [{min}, {max}]"));
    }
}

/// Push an error if `value` is smaller than `floor` (named `floor_name`).
pub(crate) fn validate_at_least(
    errors: &mut Vec<String>,
    name: &str,
    value: u32,
    floor_name: &str,
    floor: u32,
) {
    if value < floor {
        errors.push(format!("{name} = {value} must be >= {floor_name} ({floor})"));
    }
}
