// src/test_utils.rs

//! Float comparison helpers shared by the unit tests.

use num_traits::Float;

/// Tolerance within which two floats are considered equal.
pub const TEST_TOLERANCE: f32 = 1e-5;

/// True if `value` is within [`TEST_TOLERANCE`] of `target`.
pub fn value_close(target: f32, value: f32) -> bool {
    (target - value).abs() < TEST_TOLERANCE
}

/// True if `value` differs from `target` by at least [`TEST_TOLERANCE`].
pub fn value_not_close(target: f32, value: f32) -> bool {
    TEST_TOLERANCE <= (target - value).abs()
}

/// Checks if each of the roll, pitch and yaw components is close enough to
/// be considered equal.
///
/// # Arguments
/// * `target` - The expected per-axis values.
/// * `value` - The per-axis values to compare against the target.
///
/// # Returns
/// `true` if every axis of `target` and `value` is close as per
/// `value_close`, otherwise `false`.
pub fn vector_close(target: [f32; 3], value: [f32; 3]) -> bool {
    target
        .iter()
        .zip(value.iter())
        .all(|(&target, &value)| value_close(target, value))
}
