//! Numeric conversions used by averages and normalizers.

use num_traits::cast;

/// Converts an element or vertex count to `f64` for averaging.
///
/// Counts above 2^53 lose precision; mesh sizes never get there, and the
/// result saturates to `f64::MAX` instead of failing.
#[must_use]
pub fn count_to_f64(count: usize) -> f64 {
    cast::<usize, f64>(count).unwrap_or(f64::MAX)
}

/// Mean of a slice of values, `None` when it is empty.
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / count_to_f64(values.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn counts_convert_exactly() {
        assert_relative_eq!(count_to_f64(0), 0.0);
        assert_relative_eq!(count_to_f64(48), 48.0);
    }

    #[test]
    fn mean_of_empty_slice_is_none() {
        assert_eq!(mean(&[]), None);
        assert_relative_eq!(mean(&[1.0, 2.0, 6.0]).unwrap(), 3.0);
    }
}
