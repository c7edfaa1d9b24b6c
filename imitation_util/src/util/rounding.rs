//! Sum-preserving integer rounding.

/// Optimal rounding under integer constraints.
///
/// Given reals whose sum is an integer, returns integers with the same sum
/// that minimize the Lp-norm of the rounding error for every p >= 1
/// (largest-remainder apportionment). Runs in O(n log n).
///
/// Every element is floored, then the total shortfall is handed out one unit
/// at a time to the elements with the largest fractional part. Ties go to the
/// lower index.
///
/// If the sum is not integral the same algorithm runs, but the result sum is
/// only the rounded input sum.
///
/// ```ignore
/// assert_eq!(oric(&[1.5, 1.5, 1.0]), vec![2, 1, 1]);
/// ```
pub fn oric(x: &[f64]) -> Vec<i64> {
    let mut rounded: Vec<f64> = x.iter().map(|v| v.floor()).collect();
    let shortfall: Vec<f64> = x.iter().zip(&rounded).map(|(v, r)| v - r).collect();

    // Exactly an integer in exact arithmetic; round away the float error.
    let shortfall_sum: f64 = shortfall.iter().sum();
    let total = shortfall_sum.round_ties_even();
    if (shortfall_sum - total).abs() > 1e-6 {
        log::warn!(
            "oric: input sum is not integral (fractional parts sum to {})",
            shortfall_sum
        );
    }
    let total_shortfall = if total > 0.0 { total as usize } else { 0 };

    // Stable sort keeps lower indices first among equal shortfalls.
    let mut indices: Vec<usize> = (0..x.len()).collect();
    indices.sort_by(|&a, &b| shortfall[b].total_cmp(&shortfall[a]));

    for &i in indices.iter().take(total_shortfall) {
        rounded[i] += 1.0;
    }

    rounded.into_iter().map(|r| r as i64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oric_tie_goes_to_lower_index() {
        assert_eq!(oric(&[1.5, 1.5, 1.0]), vec![2, 1, 1]);
    }

    #[test]
    fn test_oric_integers_unchanged() {
        assert_eq!(oric(&[3.0, -2.0, 0.0, 7.0]), vec![3, -2, 0, 7]);
    }

    #[test]
    fn test_oric_largest_remainder() {
        // fractional parts 0.2, 0.7, 0.1 -> one unit, goes to index 1
        assert_eq!(oric(&[0.2, 2.7, 3.1]), vec![0, 3, 3]);
    }

    #[test]
    fn test_oric_negative_values() {
        // floors -2, 1; shortfalls 0.5, 0.5 -> one unit, lower index first
        assert_eq!(oric(&[-1.5, 1.5]), vec![-1, 1]);
    }

    #[test]
    fn test_oric_apportionment() {
        let shares = [10.0 / 3.0, 10.0 / 3.0, 10.0 / 3.0];
        let result = oric(&shares);
        assert_eq!(result.iter().sum::<i64>(), 10);
        assert_eq!(result, vec![4, 3, 3]);
    }

    #[test]
    fn test_oric_empty() {
        assert!(oric(&[]).is_empty());
    }
}
