//! Pure metric functions.
//!
//! Every function returns `None` when its mathematical precondition fails.
//! Missing inputs are propagated, never replaced with zero.

use screener_core::Trend;

/// Relative change (in percent) beyond which a trend counts as rising or falling
pub const TREND_BAND_PCT: f64 = 5.0;

/// Graham number multiplier (15x earnings * 1.5x book)
pub const GRAHAM_MULTIPLIER: f64 = 22.5;

/// Earnings multiple used by the low-multiple and margin-based valuations
pub const CONSERVATIVE_EARNINGS_MULTIPLE: f64 = 15.0;

fn positive(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite() && *x > 0.0)
}

fn finite(v: f64) -> Option<f64> {
    if v.is_finite() { Some(v) } else { None }
}

/// Compound annual growth rate in percent over `periods` years.
///
/// `values` is most-recent-first: index 0 is the end value, index `periods`
/// the start value. Both must be present and strictly positive.
pub fn cagr(values: &[Option<f64>], periods: usize) -> Option<f64> {
    if periods == 0 {
        return None;
    }
    let end = positive(values.first().copied().flatten())?;
    let start = positive(values.get(periods).copied().flatten())?;
    finite(((end / start).powf(1.0 / periods as f64) - 1.0) * 100.0)
}

/// Classify the newest value against the average of the prior two.
pub fn trend(values: &[f64]) -> Trend {
    if values.len() < 3 || values[..3].iter().any(|v| !v.is_finite()) {
        return Trend::Undetermined;
    }
    let newest = values[0];
    let baseline = (values[1] + values[2]) / 2.0;
    if baseline == 0.0 {
        return Trend::Undetermined;
    }

    // abs() so that a shrinking loss reads as an improvement
    let change_pct = (newest - baseline) / baseline.abs() * 100.0;
    if change_pct > TREND_BAND_PCT {
        Trend::Rising
    } else if change_pct < -TREND_BAND_PCT {
        Trend::Falling
    } else {
        Trend::Stable
    }
}

/// Middle value of the three most recent entries.
pub fn median_of_three(values: &[f64]) -> Option<f64> {
    if values.len() < 3 {
        return None;
    }
    let mut last_three = [values[0], values[1], values[2]];
    if last_three.iter().any(|v| !v.is_finite()) {
        return None;
    }
    last_three.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(last_three[1])
}

/// Median of an arbitrary set; the mean of the two middle values for even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Free cash flow as a percentage of revenue
pub fn fcf_margin(fcf: Option<f64>, revenue: Option<f64>) -> Option<f64> {
    ratio_pct(fcf, revenue)
}

/// Net income as a percentage of revenue
pub fn net_margin(net_income: Option<f64>, revenue: Option<f64>) -> Option<f64> {
    ratio_pct(net_income, revenue)
}

fn ratio_pct(numerator: Option<f64>, revenue: Option<f64>) -> Option<f64> {
    let revenue = revenue.filter(|r| *r != 0.0)?;
    finite(numerator? / revenue * 100.0)
}

/// (debt - cash) / EBITDA. Absent cash counts as zero cash; absent debt does not.
pub fn net_debt_to_ebitda(
    debt: Option<f64>,
    cash: Option<f64>,
    ebitda: Option<f64>,
) -> Option<f64> {
    let ebitda = ebitda.filter(|e| *e != 0.0)?;
    let net_debt = debt? - cash.unwrap_or(0.0);
    finite(net_debt / ebitda)
}

/// Simplified intrinsic value per share.
///
/// Up to three independent estimates, each used only when all of its inputs
/// are strictly positive and finite:
/// - Graham number: `sqrt(22.5 * eps * book_value)`
/// - low-multiple earnings: `eps * 15`
/// - margin-based revenue: `revenue * net_margin / shares * 15`
///
/// `net_margin_pct` is in percent. Returns the median of the valid estimates.
pub fn intrinsic_value_estimate(
    eps: Option<f64>,
    book_value_per_share: Option<f64>,
    revenue: Option<f64>,
    net_margin_pct: Option<f64>,
    shares_outstanding: Option<f64>,
) -> Option<f64> {
    let eps = positive(eps);
    let mut estimates = Vec::with_capacity(3);

    if let (Some(eps), Some(bvps)) = (eps, positive(book_value_per_share)) {
        estimates.extend(finite((GRAHAM_MULTIPLIER * eps * bvps).sqrt()));
    }
    if let Some(eps) = eps {
        estimates.extend(finite(eps * CONSERVATIVE_EARNINGS_MULTIPLE));
    }
    if let (Some(revenue), Some(margin), Some(shares)) = (
        positive(revenue),
        positive(net_margin_pct),
        positive(shares_outstanding),
    ) {
        let earnings_per_share = revenue * (margin / 100.0) / shares;
        estimates.extend(finite(earnings_per_share * CONSERVATIVE_EARNINGS_MULTIPLE));
    }

    median(&estimates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cagr_basic() {
        let values = [Some(200.0), None, None, Some(100.0)];
        let growth = cagr(&values, 3).unwrap();
        assert_relative_eq!(growth, 25.992, epsilon = 0.001);
    }

    #[test]
    fn test_cagr_missing_endpoint() {
        assert!(cagr(&[None, Some(100.0), Some(90.0), Some(80.0)], 3).is_none());
        assert!(cagr(&[Some(100.0), Some(90.0)], 3).is_none());
    }

    #[test]
    fn test_cagr_non_positive_base() {
        assert!(cagr(&[Some(100.0), Some(50.0), Some(0.0)], 2).is_none());
        assert!(cagr(&[Some(-5.0), Some(50.0), Some(10.0)], 2).is_none());
        assert!(cagr(&[Some(100.0), Some(-50.0)], 1).is_none());
    }

    #[test]
    fn test_cagr_zero_periods() {
        assert!(cagr(&[Some(100.0)], 0).is_none());
    }

    #[test]
    fn test_cagr_is_finite_for_valid_inputs() {
        let values: Vec<Option<f64>> = (0..11).map(|i| Some(1.0 + i as f64)).collect();
        for periods in 1..=10 {
            let g = cagr(&values, periods).unwrap();
            assert!(g.is_finite());
            assert!(g < 0.0); // newest-first series that shrinks toward the present
        }
        assert!(cagr(&[Some(f64::INFINITY), Some(1.0)], 1).is_none());
    }

    #[test]
    fn test_trend() {
        assert_eq!(trend(&[110.0, 100.0, 90.0]), Trend::Rising);
        assert_eq!(trend(&[90.0, 100.0, 110.0]), Trend::Falling);
        assert_eq!(trend(&[100.0, 101.0, 99.0]), Trend::Stable);
        assert_eq!(trend(&[100.0, 100.0]), Trend::Undetermined);
    }

    #[test]
    fn test_trend_negative_baseline() {
        // Losses narrowing from -10 to -5
        assert_eq!(trend(&[-5.0, -10.0, -10.0]), Trend::Rising);
        assert_eq!(trend(&[5.0, 0.0, 0.0]), Trend::Undetermined);
    }

    #[test]
    fn test_median_of_three() {
        assert_eq!(median_of_three(&[15.0, 9.0, 12.0]), Some(12.0));
        assert_eq!(median_of_three(&[15.0, 9.0, 12.0, 100.0]), Some(12.0));
        assert_eq!(median_of_three(&[15.0, 9.0]), None);
    }

    #[test]
    fn test_margins() {
        assert_relative_eq!(fcf_margin(Some(20.0), Some(100.0)).unwrap(), 20.0);
        assert!(fcf_margin(Some(20.0), Some(0.0)).is_none());
        assert!(fcf_margin(Some(20.0), None).is_none());
        assert!(net_margin(None, Some(100.0)).is_none());
    }

    #[test]
    fn test_net_debt_to_ebitda() {
        let ratio = net_debt_to_ebitda(Some(300.0), Some(100.0), Some(100.0)).unwrap();
        assert_relative_eq!(ratio, 2.0);
        assert_relative_eq!(net_debt_to_ebitda(Some(300.0), None, Some(100.0)).unwrap(), 3.0);
        assert!(net_debt_to_ebitda(Some(300.0), Some(100.0), Some(0.0)).is_none());
        assert!(net_debt_to_ebitda(Some(300.0), Some(100.0), None).is_none());
        assert!(net_debt_to_ebitda(None, Some(100.0), Some(50.0)).is_none());
    }

    #[test]
    fn test_intrinsic_value_all_methods() {
        // graham = sqrt(22.5 * 4 * 10) = 30, earnings = 60, revenue = 1000 * 0.2 / 100 * 15 = 30
        let iv =
            intrinsic_value_estimate(Some(4.0), Some(10.0), Some(1000.0), Some(20.0), Some(100.0))
                .unwrap();
        assert_relative_eq!(iv, 30.0, epsilon = 1e-9);
    }

    #[test]
    fn test_intrinsic_value_partial_inputs() {
        // Only revenue-based estimate is valid
        let iv =
            intrinsic_value_estimate(Some(-1.0), Some(10.0), Some(1000.0), Some(10.0), Some(100.0))
                .unwrap();
        assert_relative_eq!(iv, 15.0, epsilon = 1e-9);

        let iv = intrinsic_value_estimate(Some(2.0), None, None, None, None).unwrap();
        assert_relative_eq!(iv, 30.0, epsilon = 1e-9);

        // graham = 15, earnings = 30: mean of the pair
        let iv = intrinsic_value_estimate(Some(2.0), Some(5.0), None, None, None).unwrap();
        assert_relative_eq!(iv, 22.5, epsilon = 1e-9);
    }

    #[test]
    fn test_intrinsic_value_none_valid() {
        assert!(intrinsic_value_estimate(None, None, None, None, None).is_none());
        let iv = intrinsic_value_estimate(Some(0.0), Some(5.0), Some(0.0), Some(10.0), Some(10.0));
        assert!(iv.is_none());
    }
}
