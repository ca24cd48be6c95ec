//! Numeric primitives shared by the behavior heuristics.
//!
//! Every helper treats an undersized sample as "nothing unusual": `stddev` of
//! fewer than two values is 0 and the pattern helpers return `false`.

use crate::record::Point;

/// Arithmetic mean, 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (`n - 1` denominator), 0 for fewer than two values
pub fn stddev(values: &[f64]) -> f64 {
    let count = values.len();
    if count < 2 {
        return 0.0;
    }

    let avg = mean(values);
    let squares: f64 = values.iter().map(|v| (v - avg).powi(2)).sum();
    (squares / (count - 1) as f64).sqrt()
}

/// Angle in degrees at `p2` between the rays towards `p1` and `p3`, in `[0, 180]`
pub fn angle_between(p1: &Point, p2: &Point, p3: &Point) -> f64 {
    let bearing1 = (p1.y - p2.y).atan2(p1.x - p2.x);
    let bearing2 = (p3.y - p2.y).atan2(p3.x - p2.x);
    let angle = (bearing1 - bearing2).abs().to_degrees();
    let angle = if angle > 180.0 { 360.0 - angle } else { angle };
    angle.clamp(0.0, 180.0)
}

/// Differences between consecutive values
pub fn deltas(values: impl IntoIterator<Item = f64>) -> Vec<f64> {
    let values: Vec<f64> = values.into_iter().collect();
    values.windows(2).map(|pair| pair[1] - pair[0]).collect()
}

/// True when at least five intervals were recorded and their spread is under 10% of the mean
pub fn is_regular_pattern(intervals: &[f64]) -> bool {
    if intervals.len() < 5 {
        return false;
    }
    stddev(intervals) < mean(intervals) * 0.1
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_stddev_of_constant_series_is_zero() {
        assert_eq!(stddev(&[1.0, 1.0, 1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_stddev_of_single_value_is_zero() {
        assert_eq!(stddev(&[42.0]), 0.0);
        assert_eq!(stddev(&[]), 0.0);
    }

    #[test]
    fn test_stddev_uses_sample_denominator() {
        // mean 5, squared deviations sum to 32, / (8 - 1)
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let expected = (32.0f64 / 7.0).sqrt();
        assert!((stddev(&values) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_angle_between_straight_line() {
        let angle = angle_between(&Point::new(0.0, 0.0), &Point::new(1.0, 1.0), &Point::new(2.0, 2.0));
        assert!((angle - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_angle_between_right_angle() {
        let angle = angle_between(&Point::new(0.0, 1.0), &Point::new(0.0, 0.0), &Point::new(1.0, 0.0));
        assert!((angle - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_angle_between_wraps_reflex_angles() {
        // bearings of +170 and -170 degrees differ by 340, reported as 20
        let p2 = Point::new(0.0, 0.0);
        let p1 = Point::new(170f64.to_radians().cos(), 170f64.to_radians().sin());
        let p3 = Point::new((-170f64).to_radians().cos(), (-170f64).to_radians().sin());
        assert!((angle_between(&p1, &p2, &p3) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_regular_click_intervals() {
        assert!(is_regular_pattern(&[1000.0, 1000.0, 1000.0, 1000.0, 1000.0]));
        assert!(!is_regular_pattern(&[500.0, 1500.0, 700.0, 1300.0, 900.0]));
    }

    #[test]
    fn test_regular_pattern_needs_five_intervals() {
        assert!(!is_regular_pattern(&[1000.0, 1000.0, 1000.0, 1000.0]));
    }

    #[test]
    fn test_deltas() {
        assert_eq!(deltas([1.0, 4.0, 4.0, 10.0]), vec![3.0, 0.0, 6.0]);
        assert!(deltas([5.0]).is_empty());
    }

    proptest! {
        #[test]
        fn prop_stddev_is_non_negative(values in prop::collection::vec(-1.0e6f64..1.0e6, 0..64)) {
            prop_assert!(stddev(&values) >= 0.0);
        }

        #[test]
        fn prop_angle_is_within_half_turn(
            x1 in -1.0e4f64..1.0e4, y1 in -1.0e4f64..1.0e4,
            x2 in -1.0e4f64..1.0e4, y2 in -1.0e4f64..1.0e4,
            x3 in -1.0e4f64..1.0e4, y3 in -1.0e4f64..1.0e4,
        ) {
            let angle = angle_between(&Point::new(x1, y1), &Point::new(x2, y2), &Point::new(x3, y3));
            prop_assert!((0.0..=180.0).contains(&angle));
        }
    }
}
