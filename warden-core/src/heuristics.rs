//! Behavior heuristics over a client-reported interaction trace.
//!
//! Each check is a pure function of the trace and is evaluated unconditionally
//! within its toggle group, so several anomaly tags can fire for one record.
//! Checks that need a minimum sample size report nothing below it.

use crate::config::BehaviorConfig;
use crate::record::{BehavioralTrace, ClickPoint, KeyPress, Point, ScrollSample};
use crate::stats::{angle_between, deltas, is_regular_pattern, mean, stddev};
use crate::verdict::BlockReason;
use std::collections::HashMap;
use tracing::debug;

const MIN_PATH_POINTS: usize = 10;
const STRAIGHT_TOLERANCE_DEG: f64 = 5.0;
const ANGLE_BUCKET_DEG: f64 = 15.0;
const MAX_STRAIGHT_SHARE: f64 = 0.7;
const MAX_BUCKET_SHARE: f64 = 0.5;
const MIN_VELOCITY_STDDEV: f64 = 0.1;
const MAX_REPEATED_CLICKS: usize = 3;
const MIN_KEY_EVENTS: usize = 10;
const MIN_KEY_INTERVAL_MS: f64 = 30.0;
const ERROR_FREE_KEY_EVENTS: usize = 50;
const COVERAGE_MIN_CLICKS: u64 = 10;
const COVERAGE_MIN_AREAS: usize = 3;
const MIN_SCROLL_EVENTS: usize = 5;
const MIN_SCROLL_DISTANCE_STDDEV: f64 = 1.0;
const MIN_SCROLL_INTERVAL_STDDEV: f64 = 10.0;

/// True when a pointer path of at least ten points is mostly straight segments or
/// repeats one turn angle: mechanical paths, not hand movement.
pub fn detect_geometric_patterns(points: &[Point]) -> bool {
    if points.len() < MIN_PATH_POINTS {
        return false;
    }

    let segments = points.len() - 2;
    let mut straight = 0usize;
    let mut buckets: HashMap<i64, usize> = HashMap::new();

    for triplet in points.windows(3) {
        let angle = angle_between(&triplet[0], &triplet[1], &triplet[2]);
        let bucket = ((angle / ANGLE_BUCKET_DEG).round() * ANGLE_BUCKET_DEG) as i64;
        *buckets.entry(bucket).or_insert(0) += 1;

        if (angle - 180.0).abs() < STRAIGHT_TOLERANCE_DEG {
            straight += 1;
        }
    }

    let busiest = buckets.values().copied().max().unwrap_or(0);
    straight as f64 > segments as f64 * MAX_STRAIGHT_SHARE
        || busiest as f64 > segments as f64 * MAX_BUCKET_SHARE
}

/// Outcome of the pointer-velocity check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VelocityFindings {
    /// Speed barely varies across samples
    pub uniform: bool,
    /// Some sample exceeds the human ceiling
    pub too_fast: bool,
}

pub fn check_velocities(velocities: &[f64], max_human_speed: f64) -> VelocityFindings {
    let uniform = velocities.len() >= 2 && stddev(velocities) < MIN_VELOCITY_STDDEV;
    let too_fast = velocities
        .iter()
        .copied()
        .fold(None, |max: Option<f64>, v| Some(max.map_or(v, |m| m.max(v))))
        .map(|max| max > max_human_speed)
        .unwrap_or(false);

    VelocityFindings { uniform, too_fast }
}

/// True when any click coordinate recurs more than three times
pub fn has_identical_coordinates(points: &[ClickPoint]) -> bool {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for point in points {
        let count = seen.entry(format!("{},{}", point.x, point.y)).or_insert(0);
        *count += 1;
        if *count > MAX_REPEATED_CLICKS {
            return true;
        }
    }
    false
}

/// Mean inter-keystroke gap under 30 ms across at least ten key events
pub fn detect_inhuman_typing_speed(keys: &[KeyPress]) -> bool {
    if keys.len() < MIN_KEY_EVENTS {
        return false;
    }
    let intervals = deltas(keys.iter().map(|k| k.time));
    mean(&intervals) < MIN_KEY_INTERVAL_MS
}

/// More than fifty keystrokes without a single backspace
pub fn lacks_typing_mistakes(keys: &[KeyPress], backspaces: u64) -> bool {
    keys.len() > ERROR_FREE_KEY_EVENTS && backspaces == 0
}

/// Many clicks concentrated in very few screen-grid cells
pub fn has_limited_interaction_area(clicks: u64, areas: &[String]) -> bool {
    clicks > COVERAGE_MIN_CLICKS && areas.len() < COVERAGE_MIN_AREAS
}

/// Scroll distances or timings that are too even to be a wheel or a finger
pub fn is_unnatural_scroll(samples: &[ScrollSample]) -> bool {
    if samples.len() < MIN_SCROLL_EVENTS {
        return false;
    }

    let intervals = deltas(samples.iter().map(|s| s.time));
    let distances: Vec<f64> = deltas(samples.iter().map(|s| s.top))
        .into_iter()
        .map(f64::abs)
        .collect();

    stddev(&distances) < MIN_SCROLL_DISTANCE_STDDEV
        || stddev(&intervals) < MIN_SCROLL_INTERVAL_STDDEV
}

/// Events per minute over the session, with the session floored at one second
pub fn per_minute(events: u64, elapsed_seconds: f64) -> f64 {
    let elapsed = elapsed_seconds.max(1.0);
    events as f64 / (elapsed / 60.0)
}

/// Runs the behavior checks enabled in [`BehaviorConfig`]
#[derive(Debug, Clone)]
pub struct BehaviorAnalyzer {
    config: BehaviorConfig,
}

impl BehaviorAnalyzer {
    pub fn new(config: BehaviorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BehaviorConfig {
        &self.config
    }

    /// Anomaly tags for `trace`, given how long the visitor's session has been running
    pub fn analyze(&self, trace: &BehavioralTrace, elapsed_seconds: f64) -> Vec<BlockReason> {
        let mut reasons = Vec::new();
        if !self.config.enabled {
            return reasons;
        }

        if self.config.mouse_pattern_detection {
            let velocity = check_velocities(&trace.move_velocities, self.config.max_human_speed);
            if velocity.uniform {
                reasons.push(BlockReason::SuspiciousMovementPattern);
            }
            if velocity.too_fast {
                reasons.push(BlockReason::ImpossibleMovementSpeed);
            }
            if detect_geometric_patterns(&trace.mouse_points) {
                reasons.push(BlockReason::GeometricMovementPattern);
            }
        }

        if !trace.click_points.is_empty() {
            if is_regular_pattern(&trace.event_intervals) {
                reasons.push(BlockReason::RegularClickPattern);
            }
            if has_identical_coordinates(&trace.click_points) {
                reasons.push(BlockReason::IdenticalClickCoordinates);
            }
        }

        if self.config.keyboard_pattern_detection && !trace.key_press_patterns.is_empty() {
            if detect_inhuman_typing_speed(&trace.key_press_patterns) {
                reasons.push(BlockReason::InhumanTypingSpeed);
            }
            if lacks_typing_mistakes(&trace.key_press_patterns, trace.input_backspaces) {
                reasons.push(BlockReason::NoTypingMistakes);
            }
        }

        if self.config.interaction_quality {
            if has_limited_interaction_area(trace.clicks, &trace.interaction_areas) {
                reasons.push(BlockReason::LimitedInteractionArea);
            }
            if is_unnatural_scroll(&trace.scroll_patterns) {
                reasons.push(BlockReason::UnnaturalScrollPattern);
            }
        }

        let click_rate = per_minute(trace.clicks, elapsed_seconds);
        let move_rate = per_minute(trace.moves, elapsed_seconds);
        if click_rate > self.config.suspicious_click_rate {
            reasons.push(BlockReason::SuspiciousClickRate);
        }
        if move_rate > self.config.suspicious_move_rate {
            reasons.push(BlockReason::SuspiciousMoveRate);
        }

        // flagged on low idle alone, regardless of other activity
        if trace.idle_seconds < self.config.min_human_idle_time {
            reasons.push(BlockReason::NoHumanIdle);
        }

        debug!(
            click_rate = click_rate,
            move_rate = move_rate,
            anomalies = reasons.len(),
            "Behavior trace analyzed"
        );

        reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(coords: &[(f64, f64)]) -> Vec<Point> {
        coords.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    fn clicks_at(coords: &[(f64, f64)]) -> Vec<ClickPoint> {
        coords
            .iter()
            .map(|&(x, y)| ClickPoint {
                x,
                y,
                ..Default::default()
            })
            .collect()
    }

    fn keys_every(count: usize, gap_ms: f64) -> Vec<KeyPress> {
        (0..count)
            .map(|i| KeyPress {
                key: "a".to_string(),
                time: i as f64 * gap_ms,
                ..Default::default()
            })
            .collect()
    }

    fn scrolls(samples: &[(f64, f64)]) -> Vec<ScrollSample> {
        samples
            .iter()
            .map(|&(top, time)| ScrollSample {
                top,
                time,
                direction: "down".to_string(),
            })
            .collect()
    }

    /// A trace that trips nothing with the default configuration
    fn human_trace() -> BehavioralTrace {
        BehavioralTrace {
            moves: 120,
            clicks: 4,
            idle_seconds: 3.0,
            move_velocities: vec![0.4, 1.2, 0.8, 2.5],
            ..Default::default()
        }
    }

    fn jitter_path() -> Vec<Point> {
        path(&[
            (100.0, 100.0),
            (137.0, 82.0),
            (121.0, 140.0),
            (180.0, 131.0),
            (166.0, 95.0),
            (214.0, 120.0),
            (197.0, 171.0),
            (250.0, 160.0),
            (233.0, 118.0),
            (281.0, 149.0),
            (262.0, 199.0),
            (305.0, 176.0),
        ])
    }

    #[test]
    fn test_straight_line_is_geometric() {
        let line: Vec<Point> = (0..12).map(|i| Point::new(i as f64 * 10.0, i as f64 * 5.0)).collect();
        assert!(detect_geometric_patterns(&line));
    }

    #[test]
    fn test_jitter_is_not_geometric() {
        assert!(!detect_geometric_patterns(&jitter_path()));
    }

    #[test]
    fn test_repeated_turn_angle_is_geometric() {
        let zigzag: Vec<Point> = (0..12)
            .map(|i| Point::new(i as f64 * 10.0, if i % 2 == 0 { 0.0 } else { 10.0 }))
            .collect();
        assert!(detect_geometric_patterns(&zigzag));
    }

    #[test]
    fn test_short_path_is_never_geometric() {
        let line: Vec<Point> = (0..9).map(|i| Point::new(i as f64, 0.0)).collect();
        assert!(!detect_geometric_patterns(&line));
    }

    #[test]
    fn test_velocity_checks() {
        assert_eq!(
            check_velocities(&[0.5, 0.5, 0.5], 1000.0),
            VelocityFindings { uniform: true, too_fast: false }
        );
        assert_eq!(
            check_velocities(&[0.5, 1500.0], 1000.0),
            VelocityFindings { uniform: false, too_fast: true }
        );
        assert_eq!(check_velocities(&[], 1000.0), VelocityFindings::default());
        assert_eq!(check_velocities(&[0.7], 1000.0), VelocityFindings::default());
    }

    #[test]
    fn test_identical_coordinates_threshold() {
        let three = clicks_at(&[(5.0, 5.0), (5.0, 5.0), (5.0, 5.0), (9.0, 1.0)]);
        assert!(!has_identical_coordinates(&three));

        let four = clicks_at(&[(5.0, 5.0), (5.0, 5.0), (9.0, 1.0), (5.0, 5.0), (5.0, 5.0)]);
        assert!(has_identical_coordinates(&four));
    }

    #[test]
    fn test_typing_speed() {
        assert!(detect_inhuman_typing_speed(&keys_every(12, 20.0)));
        assert!(!detect_inhuman_typing_speed(&keys_every(12, 120.0)));
        assert!(!detect_inhuman_typing_speed(&keys_every(9, 5.0)));
    }

    #[test]
    fn test_error_free_typing() {
        assert!(lacks_typing_mistakes(&keys_every(51, 150.0), 0));
        assert!(!lacks_typing_mistakes(&keys_every(51, 150.0), 2));
        assert!(!lacks_typing_mistakes(&keys_every(50, 150.0), 0));
    }

    #[test]
    fn test_interaction_coverage() {
        let two_cells = vec!["1,1".to_string(), "1,2".to_string()];
        assert!(has_limited_interaction_area(11, &two_cells));
        assert!(!has_limited_interaction_area(10, &two_cells));

        let three_cells = vec!["1,1".to_string(), "1,2".to_string(), "4,4".to_string()];
        assert!(!has_limited_interaction_area(40, &three_cells));
    }

    #[test]
    fn test_scroll_naturalness() {
        let programmatic = scrolls(&[
            (0.0, 0.0),
            (100.0, 130.0),
            (200.0, 220.0),
            (300.0, 400.0),
            (400.0, 470.0),
            (500.0, 650.0),
        ]);
        assert!(is_unnatural_scroll(&programmatic));

        let metronome = scrolls(&[
            (0.0, 0.0),
            (120.0, 50.0),
            (180.0, 100.0),
            (420.0, 150.0),
            (460.0, 200.0),
            (700.0, 250.0),
        ]);
        assert!(is_unnatural_scroll(&metronome));

        let natural = scrolls(&[
            (0.0, 0.0),
            (120.0, 130.0),
            (180.0, 220.0),
            (420.0, 400.0),
            (460.0, 470.0),
            (700.0, 650.0),
        ]);
        assert!(!is_unnatural_scroll(&natural));

        assert!(!is_unnatural_scroll(&programmatic[..4]));
    }

    #[test]
    fn test_per_minute_floors_elapsed_time() {
        assert_eq!(per_minute(10, 0.0), 600.0);
        assert_eq!(per_minute(10, 60.0), 10.0);
    }

    #[test]
    fn test_human_trace_is_clean() {
        let analyzer = BehaviorAnalyzer::new(BehaviorConfig::default());
        assert!(analyzer.analyze(&human_trace(), 30.0).is_empty());
    }

    #[test]
    fn test_anomalies_co_occur() {
        let analyzer = BehaviorAnalyzer::new(BehaviorConfig::default());
        let trace = BehavioralTrace {
            moves: 5000,
            clicks: 12,
            idle_seconds: 0.0,
            mouse_points: (0..12).map(|i| Point::new(i as f64, 0.0)).collect(),
            move_velocities: vec![2.0, 2.0, 2.0, 2.0],
            click_points: clicks_at(&[(5.0, 5.0); 6]),
            event_intervals: vec![250.0; 6],
            interaction_areas: vec!["0,0".to_string()],
            ..Default::default()
        };

        let reasons = analyzer.analyze(&trace, 1.0);
        assert_eq!(
            reasons,
            vec![
                BlockReason::SuspiciousMovementPattern,
                BlockReason::GeometricMovementPattern,
                BlockReason::RegularClickPattern,
                BlockReason::IdenticalClickCoordinates,
                BlockReason::LimitedInteractionArea,
                BlockReason::SuspiciousClickRate,
                BlockReason::SuspiciousMoveRate,
                BlockReason::NoHumanIdle,
            ]
        );
    }

    #[test]
    fn test_null_velocity_keeps_speed_checks_active() {
        let analyzer = BehaviorAnalyzer::new(BehaviorConfig::default());
        let trace: BehavioralTrace = serde_json::from_value(serde_json::json!({
            "idleSeconds": 2.0,
            "moveVelocities": [5000.0, 2.0, null, 2.0]
        }))
        .unwrap();

        let reasons = analyzer.analyze(&trace, 30.0);
        assert_eq!(reasons, vec![BlockReason::ImpossibleMovementSpeed]);
    }

    #[test]
    fn test_click_rate_over_session() {
        let analyzer = BehaviorAnalyzer::new(BehaviorConfig::default());
        let trace = BehavioralTrace {
            clicks: 9,
            ..human_trace()
        };

        // 9 clicks in 1s is 540/min, 9 clicks in 60s is 9/min
        assert!(analyzer.analyze(&trace, 1.0).contains(&BlockReason::SuspiciousClickRate));
        assert!(!analyzer.analyze(&trace, 60.0).contains(&BlockReason::SuspiciousClickRate));
    }

    #[test]
    fn test_toggles_disable_groups() {
        let config = BehaviorConfig {
            mouse_pattern_detection: false,
            keyboard_pattern_detection: false,
            interaction_quality: false,
            ..Default::default()
        };
        let analyzer = BehaviorAnalyzer::new(config);
        let trace = BehavioralTrace {
            mouse_points: (0..12).map(|i| Point::new(i as f64, 0.0)).collect(),
            move_velocities: vec![5000.0, 5000.0],
            key_press_patterns: keys_every(60, 5.0),
            clicks: 20,
            ..human_trace()
        };

        assert!(analyzer.analyze(&trace, 60.0).is_empty());

        let disabled = BehaviorAnalyzer::new(BehaviorConfig {
            enabled: false,
            ..Default::default()
        });
        assert!(disabled.analyze(&BehavioralTrace::default(), 0.0).is_empty());
    }
}
