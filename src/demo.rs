//! The `BENHUR` synthetic-data path (spec.md §4.6/§4.7, §9, scenario S3).
//!
//! Hard-wired into both workers in the original, but gated here behind the
//! `demo-origin` cargo feature so a production build never compiles it in
//! (spec.md §9: "should be gated behind a build-time or config flag").

use crate::point::{Payload, Point, SourceDict};

pub const DEMO_ORIGIN: &[u8] = b"BENHUR";

const STEP_NS: u64 = 5_000_000_000; // 5 seconds
const PERIOD_SECONDS: f64 = 10800.0;
const MAX_POINTS: u64 = 20_000;

pub fn is_demo_origin(origin: &[u8]) -> bool {
    origin == DEMO_ORIGIN
}

/// Generates the sine-wave demo burst covering `[t_alpha, t_omega]`: one
/// point every 5 seconds, source dict always `{wave -> sine}`, value
/// `sin(2*pi*t_s/10800)` where `t_s` is the timestamp in seconds.
pub fn generate(t_alpha: u64, t_omega: u64) -> Vec<Point> {
    if t_omega < t_alpha {
        return Vec::new();
    }
    let first_second = t_alpha.div_ceil(1_000_000_000);
    let mut points = Vec::new();
    for k in 0..MAX_POINTS {
        let Some(second) = first_second.checked_add(5 * k) else {
            break;
        };
        let Some(timestamp) = second.checked_mul(1_000_000_000) else {
            break;
        };
        if timestamp > t_omega {
            break;
        }
        if timestamp < t_alpha {
            continue;
        }
        let t_s = timestamp as f64 / 1_000_000_000.0;
        let value = (2.0 * std::f64::consts::PI * t_s / PERIOD_SECONDS).sin();
        points.push(Point {
            origin: DEMO_ORIGIN.to_vec(),
            source: SourceDict::from_pairs([("wave", "sine")]),
            timestamp,
            payload: Payload::Measurement(value),
        });
    }
    points
}

/// The one-entry contents list the demo origin reports (spec.md §4.7).
pub fn contents() -> Vec<SourceDict> {
    vec![SourceDict::from_pairs([("wave", "sine")])]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_spaces_points_five_seconds_apart() {
        let points = generate(0, 20_000_000_000);
        assert!(points.len() >= 2);
        assert_eq!(points[1].timestamp - points[0].timestamp, STEP_NS);
    }

    #[test]
    fn every_point_uses_the_sine_source_dict() {
        let points = generate(0, 10_000_000_000);
        for point in &points {
            assert_eq!(point.source.get("wave"), Some("sine"));
        }
    }

    #[test]
    fn narrow_window_still_returns_at_least_one_point() {
        let points = generate(0, 5);
        assert!(!points.is_empty());
    }

    #[test]
    fn points_stay_within_the_requested_window() {
        let t_alpha = 12_000_000_000;
        let t_omega = 40_000_000_000;
        let points = generate(t_alpha, t_omega);
        for point in &points {
            assert!(point.timestamp >= t_alpha && point.timestamp <= t_omega);
        }
    }
}
