// ── Circular statistics ──
//
// Angles are in radians. The mean is the direction of the summed unit
// vectors; the extrema are the samples that bound the data on either side
// of that mean along the shorter arc.

use std::f64::consts::{PI, TAU};

/// Mean and bounding angles of a set of directions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircularStats {
    /// In `[0, 2π)`.
    pub mean: f64,
    /// The sample furthest counter-clockwise of the mean.
    pub min: f64,
    /// The sample furthest clockwise of the mean.
    pub max: f64,
}

/// `atan2(Σ sin, Σ cos)`, normalised to `[0, 2π)`. `None` for no input.
pub fn circular_mean(angles: &[f64]) -> Option<f64> {
    if angles.is_empty() {
        return None;
    }
    let (sin, cos) = angles
        .iter()
        .fold((0.0, 0.0), |(s, c), a| (s + a.sin(), c + a.cos()));
    Some(sin.atan2(cos).rem_euclid(TAU))
}

/// Signed shortest-arc distance from `mean` to `angle`, in `(-π, π]`.
pub fn signed_deviation(angle: f64, mean: f64) -> f64 {
    let d = (angle - mean).rem_euclid(TAU);
    if d > PI { d - TAU } else { d }
}

pub fn circular_stats(angles: &[f64]) -> Option<CircularStats> {
    let mean = circular_mean(angles)?;
    let mut min = (angles[0], signed_deviation(angles[0], mean));
    let mut max = min;
    for &angle in &angles[1..] {
        let deviation = signed_deviation(angle, mean);
        if deviation < min.1 {
            min = (angle, deviation);
        }
        if deviation > max.1 {
            max = (angle, deviation);
        }
    }
    Some(CircularStats {
        mean,
        min: min.0,
        max: max.0,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn rad(deg: f64) -> f64 {
        deg.to_radians()
    }

    #[test]
    fn mean_across_north() {
        let stats = circular_stats(&[rad(355.0), rad(5.0), rad(3.0)]).unwrap();
        assert!((stats.mean.to_degrees() - 1.0).abs() < 0.05, "{}", stats.mean.to_degrees());
        assert!((stats.min - rad(355.0)).abs() < 1e-12);
        assert!((stats.max - rad(5.0)).abs() < 1e-12);
    }

    #[test]
    fn mean_is_normalised() {
        let mean = circular_mean(&[rad(350.0), rad(340.0)]).unwrap();
        assert!((mean.to_degrees() - 345.0).abs() < 1e-9);
        assert!(circular_mean(&[]).is_none());
    }

    #[test]
    fn deviation_wraps() {
        assert!((signed_deviation(rad(10.0), rad(350.0)) - rad(20.0)).abs() < 1e-12);
        assert!((signed_deviation(rad(350.0), rad(10.0)) + rad(20.0)).abs() < 1e-12);
        assert!((signed_deviation(PI, 0.0) - PI).abs() < 1e-12);
    }

    #[test]
    fn single_sample_bounds_itself() {
        let stats = circular_stats(&[rad(90.0)]).unwrap();
        assert!((stats.min - rad(90.0)).abs() < 1e-12);
        assert!((stats.max - rad(90.0)).abs() < 1e-12);
    }
}
