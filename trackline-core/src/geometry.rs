//! Track geometry adapter
//!
//! Holds the closed-loop centerline of a circuit with its cumulative arc
//! length, and maps track fractions to positions and headings on it.
//!
//! The loop is closed implicitly: the final segment runs from the last
//! point back to the first, so callers never repeat the start point.

use crate::error::GeometryError;
use crate::model::Vector3;
use crate::units::{Fraction, Meters};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tolerances applied when building a centerline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometryOptions {
    /// Consecutive points closer than this (meters) are merged
    pub dedup_epsilon: f64,

    /// The implicit closing segment may be at most this many times the
    /// longest explicit segment before the track counts as open
    pub closure_factor: f64,
}

impl Default for GeometryOptions {
    fn default() -> Self {
        Self {
            dedup_epsilon: 1e-6,
            closure_factor: 1.5,
        }
    }
}

/// Closed-loop track centerline with precomputed arc lengths
#[derive(Debug, Clone)]
pub struct TrackCenterline {
    points: Vec<Vector3<f64>>,
    /// `cumulative[i]` is the arc length at `points[i]`; the extra final
    /// entry is the total length (back at `points[0]`)
    cumulative: Vec<f64>,
    /// Unit direction of the segment leaving each point
    headings: Vec<Vector3<f64>>,
}

impl TrackCenterline {
    /// Load a centerline from a geometry file
    ///
    /// See [`crate::track_file`] for the supported formats.
    pub fn load(path: &Path) -> Result<Self, GeometryError> {
        Self::load_with(path, &GeometryOptions::default())
    }

    pub fn load_with(path: &Path, options: &GeometryOptions) -> Result<Self, GeometryError> {
        let points = crate::track_file::read_points(path)?;
        Self::from_points(points, options)
    }

    /// Build a centerline from an ordered point list
    pub fn from_points(
        raw: Vec<Vector3<f64>>,
        options: &GeometryOptions,
    ) -> Result<Self, GeometryError> {
        if let Some(i) = raw.iter().position(|p| !p.is_finite()) {
            return Err(GeometryError::NonFinitePoint(i));
        }

        let mut points: Vec<Vector3<f64>> = Vec::with_capacity(raw.len());
        for p in raw {
            match points.last() {
                Some(last) if last.distance_to(&p) <= options.dedup_epsilon => {}
                _ => points.push(p),
            }
        }

        // A repeated start point is an explicit closure
        if points.len() > 1 {
            let first = points[0];
            if points[points.len() - 1].distance_to(&first) <= options.dedup_epsilon {
                points.pop();
            }
        }

        if points.len() < 3 {
            return Err(GeometryError::TooFewPoints(points.len()));
        }

        let longest = points
            .windows(2)
            .map(|w| w[0].distance_to(&w[1]))
            .fold(0.0_f64, f64::max);
        let gap = points[points.len() - 1].distance_to(&points[0]);
        let tolerance = longest * options.closure_factor;
        if gap > tolerance {
            return Err(GeometryError::OpenLoop { gap, tolerance });
        }

        let n = points.len();
        let mut cumulative = Vec::with_capacity(n + 1);
        let mut headings = Vec::with_capacity(n);
        let mut total = 0.0;
        cumulative.push(0.0);
        for i in 0..n {
            let a = points[i];
            let b = points[(i + 1) % n];
            let delta = b.sub(&a);
            let heading = delta
                .normalized()
                .ok_or(GeometryError::TooFewPoints(n))?;
            headings.push(heading);
            total += delta.length();
            cumulative.push(total);
        }

        Ok(Self {
            points,
            cumulative,
            headings,
        })
    }

    pub fn points(&self) -> &[Vector3<f64>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Cumulative arc length from the start point to `point_index`
    pub fn arc_length_at(&self, point_index: usize) -> Option<Meters> {
        (point_index < self.points.len()).then(|| Meters(self.cumulative[point_index]))
    }

    /// Length of the full loop, closing segment included
    pub fn total_length(&self) -> Meters {
        Meters(self.cumulative[self.points.len()])
    }

    /// Position and heading at a fraction of the lap
    ///
    /// Interpolates linearly between the bracketing centerline points by arc
    /// length. The fraction is clamped to [0, 1]; 0 and 1 land on the same point.
    pub fn position_at_fraction(&self, fraction: f64) -> (Vector3<f64>, Vector3<f64>) {
        let n = self.points.len();
        let target = Fraction::new(fraction).value() * self.total_length().0;

        // Last segment whose start is at or before the target
        let segment = self
            .cumulative
            .partition_point(|&s| s <= target)
            .saturating_sub(1)
            .min(n - 1);

        let start = self.cumulative[segment];
        let length = self.cumulative[segment + 1] - start;
        let t = ((target - start) / length).clamp(0.0, 1.0);

        let a = self.points[segment];
        let b = self.points[(segment + 1) % n];
        (a.lerp(&b, t), self.headings[segment])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> TrackCenterline {
        TrackCenterline::from_points(
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(1.0, 1.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            &GeometryOptions::default(),
        )
        .unwrap()
    }

    fn assert_close(a: Vector3<f64>, b: Vector3<f64>) {
        assert!(a.distance_to(&b) < 1e-9, "{:?} != {:?}", a, b);
    }

    #[test]
    fn test_square_arc_lengths() {
        let track = unit_square();
        assert_eq!(track.total_length(), Meters(4.0));
        assert_eq!(track.arc_length_at(0), Some(Meters(0.0)));
        assert_eq!(track.arc_length_at(2), Some(Meters(2.0)));
        assert_eq!(track.arc_length_at(3), Some(Meters(3.0)));
        assert_eq!(track.arc_length_at(4), None);
    }

    #[test]
    fn test_position_at_zero_and_one_coincide() {
        let track = unit_square();
        let (start, _) = track.position_at_fraction(0.0);
        let (end, _) = track.position_at_fraction(1.0);
        assert_close(start, end);
    }

    #[test]
    fn test_position_interpolates_by_arc_length() {
        let track = unit_square();
        let (p, heading) = track.position_at_fraction(0.375);
        assert_close(p, Vector3::new(1.0, 0.5, 0.0));
        assert_close(heading, Vector3::new(0.0, 1.0, 0.0));

        // Closing segment runs from (0,1) back to the origin
        let (p, heading) = track.position_at_fraction(0.875);
        assert_close(p, Vector3::new(0.0, 0.5, 0.0));
        assert_close(heading, Vector3::new(0.0, -1.0, 0.0));
    }

    #[test]
    fn test_position_clamps_out_of_range_fractions() {
        let track = unit_square();
        assert_close(track.position_at_fraction(-0.5).0, track.position_at_fraction(0.0).0);
        assert_close(track.position_at_fraction(7.0).0, track.position_at_fraction(1.0).0);
    }

    #[test]
    fn test_explicit_closure_point_is_dropped() {
        let track = TrackCenterline::from_points(
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(1.0, 1.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
                Vector3::new(0.0, 0.0, 0.0),
            ],
            &GeometryOptions::default(),
        )
        .unwrap();
        assert_eq!(track.len(), 4);
        assert_eq!(track.total_length(), Meters(4.0));
    }

    #[test]
    fn test_duplicate_points_are_merged() {
        let track = TrackCenterline::from_points(
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(1.0, 1.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            ],
            &GeometryOptions::default(),
        )
        .unwrap();
        assert_eq!(track.len(), 4);
    }

    #[test]
    fn test_too_few_distinct_points() {
        let err = TrackCenterline::from_points(
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 0.0, 0.0),
            ],
            &GeometryOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, GeometryError::TooFewPoints(2)));
    }

    #[test]
    fn test_open_polyline_is_rejected() {
        let points = (0..10).map(|i| Vector3::new(i as f64, 0.0, 0.0)).collect();
        let err = TrackCenterline::from_points(points, &GeometryOptions::default()).unwrap_err();
        assert!(matches!(err, GeometryError::OpenLoop { .. }));
    }

    #[test]
    fn test_non_finite_point_is_rejected() {
        let err = TrackCenterline::from_points(
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(f64::NAN, 0.0, 0.0),
                Vector3::new(1.0, 1.0, 0.0),
            ],
            &GeometryOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, GeometryError::NonFinitePoint(1)));
    }
}
