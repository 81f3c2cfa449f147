//! Spline projector
//!
//! Fits a monotone curve through a car's `(time, lap-unwrapped distance)`
//! samples, resamples it on a uniform time grid and places each sample on
//! the track centerline. Position along the track never moves backwards in
//! time; lap wrapping is carried explicitly in each frame's `lap`.

use crate::curve::{MotionCurve, MotionFrame};
use crate::error::ProjectionError;
use crate::geometry::TrackCenterline;
use crate::interpolate::{AutoInterpolant, MonotoneInterpolant};
use crate::model::NormalizedSample;
use crate::normalize::fold_laps;
use crate::units::{Fraction, Seconds};
use tracing::debug;

/// Upper bound on frames per curve
pub const MAX_RESOLUTION: usize = 100_000;

/// Project with the default interpolant (linear for 2 samples, monotone cubic otherwise)
///
/// `duration` is the car's real-world span, carried on the curve so renderers
/// can map time fractions to wall-clock frames.
pub fn project(
    normalized: &[NormalizedSample],
    track: &TrackCenterline,
    resolution: usize,
    duration: Seconds,
) -> Result<MotionCurve, ProjectionError> {
    project_with::<AutoInterpolant>(normalized, track, resolution, duration)
}

pub fn project_with<I: MonotoneInterpolant>(
    normalized: &[NormalizedSample],
    track: &TrackCenterline,
    resolution: usize,
    duration: Seconds,
) -> Result<MotionCurve, ProjectionError> {
    if !(2..=MAX_RESOLUTION).contains(&resolution) {
        return Err(ProjectionError::InvalidResolution(resolution));
    }
    let car_id = match normalized.first() {
        Some(first) if normalized.len() >= 2 => first.car_id.clone(),
        _ => return Err(ProjectionError::TooFewSamples(normalized.len())),
    };
    if normalized.iter().any(|s| s.car_id != car_id) {
        return Err(ProjectionError::MixedCars);
    }

    let mut knots: Vec<(f64, f64)> = Vec::with_capacity(normalized.len());
    let mut clamped = 0;
    for sample in normalized {
        let mut distance = sample.unwrapped_distance();
        if let Some(&(_, prev)) = knots.last() {
            if distance < prev {
                distance = prev;
                clamped += 1;
            }
        }
        knots.push((sample.time_fraction.0, distance));
    }
    if clamped > 0 {
        debug!("Car {}: clamped {} backward distance readings", car_id, clamped);
    }

    let interpolant = I::fit(&knots)?;

    let mut frames = Vec::with_capacity(resolution);
    let mut previous = f64::MIN;
    for i in 0..resolution {
        let t = i as f64 / (resolution - 1) as f64;
        let distance = interpolant.eval(t).max(previous);
        previous = distance;

        let (lap, fraction) = fold_laps(distance);
        let (position, heading) = track.position_at_fraction(fraction);
        frames.push(MotionFrame {
            time_fraction: Fraction::new(t),
            distance_fraction: Fraction::new(fraction),
            lap,
            position,
            heading,
        });
    }

    Ok(MotionCurve::new(car_id, duration, frames))
}
