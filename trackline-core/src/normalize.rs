//! Normalizer
//!
//! Turns raw samples into time and distance fractions. Samples whose
//! timestamp does not advance past the previous retained sample of the same
//! car are dropped, never reordered.

use crate::error::NormalizeError;
use crate::geometry::TrackCenterline;
use crate::model::{CarId, NormalizedSample, RawSample};
use crate::units::Fraction;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Split a lap-unwrapped distance into (completed laps, fraction of lap)
///
/// A positive whole number of laps maps to the end of the previous lap
/// (fraction 1.0) so a finished lap does not snap back to the start.
pub fn fold_laps(laps: f64) -> (i64, f64) {
    let whole = laps.floor();
    let fraction = laps - whole;
    if fraction == 0.0 && laps > 0.0 {
        (whole as i64 - 1, 1.0)
    } else {
        (whole as i64, fraction.clamp(0.0, 1.0))
    }
}

fn is_valid(sample: &RawSample) -> bool {
    sample.timestamp.0.is_finite() && sample.timestamp.0 >= 0.0 && sample.distance.is_finite()
}

/// Normalize the samples of every car in `samples`
///
/// Fails with the first car (by input order) left with fewer than two valid
/// samples. Use [`normalize_session`] to keep going past failed cars.
pub fn normalize(
    samples: &[RawSample],
    track: &TrackCenterline,
) -> Result<Vec<NormalizedSample>, NormalizeError> {
    let mut last_kept: HashMap<&CarId, f64> = HashMap::new();
    let mut order: Vec<&CarId> = Vec::new();
    let mut retained: Vec<&RawSample> = Vec::with_capacity(samples.len());

    for sample in samples {
        if !order.contains(&&sample.car_id) {
            order.push(&sample.car_id);
        }
        if !is_valid(sample) {
            continue;
        }
        match last_kept.get(&sample.car_id) {
            Some(&prev) if sample.timestamp.0 <= prev => continue,
            _ => {
                last_kept.insert(&sample.car_id, sample.timestamp.0);
                retained.push(sample);
            }
        }
    }

    if retained.len() < samples.len() {
        debug!("Dropped {} invalid or out-of-order samples", samples.len() - retained.len());
    }

    let mut counts: HashMap<&CarId, usize> = HashMap::new();
    for sample in &retained {
        *counts.entry(&sample.car_id).or_default() += 1;
    }
    for car_id in &order {
        let valid = counts.get(car_id).copied().unwrap_or(0);
        if valid < 2 {
            return Err(NormalizeError::InsufficientSamples {
                car_id: (*car_id).clone(),
                valid,
            });
        }
    }

    let per_lap = per_lap_distance_cars(&retained, track);
    let mut first_lap: HashMap<&CarId, u32> = HashMap::new();

    let normalized = retained
        .iter()
        .map(|sample| {
            let t_max = last_kept[&sample.car_id];
            let mut laps = sample.distance.in_laps(track.total_length());
            if per_lap.contains(&sample.car_id) {
                let first = *first_lap
                    .entry(&sample.car_id)
                    .or_insert(sample.lap_number.unwrap_or(0));
                laps += sample.lap_number.unwrap_or(first).saturating_sub(first) as f64;
            }
            let (lap, fraction) = fold_laps(laps);
            NormalizedSample {
                car_id: sample.car_id.clone(),
                time_fraction: Fraction::new(sample.timestamp.0 / t_max),
                distance_fraction: Fraction::new(fraction),
                lap,
            }
        })
        .collect();

    Ok(normalized)
}

/// Cars whose distances reset at the line each lap
///
/// Recognised when every sample carries a lap number, the lap number
/// changes, and no distance exceeds a single lap.
fn per_lap_distance_cars<'a>(
    retained: &[&'a RawSample],
    track: &TrackCenterline,
) -> HashSet<&'a CarId> {
    let mut stats: HashMap<&CarId, (bool, Option<u32>, bool, f64)> = HashMap::new();
    for sample in retained {
        let entry = stats
            .entry(&sample.car_id)
            .or_insert((true, sample.lap_number, false, f64::MIN));
        entry.0 &= sample.lap_number.is_some();
        if sample.lap_number != entry.1 {
            entry.2 = true;
        }
        entry.3 = entry.3.max(sample.distance.in_laps(track.total_length()));
    }

    stats
        .into_iter()
        .filter(|(_, (all_numbered, _, lap_changes, max_laps))| {
            *all_numbered && *lap_changes && *max_laps <= 1.0
        })
        .map(|(car_id, _)| car_id)
        .collect()
}

/// Normalize each car independently
///
/// One car failing does not affect the others. Cars are ordered by id.
pub fn normalize_session(
    samples: &[RawSample],
    track: &TrackCenterline,
) -> BTreeMap<CarId, Result<Vec<NormalizedSample>, NormalizeError>> {
    let mut by_car: BTreeMap<CarId, Vec<RawSample>> = BTreeMap::new();
    for sample in samples {
        by_car
            .entry(sample.car_id.clone())
            .or_default()
            .push(sample.clone());
    }

    by_car
        .into_iter()
        .map(|(car_id, car_samples)| {
            let result = normalize(&car_samples, track);
            (car_id, result)
        })
        .collect()
}
