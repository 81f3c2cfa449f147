//! Motion curve handed to renderers
//!
//! A motion curve is produced wholesale by the projector and never mutated
//! afterwards. Renderers read it through [`MotionCurve::sample_at`] and
//! [`MotionCurve::duration`] and own everything else.

use crate::model::{CarId, Vector3};
use crate::units::{Fraction, Seconds};
use serde::{Deserialize, Serialize};

/// One resampled point of a car's motion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionFrame {
    pub time_fraction: Fraction,

    /// Position within the current lap
    pub distance_fraction: Fraction,

    /// Completed laps
    pub lap: i64,

    pub position: Vector3<f64>,

    /// Unit direction of travel
    pub heading: Vector3<f64>,
}

/// Time-indexed positions and headings for one car
///
/// Deserializing checks the same invariants the projector guarantees: at
/// least one frame, ordered by time fraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CurveData")]
pub struct MotionCurve {
    car_id: CarId,
    duration: Seconds,
    frames: Vec<MotionFrame>,
}

#[derive(Deserialize)]
struct CurveData {
    car_id: CarId,
    duration: Seconds,
    frames: Vec<MotionFrame>,
}

impl TryFrom<CurveData> for MotionCurve {
    type Error = String;

    fn try_from(data: CurveData) -> Result<Self, Self::Error> {
        if data.frames.is_empty() {
            return Err(format!("motion curve for car {} has no frames", data.car_id));
        }
        let finite = data.frames.iter().all(|f| f.time_fraction.0.is_finite());
        let ordered = data
            .frames
            .windows(2)
            .all(|w| w[0].time_fraction.0 <= w[1].time_fraction.0);
        if !(finite && ordered) {
            return Err(format!(
                "motion curve for car {} is not ordered by time",
                data.car_id
            ));
        }
        Ok(Self::new(data.car_id, data.duration, data.frames))
    }
}

/// A renderer keyframe (1-based frame numbers, as animation tools use)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Keyframe {
    pub frame: u32,
    pub position: Vector3<f64>,
    pub heading: Vector3<f64>,
}

impl MotionCurve {
    /// Frames must be sorted by time fraction and non-empty
    pub(crate) fn new(car_id: CarId, duration: Seconds, frames: Vec<MotionFrame>) -> Self {
        Self {
            car_id,
            duration,
            frames,
        }
    }

    pub fn car_id(&self) -> &CarId {
        &self.car_id
    }

    /// Real-world length of the captured session for this car
    pub fn duration(&self) -> Seconds {
        self.duration
    }

    pub fn frames(&self) -> &[MotionFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Position and heading at any time fraction
    ///
    /// Interpolates between the two adjacent frames; the heading is
    /// re-normalized. Out-of-range fractions are clamped.
    pub fn sample_at(&self, time_fraction: f64) -> (Vector3<f64>, Vector3<f64>) {
        let t = Fraction::new(time_fraction).value();
        let next = self
            .frames
            .partition_point(|f| f.time_fraction.0 <= t)
            .min(self.frames.len() - 1);
        let prev = next.saturating_sub(1);

        let a = &self.frames[prev];
        let b = &self.frames[next];
        let span = b.time_fraction.0 - a.time_fraction.0;
        if span <= 0.0 {
            return (b.position, b.heading);
        }

        let s = ((t - a.time_fraction.0) / span).clamp(0.0, 1.0);
        let heading = a.heading.lerp(&b.heading, s).normalized().unwrap_or(a.heading);
        (a.position.lerp(&b.position, s), heading)
    }

    /// Index of the frame nearest to `time_fraction`
    pub fn frame_index_for(&self, time_fraction: f64) -> usize {
        let t = Fraction::new(time_fraction).value();
        let next = self.frames.partition_point(|f| f.time_fraction.0 < t);
        if next == 0 {
            return 0;
        }
        if next >= self.frames.len() {
            return self.frames.len() - 1;
        }
        let before = t - self.frames[next - 1].time_fraction.0;
        let after = self.frames[next].time_fraction.0 - t;
        if before <= after {
            next - 1
        } else {
            next
        }
    }

    /// Map frames onto renderer frame numbers
    ///
    /// `speed_multiplier` > 1 plays faster than real time. Frames that land
    /// on an already-used frame number are skipped. Frame numbers saturate
    /// at `u32::MAX`.
    pub fn to_keyframes(&self, fps: f64, speed_multiplier: f64) -> Vec<Keyframe> {
        let scale = if speed_multiplier > 0.0 {
            self.duration.0 * fps / speed_multiplier
        } else {
            self.duration.0 * fps
        };

        let mut keyframes: Vec<Keyframe> = Vec::with_capacity(self.frames.len());
        for f in &self.frames {
            let frame = frame_number((f.time_fraction.0 * scale).round());
            if keyframes.last().map_or(false, |k| k.frame >= frame) {
                continue;
            }
            keyframes.push(Keyframe {
                frame,
                position: f.position,
                heading: f.heading,
            });
        }
        keyframes
    }
}

/// 1-based frame number for a 0-based offset; NaN maps to the first frame
fn frame_number(offset: f64) -> u32 {
    const LAST_OFFSET: f64 = (u32::MAX - 1) as f64;
    if offset >= LAST_OFFSET {
        u32::MAX
    } else if offset > 0.0 {
        offset as u32 + 1
    } else {
        1
    }
}
