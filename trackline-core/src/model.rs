//! Telemetry data model
//!
//! Defines the raw samples a telemetry source produces, the session query
//! used to look them up, and the normalized samples fed to the projector.
//!
//! Coordinate system: whatever the track geometry uses. Positions are
//! carried through untouched, so a Z-up mesh stays Z-up.

use crate::units::*;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Car identifier
///
/// Sources disagree on whether cars are numbered or named, so ids are kept
/// as strings. Numeric ids on the wire (driver numbers) are stringified.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CarId(pub String);

impl CarId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CarId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u32> for CarId {
    fn from(n: u32) -> Self {
        Self(n.to_string())
    }
}

impl<'de> Deserialize<'de> for CarId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Number(u64),
            Text(String),
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Number(n) => CarId(n.to_string()),
            Wire::Text(s) => CarId(s),
        })
    }
}

/// Distance along the track, in whatever unit the source reports
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "value", rename_all = "snake_case")]
pub enum TrackDistance {
    /// Meters from the start/finish line, accumulating across laps
    Meters(f64),
    /// Laps completed as a fraction (1.0 = one full lap)
    Fraction(f64),
}

impl TrackDistance {
    /// Express this distance in laps for a track of the given length
    pub fn in_laps(&self, track_length: Meters) -> f64 {
        match *self {
            TrackDistance::Meters(m) => m / track_length.0,
            TrackDistance::Fraction(f) => f,
        }
    }

    pub fn is_finite(&self) -> bool {
        match *self {
            TrackDistance::Meters(v) | TrackDistance::Fraction(v) => v.is_finite(),
        }
    }
}

/// Which unit a source reports distances in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceUnits {
    #[default]
    Meters,
    Fraction,
}

impl DistanceUnits {
    pub fn wrap(&self, value: f64) -> TrackDistance {
        match self {
            DistanceUnits::Meters => TrackDistance::Meters(value),
            DistanceUnits::Fraction => TrackDistance::Fraction(value),
        }
    }
}

/// A single raw telemetry sample for one car
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub car_id: CarId,

    /// Elapsed seconds since session start
    pub timestamp: Seconds,

    pub distance: TrackDistance,

    pub speed: Option<MetersPerSecond>,

    pub lap_number: Option<u32>,
}

impl RawSample {
    pub fn new(car_id: impl Into<CarId>, timestamp: f64, distance: TrackDistance) -> Self {
        Self {
            car_id: car_id.into(),
            timestamp: Seconds(timestamp),
            distance,
            speed: None,
            lap_number: None,
        }
    }
}

/// Session kind enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Practice1,
    Practice2,
    Practice3,
    SprintQualifying,
    Sprint,
    Qualifying,
    Race,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Practice1 => "practice_1",
            SessionKind::Practice2 => "practice_2",
            SessionKind::Practice3 => "practice_3",
            SessionKind::SprintQualifying => "sprint_qualifying",
            SessionKind::Sprint => "sprint",
            SessionKind::Qualifying => "qualifying",
            SessionKind::Race => "race",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        match normalized.as_str() {
            "practice1" | "fp1" | "p1" => Ok(SessionKind::Practice1),
            "practice2" | "fp2" | "p2" => Ok(SessionKind::Practice2),
            "practice3" | "fp3" | "p3" => Ok(SessionKind::Practice3),
            "sprintqualifying" | "sprintshootout" | "sq" => Ok(SessionKind::SprintQualifying),
            "sprint" | "s" => Ok(SessionKind::Sprint),
            "qualifying" | "quali" | "q" => Ok(SessionKind::Qualifying),
            "race" | "r" => Ok(SessionKind::Race),
            _ => Err(format!("Unknown session kind: {}", s)),
        }
    }
}

/// Identifies one captured session; doubles as the cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionQuery {
    series_year: u16,
    circuit: String,
    session_kind: SessionKind,
}

impl SessionQuery {
    pub fn new(series_year: u16, circuit: &str, session_kind: SessionKind) -> Self {
        Self {
            series_year,
            circuit: slugify(circuit),
            session_kind,
        }
    }

    pub fn series_year(&self) -> u16 {
        self.series_year
    }

    pub fn circuit(&self) -> &str {
        &self.circuit
    }

    pub fn session_kind(&self) -> SessionKind {
        self.session_kind
    }

    /// Same circuit and session kind in a different year
    pub fn with_year(&self, series_year: u16) -> Self {
        Self {
            series_year,
            ..self.clone()
        }
    }

    /// `{series_year}_{circuit_identifier}_{session_kind}`
    pub fn cache_key(&self) -> String {
        format!("{}_{}_{}", self.series_year, self.circuit, self.session_kind)
    }

    /// The requested session followed by up to `fallback_years` older years
    ///
    /// Stops early rather than producing year 0.
    pub fn fallback_candidates(&self, fallback_years: u16) -> impl Iterator<Item = SessionQuery> + '_ {
        (0..=fallback_years).map_while(move |back| {
            self.series_year
                .checked_sub(back)
                .filter(|year| *year > 0)
                .map(|year| self.with_year(year))
        })
    }
}

impl fmt::Display for SessionQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.series_year, self.circuit, self.session_kind)
    }
}

/// Lowercase, with runs of anything non-alphanumeric collapsed to `-`
fn slugify(s: &str) -> String {
    let mut slug = String::with_capacity(s.len());
    for c in s.trim().chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// A sample rescaled onto the unit interval in both time and track distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSample {
    pub car_id: CarId,

    /// Elapsed time divided by the car's final timestamp
    pub time_fraction: Fraction,

    /// Position within the current lap
    pub distance_fraction: Fraction,

    /// Completed laps before this sample
    pub lap: i64,
}

impl NormalizedSample {
    /// Lap-unwrapped distance (lap + distance_fraction)
    pub fn unwrapped_distance(&self) -> f64 {
        self.lap as f64 + self.distance_fraction.0
    }
}

/// 3D vector with typed components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T> Vector3<T> {
    pub fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }
}

impl Vector3<f64> {
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn sub(&self, other: &Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn add(&self, other: &Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn scale(&self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn distance_to(&self, other: &Self) -> f64 {
        self.sub(other).length()
    }

    /// Unit vector in the same direction, or None for a zero-length vector
    pub fn normalized(&self) -> Option<Self> {
        let len = self.length();
        if len > f64::EPSILON && len.is_finite() {
            Some(self.scale(1.0 / len))
        } else {
            None
        }
    }

    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        self.add(&other.sub(self).scale(t))
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}
