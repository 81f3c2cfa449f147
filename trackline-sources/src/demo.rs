//! Demo transport that generates synthetic session telemetry
//!
//! Simulates a field of cars lapping a circuit made of straights, braking
//! zones, corners and acceleration phases. Samples arrive at irregular
//! intervals with the occasional late (out-of-order) packet, the way real
//! timing feeds do. Output is deterministic for a given query.

use async_trait::async_trait;
use serde_json::json;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;
use trackline_core::{
    GeometryError, GeometryOptions, SessionQuery, TelemetryTransport, TrackCenterline,
    TransportError, TransportResponse, Vector3,
};

// =============================================================================
// Track definition: a sequence of segments that form a lap
// =============================================================================

#[derive(Clone, Copy)]
struct TrackSegment {
    duration: f64,     // seconds to traverse at reference pace
    target_speed: f64, // m/s at end of segment
}

/// A simple circuit: ~85s lap, mix of corners and straights
fn demo_segments() -> Vec<TrackSegment> {
    let seg = |duration, target_speed| TrackSegment {
        duration,
        target_speed,
    };
    vec![
        // Start/finish straight
        seg(8.0, 75.0),
        // T1: heavy braking into slow right-hander
        seg(3.0, 28.0),
        seg(4.0, 25.0),
        seg(3.5, 55.0),
        // Short straight
        seg(4.0, 62.0),
        // T2: medium braking into fast left-hander
        seg(2.0, 45.0),
        seg(3.5, 42.0),
        seg(3.0, 58.0),
        // Back straight
        seg(10.0, 80.0),
        // T3: chicane
        seg(2.5, 35.0),
        seg(2.0, 32.0),
        seg(2.0, 30.0),
        seg(3.0, 50.0),
        // Medium straight
        seg(6.0, 68.0),
        // T4: long sweeping right
        seg(1.5, 52.0),
        seg(5.0, 50.0),
        seg(3.0, 60.0),
        // T5: tight hairpin left
        seg(3.5, 22.0),
        seg(4.5, 20.0),
        seg(4.0, 55.0),
        // Run to start/finish
        seg(6.0, 72.0),
    ]
}

fn smoothstep(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Simple deterministic noise from a seed
fn noise(seed: f64) -> f64 {
    let x = (seed * 12.9898 + 78.233).sin() * 43_758.547;
    x - x.floor()
}

/// Small jitter centered around 0
fn jitter(seed: f64, amplitude: f64) -> f64 {
    (noise(seed) - 0.5) * 2.0 * amplitude
}

/// Speed and distance along one reference-pace lap
///
/// Distance is integrated once up front at a fixed step; lookups
/// interpolate the table.
struct LapProfile {
    segments: Vec<TrackSegment>,
    duration: f64,
    step: f64,
    distance: Vec<f64>,
}

impl LapProfile {
    const STEP: f64 = 0.05;

    fn new(segments: Vec<TrackSegment>) -> Self {
        let duration: f64 = segments.iter().map(|s| s.duration).sum();
        let mut profile = Self {
            segments,
            duration,
            step: Self::STEP,
            distance: Vec::new(),
        };

        let steps = (duration / Self::STEP).ceil() as usize;
        let mut distance = Vec::with_capacity(steps + 1);
        let mut travelled = 0.0;
        distance.push(0.0);
        for i in 0..steps {
            let a = i as f64 * Self::STEP;
            let b = ((i + 1) as f64 * Self::STEP).min(duration);
            travelled += 0.5 * (profile.speed_at(a) + profile.speed_at(b)) * (b - a);
            distance.push(travelled);
        }
        profile.distance = distance;
        profile
    }

    fn lap_length(&self) -> f64 {
        self.distance.last().copied().unwrap_or(0.0)
    }

    fn speed_at(&self, lap_time: f64) -> f64 {
        let t = lap_time.rem_euclid(self.duration);
        let mut elapsed = 0.0;
        for (i, seg) in self.segments.iter().enumerate() {
            if elapsed + seg.duration > t || i == self.segments.len() - 1 {
                let prev = if i > 0 {
                    self.segments[i - 1].target_speed
                } else {
                    self.segments[self.segments.len() - 1].target_speed
                };
                let seg_t = ((t - elapsed) / seg.duration).clamp(0.0, 1.0);
                return lerp(prev, seg.target_speed, smoothstep(seg_t));
            }
            elapsed += seg.duration;
        }
        0.0
    }

    /// Meters from the line after `lap_time` seconds into a lap
    fn distance_at(&self, lap_time: f64) -> f64 {
        let t = lap_time.clamp(0.0, self.duration);
        let pos = t / self.step;
        let i = (pos.floor() as usize).min(self.distance.len().saturating_sub(2));
        let s = (pos - i as f64).clamp(0.0, 1.0);
        lerp(self.distance[i], self.distance[i + 1], s)
    }
}

// =============================================================================
// DemoTransport
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct DemoConfig {
    pub cars: u32,
    pub laps: u32,

    /// Mean seconds between samples of one car
    pub sample_interval: f64,

    /// Newest season with data; later years report no data
    pub latest_year: Option<u16>,

    /// Add a car that retires after a single sample
    pub include_retired_car: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            cars: 5,
            laps: 2,
            sample_interval: 0.25,
            latest_year: None,
            include_retired_car: false,
        }
    }
}

pub struct DemoTransport {
    config: DemoConfig,
    profile: LapProfile,
    requests: AtomicU32,
}

impl DemoTransport {
    pub fn new(config: DemoConfig) -> Self {
        Self {
            config,
            profile: LapProfile::new(demo_segments()),
            requests: AtomicU32::new(0),
        }
    }

    /// Length of the demo circuit in meters
    pub fn lap_length(&self) -> f64 {
        self.profile.lap_length()
    }

    /// Number of requests served so far
    pub fn requests(&self) -> u32 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Centerline matching the generated distances
    pub fn centerline(&self) -> Result<TrackCenterline, GeometryError> {
        demo_centerline(self.lap_length())
    }

    /// Build the payload for a session, exactly as the API would send it
    pub fn generate(&self, query: &SessionQuery) -> String {
        let seed = query
            .cache_key()
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32)) as f64
            % 1000.0;
        let lap_length = self.profile.lap_length();
        let interval = self.config.sample_interval.max(0.01);

        let mut samples = Vec::new();
        for car in 0..self.config.cars {
            // Each car a few tenths off the reference pace
            let pace = 1.0 + 0.004 * car as f64 + jitter(seed + car as f64, 0.002);
            let car_duration = self.profile.duration * pace * self.config.laps as f64;
            let car_number = car + 1;

            let mut car_samples = Vec::new();
            let mut t = 0.0;
            let mut n = 0.0;
            loop {
                let lap = ((t / pace) / self.profile.duration).floor();
                let lap_time = t / pace - lap * self.profile.duration;
                let distance = lap * lap_length + self.profile.distance_at(lap_time);
                let speed = (self.profile.speed_at(lap_time) / pace
                    + jitter(seed + n * 1.3 + car as f64, 0.3))
                .max(0.0);

                car_samples.push(json!({
                    "driver_number": car_number,
                    "t": round3(t),
                    "d": round3(distance),
                    "speed": round3(speed),
                    "lap": lap as u32 + 1,
                }));

                if t >= car_duration {
                    break;
                }
                n += 1.0;
                t = (t + interval * (1.0 + jitter(seed + n * 0.7 + car as f64 * 11.0, 0.4)))
                    .min(car_duration);
            }

            // Late packets: swap a few neighbours, never the first or last sample
            let len = car_samples.len();
            let mut i = 7;
            while i + 2 < len {
                car_samples.swap(i, i + 1);
                i += 17;
            }
            samples.extend(car_samples);
        }

        if self.config.include_retired_car {
            samples.push(json!({
                "driver_number": self.config.cars + 1,
                "t": 0.0,
                "d": 0.0,
                "lap": 1,
            }));
        }

        serde_json::Value::Array(samples).to_string()
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

impl Default for DemoTransport {
    fn default() -> Self {
        Self::new(DemoConfig::default())
    }
}

#[async_trait]
impl TelemetryTransport for DemoTransport {
    fn name(&self) -> &str {
        "demo"
    }

    async fn get(&self, query: &SessionQuery) -> Result<TransportResponse, TransportError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if let Some(latest) = self.config.latest_year {
            if query.series_year() > latest {
                debug!("Demo has no data for {}", query);
                return Ok(TransportResponse::NoData);
            }
        }
        Ok(TransportResponse::Payload(self.generate(query)))
    }
}

/// Stadium-shaped loop (two straights joined by half circles) of the given length
///
/// Lies in the XY plane, starting at the left end of the bottom straight
/// and running counter-clockwise. The last arc ends on the first point, so
/// the loop closes implicitly.
pub fn demo_centerline(lap_length: f64) -> Result<TrackCenterline, GeometryError> {
    const STRAIGHT_POINTS: usize = 16;
    const ARC_POINTS: usize = 48;

    // Straights are each twice the radius
    let r = lap_length / (4.0 + 2.0 * PI);
    let half = r;

    let mut points = Vec::with_capacity(2 * (STRAIGHT_POINTS + ARC_POINTS));
    let straight = |points: &mut Vec<Vector3<f64>>, from: f64, to: f64, y: f64| {
        for i in 0..STRAIGHT_POINTS {
            let s = i as f64 / STRAIGHT_POINTS as f64;
            points.push(Vector3::new(lerp(from, to, s), y, 0.0));
        }
    };
    let arc = |points: &mut Vec<Vector3<f64>>, cx: f64, start: f64| {
        for i in 0..ARC_POINTS {
            let a = start + PI * i as f64 / ARC_POINTS as f64;
            points.push(Vector3::new(cx + r * a.cos(), r * a.sin(), 0.0));
        }
    };

    straight(&mut points, -half, half, -r);
    arc(&mut points, half, -PI / 2.0);
    straight(&mut points, half, -half, r);
    arc(&mut points, -half, PI / 2.0);

    TrackCenterline::from_points(points, &GeometryOptions::default())
}
