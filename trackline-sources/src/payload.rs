//! Telemetry payload decoding
//!
//! Payloads are cached verbatim and decoded on every read, so a decoder fix
//! applies to already-cached sessions too.

use serde::Deserialize;
use trackline_core::model::DistanceUnits;
use trackline_core::units::{MetersPerSecond, Seconds};
use trackline_core::{CarId, RawSample, SourceError};

/// One sample as the telemetry API sends it
#[derive(Debug, Deserialize)]
struct WireSample {
    #[serde(alias = "driver_number")]
    car_id: CarId,

    #[serde(alias = "time", alias = "t")]
    timestamp: f64,

    #[serde(alias = "distance_along_track", alias = "d")]
    distance: f64,

    #[serde(default)]
    speed: Option<f64>,

    #[serde(default, alias = "lap")]
    lap_number: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WirePayload {
    Samples(Vec<WireSample>),
    Wrapped { samples: Vec<WireSample> },
}

/// Decode a raw payload into samples, in payload order
pub fn parse_samples(payload: &str, units: DistanceUnits) -> Result<Vec<RawSample>, SourceError> {
    let wire: WirePayload = serde_json::from_str(payload)
        .map_err(|e| SourceError::MalformedPayload(format!("not a sample array: {}", e)))?;
    let samples = match wire {
        WirePayload::Samples(s) | WirePayload::Wrapped { samples: s } => s,
    };

    Ok(samples
        .into_iter()
        .map(|w| RawSample {
            car_id: w.car_id,
            timestamp: Seconds(w.timestamp),
            distance: units.wrap(w.distance),
            speed: w.speed.map(MetersPerSecond),
            lap_number: w.lap_number,
        })
        .collect())
}

/// True when the payload is an empty sample list
pub fn is_empty_payload(payload: &str) -> bool {
    matches!(
        serde_json::from_str::<WirePayload>(payload),
        Ok(WirePayload::Samples(s)) | Ok(WirePayload::Wrapped { samples: s }) if s.is_empty()
    )
}
